//! 用户注册

use facemed_client::AuthApi;
use facemed_core::utils::{normalize_email, sanitize_text, validate_name, validate_password, validate_phone};
use facemed_core::{FacemedError, ImageUpload, RegistrationReceipt, RegistrationRequest, Result};
use std::sync::Arc;
use tracing::info;

use crate::recognition::check_image;

/// 每次注册最多上传的人脸图像数量
pub const MAX_FACE_IMAGES: usize = 5;

/// 注册服务
pub struct RegistrationService {
    api: Arc<dyn AuthApi>,
    max_image_bytes: usize,
}

impl RegistrationService {
    pub fn new(api: Arc<dyn AuthApi>, max_image_bytes: usize) -> Self {
        Self { api, max_image_bytes }
    }

    /// 本地校验并规范化注册信息
    pub fn validate(&self, request: RegistrationRequest, images: &[ImageUpload]) -> Result<RegistrationRequest> {
        if images.is_empty() {
            return Err(FacemedError::validation("face_image", "At least one face image is required"));
        }
        if images.len() > MAX_FACE_IMAGES {
            return Err(FacemedError::validation(
                "face_image",
                format!("At most {} face images can be uploaded", MAX_FACE_IMAGES),
            ));
        }
        for image in images {
            check_image(image, self.max_image_bytes)?;
        }

        validate_password(&request.password)?;
        Ok(RegistrationRequest {
            name: validate_name(&request.name)?,
            email: normalize_email(&request.email)?,
            phone: match sanitize_text(request.phone.as_deref()) {
                Some(phone) => Some(validate_phone(&phone)?),
                None => None,
            },
            date_of_birth: request.date_of_birth,
            nationality: sanitize_text(request.nationality.as_deref()),
            gender: sanitize_text(request.gender.as_deref()),
            id_number: sanitize_text(request.id_number.as_deref()),
            password: request.password,
        })
    }

    /// 注册新用户
    ///
    /// 邮箱或人脸已存在时服务端返回的冲突信息原样透出。
    pub async fn register(&self, request: RegistrationRequest, images: &[ImageUpload]) -> Result<RegistrationReceipt> {
        let request = self.validate(request, images)?;
        let receipt = self.api.register(&request, images).await?;
        if !receipt.success {
            return Err(FacemedError::Server(receipt.message));
        }
        info!("Registered {} ({:?})", request.email, receipt.user_id);
        Ok(receipt)
    }
}
