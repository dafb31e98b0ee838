//! 认证服务
//!
//! 持有唯一的 [`SessionWriter`]，是进程中唯一可以建立或清除会话的组件。

use facemed_client::{AuthApi, SessionStore, SessionWriter};
use facemed_core::utils::{normalize_email, validate_password};
use facemed_core::{
    ChangePasswordRequest, FaceConfirmRequest, FacemedError, ImageUpload, LoginRequest,
    ProvisionalIdentity, Result, Session,
};
use std::sync::Arc;
use tracing::{info, warn};

/// 认证服务
pub struct AuthService {
    api: Arc<dyn AuthApi>,
    writer: SessionWriter,
}

impl AuthService {
    pub fn new(api: Arc<dyn AuthApi>, writer: SessionWriter) -> Self {
        Self { api, writer }
    }

    /// 只读会话句柄
    pub fn session(&self) -> SessionStore {
        self.writer.store()
    }

    /// 邮箱密码登录
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(FacemedError::validation("password", "Password is required"));
        }

        let session = self
            .api
            .login(&LoginRequest {
                email,
                password: password.to_string(),
            })
            .await?;
        self.writer.set(session.clone())?;
        info!("User {} logged in with password", session.user_id);
        Ok(session)
    }

    /// 提交人脸图像，得到的初步身份不授予任何访问权限
    pub async fn submit_face(&self, image: &ImageUpload) -> Result<ProvisionalIdentity> {
        if image.is_empty() {
            return Err(FacemedError::validation("image", "Image is empty"));
        }
        let identity = self.api.submit_face(image).await?;
        info!("Face provisionally matched ({})", identity.correlation_id);
        Ok(identity)
    }

    /// 用密码确认初步身份并建立会话
    pub async fn confirm_face(&self, identity: &ProvisionalIdentity, password: &str) -> Result<Session> {
        if password.is_empty() {
            return Err(FacemedError::validation("password", "Password is required"));
        }

        let session = self
            .api
            .confirm_face(&FaceConfirmRequest {
                correlation_id: identity.correlation_id.clone(),
                password: password.to_string(),
            })
            .await?;
        self.writer.set(session.clone())?;
        info!("User {} logged in with face confirmation", session.user_id);
        Ok(session)
    }

    /// 修改密码
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        self.session().require()?;
        if current_password.is_empty() {
            return Err(FacemedError::validation("current_password", "Current password is required"));
        }
        validate_password(new_password)?;
        if current_password == new_password {
            return Err(FacemedError::validation(
                "new_password",
                "New password must be different from the current password",
            ));
        }

        self.api
            .change_password(&ChangePasswordRequest {
                current_password: current_password.to_string(),
                new_password: new_password.to_string(),
            })
            .await?;
        info!("Password changed");
        Ok(())
    }

    /// 退出登录
    pub fn logout(&self) -> Result<()> {
        if !self.session().is_authenticated() {
            warn!("Logout requested without an active session");
        }
        self.writer.clear()
    }
}
