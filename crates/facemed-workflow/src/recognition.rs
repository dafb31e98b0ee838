//! 人脸识别查询
//!
//! 识别结果只在本次交互中使用，不做缓存；返回前按当前查看者过滤。

use chrono::{DateTime, Utc};
use facemed_client::{CameraDevice, CameraLease, RecognitionApi, SessionStore};
use facemed_core::{redact, Capabilities, FacemedError, ImageUpload, Result, Role, Viewer, VisibleProfile};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// 过滤后的识别结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecognitionOutcome {
    pub matched: bool,
    pub confidence: Option<f32>,
    pub profile: Option<VisibleProfile>,
    pub timestamp: DateTime<Utc>,
}

/// 识别服务
pub struct RecognitionService {
    api: Arc<dyn RecognitionApi>,
    session: SessionStore,
    max_image_bytes: usize,
}

impl RecognitionService {
    pub fn new(api: Arc<dyn RecognitionApi>, session: SessionStore, max_image_bytes: usize) -> Self {
        Self {
            api,
            session,
            max_image_bytes,
        }
    }

    /// 识别图像中的人脸
    pub async fn recognize(&self, image: &ImageUpload) -> Result<RecognitionOutcome> {
        check_image(image, self.max_image_bytes)?;

        let result = self.api.recognize(image).await?;
        info!(
            "Recognition finished: matched={} confidence={:?}",
            result.matched, result.confidence
        );

        let (viewer_id, role, capabilities) = match self.session.get() {
            Some(session) => (Some(session.user_id), session.role, self.session.capabilities()),
            None => (None, Role::User, Capabilities::default()),
        };
        let profile = result.identity.as_ref().map(|identity| {
            let viewer = Viewer::for_subject(viewer_id, role, identity.id);
            redact(identity, viewer, &capabilities)
        });

        Ok(RecognitionOutcome {
            matched: result.matched && profile.is_some(),
            confidence: result.confidence,
            profile,
            timestamp: result.timestamp,
        })
    }

    /// 从摄像头采集一帧并识别
    pub async fn recognize_from<D: CameraDevice>(&self, device: &mut D) -> Result<RecognitionOutcome> {
        let image = {
            let mut lease = CameraLease::acquire(device)?;
            lease.capture()?
        };
        self.recognize(&image).await
    }
}

/// 上传前检查图像大小
pub fn check_image(image: &ImageUpload, max_bytes: usize) -> Result<()> {
    if image.is_empty() {
        return Err(FacemedError::validation("image", "Image is empty"));
    }
    if image.len() > max_bytes {
        return Err(FacemedError::validation(
            "image",
            format!(
                "Image size exceeds maximum allowed size of {} MB",
                max_bytes / (1024 * 1024)
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{identity, session_for, FakeBackend};
    use uuid::Uuid;

    const LIMIT: usize = 5 * 1024 * 1024;

    fn service(role: Option<Role>) -> (RecognitionService, Arc<FakeBackend>) {
        let me = Uuid::new_v4();
        let backend = FakeBackend::new(session_for(me, Role::User));
        let (store, writer) = SessionStore::in_memory();
        if let Some(role) = role {
            writer.set(session_for(me, role)).unwrap();
        }
        (RecognitionService::new(backend.clone(), store, LIMIT), backend)
    }

    fn private_subject() -> facemed_core::Identity {
        let mut subject = identity("Grace");
        subject.privacy.is_name_public = false;
        subject.medical_info.allergies = Some("Latex".to_string());
        subject
    }

    #[tokio::test]
    async fn test_user_sees_redacted_match() {
        let (service, backend) = service(Some(Role::User));
        *backend.recognized.lock().unwrap() = Some(private_subject());

        let outcome = service.recognize(&ImageUpload::new("a.jpg", vec![1; 16])).await.unwrap();
        assert!(outcome.matched);
        let profile = outcome.profile.unwrap();
        assert!(profile.is_private_account());
        assert_eq!(profile.medical_info, None);
    }

    #[tokio::test]
    async fn test_doctor_sees_medical_info() {
        let (service, backend) = service(Some(Role::Doctor));
        *backend.recognized.lock().unwrap() = Some(private_subject());

        let outcome = service.recognize(&ImageUpload::new("a.jpg", vec![1; 16])).await.unwrap();
        let profile = outcome.profile.unwrap();
        assert_eq!(profile.name, "Grace");
        assert!(profile.medical_info.is_some());
    }

    #[tokio::test]
    async fn test_no_match() {
        let (service, _) = service(None);
        let outcome = service.recognize(&ImageUpload::new("a.jpg", vec![1; 16])).await.unwrap();
        assert!(!outcome.matched);
        assert!(outcome.profile.is_none());
    }

    #[tokio::test]
    async fn test_oversized_image_is_rejected_locally() {
        let (service, backend) = service(Some(Role::User));
        let image = ImageUpload::new("big.jpg", vec![0; LIMIT + 1]);
        assert!(matches!(
            service.recognize(&image).await,
            Err(FacemedError::Validation { .. })
        ));
        assert!(service.recognize(&ImageUpload::new("empty.jpg", Vec::new())).await.is_err());
        assert_eq!(backend.network_calls(), 0);
    }
}
