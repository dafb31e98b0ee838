//! 人脸登录确认流程
//!
//! 人脸匹配只产生初步身份（姓名、头像和关联ID），不包含任何令牌；
//! 只有在密码确认成功后才会建立会话。
//!
//! ```text
//! Idle -> Submitting -> ProvisionallyIdentified -> Confirming -> Authenticated
//! ```
//!
//! 未匹配或识别服务不可用时回到 Idle；密码错误时保持初步身份；
//! 关联ID过期时回到 Idle；任何状态下取消都回到 Idle。

use facemed_client::{CameraDevice, CameraLease};
use facemed_core::{FacemedError, ImageUpload, ProvisionalIdentity, Result, Session};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthService;

/// 人脸登录状态
#[derive(Debug, Clone, PartialEq)]
pub enum FaceLoginState {
    Idle,
    Submitting,
    ProvisionallyIdentified(ProvisionalIdentity),
    Confirming(ProvisionalIdentity),
    Authenticated { user_id: Uuid },
}

impl FaceLoginState {
    pub fn name(&self) -> &'static str {
        match self {
            FaceLoginState::Idle => "idle",
            FaceLoginState::Submitting => "submitting",
            FaceLoginState::ProvisionallyIdentified(_) => "provisionally identified",
            FaceLoginState::Confirming(_) => "confirming",
            FaceLoginState::Authenticated { .. } => "authenticated",
        }
    }
}

/// 人脸登录流程
pub struct FaceLoginFlow {
    auth: Arc<AuthService>,
    state: FaceLoginState,
    last_failure: Option<String>,
}

impl FaceLoginFlow {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self {
            auth,
            state: FaceLoginState::Idle,
            last_failure: None,
        }
    }

    pub fn state(&self) -> &FaceLoginState {
        &self.state
    }

    /// 当前持有的初步身份
    pub fn provisional(&self) -> Option<&ProvisionalIdentity> {
        match &self.state {
            FaceLoginState::ProvisionallyIdentified(identity) | FaceLoginState::Confirming(identity) => {
                Some(identity)
            }
            _ => None,
        }
    }

    /// 最近一次失败的提示文本
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// 提交人脸图像
    ///
    /// 新的提交会丢弃之前的初步身份。
    pub async fn submit(&mut self, image: &ImageUpload) -> Result<ProvisionalIdentity> {
        if matches!(self.state, FaceLoginState::Submitting | FaceLoginState::Confirming(_)) {
            return Err(FacemedError::Busy("face submission".to_string()));
        }

        if self.provisional().is_some() {
            debug!("Discarding previous provisional identity");
        }
        self.state = FaceLoginState::Submitting;
        self.last_failure = None;

        match self.auth.submit_face(image).await {
            Ok(identity) => {
                self.state = FaceLoginState::ProvisionallyIdentified(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                warn!("Face submission failed: {}", e);
                self.fail(&e);
                self.state = FaceLoginState::Idle;
                Err(e)
            }
        }
    }

    /// 从摄像头采集一帧并提交，采集完成后立即释放摄像头
    pub async fn submit_from<D: CameraDevice>(&mut self, device: &mut D) -> Result<ProvisionalIdentity> {
        let image = {
            let mut lease = CameraLease::acquire(device)?;
            lease.capture()?
        };
        self.submit(&image).await
    }

    /// 用密码确认初步身份
    pub async fn confirm(&mut self, password: &str) -> Result<Session> {
        if password.is_empty() {
            return Err(FacemedError::validation("password", "Password is required"));
        }

        let identity = match &self.state {
            FaceLoginState::ProvisionallyIdentified(identity) => identity.clone(),
            other => {
                return Err(FacemedError::InvalidStateTransition {
                    from: other.name().to_string(),
                    event: "confirm".to_string(),
                })
            }
        };

        self.state = FaceLoginState::Confirming(identity.clone());
        match self.auth.confirm_face(&identity, password).await {
            Ok(session) => {
                info!("Face login confirmed for user {}", session.user_id);
                self.state = FaceLoginState::Authenticated {
                    user_id: session.user_id,
                };
                self.last_failure = None;
                Ok(session)
            }
            Err(e) => {
                self.fail(&e);
                self.state = match &e {
                    FacemedError::SessionExpired(_) => {
                        warn!("Provisional identity expired, returning to idle");
                        FaceLoginState::Idle
                    }
                    _ => FaceLoginState::ProvisionallyIdentified(identity),
                };
                Err(e)
            }
        }
    }

    /// 逐次索取密码确认，密码错误时重新索取，最多 `max_attempts` 次
    ///
    /// `next_password` 的参数是从1开始的尝试序号。
    pub async fn confirm_with<F>(&mut self, max_attempts: usize, mut next_password: F) -> Result<Session>
    where
        F: FnMut(usize) -> Result<String>,
    {
        let mut attempt = 1;
        loop {
            let password = next_password(attempt)?;
            match self.confirm(&password).await {
                Err(FacemedError::InvalidCredential(reason)) if attempt < max_attempts => {
                    debug!("Password attempt {} rejected: {}", attempt, reason);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// 取消流程，可重复调用
    pub fn cancel(&mut self) {
        if self.state != FaceLoginState::Idle {
            debug!("Face login cancelled from {}", self.state.name());
        }
        self.state = FaceLoginState::Idle;
        self.last_failure = None;
    }

    fn fail(&mut self, err: &FacemedError) {
        self.last_failure = Some(err.user_message());
    }
}
