//! # FaceMed Workflow
//!
//! 客户端业务流程：登录与人脸确认、资料与隐私、联系人生命周期、识别、注册和用户管理。

pub mod admin;
pub mod auth;
pub mod connections;
pub mod face_login;
pub mod guard;
pub mod optimistic;
pub mod profile;
pub mod recognition;
pub mod registration;
pub mod state_machine;

#[cfg(test)]
mod test_support;

pub use admin::AdminService;
pub use auth::AuthService;
pub use connections::{ConnectionUpdate, ConnectionsManager, LinkPolicy, UpdateOutcome};
pub use face_login::{FaceLoginFlow, FaceLoginState};
pub use guard::{require_confirmation, AutoConfirm, Confirmer, InFlight, InFlightGuard};
pub use optimistic::{run_optimistic, OptimisticUpdate};
pub use profile::ProfileService;
pub use recognition::{RecognitionOutcome, RecognitionService};
pub use registration::RegistrationService;
pub use state_machine::{LinkEvent, LinkStateMachine};

use facemed_client::{ClientConfig, FileStore, HttpApiClient, KeyValueStore, MemoryStore, SessionStore, SessionWriter};
use facemed_core::Result;
use std::sync::Arc;
use tracing::info;

/// 客户端应用
///
/// 由配置组装HTTP客户端、会话存储和各业务服务的统一入口。
pub struct FacemedApp {
    http: Arc<HttpApiClient>,
    session: SessionStore,
    pub auth: Arc<AuthService>,
    pub profile: ProfileService,
    pub connections: ConnectionsManager,
    pub recognition: RecognitionService,
    pub registration: RegistrationService,
    pub admin: AdminService,
}

impl FacemedApp {
    /// 根据配置创建应用
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let backend: Arc<dyn KeyValueStore> = match &config.session.store_path {
            Some(path) => {
                info!("Persisting session to {}", path);
                Arc::new(FileStore::open(path)?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        let (session, writer) = SessionStore::new(backend);
        let http = Arc::new(HttpApiClient::new(&config.api, session.clone())?);
        Ok(Self::assemble(http, session, writer, config.recognition.max_image_bytes()))
    }

    fn assemble(http: Arc<HttpApiClient>, session: SessionStore, writer: SessionWriter, max_image_bytes: usize) -> Self {
        let auth = Arc::new(AuthService::new(http.clone(), writer));
        Self {
            profile: ProfileService::new(http.clone(), auth.clone()),
            connections: ConnectionsManager::new(http.clone(), session.clone()),
            recognition: RecognitionService::new(http.clone(), session.clone(), max_image_bytes),
            registration: RegistrationService::new(http.clone(), max_image_bytes),
            admin: AdminService::new(http.clone(), session.clone()),
            auth,
            http,
            session,
        }
    }

    /// 新的人脸登录流程
    pub fn face_login(&self) -> FaceLoginFlow {
        FaceLoginFlow::new(self.auth.clone())
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn http(&self) -> &HttpApiClient {
        &self.http
    }
}
