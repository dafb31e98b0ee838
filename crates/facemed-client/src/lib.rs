//! # FaceMed Client
//!
//! 远程服务访问层：配置加载、接口定义、HTTP实现、会话存储和摄像头租约。

pub mod api;
pub mod camera;
pub mod config;
pub mod http;
pub mod session;

pub use api::{AdminApi, AuthApi, ConnectionsApi, ProfileApi, RecognitionApi};
pub use camera::{CameraDevice, CameraLease, FileCamera};
pub use config::ClientConfig;
pub use http::HttpApiClient;
pub use session::{FileStore, KeyValueStore, MemoryStore, SessionStore, SessionWriter};
