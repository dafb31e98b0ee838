//! # FaceMed Core
//!
//! 人脸识别医疗身份系统客户端的核心模块，提供数据模型、错误定义、校验工具和可见性策略。

pub mod error;
pub mod models;
pub mod privacy;
pub mod utils;

pub use error::{ConflictKind, FacemedError, Result};
pub use models::*;
pub use privacy::{redact, reveal, Capabilities, ProfileField, Viewer, VisibleProfile};
