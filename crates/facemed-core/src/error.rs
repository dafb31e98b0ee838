//! 错误定义模块

use thiserror::Error;

/// 冲突类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// 双方已存在已接受的关联
    AlreadyConnected,
    /// 同一对用户之间已有待处理请求（任一方向）
    AlreadyExists,
    /// 服务端报告的冲突，原样展示
    Server,
}

/// 客户端统一错误类型
#[derive(Error, Debug)]
pub enum FacemedError {
    #[error("验证错误 [{field}]: {message}")]
    Validation { field: String, message: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("权限不足: {0}")]
    Forbidden(String),

    #[error("冲突: {message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("服务端错误: {0}")]
    Server(String),

    #[error("未识别到匹配的人脸: {0}")]
    NoMatch(String),

    #[error("识别服务不可用: {0}")]
    RecognizerUnavailable(String),

    #[error("密码错误: {0}")]
    InvalidCredential(String),

    #[error("登录确认已过期: {0}")]
    SessionExpired(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("操作已取消: {0}")]
    ConfirmationDeclined(String),

    #[error("已有请求正在处理: {0}")]
    Busy(String),

    #[error("尚未登录")]
    NotAuthenticated,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(String),
}

impl FacemedError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            message: message.into(),
        }
    }

    /// 用户重试后可能成功的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RecognizerUnavailable(_))
    }

    /// 是否为 404 类错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 面向用户的提示文本
    ///
    /// 服务端返回的冲突和校验信息原样透出，其余错误给出通用描述。
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Network(_) => "Network error. Please check your connection and try again.".to_string(),
            Self::Auth(_) => "Your session has ended. Please log in again.".to_string(),
            Self::Forbidden(message) => message.clone(),
            Self::Conflict { message, .. } => message.clone(),
            Self::NotFound(message) => message.clone(),
            Self::Server(_) => "Something went wrong on the server. Please try again later.".to_string(),
            Self::NoMatch(_) => "Face not recognized. Please try again or use email login.".to_string(),
            Self::RecognizerUnavailable(_) => {
                "The recognition service is unavailable. Please try again.".to_string()
            }
            Self::InvalidCredential(_) => "Invalid password. Please try again.".to_string(),
            Self::SessionExpired(_) => "This login attempt has expired. Please scan your face again.".to_string(),
            Self::InvalidStateTransition { from, event } => {
                format!("Cannot {} a request that is already {}.", event, from)
            }
            Self::ConfirmationDeclined(_) => "Operation cancelled.".to_string(),
            Self::Busy(_) => "Please wait for the current request to finish.".to_string(),
            Self::NotAuthenticated => "Please log in first.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for FacemedError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// 客户端统一结果类型
pub type Result<T> = std::result::Result<T, FacemedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(FacemedError::Network("timeout".into()).is_retryable());
        assert!(FacemedError::RecognizerUnavailable("503".into()).is_retryable());
        assert!(!FacemedError::InvalidCredential("bad".into()).is_retryable());
        assert!(!FacemedError::Server("boom".into()).is_retryable());
    }

    #[test]
    fn test_conflict_message_is_verbatim() {
        let err = FacemedError::conflict(ConflictKind::Server, "Request already sent");
        assert_eq!(err.user_message(), "Request already sent");
    }

    #[test]
    fn test_server_error_is_generic_but_not_empty() {
        let err = FacemedError::Server("stack trace".into());
        let message = err.user_message();
        assert!(!message.is_empty());
        assert!(!message.contains("stack trace"));
    }
}
