//! 远程服务接口
//!
//! 每一组接口对应服务端的一类资源。工作流只依赖这些 trait，
//! 生产环境使用 [`crate::http::HttpApiClient`]，测试中使用内存实现。

use async_trait::async_trait;
use facemed_core::{
    AdminUserUpdate, ChangePasswordRequest, ConnectionId, ConnectionList, ExternalContactDraft,
    ExternalContactUpdate, FaceConfirmRequest, Identity, ImageUpload, LinkRequest, LinkRequestDraft,
    LoginRequest, MainInfoUpdate, MedicalInfo, PairStatus, PrivacyFlag, ProvisionalIdentity,
    RecognitionResult, RegistrationReceipt, RegistrationRequest, Relationship, Result, Session,
    UserListQuery, UserPage, UserSummary,
};
use std::collections::HashMap;
use uuid::Uuid;

/// 认证接口
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// 邮箱密码登录
    async fn login(&self, request: &LoginRequest) -> Result<Session>;

    /// 提交人脸图像，匹配成功时返回不含令牌的初步身份
    async fn submit_face(&self, image: &ImageUpload) -> Result<ProvisionalIdentity>;

    /// 用密码确认初步身份，成功后返回会话
    async fn confirm_face(&self, request: &FaceConfirmRequest) -> Result<Session>;

    async fn change_password(&self, request: &ChangePasswordRequest) -> Result<()>;

    /// 注册新用户并上传人脸图像
    async fn register(&self, request: &RegistrationRequest, images: &[ImageUpload]) -> Result<RegistrationReceipt>;
}

/// 人脸识别接口
#[async_trait]
pub trait RecognitionApi: Send + Sync {
    async fn recognize(&self, image: &ImageUpload) -> Result<RecognitionResult>;
}

/// 个人资料接口
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> Result<Identity>;

    async fn update_main_info(&self, user_id: Uuid, update: &MainInfoUpdate) -> Result<Identity>;

    async fn update_medical_info(&self, user_id: Uuid, info: &MedicalInfo) -> Result<MedicalInfo>;

    async fn update_privacy(&self, user_id: Uuid, flag: PrivacyFlag, value: bool) -> Result<()>;

    /// 删除账户，需要当前密码
    async fn delete_account(&self, user_id: Uuid, password: &str) -> Result<()>;

    /// 按姓名或邮箱搜索用户，排除给定用户
    async fn search_users(&self, query: &str, exclude: Uuid) -> Result<Vec<UserSummary>>;
}

/// 关联管理接口
#[async_trait]
pub trait ConnectionsApi: Send + Sync {
    async fn list_connections(&self, user_id: Uuid) -> Result<ConnectionList>;

    /// 当前用户收到和发出的请求
    async fn pending_requests(&self) -> Result<Vec<LinkRequest>>;

    /// 发起关联请求，返回请求ID
    async fn request_link(&self, draft: &LinkRequestDraft) -> Result<Uuid>;

    async fn accept_request(&self, request_id: Uuid) -> Result<()>;

    async fn reject_request(&self, request_id: Uuid) -> Result<()>;

    /// 新建外部联系人，返回联系人ID
    async fn add_external_contact(&self, draft: &ExternalContactDraft) -> Result<i64>;

    async fn update_linked(&self, connection_id: Uuid, relationship: Relationship) -> Result<()>;

    async fn update_external(&self, contact_id: i64, update: &ExternalContactUpdate) -> Result<()>;

    async fn delete_connection(&self, id: &ConnectionId) -> Result<()>;

    /// 批量查询与给定用户的关联状态
    async fn pair_statuses(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PairStatus>>;
}

/// 用户管理接口
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_users(&self, query: &UserListQuery) -> Result<UserPage>;

    async fn update_user(&self, user_id: Uuid, update: &AdminUserUpdate) -> Result<()>;

    /// 封禁或解封用户
    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<()>;

    async fn delete_user(&self, user_id: Uuid) -> Result<()>;
}
