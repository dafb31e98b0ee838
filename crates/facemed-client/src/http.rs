//! 基于 reqwest 的远程服务客户端
//!
//! 所有需要认证的请求都携带 `Authorization: Bearer <token>`。
//! 服务端返回 401 时撤销发出请求时使用的那个令牌；登录和人脸确认接口除外，
//! 它们的 401 表示密码错误，不代表会话失效。

use async_trait::async_trait;
use facemed_core::{
    AdminUserUpdate, ChangePasswordRequest, ConflictKind, ConnectionId, ConnectionList,
    ExternalContactDraft, ExternalContactUpdate, FaceConfirmRequest, FacemedError, Identity,
    ImageUpload, LinkRequest, LinkRequestDraft, LoginRequest, MainInfoUpdate, MedicalInfo,
    PairStatus, PrivacyFlag, ProvisionalIdentity, RecognitionResult, RegistrationReceipt,
    RegistrationRequest, Relationship, Result, Role, Session, UserListQuery, UserPage, UserSummary,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{AdminApi, AuthApi, ConnectionsApi, ProfileApi, RecognitionApi};
use crate::config::ApiConfig;
use crate::session::SessionStore;

/// 401 响应是否撤销当前会话
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Revoke,
    Suppress,
}

/// 远程服务HTTP客户端
#[derive(Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    session: SessionStore,
}

impl HttpApiClient {
    pub fn new(config: &ApiConfig, session: SessionStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FacemedError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!("HTTP client initialized for {}", config.base_url);
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 服务健康检查
    pub async fn health(&self) -> Result<Value> {
        let response = self.send_bare(Method::GET, "/health", Teardown::Suppress).await?;
        read_json(response).await
    }

    fn request(&self, method: Method, path: &str) -> (RequestBuilder, Option<String>) {
        let token = self.session.token();
        let mut builder = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &token {
            builder = builder.bearer_auth(token);
        }
        (builder, token)
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        token: Option<String>,
        teardown: Teardown,
    ) -> Result<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = extract_detail(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
        debug!("Request failed with status {}: {}", status.as_u16(), detail);

        if status == StatusCode::UNAUTHORIZED && teardown == Teardown::Revoke {
            if let Some(token) = token {
                self.session.revoke(&token);
            }
        }
        Err(map_status(status, detail))
    }

    async fn send_bare(&self, method: Method, path: &str, teardown: Teardown) -> Result<Response> {
        debug!("{} {}", method, path);
        let (builder, token) = self.request(method, path);
        self.execute(builder, token, teardown).await
    }

    async fn send_json<B>(&self, method: Method, path: &str, body: &B, teardown: Teardown) -> Result<Response>
    where
        B: Serialize + Sync + ?Sized,
    {
        debug!("{} {}", method, path);
        let (builder, token) = self.request(method, path);
        self.execute(builder.json(body), token, teardown).await
    }

    async fn send_form(&self, path: &str, form: Form, teardown: Teardown) -> Result<Response> {
        debug!("POST {} (multipart)", path);
        let (builder, token) = self.request(Method::POST, path);
        self.execute(builder.multipart(form), token, teardown).await
    }
}

fn transport_error(err: reqwest::Error) -> FacemedError {
    warn!("Transport failure: {}", err);
    FacemedError::Network(err.to_string())
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| FacemedError::Server(format!("Unexpected response from server: {}", e)))
}

/// 将HTTP状态码映射为错误分类
pub(crate) fn map_status(status: StatusCode, detail: String) -> FacemedError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => FacemedError::validation("request", detail),
        StatusCode::UNAUTHORIZED => FacemedError::Auth(detail),
        StatusCode::FORBIDDEN => FacemedError::Forbidden(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => FacemedError::NotFound(detail),
        StatusCode::CONFLICT => FacemedError::conflict(ConflictKind::Server, detail),
        s if s.is_server_error() => FacemedError::Server(detail),
        s => FacemedError::Server(format!("Unexpected status {}: {}", s.as_u16(), detail)),
    }
}

/// 提取错误响应中的提示文本
///
/// 支持 `{"detail": "..."}`、`{"detail": {"error": {"message": "..."}}}`、
/// 校验失败时的 `{"detail": [{"msg": "..."}]}` 以及顶层 `message`。
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    let from_detail = match value.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    };

    from_detail
        .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_string))
        .or_else(|| {
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty())
}

// 人脸接口的错误重新分类：未匹配、无法检测到人脸视为 NoMatch，传输和服务端故障视为识别服务不可用
fn face_error(err: FacemedError) -> FacemedError {
    match err {
        FacemedError::NotFound(message) => FacemedError::NoMatch(message),
        FacemedError::Validation { message, .. } => FacemedError::NoMatch(message),
        FacemedError::Network(message) | FacemedError::Server(message) => {
            FacemedError::RecognizerUnavailable(message)
        }
        other => other,
    }
}

fn image_part(image: &ImageUpload) -> Result<Part> {
    Part::bytes(image.bytes.clone())
        .file_name(image.file_name.clone())
        .mime_str(&image.content_type)
        .map_err(|e| FacemedError::validation("image", format!("Invalid image content type: {}", e)))
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: Uuid,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: Option<String>,
    token: String,
}

impl From<LoginResponse> for Session {
    fn from(response: LoginResponse) -> Self {
        Session {
            token: response.token,
            user_id: response.user_id,
            name: response.name,
            email: response.email,
            role: response.role.map(Role::from).unwrap_or_default(),
        }
    }
}

// 旧版服务端按 user_id 识别待确认的身份
#[derive(Serialize)]
struct FaceConfirmBody<'a> {
    correlation_id: &'a str,
    user_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    recognized: bool,
    #[serde(default)]
    user: Option<Identity>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UsersEnvelope<T> {
    users: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RequestsEnvelope {
    requests: Vec<LinkRequest>,
}

#[derive(Debug, Deserialize)]
struct StatusesEnvelope {
    statuses: HashMap<Uuid, PairStatus>,
}

#[derive(Debug, Deserialize)]
struct CreatedRequest {
    #[serde(alias = "connection_id")]
    request_id: Uuid,
}

/// 服务端可能以字符串或数字返回联系人ID
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumericId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct CreatedContact {
    contact_id: NumericId,
}

impl CreatedContact {
    fn id(self) -> Result<i64> {
        match self.contact_id {
            NumericId::Number(id) => Ok(id),
            NumericId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| FacemedError::Server(format!("Server returned invalid contact id '{}'", text))),
        }
    }
}

#[async_trait]
impl AuthApi for HttpApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<Session> {
        info!("Logging in with email {}", request.email);
        let response = self
            .send_json(Method::POST, "/login", request, Teardown::Suppress)
            .await
            .map_err(|e| match e {
                FacemedError::Auth(message) => FacemedError::InvalidCredential(message),
                other => other,
            })?;
        let login: LoginResponse = read_json(response).await?;
        Ok(login.into())
    }

    async fn submit_face(&self, image: &ImageUpload) -> Result<ProvisionalIdentity> {
        info!("Submitting face image ({} bytes)", image.len());
        let form = Form::new().part("image", image_part(image)?);
        let response = self
            .send_form("/login/face", form, Teardown::Suppress)
            .await
            .map_err(face_error)?;
        read_json(response).await
    }

    async fn confirm_face(&self, request: &FaceConfirmRequest) -> Result<Session> {
        info!("Confirming face login");
        let body = FaceConfirmBody {
            correlation_id: &request.correlation_id,
            user_id: &request.correlation_id,
            password: &request.password,
        };
        let response = self
            .send_json(Method::POST, "/login/face/confirm", &body, Teardown::Suppress)
            .await
            .map_err(|e| match e {
                FacemedError::Auth(message) => FacemedError::InvalidCredential(message),
                FacemedError::NotFound(message) => FacemedError::SessionExpired(message),
                FacemedError::Network(message) | FacemedError::Server(message) => {
                    FacemedError::RecognizerUnavailable(message)
                }
                other => other,
            })?;
        let login: LoginResponse = read_json(response).await?;
        Ok(login.into())
    }

    async fn change_password(&self, request: &ChangePasswordRequest) -> Result<()> {
        info!("Changing password");
        self.send_json(Method::POST, "/auth/change-password", request, Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn register(&self, request: &RegistrationRequest, images: &[ImageUpload]) -> Result<RegistrationReceipt> {
        info!("Registering {} with {} face images", request.email, images.len());

        let mut form = Form::new()
            .text("name", request.name.clone())
            .text("email", request.email.clone())
            .text("password", request.password.clone());
        let optional = [
            ("phone", request.phone.clone()),
            ("date_of_birth", request.date_of_birth.map(|d| d.to_string())),
            ("nationality", request.nationality.clone()),
            ("gender", request.gender.clone()),
            ("id_number", request.id_number.clone()),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                form = form.text(name, value);
            }
        }
        for (index, image) in images.iter().enumerate() {
            form = form.part(format!("face_image_{}", index + 1), image_part(image)?);
        }

        let response = self.send_form("/register", form, Teardown::Suppress).await?;
        read_json(response).await
    }
}

#[async_trait]
impl RecognitionApi for HttpApiClient {
    async fn recognize(&self, image: &ImageUpload) -> Result<RecognitionResult> {
        info!("Recognizing face image ({} bytes)", image.len());
        let form = Form::new().part("image", image_part(image)?);
        let response = self
            .send_form("/recognize", form, Teardown::Revoke)
            .await
            .map_err(face_error)?;
        let body: RecognizeResponse = read_json(response).await?;

        match (body.recognized, body.user) {
            (true, Some(identity)) => Ok(RecognitionResult::matched(identity, body.confidence.unwrap_or(0.0))),
            _ => {
                debug!("No match: {}", body.message.unwrap_or_default());
                Ok(RecognitionResult::no_match())
            }
        }
    }
}

#[async_trait]
impl ProfileApi for HttpApiClient {
    async fn get_profile(&self, user_id: Uuid) -> Result<Identity> {
        let response = self
            .send_bare(Method::GET, &format!("/profile/{}", user_id), Teardown::Revoke)
            .await?;
        read_json(response).await
    }

    async fn update_main_info(&self, user_id: Uuid, update: &MainInfoUpdate) -> Result<Identity> {
        info!("Updating main info for user {}", user_id);
        let response = self
            .send_json(Method::PUT, &format!("/profile/main-info/{}", user_id), update, Teardown::Revoke)
            .await?;
        let envelope: DataEnvelope<Identity> = read_json(response).await?;
        Ok(envelope.data)
    }

    async fn update_medical_info(&self, user_id: Uuid, info: &MedicalInfo) -> Result<MedicalInfo> {
        info!("Updating medical info for user {}", user_id);
        let response = self
            .send_json(Method::PUT, &format!("/profile/medical-info/{}", user_id), info, Teardown::Revoke)
            .await?;
        let envelope: DataEnvelope<MedicalInfo> = read_json(response).await?;
        Ok(envelope.data)
    }

    async fn update_privacy(&self, user_id: Uuid, flag: PrivacyFlag, value: bool) -> Result<()> {
        info!("Setting {} = {} for user {}", flag.key(), value, user_id);
        let body = serde_json::json!({ "field": flag.key(), "value": value });
        self.send_json(Method::PUT, &format!("/profile/privacy/{}", user_id), &body, Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn delete_account(&self, user_id: Uuid, password: &str) -> Result<()> {
        warn!("Deleting account {}", user_id);
        let body = serde_json::json!({ "password": password });
        self.send_json(Method::DELETE, &format!("/profile/{}", user_id), &body, Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn search_users(&self, query: &str, exclude: Uuid) -> Result<Vec<UserSummary>> {
        debug!("Searching users");
        let (builder, token) = self.request(Method::GET, "/users/search");
        let builder = builder.query(&[("q", query.to_string()), ("current_user_id", exclude.to_string())]);
        let response = self.execute(builder, token, Teardown::Revoke).await?;
        let envelope: UsersEnvelope<UserSummary> = read_json(response).await?;
        Ok(envelope.users)
    }
}

#[async_trait]
impl ConnectionsApi for HttpApiClient {
    async fn list_connections(&self, user_id: Uuid) -> Result<ConnectionList> {
        let response = self
            .send_bare(Method::GET, &format!("/connections/{}", user_id), Teardown::Revoke)
            .await?;
        read_json(response).await
    }

    async fn pending_requests(&self) -> Result<Vec<LinkRequest>> {
        let response = self
            .send_bare(Method::GET, "/connections/requests/pending", Teardown::Revoke)
            .await?;
        let envelope: RequestsEnvelope = read_json(response).await?;
        Ok(envelope.requests)
    }

    async fn request_link(&self, draft: &LinkRequestDraft) -> Result<Uuid> {
        info!("Requesting link with user {} as {}", draft.connected_user_id, draft.relationship);
        let response = self
            .send_json(Method::POST, "/connections/requests", draft, Teardown::Revoke)
            .await?;
        let created: CreatedRequest = read_json(response).await?;
        Ok(created.request_id)
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<()> {
        info!("Accepting link request {}", request_id);
        self.send_bare(
            Method::POST,
            &format!("/connections/requests/{}/accept", request_id),
            Teardown::Revoke,
        )
        .await?;
        Ok(())
    }

    async fn reject_request(&self, request_id: Uuid) -> Result<()> {
        info!("Rejecting link request {}", request_id);
        self.send_bare(
            Method::POST,
            &format!("/connections/requests/{}/reject", request_id),
            Teardown::Revoke,
        )
        .await?;
        Ok(())
    }

    async fn add_external_contact(&self, draft: &ExternalContactDraft) -> Result<i64> {
        info!("Adding external contact ({})", draft.relationship);
        let response = self
            .send_json(Method::POST, "/connections/external", draft, Teardown::Revoke)
            .await?;
        let created: CreatedContact = read_json(response).await?;
        created.id()
    }

    async fn update_linked(&self, connection_id: Uuid, relationship: Relationship) -> Result<()> {
        info!("Updating linked connection {}", connection_id);
        let body = serde_json::json!({ "relationship": relationship });
        self.send_json(
            Method::PUT,
            &format!("/connections/linked/{}", connection_id),
            &body,
            Teardown::Revoke,
        )
        .await?;
        Ok(())
    }

    async fn update_external(&self, contact_id: i64, update: &ExternalContactUpdate) -> Result<()> {
        info!("Updating external contact {}", contact_id);
        self.send_json(
            Method::PUT,
            &format!("/connections/external/{}", contact_id),
            update,
            Teardown::Revoke,
        )
        .await?;
        Ok(())
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<()> {
        warn!("Deleting connection {}", id);
        self.send_bare(Method::DELETE, &format!("/connections/{}", id), Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn pair_statuses(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PairStatus>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let body = serde_json::json!({ "user_ids": user_ids });
        let response = self
            .send_json(Method::POST, "/connections/statuses", &body, Teardown::Revoke)
            .await?;
        let envelope: StatusesEnvelope = read_json(response).await?;
        Ok(envelope.statuses)
    }
}

#[async_trait]
impl AdminApi for HttpApiClient {
    async fn list_users(&self, query: &UserListQuery) -> Result<UserPage> {
        debug!("Listing users page {} (size {})", query.page, query.page_size);
        let (builder, token) = self.request(Method::GET, "/users");
        let response = self.execute(builder.query(query), token, Teardown::Revoke).await?;
        read_json(response).await
    }

    async fn update_user(&self, user_id: Uuid, update: &AdminUserUpdate) -> Result<()> {
        info!("Updating user {}", user_id);
        self.send_json(Method::PUT, &format!("/users/{}", user_id), update, Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<()> {
        let action = if banned { "ban" } else { "unban" };
        warn!("Applying {} to user {}", action, user_id);
        self.send_bare(Method::POST, &format!("/users/{}/{}", user_id, action), Teardown::Revoke)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        warn!("Deleting user {}", user_id);
        self.send_bare(Method::DELETE, &format!("/users/{}", user_id), Teardown::Revoke)
            .await?;
        Ok(())
    }
}
