//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FacemedError;

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// 普通用户
    #[default]
    User,
    /// 医生 - 可查看和编辑医疗信息
    Doctor,
    /// 管理员 - 完全访问权限
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }

    /// 医生和管理员视为完全信任的查看者
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Doctor | Role::Admin)
    }
}

// 未知或缺失的角色一律按普通用户处理
impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "doctor" => Role::Doctor,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FacemedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "doctor" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            other => Err(FacemedError::validation(
                "role",
                format!("Unknown role '{}'. Must be one of: user, doctor, admin", other),
            )),
        }
    }
}

fn default_true() -> bool {
    true
}

/// 隐私开关
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyFlag {
    /// 主开关：姓名公开与否决定整份资料是否可见
    Name,
    IdNumber,
    Phone,
    DateOfBirth,
    Gender,
    Nationality,
    Email,
}

impl PrivacyFlag {
    pub const ALL: [PrivacyFlag; 7] = [
        PrivacyFlag::Name,
        PrivacyFlag::IdNumber,
        PrivacyFlag::Phone,
        PrivacyFlag::DateOfBirth,
        PrivacyFlag::Gender,
        PrivacyFlag::Nationality,
        PrivacyFlag::Email,
    ];

    /// 服务端字段名
    pub fn key(&self) -> &'static str {
        match self {
            PrivacyFlag::Name => "is_name_public",
            PrivacyFlag::IdNumber => "is_id_number_public",
            PrivacyFlag::Phone => "is_phone_public",
            PrivacyFlag::DateOfBirth => "is_dob_public",
            PrivacyFlag::Gender => "is_gender_public",
            PrivacyFlag::Nationality => "is_nationality_public",
            PrivacyFlag::Email => "is_email_public",
        }
    }
}

impl FromStr for PrivacyFlag {
    type Err = FacemedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        PrivacyFlag::ALL
            .into_iter()
            .find(|flag| {
                flag.key() == normalized
                    || flag.key().trim_start_matches("is_").trim_end_matches("_public") == normalized
            })
            .or(match normalized.as_str() {
                "date_of_birth" => Some(PrivacyFlag::DateOfBirth),
                _ => None,
            })
            .ok_or_else(|| FacemedError::validation("field", format!("Unknown privacy field '{}'", s)))
    }
}

/// 个人隐私设置
///
/// 默认值与历史账户保持一致：姓名与性别默认公开，其余默认隐藏。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivacySettings {
    #[serde(default = "default_true")]
    pub is_name_public: bool,
    #[serde(default)]
    pub is_id_number_public: bool,
    #[serde(default)]
    pub is_phone_public: bool,
    #[serde(default)]
    pub is_dob_public: bool,
    #[serde(default = "default_true")]
    pub is_gender_public: bool,
    #[serde(default)]
    pub is_nationality_public: bool,
    #[serde(default)]
    pub is_email_public: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            is_name_public: true,
            is_id_number_public: false,
            is_phone_public: false,
            is_dob_public: false,
            is_gender_public: true,
            is_nationality_public: false,
            is_email_public: false,
        }
    }
}

impl PrivacySettings {
    /// 读取存储值（不考虑主开关）
    pub fn stored(&self, flag: PrivacyFlag) -> bool {
        match flag {
            PrivacyFlag::Name => self.is_name_public,
            PrivacyFlag::IdNumber => self.is_id_number_public,
            PrivacyFlag::Phone => self.is_phone_public,
            PrivacyFlag::DateOfBirth => self.is_dob_public,
            PrivacyFlag::Gender => self.is_gender_public,
            PrivacyFlag::Nationality => self.is_nationality_public,
            PrivacyFlag::Email => self.is_email_public,
        }
    }

    pub fn set(&mut self, flag: PrivacyFlag, value: bool) {
        let slot = match flag {
            PrivacyFlag::Name => &mut self.is_name_public,
            PrivacyFlag::IdNumber => &mut self.is_id_number_public,
            PrivacyFlag::Phone => &mut self.is_phone_public,
            PrivacyFlag::DateOfBirth => &mut self.is_dob_public,
            PrivacyFlag::Gender => &mut self.is_gender_public,
            PrivacyFlag::Nationality => &mut self.is_nationality_public,
            PrivacyFlag::Email => &mut self.is_email_public,
        };
        *slot = value;
    }
}

/// 医疗信息字段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MedicalField {
    HealthHistory,
    ChronicConditions,
    Allergies,
    CurrentMedications,
    PreviousSurgeries,
    EmergencyNotes,
}

impl MedicalField {
    pub const ALL: [MedicalField; 6] = [
        MedicalField::HealthHistory,
        MedicalField::ChronicConditions,
        MedicalField::Allergies,
        MedicalField::CurrentMedications,
        MedicalField::PreviousSurgeries,
        MedicalField::EmergencyNotes,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MedicalField::HealthHistory => "health history",
            MedicalField::ChronicConditions => "chronic conditions",
            MedicalField::Allergies => "allergies",
            MedicalField::CurrentMedications => "current medications",
            MedicalField::PreviousSurgeries => "previous surgeries",
            MedicalField::EmergencyNotes => "emergency notes",
        }
    }
}

/// 医疗信息（与用户一对一）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicalInfo {
    #[serde(default)]
    pub health_history: Option<String>,
    #[serde(default)]
    pub chronic_conditions: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub current_medications: Option<String>,
    #[serde(default)]
    pub previous_surgeries: Option<String>,
    #[serde(default)]
    pub emergency_notes: Option<String>,
}

impl MedicalInfo {
    pub fn get(&self, field: MedicalField) -> Option<&str> {
        let value = match field {
            MedicalField::HealthHistory => &self.health_history,
            MedicalField::ChronicConditions => &self.chronic_conditions,
            MedicalField::Allergies => &self.allergies,
            MedicalField::CurrentMedications => &self.current_medications,
            MedicalField::PreviousSurgeries => &self.previous_surgeries,
            MedicalField::EmergencyNotes => &self.emergency_notes,
        };
        value.as_deref()
    }

    pub fn set(&mut self, field: MedicalField, value: Option<String>) {
        let slot = match field {
            MedicalField::HealthHistory => &mut self.health_history,
            MedicalField::ChronicConditions => &mut self.chronic_conditions,
            MedicalField::Allergies => &mut self.allergies,
            MedicalField::CurrentMedications => &mut self.current_medications,
            MedicalField::PreviousSurgeries => &mut self.previous_surgeries,
            MedicalField::EmergencyNotes => &mut self.emergency_notes,
        };
        *slot = value;
    }

    /// 字段是否有实际内容（仅空白视为空）
    pub fn is_filled(&self, field: MedicalField) -> bool {
        self.get(field).map(|v| !v.trim().is_empty()).unwrap_or(false)
    }
}

/// 注册用户的完整资料
///
/// 密码哈希和人脸模板只存在于服务端。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    #[serde(alias = "user_id")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, alias = "image_url")]
    pub profile_picture_url: Option<String>,
    #[serde(flatten)]
    pub privacy: PrivacySettings,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub medical_info: MedicalInfo,
    /// 外部联系人（亲属）
    #[serde(default)]
    pub relatives: Vec<ExternalContact>,
}

/// 基本信息更新（仅提交非空字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MainInfoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
}

impl MainInfoUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.nationality.is_none()
            && self.gender.is_none()
            && self.id_number.is_none()
    }
}

/// 关系类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Relationship {
    Father,
    Mother,
    Brother,
    Sister,
    Son,
    Daughter,
    Spouse,
    Partner,
    Friend,
    Doctor,
    Caregiver,
    Neighbor,
    Other,
}

impl Relationship {
    pub const ALL: [Relationship; 13] = [
        Relationship::Father,
        Relationship::Mother,
        Relationship::Brother,
        Relationship::Sister,
        Relationship::Son,
        Relationship::Daughter,
        Relationship::Spouse,
        Relationship::Partner,
        Relationship::Friend,
        Relationship::Doctor,
        Relationship::Caregiver,
        Relationship::Neighbor,
        Relationship::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Father => "Father",
            Relationship::Mother => "Mother",
            Relationship::Brother => "Brother",
            Relationship::Sister => "Sister",
            Relationship::Son => "Son",
            Relationship::Daughter => "Daughter",
            Relationship::Spouse => "Spouse",
            Relationship::Partner => "Partner",
            Relationship::Friend => "Friend",
            Relationship::Doctor => "Doctor",
            Relationship::Caregiver => "Caregiver",
            Relationship::Neighbor => "Neighbor",
            Relationship::Other => "Other",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = FacemedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Relationship::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let allowed: Vec<&str> = Relationship::ALL.iter().map(|r| r.as_str()).collect();
                FacemedError::validation(
                    "relationship",
                    format!(
                        "Invalid relationship type. Must be one of: {}",
                        allowed.join(", ")
                    ),
                )
            })
    }
}

/// 关联请求状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,  // 待处理
    Accepted, // 已接受
    Rejected, // 已拒绝
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Accepted => "accepted",
            LinkStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// 两个注册用户之间的关联请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub relationship: Relationship,
    pub status: LinkStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl LinkRequest {
    /// 是否连接了给定的两个用户（不区分方向）
    pub fn joins(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

/// 新建关联请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkRequestDraft {
    pub connected_user_id: Uuid,
    pub relationship: Relationship,
}

/// 被关联用户的公开信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedUser {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// 已接受的关联
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedConnection {
    pub id: Uuid,
    pub connected_user: ConnectedUser,
    pub relationship: Relationship,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 外部联系人（未注册的人员）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalContact {
    pub id: i64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(alias = "relation")]
    pub relationship: Relationship,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 新建外部联系人
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalContactDraft {
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub relationship: Relationship,
}

/// 外部联系人部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExternalContactUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
}

impl ExternalContactUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.address.is_none() && self.relationship.is_none()
    }
}

/// 用户的全部关联
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionList {
    #[serde(default)]
    pub linked_connections: Vec<LinkedConnection>,
    #[serde(default)]
    pub external_contacts: Vec<ExternalContact>,
}

impl ConnectionList {
    pub fn contains(&self, id: &ConnectionId) -> bool {
        match id {
            ConnectionId::Linked(id) => self.linked_connections.iter().any(|c| c.id == *id),
            ConnectionId::External(id) => self.external_contacts.iter().any(|c| c.id == *id),
        }
    }

    /// 移除一条关联，返回是否存在
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        let before = self.len();
        match id {
            ConnectionId::Linked(id) => self.linked_connections.retain(|c| c.id != *id),
            ConnectionId::External(id) => self.external_contacts.retain(|c| c.id != *id),
        }
        before != self.len()
    }

    pub fn is_connected_to(&self, user_id: Uuid) -> bool {
        self.linked_connections.iter().any(|c| c.connected_user.id == user_id)
    }

    pub fn len(&self) -> usize {
        self.linked_connections.len() + self.external_contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 关联标识：注册用户间的关联使用UUID，外部联系人使用整数ID
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ConnectionId {
    Linked(Uuid),
    External(i64),
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionId::Linked(id) => write!(f, "{}", id),
            ConnectionId::External(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ConnectionId {
    type Err = FacemedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = Uuid::parse_str(s) {
            return Ok(ConnectionId::Linked(id));
        }
        s.parse::<i64>()
            .map(ConnectionId::External)
            .map_err(|_| FacemedError::validation("connection_id", format!("Invalid connection id '{}'", s)))
    }
}

/// 当前用户与另一用户的关联状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Connected,
    PendingSent,
    PendingReceived,
    None,
}

/// 已登录会话
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

// 令牌不得出现在日志中
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish()
    }
}

/// 邮箱密码登录请求
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// 人脸初步识别结果：不含任何可用令牌
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawProvisionalIdentity")]
pub struct ProvisionalIdentity {
    pub correlation_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub confidence: Option<f32>,
}

// 服务端可能只返回 user_id，也可能两者同时返回；优先使用 correlation_id
#[derive(Deserialize)]
struct RawProvisionalIdentity {
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default, deserialize_with = "id_as_string")]
    user_id: Option<String>,
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    profile_picture_url: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

impl TryFrom<RawProvisionalIdentity> for ProvisionalIdentity {
    type Error = String;

    fn try_from(raw: RawProvisionalIdentity) -> Result<Self, Self::Error> {
        let correlation_id = raw
            .correlation_id
            .or(raw.user_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "missing correlation_id".to_string())?;
        Ok(Self {
            correlation_id,
            name: raw.name,
            avatar_url: raw.avatar_url.or(raw.profile_picture_url),
            confidence: raw.confidence,
        })
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

/// 人脸登录密码确认请求
#[derive(Clone, Serialize, Deserialize)]
pub struct FaceConfirmRequest {
    pub correlation_id: String,
    pub password: String,
}

impl fmt::Debug for FaceConfirmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceConfirmRequest")
            .field("correlation_id", &self.correlation_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// 修改密码请求
#[derive(Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangePasswordRequest { .. }")
    }
}

/// 识别结果（仅在当前交互中存在，不缓存）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionResult {
    pub matched: bool,
    pub identity: Option<Identity>,
    pub confidence: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl RecognitionResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            identity: None,
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    pub fn matched(identity: Identity, confidence: f32) -> Self {
        Self {
            matched: true,
            identity: Some(identity),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            timestamp: Utc::now(),
        }
    }
}

/// 上传的图像
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// 根据文件扩展名推断MIME类型
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let lower = file_name.to_ascii_lowercase();
        let content_type = if lower.ends_with(".png") {
            "image/png"
        } else if lower.ends_with(".webp") {
            "image/webp"
        } else {
            "image/jpeg"
        };
        Self {
            file_name,
            content_type: content_type.to_string(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// 注册请求（人脸图像单独上传）
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// 注册结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationReceipt {
    pub success: bool,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub message: String,
}

/// 用户搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 管理员视角的用户信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminUserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

/// 分页用户列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPage {
    pub users: Vec<AdminUserView>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl UserPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64)
    }
}

/// 用户列表查询条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserListQuery {
    pub page: u32,
    pub page_size: u32,
    #[serde(rename = "q", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Default for UserListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            query: None,
            role: None,
        }
    }
}

/// 管理员更新用户
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdminUserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl AdminUserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provisional_identity_prefers_correlation_id() {
        let both: ProvisionalIdentity = serde_json::from_value(json!({
            "correlation_id": "c-1",
            "user_id": "7f7a1c2e-0000-4000-8000-000000000001",
            "name": "Ada",
            "profile_picture_url": "/uploads/ada.jpg",
            "confidence": 0.93
        }))
        .unwrap();
        assert_eq!(both.correlation_id, "c-1");
        assert_eq!(both.avatar_url.as_deref(), Some("/uploads/ada.jpg"));

        let legacy: ProvisionalIdentity =
            serde_json::from_value(json!({ "user_id": "u-9", "name": "Ada" })).unwrap();
        assert_eq!(legacy.correlation_id, "u-9");

        assert!(serde_json::from_value::<ProvisionalIdentity>(json!({ "name": "Ada" })).is_err());
    }

    #[test]
    fn test_unknown_role_defaults_to_user() {
        let role: Role = serde_json::from_value(json!("superuser")).unwrap();
        assert_eq!(role, Role::User);
        let role: Role = serde_json::from_value(json!("Doctor")).unwrap();
        assert_eq!(role, Role::Doctor);
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), json!("admin"));
    }

    #[test]
    fn test_identity_privacy_defaults() {
        let identity: Identity = serde_json::from_value(json!({
            "id": "7f9c24e8-3b12-4fdd-a97c-7b7e1e2e0a11",
            "name": "John Doe",
            "email": "john@example.com",
            "phone": "1234567890"
        }))
        .unwrap();

        assert!(identity.privacy.is_name_public);
        assert!(identity.privacy.is_gender_public);
        assert!(!identity.privacy.is_phone_public);
        assert!(identity.is_active);
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.medical_info, MedicalInfo::default());
        assert!(identity.relatives.is_empty());
    }

    #[test]
    fn test_identity_carries_relatives() {
        let identity: Identity = serde_json::from_value(json!({
            "id": "7f9c24e8-3b12-4fdd-a97c-7b7e1e2e0a11",
            "name": "John Doe",
            "relatives": [
                {"id": 3, "name": "Mary", "phone": "+15551234567", "relation": "Mother"}
            ]
        }))
        .unwrap();

        assert_eq!(identity.relatives.len(), 1);
        assert_eq!(identity.relatives[0].name, "Mary");
        assert_eq!(identity.relatives[0].relationship, Relationship::Mother);
    }

    #[test]
    fn test_external_contact_accepts_relation_key() {
        let contact: ExternalContact = serde_json::from_value(json!({
            "id": 12,
            "name": "Mary",
            "phone": "+15551234567",
            "address": null,
            "relation": "Mother",
            "created_at": null
        }))
        .unwrap();
        assert_eq!(contact.relationship, Relationship::Mother);
    }

    #[test]
    fn test_connection_id_parsing() {
        let linked: ConnectionId = "7f9c24e8-3b12-4fdd-a97c-7b7e1e2e0a11".parse().unwrap();
        assert!(matches!(linked, ConnectionId::Linked(_)));
        assert_eq!("42".parse::<ConnectionId>().unwrap(), ConnectionId::External(42));
        assert!("not-an-id".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_relationship_parse_is_case_insensitive() {
        assert_eq!("spouse".parse::<Relationship>().unwrap(), Relationship::Spouse);
        let err = "Cousin".parse::<Relationship>().unwrap_err();
        assert!(err.user_message().contains("Father"));
    }

    #[test]
    fn test_privacy_flag_from_str() {
        assert_eq!("phone".parse::<PrivacyFlag>().unwrap(), PrivacyFlag::Phone);
        assert_eq!("is_dob_public".parse::<PrivacyFlag>().unwrap(), PrivacyFlag::DateOfBirth);
        assert_eq!("date-of-birth".parse::<PrivacyFlag>().unwrap(), PrivacyFlag::DateOfBirth);
        assert!("shoe_size".parse::<PrivacyFlag>().is_err());
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session {
            token: "secret-token".into(),
            user_id: Uuid::new_v4(),
            name: "A".into(),
            email: "a@x.com".into(),
            role: Role::User,
        };
        assert!(!format!("{:?}", session).contains("secret-token"));
    }

    #[test]
    fn test_recognition_confidence_is_clamped() {
        let identity: Identity = serde_json::from_value(json!({
            "id": "7f9c24e8-3b12-4fdd-a97c-7b7e1e2e0a11",
            "name": "U1"
        }))
        .unwrap();
        let result = RecognitionResult::matched(identity, 1.4);
        assert_eq!(result.confidence, Some(1.0));
    }
}
