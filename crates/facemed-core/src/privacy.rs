//! 可见性策略
//!
//! 根据被查看者的隐私设置和查看者身份判断资料字段是否可以展示。
//! 规则依次为：
//! 1. 医生、管理员或本人查看时全部可见；
//! 2. 主开关（姓名公开）关闭时全部不可见；
//! 3. 否则姓名可见，其余字段取决于各自的开关。
//!
//! 判断函数不依赖具体字段列表，任何实现了 [`PrivacyFlags`] 的类型都可以参与计算。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

use crate::models::{Identity, MedicalInfo, PrivacyFlag, PrivacySettings, Role};

/// 姓名被隐藏时展示的占位名称
pub const PRIVATE_ACCOUNT_NAME: &str = "Private Account";

/// 查看者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub role: Role,
    pub is_subject: bool,
}

impl Viewer {
    /// 以给定角色查看他人资料
    pub fn other(role: Role) -> Self {
        Self { role, is_subject: false }
    }

    /// 查看自己的资料
    pub fn subject(role: Role) -> Self {
        Self { role, is_subject: true }
    }

    /// 根据查看者ID与被查看者ID构造
    pub fn for_subject(viewer_id: Option<Uuid>, role: Role, subject_id: Uuid) -> Self {
        Self {
            role,
            is_subject: viewer_id == Some(subject_id),
        }
    }

    pub fn is_fully_trusted(&self) -> bool {
        self.is_subject || self.role.is_privileged()
    }
}

/// 隐私开关集合
pub trait PrivacyFlags {
    type Field: Copy + Eq;

    /// 主开关控制的字段（姓名）
    fn is_master(&self, field: Self::Field) -> bool;

    /// 主开关取值
    fn master_public(&self) -> bool;

    /// 单个字段的存储值
    fn field_public(&self, field: Self::Field) -> bool;
}

/// 判断字段是否可以展示
pub fn reveal<P: PrivacyFlags>(field: P::Field, settings: &P, viewer: Viewer) -> bool {
    if viewer.is_fully_trusted() {
        return true;
    }
    if !settings.master_public() {
        return false;
    }
    settings.is_master(field) || settings.field_public(field)
}

/// 资料中可展示的字段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    ProfilePicture,
    Email,
    Phone,
    DateOfBirth,
    Gender,
    Nationality,
    IdNumber,
}

impl ProfileField {
    pub const ALL: [ProfileField; 8] = [
        ProfileField::Name,
        ProfileField::ProfilePicture,
        ProfileField::Email,
        ProfileField::Phone,
        ProfileField::DateOfBirth,
        ProfileField::Gender,
        ProfileField::Nationality,
        ProfileField::IdNumber,
    ];

    /// 控制该字段的隐私开关；头像随姓名一起展示
    pub fn controlling_flag(&self) -> PrivacyFlag {
        match self {
            ProfileField::Name | ProfileField::ProfilePicture => PrivacyFlag::Name,
            ProfileField::Email => PrivacyFlag::Email,
            ProfileField::Phone => PrivacyFlag::Phone,
            ProfileField::DateOfBirth => PrivacyFlag::DateOfBirth,
            ProfileField::Gender => PrivacyFlag::Gender,
            ProfileField::Nationality => PrivacyFlag::Nationality,
            ProfileField::IdNumber => PrivacyFlag::IdNumber,
        }
    }
}

impl PrivacyFlags for PrivacySettings {
    type Field = ProfileField;

    fn is_master(&self, field: ProfileField) -> bool {
        field.controlling_flag() == PrivacyFlag::Name
    }

    fn master_public(&self) -> bool {
        self.is_name_public
    }

    fn field_public(&self, field: ProfileField) -> bool {
        self.stored(field.controlling_flag())
    }
}

/// 由 (字段, 开关) 对构造的通用开关集合
///
/// 与输入顺序无关；同一字段出现多次时取逻辑与，未出现的字段视为不公开。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet<F: Eq + Hash> {
    master: F,
    flags: HashMap<F, bool>,
}

impl<F: Copy + Eq + Hash> FlagSet<F> {
    pub fn new<I>(master: F, pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, bool)>,
    {
        let mut flags: HashMap<F, bool> = HashMap::new();
        for (field, value) in pairs {
            flags
                .entry(field)
                .and_modify(|current| *current = *current && value)
                .or_insert(value);
        }
        Self { master, flags }
    }
}

impl<F: Copy + Eq + Hash> PrivacyFlags for FlagSet<F> {
    type Field = F;

    fn is_master(&self, field: F) -> bool {
        field == self.master
    }

    fn master_public(&self) -> bool {
        self.flags.get(&self.master).copied().unwrap_or(false)
    }

    fn field_public(&self, field: F) -> bool {
        self.flags.get(&field).copied().unwrap_or(false)
    }
}

/// 经可见性策略过滤后的资料
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisibleProfile {
    pub user_id: Uuid,
    pub name: String,
    pub profile_picture_url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub id_number: Option<String>,
    /// 仅在查看者有权限时存在
    pub medical_info: Option<MedicalInfo>,
}

impl VisibleProfile {
    pub fn is_private_account(&self) -> bool {
        self.name == PRIVATE_ACCOUNT_NAME
    }
}

/// 按查看者身份过滤资料
pub fn redact(identity: &Identity, viewer: Viewer, capabilities: &Capabilities) -> VisibleProfile {
    let settings = &identity.privacy;
    let show = |field: ProfileField| reveal(field, settings, viewer);
    let pick = |field: ProfileField, value: &Option<String>| if show(field) { value.clone() } else { None };

    let name = if show(ProfileField::Name) {
        identity.name.clone()
    } else {
        PRIVATE_ACCOUNT_NAME.to_string()
    };

    let medical_info = if viewer.is_subject || capabilities.can_view_medical {
        Some(identity.medical_info.clone())
    } else {
        None
    };

    VisibleProfile {
        user_id: identity.id,
        name,
        profile_picture_url: pick(ProfileField::ProfilePicture, &identity.profile_picture_url),
        email: pick(ProfileField::Email, &identity.email),
        phone: pick(ProfileField::Phone, &identity.phone),
        date_of_birth: if show(ProfileField::DateOfBirth) {
            identity.date_of_birth
        } else {
            None
        },
        gender: pick(ProfileField::Gender, &identity.gender),
        nationality: pick(ProfileField::Nationality, &identity.nationality),
        id_number: pick(ProfileField::IdNumber, &identity.id_number),
        medical_info,
    }
}

/// 会话能力集合，登录时根据角色计算一次后向下传递
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// 查看他人的医疗信息
    pub can_view_medical: bool,
    /// 编辑他人的资料和医疗信息
    pub can_edit: bool,
    /// 管理用户账户
    pub can_manage_users: bool,
}

impl Capabilities {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::User => Self::default(),
            Role::Doctor => Self {
                can_view_medical: true,
                can_edit: true,
                can_manage_users: false,
            },
            Role::Admin => Self {
                can_view_medical: true,
                can_edit: true,
                can_manage_users: true,
            },
        }
    }

    /// 是否可以编辑某用户的数据（本人总是可以）
    pub fn can_edit_subject(&self, viewer_id: Uuid, subject_id: Uuid) -> bool {
        viewer_id == subject_id || self.can_edit
    }
}
