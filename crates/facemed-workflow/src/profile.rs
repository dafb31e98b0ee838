//! 个人资料、隐私设置和医疗信息

use facemed_client::ProfileApi;
use facemed_core::utils::{sanitize_text, validate_name, validate_phone, validate_search_query};
use facemed_core::{
    redact, FacemedError, Identity, MainInfoUpdate, MedicalField, MedicalInfo, PrivacyFlag,
    PrivacySettings, Result, Session, UserSummary, Viewer, VisibleProfile,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::guard::{lock, require_confirmation, Confirmer, InFlight};
use crate::optimistic::run_optimistic;

/// 当前用户的隐私设置缓存
#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedPrivacy {
    user_id: Uuid,
    settings: PrivacySettings,
}

/// 资料服务
pub struct ProfileService {
    api: Arc<dyn ProfileApi>,
    auth: Arc<AuthService>,
    privacy: Mutex<Option<CachedPrivacy>>,
    in_flight: InFlight,
}

impl ProfileService {
    pub fn new(api: Arc<dyn ProfileApi>, auth: Arc<AuthService>) -> Self {
        Self {
            api,
            auth,
            privacy: Mutex::new(None),
            in_flight: InFlight::new(),
        }
    }

    fn require_session(&self) -> Result<Session> {
        self.auth.session().require()
    }

    /// 查看资料，非本人时按隐私设置和查看者角色过滤
    pub async fn view(&self, user_id: Uuid) -> Result<VisibleProfile> {
        let session = self.require_session()?;
        let identity = self.api.get_profile(user_id).await?;
        if identity.id == session.user_id {
            self.remember_privacy(&identity);
        }

        let viewer = Viewer::for_subject(Some(session.user_id), session.role, identity.id);
        let capabilities = self.auth.session().capabilities();
        Ok(redact(&identity, viewer, &capabilities))
    }

    /// 当前用户的完整资料
    pub async fn own_profile(&self) -> Result<Identity> {
        let session = self.require_session()?;
        let identity = self.api.get_profile(session.user_id).await?;
        self.remember_privacy(&identity);
        Ok(identity)
    }

    /// 缓存的隐私设置
    pub fn privacy_settings(&self) -> Option<PrivacySettings> {
        let session = self.auth.session().get()?;
        lock(&self.privacy)
            .filter(|cached| cached.user_id == session.user_id)
            .map(|cached| cached.settings)
    }

    /// 修改一项隐私设置
    ///
    /// 先更新本地设置再提交，失败时恢复原值。
    pub async fn set_privacy(&self, flag: PrivacyFlag, value: bool) -> Result<PrivacySettings> {
        let _guard = self.in_flight.enter("privacy update")?;
        let session = self.require_session()?;
        if self.privacy_settings().is_none() {
            self.own_profile().await?;
        }

        let api = self.api.clone();
        let user_id = session.user_id;
        run_optimistic(
            &self.privacy,
            flag.key(),
            |cached| {
                if let Some(cached) = cached {
                    cached.settings.set(flag, value);
                }
            },
            async move { api.update_privacy(user_id, flag, value).await },
        )
        .await?;

        info!("Privacy setting {} = {}", flag.key(), value);
        self.privacy_settings()
            .ok_or_else(|| FacemedError::Server("Privacy settings unavailable".to_string()))
    }

    /// 更新基本信息
    pub async fn update_main_info(&self, subject: Uuid, update: MainInfoUpdate) -> Result<Identity> {
        let _guard = self.in_flight.enter("main info update")?;
        let session = self.require_session()?;
        if !self.auth.session().capabilities().can_edit_subject(session.user_id, subject) {
            return Err(FacemedError::Forbidden(
                "You are not allowed to edit this profile".to_string(),
            ));
        }

        let update = normalize_main_info(update)?;
        let identity = self.api.update_main_info(subject, &update).await?;
        info!("Main info updated for user {}", subject);
        Ok(identity)
    }

    /// 保存医疗信息
    ///
    /// 有字段从非空变为空时需要确认。
    pub async fn save_medical(
        &self,
        subject: Uuid,
        before: &MedicalInfo,
        after: MedicalInfo,
        confirmer: &dyn Confirmer,
    ) -> Result<MedicalInfo> {
        let _guard = self.in_flight.enter("medical info update")?;
        let session = self.require_session()?;
        if !self.auth.session().capabilities().can_edit_subject(session.user_id, subject) {
            return Err(FacemedError::Forbidden(
                "You are not allowed to edit this medical record".to_string(),
            ));
        }

        let cleared = cleared_fields(before, &after);
        if !cleared.is_empty() {
            let labels: Vec<&str> = cleared.iter().map(MedicalField::label).collect();
            let prompt = format!(
                "The following will be permanently cleared: {}. Continue?",
                labels.join(", ")
            );
            require_confirmation(confirmer, &prompt)?;
        }

        let mut normalized = MedicalInfo::default();
        for field in MedicalField::ALL {
            normalized.set(field, sanitize_text(after.get(field)));
        }

        let saved = self.api.update_medical_info(subject, &normalized).await?;
        info!("Medical info saved for user {}", subject);
        Ok(saved)
    }

    /// 删除当前账户，成功后清除会话
    pub async fn delete_account(&self, password: &str, confirmer: &dyn Confirmer) -> Result<()> {
        let _guard = self.in_flight.enter("account deletion")?;
        let session = self.require_session()?;
        if password.is_empty() {
            return Err(FacemedError::validation("password", "Password is required"));
        }
        require_confirmation(
            confirmer,
            "Permanently delete your account, face data and connections? This cannot be undone.",
        )?;

        self.api.delete_account(session.user_id, password).await?;
        warn!("Account {} deleted", session.user_id);

        *lock(&self.privacy) = None;
        self.auth.logout()
    }

    /// 修改密码
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        self.auth.change_password(current_password, new_password).await
    }

    /// 搜索其他用户
    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        let session = self.require_session()?;
        let query = validate_search_query(query)?;
        let users = self.api.search_users(&query, session.user_id).await?;
        debug!("Search returned {} users", users.len());
        Ok(users)
    }

    fn remember_privacy(&self, identity: &Identity) {
        *lock(&self.privacy) = Some(CachedPrivacy {
            user_id: identity.id,
            settings: identity.privacy,
        });
    }
}

/// 从非空变为空的医疗字段
pub fn cleared_fields(before: &MedicalInfo, after: &MedicalInfo) -> Vec<MedicalField> {
    MedicalField::ALL
        .into_iter()
        .filter(|field| before.is_filled(*field) && !after.is_filled(*field))
        .collect()
}

fn normalize_main_info(update: MainInfoUpdate) -> Result<MainInfoUpdate> {
    if update.is_empty() {
        return Err(FacemedError::validation("update", "No data provided for update"));
    }
    Ok(MainInfoUpdate {
        name: update.name.as_deref().map(validate_name).transpose()?,
        phone: update.phone.as_deref().map(validate_phone).transpose()?,
        date_of_birth: update.date_of_birth,
        nationality: sanitize_text(update.nationality.as_deref()),
        gender: sanitize_text(update.gender.as_deref()),
        id_number: sanitize_text(update.id_number.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{identity, session_for, FakeBackend, ScriptedConfirmer, PASSWORD};
    use facemed_client::SessionStore;
    use facemed_core::Role;

    struct Fixture {
        service: ProfileService,
        backend: Arc<FakeBackend>,
        me: Identity,
        store: SessionStore,
    }

    fn fixture(role: Role) -> Fixture {
        let me = identity("Ada");
        let backend = FakeBackend::new(session_for(me.id, role));
        backend.add_profile(me.clone());
        let (store, writer) = SessionStore::in_memory();
        writer.set(session_for(me.id, role)).unwrap();
        let auth = Arc::new(AuthService::new(backend.clone(), writer));
        Fixture {
            service: ProfileService::new(backend.clone(), auth),
            backend,
            me,
            store,
        }
    }

    #[tokio::test]
    async fn test_other_users_profile_is_redacted() {
        let f = fixture(Role::User);
        let mut other = identity("Grace");
        other.privacy.is_name_public = false;
        other.privacy.is_phone_public = true;
        other.medical_info.allergies = Some("Penicillin".to_string());
        f.backend.add_profile(other.clone());

        let visible = f.service.view(other.id).await.unwrap();
        assert!(visible.is_private_account());
        assert_eq!(visible.phone, None);
        assert_eq!(visible.medical_info, None);

        let own = f.service.view(f.me.id).await.unwrap();
        assert_eq!(own.name, "Ada");
        assert_eq!(own.phone.as_deref(), Some("1234567890"));
        assert!(own.medical_info.is_some());
    }

    #[tokio::test]
    async fn test_doctor_sees_everything() {
        let f = fixture(Role::Doctor);
        let mut other = identity("Grace");
        other.privacy.is_name_public = false;
        other.medical_info.allergies = Some("Penicillin".to_string());
        f.backend.add_profile(other.clone());

        let visible = f.service.view(other.id).await.unwrap();
        assert_eq!(visible.name, "Grace");
        assert_eq!(
            visible.medical_info.and_then(|m| m.allergies).as_deref(),
            Some("Penicillin")
        );
    }

    #[tokio::test]
    async fn test_privacy_toggle_rolls_back_on_failure() {
        let f = fixture(Role::User);
        let settings = f.service.set_privacy(PrivacyFlag::Phone, true).await.unwrap();
        assert!(settings.is_phone_public);

        f.backend
            .fail_next("update_privacy", FacemedError::Network("offline".to_string()));
        assert!(f.service.set_privacy(PrivacyFlag::Email, true).await.is_err());
        let settings = f.service.privacy_settings().unwrap();
        assert!(!settings.is_email_public);
        assert!(settings.is_phone_public);
    }

    #[tokio::test]
    async fn test_clearing_medical_field_requires_confirmation() {
        let f = fixture(Role::User);
        let before = MedicalInfo {
            allergies: Some("Penicillin".to_string()),
            ..MedicalInfo::default()
        };
        let mut after = before.clone();
        after.allergies = Some("   ".to_string());

        let decline = ScriptedConfirmer::answering(false);
        let err = f
            .service
            .save_medical(f.me.id, &before, after.clone(), &decline)
            .await
            .unwrap_err();
        assert!(matches!(err, FacemedError::ConfirmationDeclined(_)));
        assert!(decline.prompts()[0].contains("allergies"));
        assert_eq!(f.backend.call_count("update_medical_info"), 0);

        let accept = ScriptedConfirmer::answering(true);
        let saved = f.service.save_medical(f.me.id, &before, after, &accept).await.unwrap();
        assert_eq!(saved.allergies, None);
    }

    #[tokio::test]
    async fn test_filling_medical_fields_needs_no_prompt() {
        let f = fixture(Role::User);
        let after = MedicalInfo {
            chronic_conditions: Some("Asthma".to_string()),
            ..MedicalInfo::default()
        };
        let confirmer = ScriptedConfirmer::answering(false);
        f.service
            .save_medical(f.me.id, &MedicalInfo::default(), after, &confirmer)
            .await
            .unwrap();
        assert!(confirmer.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_plain_user_cannot_edit_others() {
        let f = fixture(Role::User);
        let other = identity("Grace");
        f.backend.add_profile(other.clone());
        let update = MainInfoUpdate {
            name: Some("Mallory".to_string()),
            ..MainInfoUpdate::default()
        };
        assert!(matches!(
            f.service.update_main_info(other.id, update).await,
            Err(FacemedError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_update_main_info_validates_phone() {
        let f = fixture(Role::User);
        let bad = MainInfoUpdate {
            phone: Some("123".to_string()),
            ..MainInfoUpdate::default()
        };
        assert!(f.service.update_main_info(f.me.id, bad).await.is_err());
        assert!(f.service.update_main_info(f.me.id, MainInfoUpdate::default()).await.is_err());
        assert_eq!(f.backend.network_calls(), 0);

        let good = MainInfoUpdate {
            phone: Some("+1 (555) 123-4567".to_string()),
            ..MainInfoUpdate::default()
        };
        let identity = f.service.update_main_info(f.me.id, good).await.unwrap();
        assert_eq!(identity.phone.as_deref(), Some("+15551234567"));
    }

    #[tokio::test]
    async fn test_delete_account_clears_session() {
        let f = fixture(Role::User);
        let decline = ScriptedConfirmer::answering(false);
        assert!(f.service.delete_account(PASSWORD, &decline).await.is_err());
        assert_eq!(f.backend.call_count("delete_account"), 0);

        let accept = ScriptedConfirmer::answering(true);
        f.service.delete_account(PASSWORD, &accept).await.unwrap();
        assert!(!f.store.is_authenticated());
    }

    #[tokio::test]
    async fn test_search_requires_two_characters() {
        let f = fixture(Role::User);
        f.backend.add_profile(identity("Grace"));
        assert!(f.service.search_users("G").await.is_err());

        let users = f.service.search_users("gra").await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.iter().all(|u| u.id != f.me.id));
    }

    #[test]
    fn test_cleared_fields() {
        let before = MedicalInfo {
            allergies: Some("Peanuts".to_string()),
            emergency_notes: Some("Call spouse".to_string()),
            ..MedicalInfo::default()
        };
        let after = MedicalInfo {
            allergies: Some("Peanuts, shellfish".to_string()),
            ..MedicalInfo::default()
        };
        assert_eq!(cleared_fields(&before, &after), vec![MedicalField::EmergencyNotes]);
    }
}
