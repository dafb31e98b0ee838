//! 管理员用户管理

use facemed_client::{AdminApi, SessionStore};
use facemed_core::utils::{sanitize_text, validate_name};
use facemed_core::{AdminUserUpdate, FacemedError, Result, Role, Session, UserListQuery, UserPage};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::guard::{require_confirmation, Confirmer, InFlight};

/// 单页最多返回的用户数量
pub const MAX_PAGE_SIZE: u32 = 100;

/// 管理员服务
pub struct AdminService {
    api: Arc<dyn AdminApi>,
    session: SessionStore,
    in_flight: InFlight,
}

impl AdminService {
    pub fn new(api: Arc<dyn AdminApi>, session: SessionStore) -> Self {
        Self {
            api,
            session,
            in_flight: InFlight::new(),
        }
    }

    fn require_admin(&self) -> Result<Session> {
        let session = self.session.require()?;
        if !self.session.capabilities().can_manage_users {
            warn!("User {} attempted an admin operation", session.user_id);
            return Err(FacemedError::Forbidden("Admin privileges required".to_string()));
        }
        Ok(session)
    }

    /// 分页查询用户
    pub async fn list_users(&self, query: UserListQuery) -> Result<UserPage> {
        self.require_admin()?;
        if query.page < 1 {
            return Err(FacemedError::validation("page", "Page must be at least 1"));
        }
        if query.page_size < 1 || query.page_size > MAX_PAGE_SIZE {
            return Err(FacemedError::validation(
                "page_size",
                format!("Page size must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }

        let query = UserListQuery {
            query: sanitize_text(query.query.as_deref()),
            ..query
        };
        self.api.list_users(&query).await
    }

    /// 修改用户姓名或角色
    pub async fn update_user(&self, user_id: Uuid, update: AdminUserUpdate) -> Result<()> {
        let _guard = self.in_flight.enter("user update")?;
        self.require_admin()?;
        if update.is_empty() {
            return Err(FacemedError::validation("update", "Nothing to update"));
        }

        let update = AdminUserUpdate {
            name: update.name.as_deref().map(validate_name).transpose()?,
            role: update.role,
        };
        self.api.update_user(user_id, &update).await?;
        info!("Updated user {}", user_id);
        Ok(())
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role) -> Result<()> {
        self.update_user(
            user_id,
            AdminUserUpdate {
                role: Some(role),
                ..AdminUserUpdate::default()
            },
        )
        .await
    }

    pub async fn ban(&self, user_id: Uuid) -> Result<()> {
        self.set_banned(user_id, true).await
    }

    pub async fn unban(&self, user_id: Uuid) -> Result<()> {
        self.set_banned(user_id, false).await
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<()> {
        let _guard = self.in_flight.enter("ban update")?;
        let session = self.require_admin()?;
        if banned && user_id == session.user_id {
            return Err(FacemedError::validation("user_id", "Cannot ban your own admin account"));
        }
        self.api.set_banned(user_id, banned).await?;
        info!("User {} banned={}", user_id, banned);
        Ok(())
    }

    /// 删除用户，需要确认且不能删除自己
    pub async fn delete_user(&self, user_id: Uuid, confirmer: &dyn Confirmer) -> Result<()> {
        let _guard = self.in_flight.enter("user deletion")?;
        let session = self.require_admin()?;
        if user_id == session.user_id {
            return Err(FacemedError::validation(
                "user_id",
                "Cannot delete your own admin account",
            ));
        }
        require_confirmation(
            confirmer,
            "Delete this user? Their profile, connections and face data will be removed.",
        )?;

        self.api.delete_user(user_id).await?;
        info!("Deleted user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{session_for, FakeBackend, ScriptedConfirmer};
    use facemed_core::AdminUserView;

    fn service(role: Role) -> (AdminService, Arc<FakeBackend>, Uuid) {
        let me = Uuid::new_v4();
        let backend = FakeBackend::new(session_for(me, role));
        let (store, writer) = SessionStore::in_memory();
        writer.set(session_for(me, role)).unwrap();
        (AdminService::new(backend.clone(), store), backend, me)
    }

    fn user(name: &str) -> AdminUserView {
        AdminUserView {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            role: Role::User,
            is_active: true,
            created_at: None,
            last_login: None,
        }
    }

    #[tokio::test]
    async fn test_non_admin_is_forbidden() {
        let (service, backend, _) = service(Role::Doctor);
        let err = service.list_users(UserListQuery::default()).await.unwrap_err();
        assert!(matches!(err, FacemedError::Forbidden(_)));
        assert_eq!(backend.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_page_bounds() {
        let (service, backend, _) = service(Role::Admin);
        let zero = UserListQuery {
            page: 0,
            ..UserListQuery::default()
        };
        assert!(service.list_users(zero).await.is_err());

        let huge = UserListQuery {
            page_size: 101,
            ..UserListQuery::default()
        };
        assert!(service.list_users(huge).await.is_err());
        assert_eq!(backend.network_calls(), 0);

        backend.users.lock().unwrap().push(user("Ada"));
        let page = service.list_users(UserListQuery::default()).await.unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.total_pages(), 1);
    }

    #[tokio::test]
    async fn test_role_change_and_ban() {
        let (service, backend, _) = service(Role::Admin);
        let target = user("Ada");
        let id = target.id;
        backend.users.lock().unwrap().push(target);

        service.set_role(id, Role::Doctor).await.unwrap();
        service.ban(id).await.unwrap();
        {
            let users = backend.users.lock().unwrap();
            assert_eq!(users[0].role, Role::Doctor);
            assert!(!users[0].is_active);
        }

        service.unban(id).await.unwrap();
        assert!(backend.users.lock().unwrap()[0].is_active);

        assert!(matches!(
            service.update_user(id, AdminUserUpdate::default()).await,
            Err(FacemedError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation_and_not_self() {
        let (service, backend, me) = service(Role::Admin);
        let target = user("Ada");
        let id = target.id;
        backend.users.lock().unwrap().push(target);

        let accept = ScriptedConfirmer::answering(true);
        let err = service.delete_user(me, &accept).await.unwrap_err();
        assert_eq!(err.user_message(), "Cannot delete your own admin account");
        assert!(accept.prompts().is_empty());

        let decline = ScriptedConfirmer::answering(false);
        assert!(matches!(
            service.delete_user(id, &decline).await,
            Err(FacemedError::ConfirmationDeclined(_))
        ));
        assert_eq!(backend.call_count("delete_user"), 0);

        service.delete_user(id, &accept).await.unwrap();
        assert!(backend.users.lock().unwrap().is_empty());
    }
}
