//! 会话存储
//!
//! 进程内唯一的会话状态，显式注入到各组件中。
//!
//! 写入方只有一个：[`SessionWriter`] 由认证服务持有，负责建立和清除会话。
//! 其他组件只持有只读的 [`SessionStore`]；唯一允许的额外写操作是
//! [`SessionStore::revoke`]，即撤销服务端已拒绝的那一个令牌。

use facemed_core::{Capabilities, FacemedError, Result, Role, Session};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_TOKEN: &str = "token";
const KEY_USER_ID: &str = "user_id";
const KEY_NAME: &str = "name";
const KEY_EMAIL: &str = "email";
const KEY_ROLE: &str = "role";

const ALL_KEYS: [&str; 5] = [KEY_TOKEN, KEY_USER_ID, KEY_NAME, KEY_EMAIL, KEY_ROLE];

/// 简单键值存储
///
/// `set_many` / `remove_many` 要么全部生效，要么全部不生效。
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;
    fn remove_many(&self, keys: &[&str]) -> Result<()>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key])
    }
}

/// 内存键值存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set_many(&self, updates: &[(&str, &str)]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in updates {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// JSON文件键值存储
///
/// 每次写入先落盘到临时文件再替换原文件，落盘成功后才更新内存；
/// 文件仅对当前用户可读写（unix 下为 0600）。
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// 打开存储文件，文件不存在时视为空
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            HashMap::new()
        };
        debug!("Opened session file {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(entries)?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(raw.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set_many(&self, updates: &[(&str, &str)]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = entries.clone();
        for (key, value) in updates {
            next.insert(key.to_string(), value.to_string());
        }
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = entries.clone();
        let before = next.len();
        for key in keys {
            next.remove(*key);
        }
        if next.len() != before {
            self.flush(&next)?;
            *entries = next;
        }
        Ok(())
    }
}

/// 当前会话及其能力集合
#[derive(Debug, Clone)]
struct ActiveSession {
    session: Session,
    capabilities: Capabilities,
}

impl ActiveSession {
    fn new(session: Session) -> Self {
        let capabilities = Capabilities::for_role(session.role);
        Self { session, capabilities }
    }
}

struct SessionInner {
    current: RwLock<Option<ActiveSession>>,
    backend: Arc<dyn KeyValueStore>,
}

impl SessionInner {
    fn read(&self) -> Option<ActiveSession> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) -> Result<()> {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.backend.remove_many(&ALL_KEYS)
    }
}

/// 只读会话句柄
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &self.inner.read().map(|a| a.session))
            .finish()
    }
}

impl SessionStore {
    /// 创建会话存储，并从后端恢复上次保存的会话
    ///
    /// 返回只读句柄和唯一的写入句柄。
    pub fn new(backend: Arc<dyn KeyValueStore>) -> (SessionStore, SessionWriter) {
        let restored = restore(backend.as_ref()).map(ActiveSession::new);
        if let Some(active) = &restored {
            info!("Restored session for user {}", active.session.user_id);
        }

        let inner = Arc::new(SessionInner {
            current: RwLock::new(restored),
            backend,
        });
        (
            SessionStore { inner: inner.clone() },
            SessionWriter { inner },
        )
    }

    /// 仅保存在内存中的会话存储
    pub fn in_memory() -> (SessionStore, SessionWriter) {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get(&self) -> Option<Session> {
        self.inner.read().map(|active| active.session)
    }

    pub fn token(&self) -> Option<String> {
        self.get().map(|session| session.token)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.get().map(|session| session.user_id)
    }

    pub fn role(&self) -> Option<Role> {
        self.get().map(|session| session.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }

    /// 当前会话的能力集合，未登录时为空集合
    pub fn capabilities(&self) -> Capabilities {
        self.inner.read().map(|active| active.capabilities).unwrap_or_default()
    }

    /// 当前会话，未登录时返回错误
    pub fn require(&self) -> Result<Session> {
        self.get().ok_or(FacemedError::NotAuthenticated)
    }

    /// 撤销被服务端拒绝的令牌
    ///
    /// 仅当当前令牌与给定令牌一致时才清除，返回是否发生了清除。
    pub fn revoke(&self, rejected_token: &str) -> bool {
        let matches = self
            .inner
            .read()
            .map(|active| active.session.token == rejected_token)
            .unwrap_or(false);
        if !matches {
            return false;
        }

        warn!("Server rejected the current credential, tearing down session");
        if let Err(e) = self.inner.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
        true
    }
}

/// 会话写入句柄，不可克隆
pub struct SessionWriter {
    inner: Arc<SessionInner>,
}

impl SessionWriter {
    /// 建立会话并持久化令牌和用户信息
    pub fn set(&self, session: Session) -> Result<()> {
        let user_id = session.user_id.to_string();
        self.inner.backend.set_many(&[
            (KEY_TOKEN, session.token.as_str()),
            (KEY_USER_ID, user_id.as_str()),
            (KEY_NAME, session.name.as_str()),
            (KEY_EMAIL, session.email.as_str()),
            (KEY_ROLE, session.role.as_str()),
        ])?;

        info!("Session established for user {} ({})", session.user_id, session.role);
        *self.inner.current.write().unwrap_or_else(|e| e.into_inner()) = Some(ActiveSession::new(session));
        Ok(())
    }

    /// 清除会话
    pub fn clear(&self) -> Result<()> {
        info!("Clearing session");
        self.inner.clear()
    }

    /// 获取只读句柄
    pub fn store(&self) -> SessionStore {
        SessionStore {
            inner: self.inner.clone(),
        }
    }
}

fn restore(backend: &dyn KeyValueStore) -> Option<Session> {
    let token = backend.get(KEY_TOKEN)?;
    let user_id = backend.get(KEY_USER_ID)?;
    let user_id = match Uuid::parse_str(&user_id) {
        Ok(id) => id,
        Err(_) => {
            warn!("Ignoring persisted session with malformed user id");
            return None;
        }
    };
    Some(Session {
        token,
        user_id,
        name: backend.get(KEY_NAME).unwrap_or_default(),
        email: backend.get(KEY_EMAIL).unwrap_or_default(),
        role: backend.get(KEY_ROLE).map(Role::from).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str, role: Role) -> Session {
        Session {
            token: token.to_string(),
            user_id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "a@x.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_set_get_clear() {
        let (store, writer) = SessionStore::in_memory();
        assert!(!store.is_authenticated());
        assert!(store.require().is_err());

        writer.set(session("secret-token", Role::Doctor)).unwrap();
        assert_eq!(store.token().as_deref(), Some("secret-token"));
        assert!(store.capabilities().can_view_medical);

        writer.clear().unwrap();
        assert!(store.get().is_none());
        assert_eq!(store.capabilities(), Capabilities::default());
    }

    #[test]
    fn test_revoke_only_matching_token() {
        let (store, writer) = SessionStore::in_memory();
        writer.set(session("current", Role::User)).unwrap();

        assert!(!store.revoke("stale"));
        assert!(store.is_authenticated());

        assert!(store.revoke("current"));
        assert!(!store.is_authenticated());
        assert!(!store.revoke("current"));
    }

    #[test]
    fn test_session_restored_from_backend() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let original = session("persisted", Role::Admin);
        {
            let (_, writer) = SessionStore::new(backend.clone());
            writer.set(original.clone()).unwrap();
        }

        let (store, _) = SessionStore::new(backend.clone());
        assert_eq!(store.get(), Some(original));

        let (_, writer) = SessionStore::new(backend.clone());
        writer.clear().unwrap();
        assert!(backend.get(KEY_TOKEN).is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("facemed-session-{}.json", Uuid::new_v4()));
        {
            let store = FileStore::open(&path).unwrap();
            store.set("token", "abc").unwrap();
            store.set("user_id", "42").unwrap();
            store.remove("user_id").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("token").as_deref(), Some("abc"));
        assert_eq!(reopened.get("user_id"), None);
        std::fs::remove_file(&path).ok();
    }

    /// 写入总是失败的后端
    struct BrokenStore {
        inner: MemoryStore,
    }

    impl KeyValueStore for BrokenStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set_many(&self, _entries: &[(&str, &str)]) -> Result<()> {
            Err(FacemedError::Io("disk full".to_string()))
        }

        fn remove_many(&self, keys: &[&str]) -> Result<()> {
            self.inner.remove_many(keys)
        }
    }

    #[test]
    fn test_failed_persist_keeps_previous_session() {
        let inner = MemoryStore::new();
        let previous = session("old-token", Role::Doctor);
        let previous_id = previous.user_id.to_string();
        inner
            .set_many(&[
                (KEY_TOKEN, "old-token"),
                (KEY_USER_ID, previous_id.as_str()),
                (KEY_NAME, "Ada"),
                (KEY_EMAIL, "a@x.com"),
                (KEY_ROLE, "doctor"),
            ])
            .unwrap();
        let backend = Arc::new(BrokenStore { inner });

        let (store, writer) = SessionStore::new(backend.clone());
        assert!(writer.set(session("new-token", Role::User)).is_err());
        assert_eq!(store.get(), Some(previous.clone()));

        let (restored, _) = SessionStore::new(backend);
        assert_eq!(restored.get(), Some(previous));
    }

    #[test]
    fn test_file_store_failed_flush_leaves_entries_untouched() {
        let blocker = std::env::temp_dir().join(format!("facemed-blocker-{}", Uuid::new_v4()));
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = FileStore::open(blocker.join("session.json")).unwrap();

        assert!(store.set_many(&[(KEY_TOKEN, "t"), (KEY_USER_ID, "u")]).is_err());
        assert_eq!(store.get(KEY_TOKEN), None);
        assert_eq!(store.get(KEY_USER_ID), None);
        std::fs::remove_file(&blocker).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("facemed-session-{}.json", Uuid::new_v4()));
        let store = FileStore::open(&path).unwrap();
        store.set(KEY_TOKEN, "secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_user_id_is_not_restored() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(KEY_TOKEN, "t").unwrap();
        backend.set(KEY_USER_ID, "not-a-uuid").unwrap();

        let (store, _) = SessionStore::new(backend);
        assert!(!store.is_authenticated());
    }
}
