//! 测试用的内存服务端

use async_trait::async_trait;
use facemed_client::{AdminApi, AuthApi, ConnectionsApi, ProfileApi, RecognitionApi};
use facemed_core::{
    AdminUserUpdate, AdminUserView, ChangePasswordRequest, ConnectionId, ConnectionList, ConnectedUser,
    ExternalContact, ExternalContactDraft, ExternalContactUpdate, FaceConfirmRequest, FacemedError,
    Identity, ImageUpload, LinkRequest, LinkRequestDraft, LinkStatus, LinkedConnection, LoginRequest,
    MainInfoUpdate, MedicalInfo, PairStatus, PrivacyFlag, ProvisionalIdentity, RecognitionResult,
    RegistrationReceipt, RegistrationRequest, Relationship, Result, Role, Session, UserListQuery,
    UserPage, UserSummary,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::guard::{lock, Confirmer};

pub const PASSWORD: &str = "correct-horse1";

pub fn identity(name: &str) -> Identity {
    serde_json::from_value(serde_json::json!({
        "id": Uuid::new_v4(),
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "phone": "1234567890",
    }))
    .unwrap()
}

pub fn session_for(id: Uuid, role: Role) -> Session {
    Session {
        token: format!("token-{}", id),
        user_id: id,
        name: "Current User".to_string(),
        email: "me@example.com".to_string(),
        role,
    }
}

pub fn linked(me: Uuid, other: Uuid) -> (LinkedConnection, LinkRequest) {
    let connection = LinkedConnection {
        id: Uuid::new_v4(),
        connected_user: ConnectedUser {
            id: other,
            name: "Other".to_string(),
            email: None,
            phone: None,
        },
        relationship: Relationship::Friend,
        created_at: None,
    };
    let request = LinkRequest {
        id: Uuid::new_v4(),
        sender_id: me,
        receiver_id: other,
        relationship: Relationship::Friend,
        status: LinkStatus::Accepted,
        created_at: None,
        sender_name: None,
    };
    (connection, request)
}

pub fn request(sender: Uuid, receiver: Uuid, status: LinkStatus) -> LinkRequest {
    LinkRequest {
        id: Uuid::new_v4(),
        sender_id: sender,
        receiver_id: receiver,
        relationship: Relationship::Friend,
        status,
        created_at: None,
        sender_name: None,
    }
}

/// 记录提示并按预设回答的确认器
pub struct ScriptedConfirmer {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        lock(&self.prompts).push(prompt.to_string());
        self.answer
    }
}

/// 内存服务端，实现全部接口
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<FacemedError>>>,
    pub account: Mutex<Session>,
    pub face_match: Mutex<Option<ProvisionalIdentity>>,
    pub profiles: Mutex<HashMap<Uuid, Identity>>,
    pub connections: Mutex<ConnectionList>,
    pub requests: Mutex<Vec<LinkRequest>>,
    pub recognized: Mutex<Option<Identity>>,
    pub users: Mutex<Vec<AdminUserView>>,
    next_contact_id: Mutex<i64>,
}

impl FakeBackend {
    pub fn new(account: Session) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            account: Mutex::new(account),
            face_match: Mutex::new(None),
            profiles: Mutex::new(HashMap::new()),
            connections: Mutex::new(ConnectionList::default()),
            requests: Mutex::new(Vec::new()),
            recognized: Mutex::new(None),
            users: Mutex::new(Vec::new()),
            next_contact_id: Mutex::new(1),
        })
    }

    /// 下一次调用该操作时返回给定错误
    pub fn fail_next(&self, operation: &str, err: FacemedError) {
        lock(&self.failures)
            .entry(operation.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == operation).count()
    }

    pub fn network_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn add_profile(&self, identity: Identity) {
        lock(&self.profiles).insert(identity.id, identity);
    }

    fn record(&self, operation: &str) -> Result<()> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures).get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn profile(&self, user_id: Uuid) -> Result<Identity> {
        lock(&self.profiles)
            .get(&user_id)
            .cloned()
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))
    }
}

#[async_trait]
impl AuthApi for FakeBackend {
    async fn login(&self, request: &LoginRequest) -> Result<Session> {
        self.record("login")?;
        if request.password != PASSWORD {
            return Err(FacemedError::InvalidCredential("Invalid email or password".to_string()));
        }
        Ok(lock(&self.account).clone())
    }

    async fn submit_face(&self, _image: &ImageUpload) -> Result<ProvisionalIdentity> {
        self.record("submit_face")?;
        lock(&self.face_match)
            .clone()
            .ok_or_else(|| FacemedError::NoMatch("Face not recognized".to_string()))
    }

    async fn confirm_face(&self, request: &FaceConfirmRequest) -> Result<Session> {
        self.record("confirm_face")?;
        let current = lock(&self.face_match).clone();
        match current {
            Some(identity) if identity.correlation_id == request.correlation_id => {
                if request.password == PASSWORD {
                    Ok(lock(&self.account).clone())
                } else {
                    Err(FacemedError::InvalidCredential("Invalid password".to_string()))
                }
            }
            _ => Err(FacemedError::SessionExpired("User not found".to_string())),
        }
    }

    async fn change_password(&self, request: &ChangePasswordRequest) -> Result<()> {
        self.record("change_password")?;
        if request.current_password != PASSWORD {
            return Err(FacemedError::validation("request", "Current password is incorrect"));
        }
        Ok(())
    }

    async fn register(&self, request: &RegistrationRequest, _images: &[ImageUpload]) -> Result<RegistrationReceipt> {
        self.record("register")?;
        Ok(RegistrationReceipt {
            success: true,
            user_id: Some(Uuid::new_v4()),
            message: format!("Registered {}", request.email),
        })
    }
}

#[async_trait]
impl RecognitionApi for FakeBackend {
    async fn recognize(&self, _image: &ImageUpload) -> Result<RecognitionResult> {
        self.record("recognize")?;
        Ok(match lock(&self.recognized).clone() {
            Some(identity) => RecognitionResult::matched(identity, 0.93),
            None => RecognitionResult::no_match(),
        })
    }
}

#[async_trait]
impl ProfileApi for FakeBackend {
    async fn get_profile(&self, user_id: Uuid) -> Result<Identity> {
        self.record("get_profile")?;
        self.profile(user_id)
    }

    async fn update_main_info(&self, user_id: Uuid, update: &MainInfoUpdate) -> Result<Identity> {
        self.record("update_main_info")?;
        let mut profiles = lock(&self.profiles);
        let identity = profiles
            .get_mut(&user_id)
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))?;
        if let Some(name) = &update.name {
            identity.name = name.clone();
        }
        if let Some(phone) = &update.phone {
            identity.phone = Some(phone.clone());
        }
        Ok(identity.clone())
    }

    async fn update_medical_info(&self, user_id: Uuid, info: &MedicalInfo) -> Result<MedicalInfo> {
        self.record("update_medical_info")?;
        let mut profiles = lock(&self.profiles);
        let identity = profiles
            .get_mut(&user_id)
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))?;
        identity.medical_info = info.clone();
        Ok(info.clone())
    }

    async fn update_privacy(&self, user_id: Uuid, flag: PrivacyFlag, value: bool) -> Result<()> {
        self.record("update_privacy")?;
        let mut profiles = lock(&self.profiles);
        let identity = profiles
            .get_mut(&user_id)
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))?;
        identity.privacy.set(flag, value);
        Ok(())
    }

    async fn delete_account(&self, user_id: Uuid, password: &str) -> Result<()> {
        self.record("delete_account")?;
        if password != PASSWORD {
            return Err(FacemedError::Auth("Invalid password".to_string()));
        }
        lock(&self.profiles).remove(&user_id);
        Ok(())
    }

    async fn search_users(&self, query: &str, exclude: Uuid) -> Result<Vec<UserSummary>> {
        self.record("search_users")?;
        let needle = query.to_lowercase();
        Ok(lock(&self.profiles)
            .values()
            .filter(|p| p.id != exclude && p.name.to_lowercase().contains(&needle))
            .map(|p| UserSummary {
                id: p.id,
                name: p.name.clone(),
                email: p.email.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ConnectionsApi for FakeBackend {
    async fn list_connections(&self, _user_id: Uuid) -> Result<ConnectionList> {
        self.record("list_connections")?;
        Ok(lock(&self.connections).clone())
    }

    async fn pending_requests(&self) -> Result<Vec<LinkRequest>> {
        self.record("pending_requests")?;
        Ok(lock(&self.requests)
            .iter()
            .filter(|r| r.status == LinkStatus::Pending)
            .cloned()
            .collect())
    }

    async fn request_link(&self, draft: &LinkRequestDraft) -> Result<Uuid> {
        self.record("request_link")?;
        let sender = lock(&self.account).user_id;
        let mut request = request(sender, draft.connected_user_id, LinkStatus::Pending);
        request.relationship = draft.relationship;
        let id = request.id;
        lock(&self.requests).push(request);
        Ok(id)
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<()> {
        self.record("accept_request")?;
        let mut requests = lock(&self.requests);
        let request = requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| FacemedError::NotFound("Request not found".to_string()))?;
        request.status = LinkStatus::Accepted;
        lock(&self.connections).linked_connections.push(LinkedConnection {
            id: Uuid::new_v4(),
            connected_user: ConnectedUser {
                id: request.sender_id,
                name: "Sender".to_string(),
                email: None,
                phone: None,
            },
            relationship: request.relationship,
            created_at: None,
        });
        Ok(())
    }

    async fn reject_request(&self, request_id: Uuid) -> Result<()> {
        self.record("reject_request")?;
        let mut requests = lock(&self.requests);
        let request = requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| FacemedError::NotFound("Request not found".to_string()))?;
        request.status = LinkStatus::Rejected;
        Ok(())
    }

    async fn add_external_contact(&self, draft: &ExternalContactDraft) -> Result<i64> {
        self.record("add_external_contact")?;
        let id = {
            let mut next = lock(&self.next_contact_id);
            let id = *next;
            *next += 1;
            id
        };
        lock(&self.connections).external_contacts.push(ExternalContact {
            id,
            name: draft.name.clone(),
            phone: draft.phone.clone(),
            address: draft.address.clone(),
            relationship: draft.relationship,
            created_at: None,
        });
        Ok(id)
    }

    async fn update_linked(&self, connection_id: Uuid, relationship: Relationship) -> Result<()> {
        self.record("update_linked")?;
        let mut connections = lock(&self.connections);
        let connection = connections
            .linked_connections
            .iter_mut()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| FacemedError::NotFound("Connection not found".to_string()))?;
        connection.relationship = relationship;
        Ok(())
    }

    async fn update_external(&self, contact_id: i64, update: &ExternalContactUpdate) -> Result<()> {
        self.record("update_external")?;
        let mut connections = lock(&self.connections);
        let contact = connections
            .external_contacts
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or_else(|| FacemedError::NotFound("Contact not found".to_string()))?;
        if let Some(name) = &update.name {
            contact.name = name.clone();
        }
        if let Some(phone) = &update.phone {
            contact.phone = phone.clone();
        }
        if let Some(relationship) = update.relationship {
            contact.relationship = relationship;
        }
        Ok(())
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<()> {
        self.record("delete_connection")?;
        if lock(&self.connections).remove(id) {
            Ok(())
        } else {
            Err(FacemedError::NotFound("Connection not found".to_string()))
        }
    }

    async fn pair_statuses(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PairStatus>> {
        self.record("pair_statuses")?;
        let connections = lock(&self.connections);
        Ok(user_ids
            .iter()
            .filter(|id| connections.is_connected_to(**id))
            .map(|id| (*id, PairStatus::Connected))
            .collect())
    }
}

#[async_trait]
impl AdminApi for FakeBackend {
    async fn list_users(&self, query: &UserListQuery) -> Result<UserPage> {
        self.record("list_users")?;
        let users = lock(&self.users).clone();
        Ok(UserPage {
            total: users.len() as u64,
            users,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn update_user(&self, user_id: Uuid, update: &AdminUserUpdate) -> Result<()> {
        self.record("update_user")?;
        let mut users = lock(&self.users);
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))?;
        if let Some(role) = update.role {
            user.role = role;
        }
        Ok(())
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<()> {
        self.record("set_banned")?;
        let mut users = lock(&self.users);
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| FacemedError::NotFound("User not found".to_string()))?;
        user.is_active = !banned;
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        self.record("delete_user")?;
        lock(&self.users).retain(|u| u.id != user_id);
        Ok(())
    }
}
