//! 关联管理
//!
//! 注册用户之间通过请求/接受建立关联；外部联系人直接创建。
//! 本地缓存当前用户的关联列表和请求列表，所有修改完成后刷新缓存。

use chrono::Utc;
use facemed_client::{ConnectionsApi, SessionStore};
use facemed_core::utils::{sanitize_text, validate_name, validate_phone};
use facemed_core::{
    ConflictKind, ConnectionId, ConnectionList, ExternalContact, ExternalContactDraft,
    ExternalContactUpdate, FacemedError, LinkRequest, LinkRequestDraft, LinkStatus, PairStatus,
    Relationship, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::guard::{lock, require_confirmation, Confirmer, InFlight};
use crate::optimistic::run_optimistic;
use crate::state_machine::{LinkEvent, LinkStateMachine};

/// 修改操作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// 目标已被删除，本地列表已刷新
    AlreadyGone { notice: String },
}

/// 关联修改内容
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    Linked(Relationship),
    External(ExternalContactUpdate),
}

/// 发起关联请求前的冲突检查
///
/// - 已有已接受的关联：`AlreadyConnected`
/// - 任一方向存在待处理请求：`AlreadyExists`
/// - 被拒绝过的请求不阻止再次发起
///
/// 本地快照看不到的冲突交由服务端判断。
pub struct LinkPolicy;

impl LinkPolicy {
    pub fn check(me: Uuid, target: Uuid, connections: &ConnectionList, requests: &[LinkRequest]) -> Result<()> {
        if me == target {
            return Err(FacemedError::validation(
                "connected_user_id",
                "Cannot create a connection to yourself",
            ));
        }

        let accepted = requests
            .iter()
            .any(|r| r.status == LinkStatus::Accepted && r.joins(me, target));
        if connections.is_connected_to(target) || accepted {
            return Err(FacemedError::conflict(
                ConflictKind::AlreadyConnected,
                "You are already connected with this user",
            ));
        }

        if requests
            .iter()
            .any(|r| r.status == LinkStatus::Pending && r.joins(me, target))
        {
            return Err(FacemedError::conflict(
                ConflictKind::AlreadyExists,
                "A pending request already exists between you and this user",
            ));
        }

        Ok(())
    }

    /// 根据本地快照推断与某用户的关联状态
    pub fn status(me: Uuid, other: Uuid, connections: &ConnectionList, requests: &[LinkRequest]) -> PairStatus {
        if connections.is_connected_to(other) {
            return PairStatus::Connected;
        }
        requests
            .iter()
            .filter(|r| r.status == LinkStatus::Pending)
            .find_map(|r| {
                if r.sender_id == me && r.receiver_id == other {
                    Some(PairStatus::PendingSent)
                } else if r.sender_id == other && r.receiver_id == me {
                    Some(PairStatus::PendingReceived)
                } else {
                    None
                }
            })
            .unwrap_or(PairStatus::None)
    }
}

/// 关联管理器
pub struct ConnectionsManager {
    api: Arc<dyn ConnectionsApi>,
    session: SessionStore,
    state_machine: LinkStateMachine,
    connections: Mutex<ConnectionList>,
    requests: Mutex<Vec<LinkRequest>>,
    /// 已观察到的终态请求，刷新后仍保留
    settled: Mutex<HashMap<Uuid, LinkStatus>>,
    in_flight: InFlight,
}

impl ConnectionsManager {
    pub fn new(api: Arc<dyn ConnectionsApi>, session: SessionStore) -> Self {
        Self {
            api,
            session,
            state_machine: LinkStateMachine::new(),
            connections: Mutex::new(ConnectionList::default()),
            requests: Mutex::new(Vec::new()),
            settled: Mutex::new(HashMap::new()),
            in_flight: InFlight::new(),
        }
    }

    /// 缓存的关联列表
    pub fn connections(&self) -> ConnectionList {
        lock(&self.connections).clone()
    }

    /// 缓存的请求列表
    pub fn requests(&self) -> Vec<LinkRequest> {
        lock(&self.requests).clone()
    }

    /// 请求的已知状态
    pub fn status_of(&self, request_id: Uuid) -> Option<LinkStatus> {
        if let Some(status) = lock(&self.settled).get(&request_id) {
            return Some(*status);
        }
        lock(&self.requests)
            .iter()
            .find(|r| r.id == request_id)
            .map(|r| r.status)
    }

    /// 当前用户收到的待处理请求
    pub fn incoming(&self) -> Vec<LinkRequest> {
        let me = match self.session.user_id() {
            Some(id) => id,
            None => return Vec::new(),
        };
        lock(&self.requests)
            .iter()
            .filter(|r| r.status == LinkStatus::Pending && r.receiver_id == me)
            .cloned()
            .collect()
    }

    /// 重新拉取关联和请求列表
    pub async fn refresh(&self) -> Result<ConnectionList> {
        let session = self.session.require()?;
        let list = self.api.list_connections(session.user_id).await?;
        let requests = self.api.pending_requests().await?;
        debug!(
            "Refreshed connections: {} entries, {} requests",
            list.len(),
            requests.len()
        );

        *lock(&self.connections) = list.clone();
        self.replace_requests(requests);
        Ok(list)
    }

    /// 拉取待处理的请求
    pub async fn pending_requests(&self) -> Result<Vec<LinkRequest>> {
        self.session.require()?;
        let requests = self.api.pending_requests().await?;
        self.replace_requests(requests.clone());
        Ok(requests
            .into_iter()
            .filter(|r| r.status == LinkStatus::Pending)
            .collect())
    }

    /// 向另一位注册用户发起关联请求
    pub async fn request_link(&self, target: Uuid, relationship: Relationship) -> Result<LinkRequest> {
        let _guard = self.in_flight.enter("request link")?;
        let session = self.session.require()?;

        {
            let connections = lock(&self.connections);
            let requests = lock(&self.requests);
            LinkPolicy::check(session.user_id, target, &connections, &requests)?;
        }

        let id = self
            .api
            .request_link(&LinkRequestDraft {
                connected_user_id: target,
                relationship,
            })
            .await?;

        let request = LinkRequest {
            id,
            sender_id: session.user_id,
            receiver_id: target,
            relationship,
            status: LinkStatus::Pending,
            created_at: Some(Utc::now()),
            sender_name: Some(session.name),
        };
        lock(&self.requests).push(request.clone());
        info!("Link request {} sent to {}", id, target);
        Ok(request)
    }

    pub async fn accept(&self, request_id: Uuid) -> Result<LinkStatus> {
        self.respond(request_id, LinkEvent::Accept).await
    }

    pub async fn reject(&self, request_id: Uuid) -> Result<LinkStatus> {
        self.respond(request_id, LinkEvent::Reject).await
    }

    async fn respond(&self, request_id: Uuid, event: LinkEvent) -> Result<LinkStatus> {
        let _guard = self.in_flight.enter(event.as_str())?;
        let session = self.session.require()?;

        let settled = lock(&self.settled).get(&request_id).copied();
        let known = lock(&self.requests).iter().find(|r| r.id == request_id).cloned();
        let next = match (settled, &known) {
            (Some(status), _) => self.state_machine.transition(status, event)?,
            (None, Some(request)) => {
                let next = self.state_machine.transition(request.status, event)?;
                if request.sender_id == session.user_id {
                    return Err(FacemedError::validation(
                        "request_id",
                        "You cannot respond to your own request",
                    ));
                }
                next
            }
            (None, None) => self.state_machine.transition(LinkStatus::Pending, event)?,
        };

        match event {
            LinkEvent::Accept => self.api.accept_request(request_id).await?,
            LinkEvent::Reject => self.api.reject_request(request_id).await?,
        }

        if let Some(request) = lock(&self.requests).iter_mut().find(|r| r.id == request_id) {
            request.status = next;
        }
        lock(&self.settled).insert(request_id, next);
        info!("Link request {} is now {}", request_id, next);

        self.refresh_quietly().await;
        Ok(next)
    }

    /// 新建外部联系人
    pub async fn add_external_contact(&self, draft: ExternalContactDraft) -> Result<ExternalContact> {
        let _guard = self.in_flight.enter("add external contact")?;
        self.session.require()?;

        let draft = ExternalContactDraft {
            name: validate_name(&draft.name)?,
            phone: validate_phone(&draft.phone)?,
            address: sanitize_text(draft.address.as_deref()),
            relationship: draft.relationship,
        };

        let id = self.api.add_external_contact(&draft).await?;
        let contact = ExternalContact {
            id,
            name: draft.name,
            phone: draft.phone,
            address: draft.address,
            relationship: draft.relationship,
            created_at: Some(Utc::now()),
        };
        lock(&self.connections).external_contacts.push(contact.clone());
        info!("External contact {} created", id);

        self.refresh_quietly().await;
        Ok(contact)
    }

    /// 修改关联
    ///
    /// 目标已不存在时返回 [`UpdateOutcome::AlreadyGone`] 并刷新列表。
    pub async fn update(&self, id: ConnectionId, update: ConnectionUpdate) -> Result<UpdateOutcome> {
        let _guard = self.in_flight.enter("update connection")?;
        self.session.require()?;

        let result = match (id, update) {
            (ConnectionId::Linked(connection_id), ConnectionUpdate::Linked(relationship)) => {
                self.api.update_linked(connection_id, relationship).await
            }
            (ConnectionId::External(contact_id), ConnectionUpdate::External(update)) => {
                let update = normalize_contact_update(update)?;
                self.api.update_external(contact_id, &update).await
            }
            _ => {
                return Err(FacemedError::validation(
                    "connection_id",
                    "Update does not match the connection type",
                ))
            }
        };

        let outcome = match result {
            Ok(()) => {
                info!("Connection {} updated", id);
                UpdateOutcome::Updated
            }
            Err(FacemedError::NotFound(_)) => self.already_gone(&id),
            Err(e) => return Err(e),
        };

        self.refresh_quietly().await;
        Ok(outcome)
    }

    /// 删除关联
    ///
    /// 需要确认；先从本地列表移除，请求失败时恢复。
    pub async fn delete(&self, id: ConnectionId, confirmer: &dyn Confirmer) -> Result<UpdateOutcome> {
        let _guard = self.in_flight.enter("delete connection")?;
        let session = self.session.require()?;

        let prompt = match id {
            ConnectionId::Linked(_) => {
                "Delete this connection? Any pending requests between you will also be removed."
            }
            ConnectionId::External(_) => "Delete this contact?",
        };
        require_confirmation(confirmer, prompt)?;

        let other_user = {
            let connections = lock(&self.connections);
            match id {
                ConnectionId::Linked(connection_id) => connections
                    .linked_connections
                    .iter()
                    .find(|c| c.id == connection_id)
                    .map(|c| c.connected_user.id),
                ConnectionId::External(_) => None,
            }
        };

        let api = self.api.clone();
        let outcome = run_optimistic(
            &self.connections,
            "delete connection",
            |list| {
                list.remove(&id);
            },
            async move {
                match api.delete_connection(&id).await {
                    Ok(()) => Ok(UpdateOutcome::Updated),
                    Err(FacemedError::NotFound(_)) => Ok(UpdateOutcome::AlreadyGone {
                        notice: gone_notice(&id),
                    }),
                    Err(e) => Err(e),
                }
            },
        )
        .await?;

        if let Some(other) = other_user {
            lock(&self.requests).retain(|r| !r.joins(session.user_id, other));
        }
        info!("Connection {} deleted", id);

        self.refresh_quietly().await;
        Ok(outcome)
    }

    /// 查询与一组用户的关联状态
    ///
    /// 服务端未返回的用户按本地快照推断。
    pub async fn statuses_for(&self, users: &[Uuid]) -> Result<HashMap<Uuid, PairStatus>> {
        let session = self.session.require()?;
        let mut statuses = self.api.pair_statuses(users).await?;

        let connections = lock(&self.connections);
        let requests = lock(&self.requests);
        for user in users {
            statuses
                .entry(*user)
                .or_insert_with(|| LinkPolicy::status(session.user_id, *user, &connections, &requests));
        }
        Ok(statuses)
    }

    fn already_gone(&self, id: &ConnectionId) -> UpdateOutcome {
        warn!("Connection {} no longer exists", id);
        lock(&self.connections).remove(id);
        UpdateOutcome::AlreadyGone {
            notice: gone_notice(id),
        }
    }

    // 服务端只返回待处理请求，本地已知的终态请求保留在 settled 中
    fn replace_requests(&self, requests: Vec<LinkRequest>) {
        let mut settled = lock(&self.settled);
        for request in &requests {
            if self.state_machine.is_terminal(request.status) {
                settled.insert(request.id, request.status);
            }
        }
        let mut cached = lock(&self.requests);
        for request in cached.iter() {
            if self.state_machine.is_terminal(request.status) {
                settled.entry(request.id).or_insert(request.status);
            }
        }
        *cached = requests;
    }

    async fn refresh_quietly(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Failed to refresh connections: {}", e);
        }
    }
}

fn gone_notice(id: &ConnectionId) -> String {
    match id {
        ConnectionId::Linked(_) => "This connection no longer exists. The list has been refreshed.".to_string(),
        ConnectionId::External(_) => "This contact no longer exists. The list has been refreshed.".to_string(),
    }
}

fn normalize_contact_update(update: ExternalContactUpdate) -> Result<ExternalContactUpdate> {
    if update.is_empty() {
        return Err(FacemedError::validation("update", "No data provided for update"));
    }
    Ok(ExternalContactUpdate {
        name: update.name.as_deref().map(validate_name).transpose()?,
        phone: update.phone.as_deref().map(validate_phone).transpose()?,
        address: update.address.as_deref().map(|a| sanitize_text(Some(a)).unwrap_or_default()),
        relationship: update.relationship,
    })
}
