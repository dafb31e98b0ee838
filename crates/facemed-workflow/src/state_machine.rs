//! 关联请求状态机
//!
//! 请求只能从待处理状态被接受或拒绝，接受和拒绝都是终态。

use facemed_core::{FacemedError, LinkStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 关联请求事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    Accept,
    Reject,
}

impl LinkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::Accept => "accept",
            LinkEvent::Reject => "reject",
        }
    }
}

/// 关联请求状态机
#[derive(Debug)]
pub struct LinkStateMachine {
    transitions: HashMap<(LinkStatus, LinkEvent), LinkStatus>,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        transitions.insert((LinkStatus::Pending, LinkEvent::Accept), LinkStatus::Accepted);
        transitions.insert((LinkStatus::Pending, LinkEvent::Reject), LinkStatus::Rejected);
        Self { transitions }
    }

    pub fn can_transition(&self, from: LinkStatus, event: LinkEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: LinkStatus, event: LinkEvent) -> Result<LinkStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| FacemedError::InvalidStateTransition {
                from: from.to_string(),
                event: event.as_str().to_string(),
            })
    }

    /// 没有任何出边的状态
    pub fn is_terminal(&self, state: LinkStatus) -> bool {
        !self.transitions.keys().any(|(from, _)| *from == state)
    }

    pub fn possible_events(&self, state: LinkStatus) -> Vec<LinkEvent> {
        self.transitions
            .keys()
            .filter(|(from, _)| *from == state)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
