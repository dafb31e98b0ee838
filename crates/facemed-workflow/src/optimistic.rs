//! 乐观更新
//!
//! 先修改本地状态再发出请求，请求失败时恢复修改前的快照。

use facemed_core::Result;
use std::future::Future;
use std::sync::Mutex;
use tracing::warn;

use crate::guard::lock;

/// 一次乐观更新：持有修改前的快照
#[derive(Debug)]
#[must_use = "an optimistic update must be committed or rolled back"]
pub struct OptimisticUpdate<T: Clone> {
    label: String,
    snapshot: T,
}

impl<T: Clone> OptimisticUpdate<T> {
    /// 记录快照并应用修改
    pub fn apply(state: &mut T, label: impl Into<String>, mutate: impl FnOnce(&mut T)) -> Self {
        let snapshot = state.clone();
        mutate(state);
        Self {
            label: label.into(),
            snapshot,
        }
    }

    pub fn commit(self) {}

    /// 恢复快照
    pub fn rollback(self, state: &mut T) {
        warn!("Rolling back optimistic update: {}", self.label);
        *state = self.snapshot;
    }
}

/// 对互斥保护的状态执行乐观更新，远程调用失败时回滚
pub async fn run_optimistic<T, R, Fut>(
    state: &Mutex<T>,
    label: &str,
    mutate: impl FnOnce(&mut T),
    remote: Fut,
) -> Result<R>
where
    T: Clone,
    Fut: Future<Output = Result<R>>,
{
    let update = {
        let mut current = lock(state);
        OptimisticUpdate::apply(&mut *current, label, mutate)
    };

    match remote.await {
        Ok(value) => {
            update.commit();
            Ok(value)
        }
        Err(e) => {
            update.rollback(&mut *lock(state));
            Err(e)
        }
    }
}
