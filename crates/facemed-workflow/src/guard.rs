//! 操作守卫
//!
//! - [`InFlight`]：同一时间只允许一个修改请求在途，重入时立即返回 `Busy`
//! - [`Confirmer`]：破坏性操作在发出任何请求之前必须得到确认

use facemed_core::{FacemedError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// 在途请求标记
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记操作开始，守卫释放时自动清除标记
    pub fn enter(&self, operation: &str) -> Result<InFlightGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejected {} while another request is in flight", operation);
            return Err(FacemedError::Busy(operation.to_string()));
        }
        Ok(InFlightGuard {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// 在途请求守卫
#[derive(Debug)]
pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// 破坏性操作确认
pub trait Confirmer: Send + Sync {
    /// 向用户展示提示并返回是否继续
    fn confirm(&self, prompt: &str) -> bool;
}

/// 总是同意，用于非交互场景（例如命令行的 `--yes`）
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirmer for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// 询问确认，拒绝时返回 `ConfirmationDeclined`
pub fn require_confirmation(confirmer: &dyn Confirmer, prompt: &str) -> Result<()> {
    if confirmer.confirm(prompt) {
        Ok(())
    } else {
        info!("User declined: {}", prompt);
        Err(FacemedError::ConfirmationDeclined(prompt.to_string()))
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
