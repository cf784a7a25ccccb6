use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// 任务级取消标志
///
/// 取消是协作式的：Worker 在单元边界和重试间隔处检查，正在进行的调用不会被打断。
#[derive(Debug, Default)]
pub struct CancellationFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置取消标志并唤醒所有等待者，重复调用无副作用
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 等待取消发生
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 运行中任务的取消标志表
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<i64, Arc<CancellationFlag>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: i64) -> Arc<CancellationFlag> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .entry(job_id)
            .or_insert_with(|| Arc::new(CancellationFlag::new()))
            .clone()
    }

    pub fn get(&self, job_id: i64) -> Option<Arc<CancellationFlag>> {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.get(&job_id).cloned()
    }

    /// 取消任务，任务未登记时返回 false
    pub fn cancel(&self, job_id: i64) -> bool {
        match self.get(job_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: i64) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.flags.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
