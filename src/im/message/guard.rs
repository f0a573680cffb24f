//! 消息存储的读写锁
//!
//! 写操作（插入/更新/删除，以及写路径上的建表检查）全程持有写锁，读操作持有读锁。
//! 默认全局一把锁，所有会话的写操作全序；`PerShard` 模式下每个会话一把锁，
//! 只保证同一会话内的写全序。

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    Global,
    PerShard,
}

pub struct ConcurrencyGuard {
    mode: LockMode,
    global: Arc<RwLock<()>>,
    shards: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ConcurrencyGuard {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            global: Arc::new(RwLock::new(())),
            shards: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<RwLock<()>> {
        match self.mode {
            LockMode::Global => self.global.clone(),
            LockMode::PerShard => {
                let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
                shards
                    .entry(conversation_id.to_string())
                    .or_insert_with(|| Arc::new(RwLock::new(())))
                    .clone()
            }
        }
    }

    /// 获取写锁；锁被占用时一直等待
    pub async fn write(&self, conversation_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(conversation_id).write_owned().await
    }

    pub async fn read(&self, conversation_id: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(conversation_id).read_owned().await
    }

    /// 会话被删除后回收它的锁，调用方需持有该会话的写锁
    ///
    /// 还有其他任务在等这把锁时保留它，否则等待者拿到的旧锁和新来者拿到的新锁不再互斥。
    pub fn forget(&self, conversation_id: &str) {
        if self.mode != LockMode::PerShard {
            return;
        }
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        // map 一份 + 调用方持有的写锁一份
        let idle = shards
            .get(conversation_id)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            shards.remove(conversation_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_shards(&self) -> usize {
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new(LockMode::Global)
    }
}
