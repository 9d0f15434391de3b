//! 通知去重
//!
//! 指纹包含事件名、接收者、截断后的载荷摘要和发出时的毫秒时间戳。
//! 因为时间戳在指纹里，实际上只有同一毫秒内的重复发送会被拦下。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use domain::{Timestamp, UserId};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub event: String,
    pub user_id: UserId,
    pub digest: String,
    pub emitted_at_ms: i64,
}

impl Fingerprint {
    pub fn new(
        event: &str,
        user_id: UserId,
        payload: &JsonValue,
        emitted_at: Timestamp,
        digest_len: usize,
    ) -> Self {
        let digest = payload.to_string().chars().take(digest_len).collect();
        Self {
            event: event.to_string(),
            user_id,
            digest,
            emitted_at_ms: emitted_at.timestamp_millis(),
        }
    }
}

#[derive(Default)]
struct DedupState {
    expiry_by_key: HashMap<Fingerprint, Timestamp>,
    /// 按过期时间索引，清理时只访问已过期的部分
    keys_by_expiry: BTreeMap<Timestamp, Vec<Fingerprint>>,
}

pub struct DedupCache {
    retention: TimeDelta,
    state: Mutex<DedupState>,
}

impl DedupCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
            state: Mutex::new(DedupState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 未见过（或记录已过期）时记下指纹并返回 `true`，重复时返回 `false`
    pub fn try_mark(&self, fingerprint: Fingerprint, now: Timestamp) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(expires_at) = state.expiry_by_key.get(&fingerprint) {
            if *expires_at > now {
                return false;
            }
        }

        let expires_at = now
            .checked_add_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state
            .keys_by_expiry
            .entry(expires_at)
            .or_default()
            .push(fingerprint.clone());
        state.expiry_by_key.insert(fingerprint, expires_at);
        true
    }

    /// 撤销一次标记，投递没有成功时调用
    pub fn release(&self, fingerprint: &Fingerprint) {
        // 过期索引里的残留条目在清理时按过期时间比对后跳过
        self.lock().expiry_by_key.remove(fingerprint);
    }

    /// 移除 `expires_at <= now` 的记录，返回移除数量
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut evicted = 0;

        while let Some(bucket) = state.keys_by_expiry.first_entry() {
            if *bucket.key() > now {
                break;
            }
            let (expires_at, keys) = bucket.remove_entry();
            for key in keys {
                if state.expiry_by_key.get(&key) == Some(&expires_at) {
                    state.expiry_by_key.remove(&key);
                    evicted += 1;
                }
            }
        }

        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().expiry_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
