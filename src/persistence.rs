//! 画像快照持久化边界
//!
//! 真实的持久存储引擎（Redis / 数据库）是外部协作方，这里只定义
//! SnapshotStore trait：周期同步任务用它写带 TTL 的画像快照。
//! 当前提供 InMemorySnapshotStore（测试用，带过期簿记）与 NoopSnapshotStore。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::coordinator::SubjectProfile;

/// 快照存储 trait：带 TTL 的画像写入与读取
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 写入一份画像快照，过期后可被存储端回收
    async fn save_profile(
        &self,
        subject_id: &str,
        profile: &SubjectProfile,
        ttl: Duration,
    ) -> anyhow::Result<()>;

    /// 读取未过期的快照
    async fn load_profile(&self, subject_id: &str) -> anyhow::Result<Option<SubjectProfile>>;
}

/// 空实现：未接入外部存储时使用
#[derive(Debug, Default)]
pub struct NoopSnapshotStore;

#[async_trait]
impl SnapshotStore for NoopSnapshotStore {
    async fn save_profile(
        &self,
        _subject_id: &str,
        _profile: &SubjectProfile,
        _ttl: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load_profile(&self, _subject_id: &str) -> anyhow::Result<Option<SubjectProfile>> {
        Ok(None)
    }
}

struct StoredSnapshot {
    profile: SubjectProfile,
    expires_at: Instant,
}

/// 内存实现：按 subject_id 存最新快照，load 时检查过期
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, StoredSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的快照数（含已过期未清理的）
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_profile(
        &self,
        subject_id: &str,
        profile: &SubjectProfile,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.snapshots.write().await.insert(
            subject_id.to_string(),
            StoredSnapshot {
                profile: profile.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn load_profile(&self, subject_id: &str) -> anyhow::Result<Option<SubjectProfile>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(subject_id).and_then(|s| {
            if s.expires_at > Instant::now() {
                Some(s.profile.clone())
            } else {
                None
            }
        }))
    }
}
