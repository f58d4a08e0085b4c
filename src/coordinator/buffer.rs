//! 待同步更新缓冲
//!
//! 两级键 (subject_id, data_type)：同键的新更新直接覆盖未刷写的旧值，
//! 一个刷写周期里每个键只保留最新载荷。总量有上界，超过时淘汰最旧的
//! ~10% 并发出警告——数据丢失是显式且可观察的，不允许静默。

use std::collections::HashMap;

use serde::Serialize;

/// 缓冲键：受试者 + 数据类型
pub type BufferKey = (String, &'static str);

/// 一条待刷写的更新
#[derive(Debug, Clone, Serialize)]
pub struct BufferedUpdate {
    pub subject_id: String,
    pub data_type: &'static str,
    pub payload: serde_json::Value,
    pub buffered_at_ms: i64,
    /// 单调序号，淘汰时按它判定「最旧」
    pub seq: u64,
}

/// 淘汰报告
#[derive(Debug, Clone, Copy)]
pub struct EvictionReport {
    pub evicted: usize,
    pub remaining: usize,
}

/// 更新缓冲（非线程安全，由持有方加锁）
pub struct UpdateBuffer {
    entries: HashMap<BufferKey, BufferedUpdate>,
    max_entries: usize,
    next_seq: u64,
}

impl UpdateBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            next_seq: 0,
        }
    }

    /// 写入更新；同键覆盖。超限时返回淘汰报告
    pub fn put(
        &mut self,
        subject_id: &str,
        data_type: &'static str,
        payload: serde_json::Value,
    ) -> Option<EvictionReport> {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            (subject_id.to_string(), data_type),
            BufferedUpdate {
                subject_id: subject_id.to_string(),
                data_type,
                payload,
                buffered_at_ms: chrono::Utc::now().timestamp_millis(),
                seq,
            },
        );

        if self.entries.len() > self.max_entries {
            Some(self.evict_oldest())
        } else {
            None
        }
    }

    /// 淘汰最旧的 ~10%（至少 1 条）
    fn evict_oldest(&mut self) -> EvictionReport {
        let count = (self.entries.len() / 10).max(1);
        let mut keys: Vec<(BufferKey, u64)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.seq))
            .collect();
        keys.sort_by_key(|(_, seq)| *seq);

        for (key, _) in keys.into_iter().take(count) {
            self.entries.remove(&key);
        }

        EvictionReport {
            evicted: count,
            remaining: self.entries.len(),
        }
    }

    /// 取走全部待刷写条目（按写入序返回）
    pub fn drain(&mut self) -> Vec<BufferedUpdate> {
        let mut drained: Vec<BufferedUpdate> = self.entries.drain().map(|(_, v)| v).collect();
        drained.sort_by_key(|u| u.seq);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_overwrites() {
        let mut buffer = UpdateBuffer::new(10);
        buffer.put("subject_1", "engagement", serde_json::json!({ "score": 0.4 }));
        buffer.put("subject_1", "engagement", serde_json::json!({ "score": 0.6 }));

        assert_eq!(buffer.len(), 1);
        let drained = buffer.drain();
        assert_eq!(drained[0].payload["score"], 0.6);
    }

    #[test]
    fn test_distinct_types_kept_separately() {
        let mut buffer = UpdateBuffer::new(10);
        buffer.put("subject_1", "engagement", serde_json::json!({}));
        buffer.put("subject_1", "trust", serde_json::json!({}));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_overflow_evicts_oldest_tenth() {
        let mut buffer = UpdateBuffer::new(20);
        let mut report = None;
        for i in 0..21 {
            let subject = format!("subject_{}", i);
            if let Some(r) = buffer.put(&subject, "engagement", serde_json::json!({ "i": i })) {
                report = Some(r);
            }
        }

        let report = report.expect("eviction should have fired");
        assert_eq!(report.evicted, 2); // 21 / 10 = 2
        assert_eq!(report.remaining, 19);

        // 最旧的两条（subject_0 / subject_1）被淘汰
        let drained = buffer.drain();
        assert!(!drained.iter().any(|u| u.subject_id == "subject_0"));
        assert!(!drained.iter().any(|u| u.subject_id == "subject_1"));
        assert!(drained.iter().any(|u| u.subject_id == "subject_20"));
    }

    #[test]
    fn test_drain_returns_in_write_order() {
        let mut buffer = UpdateBuffer::new(10);
        buffer.put("a", "engagement", serde_json::json!({}));
        buffer.put("b", "trust", serde_json::json!({}));
        buffer.put("c", "progress", serde_json::json!({}));

        let order: Vec<String> = buffer.drain().into_iter().map(|u| u.subject_id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(buffer.is_empty());
    }
}
