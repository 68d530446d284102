//! 分布式超时仲裁
//!
//! 多副本部署下每个副本都能观测到同一局的超时，但超时终局
//! 必须恰好发生一次。仲裁通过共享存储的带 TTL 互斥锁收敛：
//! 观测到超时先抢锁，抢到的副本执行终局并经发布订阅通知其他
//! 副本；没抢到的副本只等通知。TTL 兜底持锁副本崩溃的情形。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use protocol::{MatchId, MatchOutcome, RatingChange, TERMINAL_LOCK_TTL};

/// 共享存储抽象（生产部署接 Redis 之类的外部存储）
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// 尝试获取互斥锁；锁不存在或已过 TTL 时成功
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool;
    /// 释放锁
    async fn release(&self, key: &str);
    /// 向频道发布消息
    async fn publish(&self, channel: &str, payload: Vec<u8>);
    /// 订阅频道
    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// 进程内共享存储
///
/// 单副本部署自足；多副本语义（TTL 锁 + 扇出）与外部存储一致，
/// 测试用它验证仲裁协议。
#[derive(Default)]
pub struct InMemoryStore {
    locks: Mutex<HashMap<String, Instant>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                locks.insert(key.to_string(), now + ttl);
                true
            }
        }
    }

    async fn release(&self, key: &str) {
        self.locks.lock().await.remove(key);
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(channel) {
            // 没有订阅者时发送失败是正常情况
            let _ = sender.send(payload);
        }
    }

    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe()
    }
}

/// 跨副本终局通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalNotice {
    pub match_id: MatchId,
    pub outcome: MatchOutcome,
    pub final_position: String,
    pub rating_changes: Option<[RatingChange; 2]>,
    /// 是否超时终局（决定客户端收到的事件类型）
    pub timed_out: bool,
}

impl TerminalNotice {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// 超时仲裁器
#[derive(Clone)]
pub struct TimeoutArbiter {
    store: Arc<dyn SharedStore>,
}

impl TimeoutArbiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    fn lock_key(match_id: MatchId) -> String {
        format!("match:{}:terminal", match_id)
    }

    fn channel_key(match_id: MatchId) -> String {
        format!("match:{}", match_id)
    }

    /// 尝试认领某局的终局裁决权
    pub async fn try_claim(&self, match_id: MatchId) -> bool {
        self.store
            .try_acquire(&Self::lock_key(match_id), TERMINAL_LOCK_TTL)
            .await
    }

    /// 释放裁决权
    pub async fn release(&self, match_id: MatchId) {
        self.store.release(&Self::lock_key(match_id)).await;
    }

    /// 发布终局通知给其他副本
    pub async fn publish_terminal(&self, notice: &TerminalNotice) -> anyhow::Result<()> {
        let payload = notice.encode()?;
        self.store
            .publish(&Self::channel_key(notice.match_id), payload)
            .await;
        Ok(())
    }

    /// 订阅某局的终局通知
    pub async fn subscribe(&self, match_id: MatchId) -> broadcast::Receiver<Vec<u8>> {
        self.store.subscribe(&Self::channel_key(match_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Color, WinReason};

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(5);

        assert!(store.try_acquire("match:1:terminal", ttl).await);
        assert!(!store.try_acquire("match:1:terminal", ttl).await);
        // 不同对局的锁互不影响
        assert!(store.try_acquire("match:2:terminal", ttl).await);
    }

    #[tokio::test]
    async fn test_lock_ttl_expiry() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_millis(30);

        assert!(store.try_acquire("k", ttl).await);
        assert!(!store.try_acquire("k", ttl).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // 持锁方视为已崩溃，TTL 过后可重新获取
        assert!(store.try_acquire("k", ttl).await);
    }

    #[tokio::test]
    async fn test_lock_release() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(5);

        assert!(store.try_acquire("k", ttl).await);
        store.release("k").await;
        assert!(store.try_acquire("k", ttl).await);
    }

    #[tokio::test]
    async fn test_pubsub_fanout() {
        let store = InMemoryStore::new();

        let mut rx1 = store.subscribe("match:7").await;
        let mut rx2 = store.subscribe("match:7").await;
        store.publish("match:7", b"hello".to_vec()).await;

        assert_eq!(rx1.recv().await.unwrap(), b"hello");
        assert_eq!(rx2.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_two_replicas_claim_once() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let replica_a = TimeoutArbiter::new(Arc::clone(&store));
        let replica_b = TimeoutArbiter::new(Arc::clone(&store));

        let mut sub_b = replica_b.subscribe(42).await;

        // 两个副本同时观测到超时，只有一个抢到裁决权
        let a_claims = replica_a.try_claim(42).await;
        let b_claims = replica_b.try_claim(42).await;
        assert!(a_claims);
        assert!(!b_claims);

        // 抢到的副本执行终局并通知
        let notice = TerminalNotice {
            match_id: 42,
            outcome: MatchOutcome::win(Color::Black, WinReason::Timeout),
            final_position: protocol::INITIAL_FEN.to_string(),
            rating_changes: None,
            timed_out: true,
        };
        replica_a.publish_terminal(&notice).await.unwrap();
        replica_a.release(42).await;

        let received = TerminalNotice::decode(&sub_b.recv().await.unwrap()).unwrap();
        assert_eq!(received.match_id, 42);
        assert!(received.timed_out);
        assert_eq!(
            received.outcome,
            MatchOutcome::win(Color::Black, WinReason::Timeout)
        );
    }

    #[tokio::test]
    async fn test_notice_roundtrip() {
        let notice = TerminalNotice {
            match_id: 9,
            outcome: MatchOutcome::Draw(protocol::DrawReason::Agreement),
            final_position: protocol::INITIAL_FEN.to_string(),
            rating_changes: Some([
                RatingChange { player: 1, before: 1200, after: 1200 },
                RatingChange { player: 2, before: 1200, after: 1200 },
            ]),
            timed_out: false,
        };
        let decoded = TerminalNotice::decode(&notice.encode().unwrap()).unwrap();
        assert_eq!(decoded.outcome, notice.outcome);
        assert_eq!(decoded.rating_changes, notice.rating_changes);
    }
}
