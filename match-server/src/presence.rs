//! 在场监测与弃局宽限
//!
//! 跟踪每名玩家在本局的连接状态。断线时启动宽限计时：
//! 双方都走过棋之前用短宽限，对局中用长宽限；宽限内重连
//! 取消计时且不影响棋钟（断线方轮到走棋时钟照走，与实体
//! 棋钟行为一致）；宽限耗尽触发弃局判负。

use std::time::{Duration, Instant};

use protocol::{Color, MIDGAME_GRACE_SECS, PREGAME_GRACE_SECS};

/// 单个玩家的在场记录
///
/// 不变式：`grace_deadline` 有值当且仅当 `disconnected_at` 有值
/// 且对局仍在进行。
#[derive(Debug, Clone, Default)]
pub struct PresenceRecord {
    /// 是否在线
    pub connected: bool,
    /// 断线时刻
    pub disconnected_at: Option<Instant>,
    /// 宽限截止时刻
    pub grace_deadline: Option<Instant>,
}

/// 双方在场记录
#[derive(Debug, Default)]
pub struct PresencePair {
    records: [PresenceRecord; 2],
}

impl PresencePair {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指定棋色的记录
    pub fn get(&self, color: Color) -> &PresenceRecord {
        &self.records[color.index()]
    }

    /// 标记上线；返回之前是否处于断线宽限中
    pub fn mark_connected(&mut self, color: Color) -> bool {
        let record = &mut self.records[color.index()];
        let was_disconnected = record.disconnected_at.is_some();
        record.connected = true;
        record.disconnected_at = None;
        record.grace_deadline = None;
        was_disconnected
    }

    /// 标记断线并启动宽限计时
    pub fn mark_disconnected(&mut self, color: Color, now: Instant, grace: Duration) {
        let record = &mut self.records[color.index()];
        record.connected = false;
        record.disconnected_at = Some(now);
        record.grace_deadline = Some(now + grace);
    }

    /// 返回宽限已耗尽的一方（如有）
    pub fn expired(&self, now: Instant) -> Option<Color> {
        for color in [Color::White, Color::Black] {
            if let Some(deadline) = self.records[color.index()].grace_deadline {
                if now >= deadline {
                    return Some(color);
                }
            }
        }
        None
    }

    /// 终局时清除所有宽限计时
    pub fn clear_deadlines(&mut self) {
        for record in &mut self.records {
            record.grace_deadline = None;
        }
    }
}

/// 按对局阶段选择宽限时长
pub fn grace_for(both_moved: bool) -> Duration {
    if both_moved {
        Duration::from_secs(MIDGAME_GRACE_SECS)
    } else {
        Duration::from_secs(PREGAME_GRACE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_cancels_grace() {
        let mut presence = PresencePair::new();
        presence.mark_connected(Color::White);
        presence.mark_connected(Color::Black);

        let now = Instant::now();
        presence.mark_disconnected(Color::Black, now, Duration::from_secs(60));
        assert!(presence.get(Color::Black).grace_deadline.is_some());

        let was_disconnected = presence.mark_connected(Color::Black);
        assert!(was_disconnected);
        assert!(presence.get(Color::Black).grace_deadline.is_none());
        assert!(presence.get(Color::Black).disconnected_at.is_none());

        // 宽限取消后不再判弃局
        assert_eq!(presence.expired(now + Duration::from_secs(120)), None);
    }

    #[test]
    fn test_grace_expiry() {
        let mut presence = PresencePair::new();
        let now = Instant::now();
        presence.mark_disconnected(Color::White, now, Duration::from_secs(60));

        assert_eq!(presence.expired(now + Duration::from_secs(30)), None);
        assert_eq!(
            presence.expired(now + Duration::from_secs(60)),
            Some(Color::White)
        );
    }

    #[test]
    fn test_fresh_disconnect_restarts_window() {
        let mut presence = PresencePair::new();
        let now = Instant::now();
        presence.mark_disconnected(Color::White, now, Duration::from_secs(60));
        presence.mark_connected(Color::White);

        // 重连后立刻再断线：新的完整宽限窗口
        let later = now + Duration::from_secs(50);
        presence.mark_disconnected(Color::White, later, Duration::from_secs(60));
        assert_eq!(presence.expired(now + Duration::from_secs(65)), None);
        assert_eq!(
            presence.expired(later + Duration::from_secs(60)),
            Some(Color::White)
        );
    }

    #[test]
    fn test_grace_lengths() {
        assert!(grace_for(false) < grace_for(true));
        assert_eq!(grace_for(true), Duration::from_secs(MIDGAME_GRACE_SECS));
        assert_eq!(grace_for(false), Duration::from_secs(PREGAME_GRACE_SECS));
    }
}
