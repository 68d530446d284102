//! 对局归档格式
//!
//! 终局提交器写入的 JSON 记录：对局元数据、完整走子日志、
//! 双方等级分变动。一局只写一次。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::message::{MatchId, MatchOutcome, PlayerId};

/// 归档格式版本
pub const RECORD_VERSION: &str = "1.0";

/// 走子记录
///
/// 追加写入，序号即全局顺序。不变式：同一方相邻两步记录的
/// 剩余时间单调不增（无加秒制）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 序号（从 1 开始，整局唯一）
    pub seq: u32,
    /// 走棋方
    pub by: Color,
    /// UCI 文本（如 `e2e4`、`e7e8q`）
    pub uci: String,
    /// 走后局面 FEN
    pub position: String,
    /// 记录时白方剩余时间（毫秒）
    pub white_time_ms: u64,
    /// 记录时黑方剩余时间（毫秒）
    pub black_time_ms: u64,
}

/// 等级分变动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player: PlayerId,
    pub before: u32,
    pub after: u32,
}

impl RatingChange {
    /// 变动量
    pub fn delta(&self) -> i64 {
        self.after as i64 - self.before as i64
    }
}

/// 完整的对局归档记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    /// 版本号
    pub version: String,
    /// 对局 ID
    pub match_id: MatchId,
    /// 白方玩家
    pub white: PlayerId,
    /// 黑方玩家
    pub black: PlayerId,
    /// 初始局面 FEN
    pub initial_fen: String,
    /// 终局局面 FEN
    pub final_fen: String,
    /// 终局结果
    pub outcome: MatchOutcome,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 结束时间
    pub ended_at: DateTime<Utc>,
    /// 走子日志
    pub moves: Vec<MoveRecord>,
    /// 双方等级分变动（白在前）
    pub rating_changes: [RatingChange; 2],
}

impl MatchRecord {
    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
