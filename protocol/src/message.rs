//! 消息类型定义

use serde::{Deserialize, Serialize};

use crate::color::{Color, Winner};
use crate::record::RatingChange;

/// 玩家 ID（身份由外部网关校验后附加到连接上）
pub type PlayerId = u64;

/// 对局 ID
pub type MatchId = u64;

/// 对局状态
///
/// 不变式：状态单调，一旦离开 Active 永不回到 Active。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// 进行中
    Active,
    /// 将死
    Checkmated,
    /// 和棋
    Drawn,
    /// 认输
    Resigned,
    /// 超时
    TimedOut,
    /// 弃局（断线宽限期耗尽）
    Abandoned,
}

impl MatchStatus {
    /// 是否终局状态
    pub fn is_terminal(self) -> bool {
        self != MatchStatus::Active
    }
}

/// 终局结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// 白方胜
    WhiteWin(WinReason),
    /// 黑方胜
    BlackWin(WinReason),
    /// 和棋
    Draw(DrawReason),
}

/// 胜利原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinReason {
    /// 将死
    Checkmate,
    /// 对方认输
    Resign,
    /// 对方超时
    Timeout,
    /// 对方断线弃局
    Abandon,
}

/// 和棋原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawReason {
    /// 双方同意
    Agreement,
    /// 逼和（无子可动且未被将军）
    Stalemate,
    /// 子力不足等自动判和
    InsufficientMaterial,
}

impl MatchOutcome {
    /// 指定棋色获胜
    pub fn win(color: Color, reason: WinReason) -> Self {
        match color {
            Color::White => MatchOutcome::WhiteWin(reason),
            Color::Black => MatchOutcome::BlackWin(reason),
        }
    }

    /// 终局胜方
    pub fn winner(&self) -> Winner {
        match self {
            MatchOutcome::WhiteWin(_) => Winner::White,
            MatchOutcome::BlackWin(_) => Winner::Black,
            MatchOutcome::Draw(_) => Winner::Draw,
        }
    }

    /// 对应的对局状态
    pub fn status(&self) -> MatchStatus {
        match self {
            MatchOutcome::Draw(_) => MatchStatus::Drawn,
            MatchOutcome::WhiteWin(reason) | MatchOutcome::BlackWin(reason) => match reason {
                WinReason::Checkmate => MatchStatus::Checkmated,
                WinReason::Resign => MatchStatus::Resigned,
                WinReason::Timeout => MatchStatus::TimedOut,
                WinReason::Abandon => MatchStatus::Abandoned,
            },
        }
    }
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // === 身份绑定 ===
    /// 绑定已校验的玩家身份（必须是连接上的第一条消息）
    Hello { player_id: PlayerId },

    // === 对局操作 ===
    /// 订阅对局广播并获取当前快照（重连恢复也走这里）
    JoinMatch { match_id: MatchId },
    /// 走棋（UCI 坐标，如 e2 → e4，升变棋子为小写字母）
    SubmitMove {
        match_id: MatchId,
        from: String,
        to: String,
        promotion: Option<char>,
    },
    /// 只读快照
    GetSnapshot { match_id: MatchId },

    // === 协商 ===
    /// 提和
    OfferDraw { match_id: MatchId },
    /// 响应提和
    RespondDraw { match_id: MatchId, accept: bool },
    /// 认输
    Resign { match_id: MatchId },

    // === 心跳 ===
    /// 心跳请求
    Ping,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    // === 身份绑定 ===
    /// 身份绑定成功
    HelloOk { player_id: PlayerId },

    // === 对局快照 ===
    /// 对局快照（加入 / 重连 / 主动查询时返回）
    MatchSnapshot {
        match_id: MatchId,
        position: String,
        white_time_ms: u64,
        black_time_ms: u64,
        status: MatchStatus,
        winner: Option<Winner>,
        draw_offered_by: Option<Color>,
        your_color: Color,
    },

    // === 对局事件 ===
    /// 走棋确认（仅发给走棋方）
    MoveAck {
        success: bool,
        position: String,
        game_over: bool,
        winner: Option<Winner>,
    },
    /// 局面更新（广播给双方）
    PositionUpdate {
        position: String,
        white_time_ms: u64,
        black_time_ms: u64,
        game_over: bool,
        winner: Option<Winner>,
        rating_change: Option<[RatingChange; 2]>,
    },
    /// 超时终局（广播给双方）
    TimeExpired {
        winner: Winner,
        rating_change: Option<[RatingChange; 2]>,
    },

    // === 协商事件 ===
    /// 通用成功确认（协商类操作）
    ActionOk,
    /// 对方提和
    DrawOffered { by: Color },
    /// 提和被拒绝
    DrawDeclined,

    // === 断线重连 ===
    /// 对手断线（宽限期内可重连）
    OpponentDisconnected { grace_secs: u64 },
    /// 对手重连
    OpponentReconnected,

    // === 心跳 ===
    /// 心跳响应
    Pong,

    // === 错误 ===
    /// 错误消息
    Error { code: ErrorCode, message: String },
}

/// 错误码定义
///
/// 与同一信道上的其他协作方（如聊天）共用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// 请求格式错误
    BadRequest,
    /// 未绑定身份
    Unauthorized,
    /// 非本局参与者
    Forbidden,
    /// 对局不存在
    NotFound,
    /// 当前状态下操作无效（终局后走棋、重复提和等）
    Conflict,
    /// 语义无效（响应不存在的提和等）
    UnprocessableEntity,
    /// 内部错误（对客户端隐藏细节）
    InternalServerError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialize() {
        let msg = ClientMessage::SubmitMove {
            match_id: 7,
            from: "e2".to_string(),
            to: "e4".to_string(),
            promotion: None,
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: ClientMessage = bincode::deserialize(&bytes).unwrap();

        match decoded {
            ClientMessage::SubmitMove { match_id, from, to, promotion } => {
                assert_eq!(match_id, 7);
                assert_eq!(from, "e2");
                assert_eq!(to, "e4");
                assert_eq!(promotion, None);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_server_message_serialize() {
        let msg = ServerMessage::TimeExpired {
            winner: Winner::White,
            rating_change: None,
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: ServerMessage = bincode::deserialize(&bytes).unwrap();

        match decoded {
            ServerMessage::TimeExpired { winner, .. } => assert_eq!(winner, Winner::White),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_error_code_json() {
        let json = serde_json::to_string(&ErrorCode::UnprocessableEntity).unwrap();
        assert_eq!(json, "\"UNPROCESSABLE_ENTITY\"");
        let json = serde_json::to_string(&ErrorCode::InternalServerError).unwrap();
        assert_eq!(json, "\"INTERNAL_SERVER_ERROR\"");
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(
            MatchOutcome::win(Color::White, WinReason::Timeout).status(),
            MatchStatus::TimedOut
        );
        assert_eq!(
            MatchOutcome::Draw(DrawReason::Agreement).status(),
            MatchStatus::Drawn
        );
        assert_eq!(
            MatchOutcome::win(Color::Black, WinReason::Checkmate).winner(),
            Winner::Black
        );
    }
}
