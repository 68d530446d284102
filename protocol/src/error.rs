//! 错误类型定义

use thiserror::Error;

use crate::message::{ErrorCode, MatchId};

/// 对局操作错误
///
/// 全部在信道边界转换为 `ServerMessage::Error` 载荷，
/// 永远不会使对局处理循环崩溃。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    /// 请求格式错误
    #[error("Malformed request: {0}")]
    BadRequest(String),

    /// 未绑定身份
    #[error("Identity not attached to this connection")]
    Unauthorized,

    /// 非本局参与者
    #[error("Not a participant of this match")]
    NotAParticipant,

    /// 对局不存在
    #[error("Unknown match: {0}")]
    MatchNotFound(MatchId),

    /// 不是你的回合
    #[error("Not your turn")]
    NotPlayersTurn,

    /// 规则裁决拒绝该走法
    #[error("Illegal move: {0}")]
    InvalidMove(String),

    /// 对局已终局（超时竞速中迟到的走法也落在这里）
    #[error("Match is already over")]
    MatchFinished,

    /// 已有未决提和
    #[error("A draw offer is already outstanding")]
    OfferOutstanding,

    /// 没有可响应的提和
    #[error("No outstanding draw offer")]
    NoOfferOutstanding,

    /// 不能响应自己的提和
    #[error("Cannot respond to your own draw offer")]
    OwnOffer,

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchError {
    /// 对应的信道错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            MatchError::BadRequest(_) => ErrorCode::BadRequest,
            MatchError::Unauthorized => ErrorCode::Unauthorized,
            MatchError::NotAParticipant => ErrorCode::Forbidden,
            MatchError::MatchNotFound(_) => ErrorCode::NotFound,
            MatchError::NotPlayersTurn
            | MatchError::MatchFinished
            | MatchError::OfferOutstanding => ErrorCode::Conflict,
            MatchError::InvalidMove(_)
            | MatchError::NoOfferOutstanding
            | MatchError::OwnOffer => ErrorCode::UnprocessableEntity,
            MatchError::Internal(_) => ErrorCode::InternalServerError,
        }
    }

    /// 发给客户端的文本（内部错误细节被压制为通用描述）
    pub fn client_message(&self) -> String {
        match self {
            MatchError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// 传输层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误（bincode）
    #[error("Bincode serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MatchError::NotPlayersTurn.code(), ErrorCode::Conflict);
        assert_eq!(MatchError::MatchFinished.code(), ErrorCode::Conflict);
        assert_eq!(MatchError::OfferOutstanding.code(), ErrorCode::Conflict);
        assert_eq!(
            MatchError::NoOfferOutstanding.code(),
            ErrorCode::UnprocessableEntity
        );
        assert_eq!(MatchError::MatchNotFound(3).code(), ErrorCode::NotFound);
        assert_eq!(MatchError::NotAParticipant.code(), ErrorCode::Forbidden);
    }

    #[test]
    fn test_internal_message_suppressed() {
        let err = MatchError::Internal("db handle poisoned".to_string());
        assert_eq!(err.client_message(), "Internal server error");
        assert!(!err.client_message().contains("db"));

        let err = MatchError::NotPlayersTurn;
        assert_eq!(err.client_message(), "Not your turn");
    }
}
