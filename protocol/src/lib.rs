//! 国际象棋对局服务共享协议库
//!
//! 包含:
//! - 棋色、胜负、对局状态等核心数据结构
//! - 消息类型定义 (ClientMessage, ServerMessage)
//! - 错误码与错误类型 (ErrorCode, MatchError, ProtocolError)
//! - FEN 工具（初始局面、行棋方解析）
//! - 对局归档格式 (MatchRecord, MoveRecord)
//! - 传输层抽象与帧编解码

mod color;
mod constants;
mod error;
mod fen;
mod message;
mod record;
mod transport;

pub use color::{Color, Winner};
pub use constants::*;
pub use error::{MatchError, ProtocolError, Result};
pub use fen::{is_square, side_to_move, INITIAL_FEN};
pub use message::{
    ClientMessage, DrawReason, ErrorCode, MatchId, MatchOutcome, MatchStatus, PlayerId,
    ServerMessage, WinReason,
};
pub use record::{MatchRecord, MoveRecord, RatingChange, RECORD_VERSION};
pub use transport::{
    Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection, TcpConnector,
    TcpListener,
};
