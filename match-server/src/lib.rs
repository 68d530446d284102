//! 国际象棋对局服务端
//!
//! 包含:
//! - 对局状态机
//! - 双钟计时
//! - 分布式超时仲裁
//! - 在场监测与弃局判定
//! - 终局提交与等级分
//! - 对局归档

pub mod arbiter;
pub mod clock;
pub mod committer;
pub mod oracle;
pub mod presence;
pub mod rating;
pub mod server;
pub mod session;
pub mod storage;

pub use arbiter::{InMemoryStore, SharedStore, TerminalNotice, TimeoutArbiter};
pub use clock::ClockPair;
pub use committer::ResultCommitter;
pub use oracle::{RulesOracle, ScriptedOracle, Verdict};
pub use presence::PresencePair;
pub use server::{Command, MessageHandler, ServerState};
pub use session::{MatchSession, SessionManager};
pub use storage::ArchiveStore;
