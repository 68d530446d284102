//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 每方初始时间（毫秒）- 10分钟
pub const INITIAL_TIME_MS: u64 = 10 * 60 * 1000;

/// 终局分布式锁 TTL（毫秒）
///
/// 必须大于终局处理的最坏耗时，否则持锁副本尚未完成时
/// 其他副本就能重新抢锁。
pub const TERMINAL_LOCK_TTL_MS: u64 = 5000;

/// 开局阶段断线宽限期（秒）- 双方都走过棋之前
pub const PREGAME_GRACE_SECS: u64 = 15;

/// 对局中断线宽限期（秒）
pub const MIDGAME_GRACE_SECS: u64 = 60;

/// 服务端状态循环的节拍间隔（毫秒），驱动超时与宽限期检查
pub const TICK_INTERVAL_MS: u64 = 250;

/// 初始等级分
pub const DEFAULT_RATING: u32 = 1200;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 终局锁 TTL Duration
pub const TERMINAL_LOCK_TTL: Duration = Duration::from_millis(TERMINAL_LOCK_TTL_MS);
