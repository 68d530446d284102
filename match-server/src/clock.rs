//! 双钟与回合交接
//!
//! 纯算术计时：运行中 `剩余 = 上次快照剩余 − 本回合已耗时`，
//! 停止时冻结。不做任何 IO，进程重启后可从持久化的剩余时间重建。

use std::time::Instant;

use protocol::Color;

/// 一对倒计时钟
///
/// 不变式：对局进行中恰有一方在走钟，且走钟方 == 局面行棋方；
/// 终局后两钟皆停。超时通知每个运行片段至多上报一次。
#[derive(Debug)]
pub struct ClockPair {
    /// 白方剩余时间快照（毫秒）
    white_ms: u64,
    /// 黑方剩余时间快照（毫秒）
    black_ms: u64,
    /// 当前走钟方
    running: Option<Color>,
    /// 本回合开始时间
    turn_start: Option<Instant>,
    /// 本运行片段是否已上报超时
    expiry_fired: bool,
}

impl ClockPair {
    /// 创建新钟对，白方先走钟
    pub fn new(initial_ms: u64) -> Self {
        Self {
            white_ms: initial_ms,
            black_ms: initial_ms,
            running: Some(Color::White),
            turn_start: Some(Instant::now()),
            expiry_fired: false,
        }
    }

    /// 从持久化的剩余时间重建（进程重启恢复）
    pub fn from_times(white_ms: u64, black_ms: u64, running: Option<Color>) -> Self {
        Self {
            white_ms,
            black_ms,
            running,
            turn_start: running.map(|_| Instant::now()),
            expiry_fired: false,
        }
    }

    /// 白方剩余时间（毫秒）
    pub fn white_time_ms(&self) -> u64 {
        if self.running == Some(Color::White) {
            self.elapsed_adjusted(self.white_ms)
        } else {
            self.white_ms
        }
    }

    /// 黑方剩余时间（毫秒）
    pub fn black_time_ms(&self) -> u64 {
        if self.running == Some(Color::Black) {
            self.elapsed_adjusted(self.black_ms)
        } else {
            self.black_ms
        }
    }

    /// 指定棋色剩余时间（毫秒）
    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_time_ms(),
            Color::Black => self.black_time_ms(),
        }
    }

    /// 双方剩余时间（白在前）
    pub fn times(&self) -> (u64, u64) {
        (self.white_time_ms(), self.black_time_ms())
    }

    fn elapsed_adjusted(&self, base: u64) -> u64 {
        if let Some(start) = self.turn_start {
            let elapsed = start.elapsed().as_millis() as u64;
            base.saturating_sub(elapsed)
        } else {
            base
        }
    }

    /// 当前走钟方
    pub fn running(&self) -> Option<Color> {
        self.running
    }

    /// 冻结当前走钟方的剩余时间快照
    fn freeze(&mut self) {
        match self.running {
            Some(Color::White) => self.white_ms = self.white_time_ms(),
            Some(Color::Black) => self.black_ms = self.black_time_ms(),
            None => {}
        }
    }

    /// 回合交接：停走棋方的钟，开对方的钟
    pub fn switch_turn(&mut self) {
        let Some(current) = self.running else { return };
        self.freeze();
        self.running = Some(current.opponent());
        self.turn_start = Some(Instant::now());
        self.expiry_fired = false;
    }

    /// 指定一方开始走钟
    pub fn start(&mut self, color: Color) {
        self.freeze();
        self.running = Some(color);
        self.turn_start = Some(Instant::now());
        self.expiry_fired = false;
    }

    /// 停止双钟（终局）
    pub fn stop(&mut self) {
        self.freeze();
        self.running = None;
        self.turn_start = None;
    }

    /// 覆盖剩余时间快照（恢复场景）
    pub fn set_times(&mut self, white_ms: u64, black_ms: u64) {
        self.white_ms = white_ms;
        self.black_ms = black_ms;
        self.turn_start = self.running.map(|_| Instant::now());
    }

    /// 取走超时事件：走钟方归零时返回其棋色，每个运行片段至多一次
    pub fn take_expiry(&mut self) -> Option<Color> {
        let current = self.running?;
        if self.expiry_fired {
            return None;
        }
        if self.remaining(current) == 0 {
            self.expiry_fired = true;
            Some(current)
        } else {
            None
        }
    }

    /// 重新武装超时上报
    ///
    /// 未抢到终局锁的副本调用，下个节拍可再次尝试，
    /// 防止持锁副本崩溃后无人推进终局。
    pub fn rearm_expiry(&mut self) {
        self.expiry_fired = false;
    }
}
