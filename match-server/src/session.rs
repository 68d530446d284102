//! 对局状态机与会话管理
//!
//! `MatchSession` 独占一局的权威状态：局面、走子日志、双钟、
//! 协商子状态与在场记录。所有变更操作都在服务端状态循环里
//! 串行执行；跨副本的超时竞速由分布式仲裁收敛到这里唯一的
//! 终局入口 `end_match`。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use protocol::{
    is_square, side_to_move, Color, DrawReason, MatchError, MatchId, MatchOutcome, MatchStatus,
    MoveRecord, PlayerId, WinReason, Winner, INITIAL_FEN,
};

use crate::clock::ClockPair;
use crate::oracle::RulesOracle;
use crate::presence::PresencePair;

/// 终局报告：`end_match` 胜出调用的产物
#[derive(Debug, Clone)]
pub struct TerminalReport {
    pub match_id: MatchId,
    pub outcome: MatchOutcome,
    pub final_position: String,
    pub ended_at: DateTime<Utc>,
}

/// 成功落子的结果
#[derive(Debug, Clone)]
pub struct MoveApplied {
    /// 新追加的走子记录
    pub record: MoveRecord,
    /// 裁决器报告终局时由走子路径内联触发的终局报告
    pub terminal: Option<TerminalReport>,
}

/// 对局快照（只读，供重连同步）
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub match_id: MatchId,
    pub position: String,
    pub white_time_ms: u64,
    pub black_time_ms: u64,
    pub status: MatchStatus,
    pub winner: Option<Winner>,
    pub draw_offered_by: Option<Color>,
}

/// 一局棋
pub struct MatchSession {
    pub id: MatchId,
    /// 白方玩家
    pub white: PlayerId,
    /// 黑方玩家
    pub black: PlayerId,
    /// 当前局面 FEN
    pub position: String,
    /// 对局状态（单调，离开 Active 后不可逆）
    pub status: MatchStatus,
    /// 终局结果
    pub outcome: Option<MatchOutcome>,
    /// 双钟
    pub clock: ClockPair,
    /// 走子日志（追加写）
    pub moves: Vec<MoveRecord>,
    /// 未决提和的发起方
    pub draw_offer: Option<Color>,
    /// 双方在场记录
    pub presence: PresencePair,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 结束时间（终局时设置一次）
    pub ended_at: Option<DateTime<Utc>>,
}

impl MatchSession {
    /// 创建新对局（配对服务把两名玩家凑成一桌时调用）
    pub fn new(id: MatchId, white: PlayerId, black: PlayerId, initial_time_ms: u64) -> Self {
        Self {
            id,
            white,
            black,
            position: INITIAL_FEN.to_string(),
            status: MatchStatus::Active,
            outcome: None,
            clock: ClockPair::new(initial_time_ms),
            moves: Vec::new(),
            draw_offer: None,
            presence: PresencePair::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// 玩家在本局执的棋色
    pub fn player_color(&self, player_id: PlayerId) -> Option<Color> {
        if self.white == player_id {
            Some(Color::White)
        } else if self.black == player_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// 指定棋色的玩家 ID
    pub fn player_id(&self, color: Color) -> PlayerId {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// 对手 ID
    pub fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        match self.player_color(player_id)? {
            Color::White => Some(self.black),
            Color::Black => Some(self.white),
        }
    }

    /// 双方是否都至少走过一步棋
    pub fn both_moved(&self) -> bool {
        self.moves.iter().any(|m| m.by == Color::White)
            && self.moves.iter().any(|m| m.by == Color::Black)
    }

    /// 走棋
    ///
    /// 成功时：停走棋方的钟、开对方的钟，用冻结后的当前剩余时间
    /// 追加走子记录，清除未决提和，裁决器报告终局则内联走终局入口。
    /// 终局后到达的走法一律拒绝，走子日志不会出现晚于终局的条目。
    pub fn submit_move(
        &mut self,
        player_id: PlayerId,
        from: &str,
        to: &str,
        promotion: Option<char>,
        oracle: &dyn RulesOracle,
    ) -> Result<MoveApplied, MatchError> {
        let color = self
            .player_color(player_id)
            .ok_or(MatchError::NotAParticipant)?;

        if self.status.is_terminal() {
            return Err(MatchError::MatchFinished);
        }

        if !is_square(from) || !is_square(to) {
            return Err(MatchError::BadRequest(format!(
                "invalid squares: {} {}",
                from, to
            )));
        }
        if let Some(p) = promotion {
            if !matches!(p, 'q' | 'r' | 'b' | 'n') {
                return Err(MatchError::BadRequest(format!(
                    "invalid promotion piece: {}",
                    p
                )));
            }
        }

        let side = side_to_move(&self.position)
            .ok_or_else(|| MatchError::Internal(format!("corrupt position: {}", self.position)))?;
        if color != side {
            return Err(MatchError::NotPlayersTurn);
        }

        let mut uci = format!("{}{}", from, to);
        if let Some(p) = promotion {
            uci.push(p);
        }

        let verdict = oracle.evaluate(&self.position, &uci);
        if !verdict.legal {
            return Err(MatchError::InvalidMove(uci));
        }

        self.clock.switch_turn();
        let (white_time_ms, black_time_ms) = self.clock.times();

        self.position = verdict.new_position.clone();
        let record = MoveRecord {
            seq: self.moves.len() as u32 + 1,
            by: color,
            uci,
            position: self.position.clone(),
            white_time_ms,
            black_time_ms,
        };
        self.moves.push(record.clone());

        // 新走法使未决提和失效
        self.draw_offer = None;

        let terminal = if verdict.is_checkmate {
            self.end_match(MatchOutcome::win(color, WinReason::Checkmate))
        } else if verdict.is_stalemate {
            self.end_match(MatchOutcome::Draw(DrawReason::Stalemate))
        } else if verdict.is_draw {
            self.end_match(MatchOutcome::Draw(DrawReason::InsufficientMaterial))
        } else {
            None
        };

        Ok(MoveApplied { record, terminal })
    }

    /// 提和
    ///
    /// 策略：任一方随时可提；整局同时至多一个未决提和。
    pub fn offer_draw(&mut self, color: Color) -> Result<(), MatchError> {
        if self.status.is_terminal() {
            return Err(MatchError::MatchFinished);
        }
        if self.draw_offer.is_some() {
            return Err(MatchError::OfferOutstanding);
        }
        self.draw_offer = Some(color);
        Ok(())
    }

    /// 响应提和；接受则走终局入口，拒绝则清除提和
    pub fn respond_draw(
        &mut self,
        color: Color,
        accept: bool,
    ) -> Result<Option<TerminalReport>, MatchError> {
        if self.status.is_terminal() {
            return Err(MatchError::MatchFinished);
        }
        let offered_by = self.draw_offer.ok_or(MatchError::NoOfferOutstanding)?;
        if offered_by == color {
            return Err(MatchError::OwnOffer);
        }

        if accept {
            Ok(self.end_match(MatchOutcome::Draw(DrawReason::Agreement)))
        } else {
            self.draw_offer = None;
            Ok(None)
        }
    }

    /// 认输：对方获胜，无条件走终局入口
    pub fn resign(&mut self, color: Color) -> Result<Option<TerminalReport>, MatchError> {
        if self.status.is_terminal() {
            return Err(MatchError::MatchFinished);
        }
        Ok(self.end_match(MatchOutcome::win(color.opponent(), WinReason::Resign)))
    }

    /// 终局转换的唯一入口
    ///
    /// 幂等：已终局时什么都不做并返回 None —— 调用方不得假设
    /// 自己的结果"赢得"竞速，先到者定结果，后到者观察既定结果。
    /// 胜出调用设置状态 / 胜方 / 结束时间，停双钟，清宽限计时。
    pub fn end_match(&mut self, outcome: MatchOutcome) -> Option<TerminalReport> {
        if self.status.is_terminal() {
            return None;
        }

        self.status = outcome.status();
        self.outcome = Some(outcome);
        self.clock.stop();
        self.presence.clear_deadlines();
        self.draw_offer = None;

        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);

        Some(TerminalReport {
            match_id: self.id,
            outcome,
            final_position: self.position.clone(),
            ended_at,
        })
    }

    /// 只读快照（重连同步用，不做任何变更）
    pub fn snapshot(&self) -> Snapshot {
        let (white_time_ms, black_time_ms) = self.clock.times();
        Snapshot {
            match_id: self.id,
            position: self.position.clone(),
            white_time_ms,
            black_time_ms,
            status: self.status,
            winner: self.outcome.map(|o| o.winner()),
            draw_offered_by: self.draw_offer,
        }
    }
}

/// 会话管理器
///
/// 按对局 ID 管理所有会话；没有任何进程级的"当前对局"全局变量。
pub struct SessionManager {
    sessions: HashMap<MatchId, MatchSession>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn generate_id(&self) -> MatchId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 创建对局
    pub fn create(&mut self, white: PlayerId, black: PlayerId, initial_time_ms: u64) -> MatchId {
        let id = self.generate_id();
        let session = MatchSession::new(id, white, black, initial_time_ms);
        self.sessions.insert(id, session);
        id
    }

    /// 获取会话
    pub fn get(&self, match_id: MatchId) -> Option<&MatchSession> {
        self.sessions.get(&match_id)
    }

    /// 获取会话（可变）
    pub fn get_mut(&mut self, match_id: MatchId) -> Option<&mut MatchSession> {
        self.sessions.get_mut(&match_id)
    }

    /// 移除会话（归档完成后由终局提交流程调用）
    pub fn remove(&mut self, match_id: MatchId) -> Option<MatchSession> {
        self.sessions.remove(&match_id)
    }

    /// 当前所有会话 ID
    pub fn ids(&self) -> Vec<MatchId> {
        self.sessions.keys().copied().collect()
    }

    /// 查找玩家所在的对局
    pub fn find_player_match(&self, player_id: PlayerId) -> Option<MatchId> {
        self.sessions
            .values()
            .find(|s| s.player_color(player_id).is_some())
            .map(|s| s.id)
    }

    /// 会话数量
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
