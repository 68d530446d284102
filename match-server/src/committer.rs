//! 终局提交
//!
//! 把终局报告变成一次性的持久化副作用：读取双方赛前等级分、
//! 计算变动、组装归档记录、写入存储。对同一局重复调用安全，
//! 重放时返回首次提交的等级分变动。

use anyhow::Result;
use tracing::warn;

use protocol::{MatchRecord, RatingChange, INITIAL_FEN, RECORD_VERSION};

use crate::rating;
use crate::session::{MatchSession, TerminalReport};
use crate::storage::ArchiveStore;

/// 终局提交器
pub struct ResultCommitter {
    store: ArchiveStore,
}

impl ResultCommitter {
    pub fn new(store: ArchiveStore) -> Self {
        Self { store }
    }

    /// 提交一局的终局结果，返回双方等级分变动（白在前）
    ///
    /// 幂等：重放时以首次归档的变动为准，增量绝不重新计算——
    /// 归档后分表的任何读数都已不是赛前等级分。
    pub fn commit(
        &self,
        session: &MatchSession,
        report: &TerminalReport,
    ) -> Result<[RatingChange; 2]> {
        let white_rating = self.store.rating_of(session.white)?;
        let black_rating = self.store.rating_of(session.black)?;
        let changes = rating::changes(
            (session.white, white_rating),
            (session.black, black_rating),
            &report.outcome,
        );

        let record = MatchRecord {
            version: RECORD_VERSION.to_string(),
            match_id: report.match_id,
            white: session.white,
            black: session.black,
            initial_fen: INITIAL_FEN.to_string(),
            final_fen: report.final_position.clone(),
            outcome: report.outcome,
            started_at: session.started_at,
            ended_at: report.ended_at,
            moves: session.moves.clone(),
            rating_changes: changes,
        };

        if !self.store.commit(&record)? {
            // 已有归档（竞速落败或补提交重放），读回首次提交的变动
            warn!("对局 {} 已归档，读回首次提交的变动", report.match_id);
            let archived = self.store.load_record(report.match_id)?;
            return Ok(archived.rating_changes);
        }

        Ok(changes)
    }
}
