//! 等级分计算
//!
//! Elo 制，K=32，初始 1200，无新手保护期。
//! 只在终局转换时计算一次，由终局提交器原子落盘。

use protocol::{Color, MatchOutcome, PlayerId, RatingChange, Winner};

/// K 系数
const K: f64 = 32.0;

/// 期望得分
pub fn expected(own: u32, opponent: u32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent as f64 - own as f64) / 400.0))
}

/// 按实际得分调整后的等级分
pub fn adjusted(own: u32, opponent: u32, score: f64) -> u32 {
    let new = own as f64 + K * (score - expected(own, opponent));
    new.round().max(0.0) as u32
}

/// 指定棋色在该终局结果下的实际得分 ∈ {0, 0.5, 1}
pub fn score_for(color: Color, outcome: &MatchOutcome) -> f64 {
    match outcome.winner() {
        Winner::Draw => 0.5,
        winner if winner == Winner::from(color) => 1.0,
        _ => 0.0,
    }
}

/// 计算双方的等级分变动（白在前）
pub fn changes(
    white: (PlayerId, u32),
    black: (PlayerId, u32),
    outcome: &MatchOutcome,
) -> [RatingChange; 2] {
    let white_score = score_for(Color::White, outcome);
    let black_score = score_for(Color::Black, outcome);

    [
        RatingChange {
            player: white.0,
            before: white.1,
            after: adjusted(white.1, black.1, white_score),
        },
        RatingChange {
            player: black.0,
            before: black.1,
            after: adjusted(black.1, white.1, black_score),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::WinReason;

    #[test]
    fn test_expected_symmetric() {
        let e = expected(1200, 1200);
        assert!((e - 0.5).abs() < 1e-9);
        assert!((expected(1200, 1400) + expected(1400, 1200) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_ratings_win() {
        let outcome = MatchOutcome::win(Color::White, WinReason::Checkmate);
        let [white, black] = changes((1, 1200), (2, 1200), &outcome);
        assert_eq!(white.delta(), 16);
        assert_eq!(black.delta(), -16);
    }

    #[test]
    fn test_equal_ratings_draw() {
        let outcome = MatchOutcome::Draw(protocol::DrawReason::Agreement);
        let [white, black] = changes((1, 1200), (2, 1200), &outcome);
        assert_eq!(white.delta(), 0);
        assert_eq!(black.delta(), 0);
    }

    #[test]
    fn test_underdog_gains_more() {
        let outcome = MatchOutcome::win(Color::Black, WinReason::Resign);
        let [white, black] = changes((1, 1600), (2, 1200), &outcome);
        // 低分方爆冷获胜，涨幅超过 K/2
        assert!(black.delta() > 16);
        assert!(white.delta() < -16);
    }

    #[test]
    fn test_score_for() {
        let outcome = MatchOutcome::win(Color::White, WinReason::Timeout);
        assert_eq!(score_for(Color::White, &outcome), 1.0);
        assert_eq!(score_for(Color::Black, &outcome), 0.0);

        let outcome = MatchOutcome::Draw(protocol::DrawReason::Stalemate);
        assert_eq!(score_for(Color::White, &outcome), 0.5);
        assert_eq!(score_for(Color::Black, &outcome), 0.5);
    }
}
