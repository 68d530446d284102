//! 规则裁决边界
//!
//! 走法合法性与终局判定由外部规则引擎负责，本服务将其视为
//! 可信黑盒：给定局面与候选走法，返回合法性、新局面与终局标志。

use std::collections::HashMap;

use protocol::{side_to_move, Color};

/// 裁决结果
#[derive(Debug, Clone)]
pub struct Verdict {
    /// 走法是否合法
    pub legal: bool,
    /// 走后局面 FEN（非法走法时为空）
    pub new_position: String,
    /// 是否将死
    pub is_checkmate: bool,
    /// 是否逼和
    pub is_stalemate: bool,
    /// 是否自动判和（子力不足等）
    pub is_draw: bool,
    /// 走后行棋方
    pub side_to_move: Color,
}

impl Verdict {
    /// 非法走法
    pub fn illegal() -> Self {
        Self {
            legal: false,
            new_position: String::new(),
            is_checkmate: false,
            is_stalemate: false,
            is_draw: false,
            side_to_move: Color::White,
        }
    }

    /// 合法走法，对局继续
    pub fn legal(new_position: &str) -> Self {
        Self {
            legal: true,
            new_position: new_position.to_string(),
            is_checkmate: false,
            is_stalemate: false,
            is_draw: false,
            side_to_move: side_to_move(new_position).unwrap_or(Color::White),
        }
    }

    /// 合法走法，将死对方
    pub fn checkmate(new_position: &str) -> Self {
        Self {
            is_checkmate: true,
            ..Self::legal(new_position)
        }
    }

    /// 合法走法，逼和
    pub fn stalemate(new_position: &str) -> Self {
        Self {
            is_stalemate: true,
            ..Self::legal(new_position)
        }
    }

    /// 合法走法，自动判和
    pub fn auto_draw(new_position: &str) -> Self {
        Self {
            is_draw: true,
            ..Self::legal(new_position)
        }
    }

    /// 是否终局裁决
    pub fn is_terminal(&self) -> bool {
        self.is_checkmate || self.is_stalemate || self.is_draw
    }
}

/// 规则裁决器
pub trait RulesOracle: Send + Sync {
    /// 裁决候选走法（UCI 文本，如 `e2e4`、`e7e8q`）
    fn evaluate(&self, position: &str, uci: &str) -> Verdict;
}

/// 脚本化裁决器
///
/// 按 (局面, 走法) 查表返回预置裁决，查不到即判非法。
/// 供测试与嵌入演示使用；生产部署由宿主接入真实规则引擎。
#[derive(Default)]
pub struct ScriptedOracle {
    table: HashMap<(String, String), Verdict>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条裁决
    pub fn with(mut self, position: &str, uci: &str, verdict: Verdict) -> Self {
        self.table
            .insert((position.to_string(), uci.to_string()), verdict);
        self
    }
}

impl RulesOracle for ScriptedOracle {
    fn evaluate(&self, position: &str, uci: &str) -> Verdict {
        self.table
            .get(&(position.to_string(), uci.to_string()))
            .cloned()
            .unwrap_or_else(Verdict::illegal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::INITIAL_FEN;

    const FEN_AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

    #[test]
    fn test_scripted_lookup() {
        let oracle = ScriptedOracle::new().with(INITIAL_FEN, "e2e4", Verdict::legal(FEN_AFTER_E4));

        let verdict = oracle.evaluate(INITIAL_FEN, "e2e4");
        assert!(verdict.legal);
        assert_eq!(verdict.new_position, FEN_AFTER_E4);
        assert_eq!(verdict.side_to_move, Color::Black);
        assert!(!verdict.is_terminal());

        let verdict = oracle.evaluate(INITIAL_FEN, "e2e5");
        assert!(!verdict.legal);
    }

    #[test]
    fn test_terminal_flags() {
        assert!(Verdict::checkmate(FEN_AFTER_E4).is_terminal());
        assert!(Verdict::stalemate(FEN_AFTER_E4).is_terminal());
        assert!(Verdict::auto_draw(FEN_AFTER_E4).is_terminal());
        assert!(!Verdict::legal(FEN_AFTER_E4).is_terminal());
    }
}
