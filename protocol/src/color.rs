//! 棋色与胜方

use serde::{Deserialize, Serialize};

/// 棋色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// 获取对方棋色
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// 数组下标（白 0 / 黑 1）
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// 终局胜方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    White,
    Black,
    Draw,
}

impl From<Color> for Winner {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Winner::White,
            Color::Black => Winner::Black,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opponent() {
        assert_eq!(Color::White.opponent(), Color::Black);
        assert_eq!(Color::Black.opponent(), Color::White);
    }

    #[test]
    fn test_winner_json() {
        let json = serde_json::to_string(&Winner::White).unwrap();
        assert_eq!(json, "\"WHITE\"");
        let json = serde_json::to_string(&Winner::Draw).unwrap();
        assert_eq!(json, "\"DRAW\"");
    }
}
