//! FEN 工具
//!
//! 局面合法性由外部规则裁决器保证，这里只提供
//! 对局引擎自身需要的少量解析：初始局面与行棋方。

use crate::color::Color;

/// 国际象棋初始局面
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// 从 FEN 解析行棋方（第二个字段，`w` 或 `b`）
pub fn side_to_move(fen: &str) -> Option<Color> {
    match fen.split_whitespace().nth(1)? {
        "w" => Some(Color::White),
        "b" => Some(Color::Black),
        _ => None,
    }
}

/// 检查坐标是否为合法格子（a1 ~ h8）
pub fn is_square(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 2 && (b'a'..=b'h').contains(&bytes[0]) && (b'1'..=b'8').contains(&bytes[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_to_move() {
        assert_eq!(side_to_move(INITIAL_FEN), Some(Color::White));
        assert_eq!(
            side_to_move("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"),
            Some(Color::Black)
        );
        assert_eq!(side_to_move("invalid"), None);
        assert_eq!(side_to_move(""), None);
    }

    #[test]
    fn test_is_square() {
        assert!(is_square("e2"));
        assert!(is_square("a1"));
        assert!(is_square("h8"));
        assert!(!is_square("i1"));
        assert!(!is_square("e9"));
        assert!(!is_square("e22"));
        assert!(!is_square(""));
    }
}
