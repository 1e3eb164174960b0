//! Splits oversized chat messages into ordered parts.
//!
//! Concatenating the returned bodies reproduces the input exactly. Each body
//! leaves `HEADER_RESERVE` characters of room for the `Part i/N` header.

use crate::notify::format::BLOCK_SEPARATOR;

/// Characters reserved for the part header
pub const HEADER_RESERVE: usize = 100;

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset just past the first `chars` characters of `text`
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

/// True when the character at `offset` is escaped by the preceding backslash
fn splits_escape(text: &str, offset: usize) -> bool {
    let trailing = text[..offset].bytes().rev().take_while(|b| *b == b'\\').count();
    trailing % 2 == 1
}

/// Byte offset at which to cut `text` so the head fits in `budget` chars
fn find_cut(text: &str, budget: usize) -> usize {
    let max_end = byte_offset(text, budget);
    let window = &text[..max_end];

    if let Some(idx) = window.rfind(BLOCK_SEPARATOR) {
        if idx > 0 {
            return idx + BLOCK_SEPARATOR.len();
        }
    }
    if let Some(idx) = window.rfind('\n') {
        if idx > 0 {
            return idx + 1;
        }
    }

    let mut cut = max_end;
    if splits_escape(text, cut) {
        // backslashes are one byte
        cut -= 1;
    }
    if cut == 0 {
        // a lone escape pair at the front; keep it whole
        cut = byte_offset(text, 2);
    }
    cut
}

/// Split `message` into bodies that fit `limit` once a part header is added
pub fn split_message(message: &str, limit: usize) -> Vec<String> {
    let budget = limit.saturating_sub(HEADER_RESERVE).max(2);
    if char_len(message) <= budget {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut rest = message;
    while char_len(rest) > budget {
        let cut = find_cut(rest, budget);
        let (head, tail) = rest.split_at(cut);
        parts.push(head.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::format::Dialect;

    fn assert_parts_valid(message: &str, parts: &[String], limit: usize) {
        assert_eq!(parts.concat(), message);
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let header = Dialect::TelegramMarkdownV2.part_header(i + 1, total);
            assert!(char_len(&header) + char_len(part) <= limit, "part {} too long", i + 1);
            assert!(!part.is_empty());
        }
    }

    #[test]
    fn test_short_message_is_single_part() {
        assert_eq!(split_message("hello", 4096), vec!["hello".to_string()]);
    }

    #[test]
    fn test_splits_on_block_boundaries() {
        let blocks: Vec<String> = (0..60)
            .map(|i| format!("📝 *aws\\_instance\\.web\\_{}*\n  • Changed by: alice", i))
            .collect();
        let message = blocks.join("\n\n");
        let parts = split_message(&message, 1000);

        assert!(parts.len() > 1);
        assert_parts_valid(&message, &parts, 1000);
        for part in &parts[..parts.len() - 1] {
            assert!(part.ends_with("\n\n"));
        }
        for part in &parts[1..] {
            assert!(part.starts_with("📝"));
        }
    }

    #[test]
    fn test_falls_back_to_line_boundaries() {
        let lines: Vec<String> = (0..200).map(|i| format!("  • line {}", i)).collect();
        let message = lines.join("\n");
        let parts = split_message(&message, 400);
        assert_parts_valid(&message, &parts, 400);
        for part in &parts[..parts.len() - 1] {
            assert!(part.ends_with('\n'));
        }
    }

    #[test]
    fn test_never_separates_escape_from_character() {
        // 299 plain chars then an escaped dot straddling the boundary
        let message = format!("{}\\.{}", "a".repeat(299), "b".repeat(500));
        let parts = split_message(&message, 400);
        assert_parts_valid(&message, &parts, 400);
        for part in &parts {
            assert!(!splits_escape(part, part.len()), "part ends mid-escape: {:?}", part);
        }
    }

    #[test]
    fn test_multibyte_characters_are_not_cut() {
        let message = "━".repeat(1000);
        let parts = split_message(&message, 400);
        assert_parts_valid(&message, &parts, 400);
    }

    #[test]
    fn test_large_report_message() {
        let block = format!("❌ *{}*\n{}", "x".repeat(40), "  • `a: b → c`\n".repeat(5));
        let message = vec![block; 50].join("\n\n");
        let parts = split_message(&message, 4096);
        assert!(parts.len() >= 2);
        assert_parts_valid(&message, &parts, 4096);
    }
}
