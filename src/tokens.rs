//! Token Estimation
//!
//! Coarse, tokenizer-free token counting. One token per 1.5 characters
//! over-counts Latin text and lands close for mixed CJK/Latin prompts, which is
//! the safe direction for budget checks.

/// Characters per token assumed by the estimator
pub const CHARS_PER_TOKEN: f64 = 1.5;

/// Hint appended by [`safe_truncate`] when callers have no better one
pub const DEFAULT_TRUNCATION_HINT: &str = "\n...[truncated]";

const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?', '；', ';'];

/// Estimated token count of `text`
pub fn estimate_tokens(text: &str) -> u32 {
    tokens_for_chars(text.chars().count())
}

/// Estimated token count of a system + user prompt pair
pub fn estimate_prompt_tokens(system: &str, user: &str) -> u32 {
    tokens_for_chars(system.chars().count() + user.chars().count())
}

fn tokens_for_chars(chars: usize) -> u32 {
    let tokens = (chars as f64 / CHARS_PER_TOKEN).ceil();
    if tokens >= u32::MAX as f64 {
        u32::MAX
    } else {
        tokens as u32
    }
}

/// Truncate `text` to at most `max_len` characters, ending with `hint`.
///
/// The cut prefers the last newline inside the final 20% of the budget, then
/// the last sentence terminator in that window, then a hard cut.
pub fn safe_truncate(text: &str, max_len: usize, hint: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }

    let hint_len = hint.chars().count();
    if hint_len >= max_len {
        return hint.chars().take(max_len).collect();
    }

    let budget = max_len - hint_len;
    let window_start = budget * 4 / 5;
    let head = &chars[..budget];

    let in_window = |idx: &usize| *idx >= window_start;

    let cut = if let Some(idx) = head.iter().rposition(|c| *c == '\n').filter(in_window) {
        idx
    } else if let Some(idx) = head
        .iter()
        .rposition(|c| SENTENCE_TERMINATORS.contains(c))
        .filter(in_window)
    {
        // Keep the terminator itself
        idx + 1
    } else {
        budget
    };

    let mut out: String = chars[..cut].iter().collect();
    out.push_str(hint);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abc"), 2);
        assert_eq!(estimate_tokens("abcd"), 3);
        // Counted per character, not per byte
        assert_eq!(estimate_tokens("剧本分析"), 3);
    }

    #[test]
    fn test_prompt_estimate_is_concatenation() {
        assert_eq!(estimate_prompt_tokens("ab", "c"), estimate_tokens("abc"));
    }

    #[test]
    fn test_fitting_text_unchanged() {
        let text = "short text";
        assert_eq!(safe_truncate(text, 10, "..."), text);
        assert_eq!(safe_truncate(text, 100, "..."), text);
    }

    #[test]
    fn test_cuts_at_late_newline() {
        let text = format!("{}\n{}", "a".repeat(90), "b".repeat(50));
        let out = safe_truncate(&text, 100, "[…]");
        assert_eq!(out, format!("{}[…]", "a".repeat(90)));
    }

    #[test]
    fn test_cuts_at_sentence_end() {
        let text = format!("{}。{}", "字".repeat(85), "尾".repeat(50));
        let out = safe_truncate(&text, 100, "…");
        assert_eq!(out, format!("{}。…", "字".repeat(85)));
    }

    #[test]
    fn test_early_newline_is_ignored() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(200));
        let out = safe_truncate(&text, 50, "...");
        assert_eq!(out.chars().count(), 50);
        assert!(out.ends_with("b..."));
    }

    #[test]
    fn test_never_exceeds_max_len() {
        let samples = [
            "plain ascii text that goes on and on and on. Another sentence! And more?",
            "第一行\n第二行。第三行！还有更多的内容在这里；结束",
            "no-breaks-at-all-just-one-very-long-token-like-string-here",
        ];
        for text in samples {
            for max_len in 0..80 {
                let out = safe_truncate(text, max_len, DEFAULT_TRUNCATION_HINT);
                assert!(out.chars().count() <= max_len, "{max_len}: {out:?}");
                if text.chars().count() <= max_len {
                    assert_eq!(out, text);
                }
            }
        }
    }
}
