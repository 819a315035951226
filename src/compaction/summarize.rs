//! Structure-preserving markdown summarization.

fn is_structural(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#')
        || t.starts_with("- ")
        || t.starts_with("* ")
        || t.starts_with('|')
        || t.starts_with("**")
        || t.starts_with("VERDICT")
        || is_numbered(t)
}

fn is_numbered(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && line[digits..].starts_with(". ")
}

/// Shrink markdown prose while keeping its skeleton.
///
/// Text already within `target_chars` is returned unchanged. Otherwise
/// headings, list items, table rows and bold lead-ins survive, plus the
/// first prose line under each heading. The result may still exceed
/// `target_chars`; callers truncate afterwards.
pub fn summarize_markdown(text: &str, target_chars: usize) -> String {
    if text.chars().count() <= target_chars {
        return text.to_string();
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut prose_after_heading = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            kept.push(line);
            prose_after_heading = true;
        } else if is_structural(line) {
            kept.push(line);
        } else if prose_after_heading {
            kept.push(line);
            prose_after_heading = false;
        }
    }

    if kept.is_empty() {
        return text.to_string();
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNELS: &str = "\
# Channels

Most competitors acquire customers through search.
They also run webinars and partner with accountants.
Long paragraph that does not carry structure and can go.

## Paid
- Google Ads on tax keywords
- Naver search ads

| Channel | Share |
|---|---|
| Search | 60% |

1. Start with SEO
2. Add partnerships
";

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(summarize_markdown(CHANNELS, 10_000), CHANNELS);
    }

    #[test]
    fn test_keeps_structure_and_first_prose_line() {
        let out = summarize_markdown(CHANNELS, 50);
        assert!(out.contains("# Channels"));
        assert!(out.contains("Most competitors acquire customers through search."));
        assert!(!out.contains("They also run webinars"));
        assert!(!out.contains("Long paragraph"));
        assert!(out.contains("- Naver search ads"));
        assert!(out.contains("| Search | 60% |"));
        assert!(out.contains("2. Add partnerships"));
        assert!(out.len() < CHANNELS.len());
    }

    #[test]
    fn test_plain_prose_without_headings_unchanged() {
        let prose = "word ".repeat(100);
        assert_eq!(summarize_markdown(&prose, 10), prose);
    }
}
