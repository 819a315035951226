//! Unconditional length cap for stage text.

/// Sentence ends we prefer to cut at, searched from the end of the kept prefix.
const SENTENCE_BREAKS: [&str; 5] = [". ", ".\n", "\n\n", "! ", "? "];

fn omission_note(omitted: usize) -> String {
    format!("\n\n[... {} chars omitted ...]", omitted)
}

/// Cut `text` to at most `limit` characters.
///
/// When text is dropped, an omission note is appended and counted against
/// `limit`. The cut lands on a sentence break when one exists in the back
/// half of the kept prefix. Limits too small to hold the note get a bare
/// prefix instead.
pub fn hard_truncate(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }

    // The real note is never longer than this one.
    let reserve = omission_note(total).chars().count();
    if limit <= reserve {
        return text.chars().take(limit).collect();
    }
    let keep = limit - reserve;

    let end = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let mut prefix = &text[..end];

    let best_break = SENTENCE_BREAKS
        .iter()
        .filter_map(|brk| prefix.rfind(brk).map(|i| i + 1))
        .max();
    if let Some(cut) = best_break.filter(|&cut| cut > prefix.len() / 2) {
        prefix = &prefix[..cut];
    }

    let kept = prefix.chars().count();
    let mut out = String::with_capacity(prefix.len() + reserve);
    out.push_str(prefix.trim_end());
    out.push_str(&omission_note(total - kept));
    out
}
