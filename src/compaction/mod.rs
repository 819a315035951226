//! Context compaction between pipeline stages.
//!
//! Stage outputs can be much larger than what a downstream stage needs. This
//! module keeps the forwarded context bounded:
//!
//! - **Competitor compaction**: caps the competitor JSON list and shortens notes
//! - **Markdown summarization**: keeps headings, bullets and tables
//! - **Hard truncation**: char-boundary cut with an omission note
//! - **Context bundles**: the upstream sections a stage receives, fitted to a ceiling
//!
//! Compression is best effort and may leave the text unchanged. Truncation
//! always applies, so nothing forwarded ever exceeds its ceiling.
//!
//! ## Usage
//!
//! ```ignore
//! use gap_foundry::compaction::{ContextBundle, hard_truncate};
//!
//! let mut bundle = ContextBundle::new(anchor, 15_000);
//! bundle.push(Stage::CompactCompetitors, competitors);
//! let prompt_context = bundle.render(); // never longer than 15_000 chars
//! ```

mod bundle;
mod competitors;
mod summarize;
mod truncate;

pub use bundle::{BundleEntry, ContextBundle};
pub use competitors::{MAX_COMPETITOR_CANDIDATES, MAX_COMPETITOR_ITEMS, compact_competitors_output};
pub use summarize::summarize_markdown;
pub use truncate::hard_truncate;

/// Ceiling for the context forwarded into a single stage (characters).
pub const DEFAULT_CONTEXT_CEILING_CHARS: usize = 15_000;

/// Ceiling for a single stage's stored output (characters).
pub const DEFAULT_STAGE_OUTPUT_CEILING_CHARS: usize = 12_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert!(DEFAULT_STAGE_OUTPUT_CEILING_CHARS > 0);
        assert!(DEFAULT_STAGE_OUTPUT_CEILING_CHARS <= DEFAULT_CONTEXT_CEILING_CHARS);
        assert!(MAX_COMPETITOR_ITEMS < MAX_COMPETITOR_CANDIDATES);
    }
}
