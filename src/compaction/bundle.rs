//! The upstream context handed to one stage.

use super::truncate::hard_truncate;
use crate::validation::models::Stage;

const ANCHOR_HEADER: &str = "# Idea Anchor\n\n";

/// One forwarded upstream artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub stage: Stage,
    pub text: String,
}

impl BundleEntry {
    fn header(&self) -> String {
        format!("\n\n## {} ({})\n\n", self.stage.label(), self.stage.file_stem())
    }
}

/// Idea anchor plus the upstream artifacts a stage consumes.
///
/// [`render`](Self::render) never returns more than `ceiling` characters.
/// When the sections don't fit, the budget is shared so that short sections
/// stay whole and only the longest ones are cut.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    anchor: String,
    entries: Vec<BundleEntry>,
    ceiling: usize,
}

impl ContextBundle {
    pub fn new(anchor: impl Into<String>, ceiling: usize) -> Self {
        Self {
            anchor: anchor.into(),
            entries: Vec::new(),
            ceiling,
        }
    }

    pub fn push(&mut self, stage: Stage, text: impl Into<String>) {
        self.entries.push(BundleEntry {
            stage,
            text: text.into(),
        });
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Forwarded text of an upstream stage, untruncated.
    pub fn text_for(&self, stage: Stage) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.text.as_str())
    }

    /// Character count of the unfitted sections.
    pub fn raw_len(&self) -> usize {
        self.assemble(&self.bodies()).chars().count()
    }

    pub fn render(&self) -> String {
        let bodies = self.bodies();
        let full = self.assemble(&bodies);
        if full.chars().count() <= self.ceiling {
            return full;
        }

        let header_chars: usize = ANCHOR_HEADER.chars().count()
            + self
                .entries
                .iter()
                .map(|e| e.header().chars().count())
                .sum::<usize>();
        if header_chars >= self.ceiling {
            return hard_truncate(&full, self.ceiling);
        }

        let lengths: Vec<usize> = bodies.iter().map(|b| b.chars().count()).collect();
        let budgets = share_budget(&lengths, self.ceiling - header_chars);
        let fitted: Vec<String> = bodies
            .iter()
            .zip(budgets)
            .map(|(body, budget)| hard_truncate(body, budget))
            .collect();
        let fitted: Vec<&str> = fitted.iter().map(String::as_str).collect();
        self.assemble(&fitted)
    }

    fn bodies(&self) -> Vec<&str> {
        std::iter::once(self.anchor.as_str())
            .chain(self.entries.iter().map(|e| e.text.as_str()))
            .collect()
    }

    /// `bodies[0]` is the anchor, the rest follow `entries`.
    fn assemble(&self, bodies: &[&str]) -> String {
        let mut out = String::from(ANCHOR_HEADER);
        out.push_str(bodies[0]);
        for (entry, body) in self.entries.iter().zip(&bodies[1..]) {
            out.push_str(&entry.header());
            out.push_str(body);
        }
        out
    }
}

/// Split `budget` over sections of the given lengths.
///
/// Sections are served shortest first. Each gets at most an even share of
/// what is left, so unused share flows to the longer sections.
fn share_budget(lengths: &[usize], budget: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by_key(|&i| lengths[i]);

    let mut out = vec![0; lengths.len()];
    let mut remaining = budget;
    for (served, &i) in order.iter().enumerate() {
        let share = remaining / (lengths.len() - served);
        let given = lengths[i].min(share);
        out[i] = given;
        remaining -= given;
    }
    out
}
