//! PreGate: cheap specificity check run before any analysis is paid for.
//!
//! The checker is a pure function of its input and the configured
//! [`PregatePolicy`]. It never performs I/O and never calls the analysis
//! capability, so identical input always yields an identical report.
//!
//! Four heuristic checks contribute to the score (one quarter each):
//!
//! | # | Check | Fails when | Core |
//! |---|-------|------------|------|
//! | 1 | Target specificity | target matches a vague pattern | yes |
//! | 2 | Problem is concrete | problem matches a truism pattern | yes |
//! | 3 | Idea has an action | no strong or weak action verb | yes |
//! | 4 | Alternatives named | missing or shorter than the minimum | no (warning) |
//!
//! On top of the score, fields below their hard minimum length always make
//! the input invalid.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Result of a pregate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregateReport {
    pub is_valid: bool,
    pub score: f64,
    pub fail_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

// ── Policy ────────────────────────────────────────────────────────────

/// Lengths below which a field is rejected outright.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardMinLengths {
    pub idea_one_liner: usize,
    pub target_customer: usize,
    pub problem_statement: usize,
}

impl Default for HardMinLengths {
    fn default() -> Self {
        Self {
            idea_one_liner: 5,
            target_customer: 2,
            problem_statement: 5,
        }
    }
}

/// Lengths below which a field only produces a warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoftMinLengths {
    pub idea_one_liner: usize,
    pub target_customer: usize,
    pub problem_statement: usize,
    pub current_alternatives: usize,
}

impl Default for SoftMinLengths {
    fn default() -> Self {
        Self {
            idea_one_liner: 15,
            target_customer: 2,
            problem_statement: 11,
            current_alternatives: 10,
        }
    }
}

/// Scoring policy. All patterns are matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregatePolicy {
    #[serde(default)]
    pub hard_min_lengths: HardMinLengths,
    #[serde(default)]
    pub min_lengths: SoftMinLengths,
    #[serde(default = "default_specific_short_targets")]
    pub specific_short_targets_allowlist: Vec<String>,
    #[serde(default = "default_vague_target_patterns")]
    pub vague_target_patterns: Vec<String>,
    #[serde(default = "default_truism_problem_patterns")]
    pub truism_problem_patterns: Vec<String>,
    #[serde(default = "default_strong_action_patterns")]
    pub strong_action_patterns: Vec<String>,
    #[serde(default = "default_weak_action_patterns")]
    pub weak_action_patterns: Vec<String>,
    /// Invalid when this many of the three core checks fail.
    #[serde(default = "default_core_fail_threshold")]
    pub core_fail_threshold: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

fn strings(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

fn default_specific_short_targets() -> Vec<String> {
    strings(&[
        r"^의사$",
        r"^간호사$",
        r"^약사$",
        r"^교사$",
        r"^개발자$",
        r"^디자이너$",
        r"^프리랜서$",
        r"^소상공인$",
        r"^직장인$",
        r"^doctors?$",
        r"^nurses?$",
        r"^developers?$",
        r"^freelancers?$",
    ])
}

fn default_vague_target_patterns() -> Vec<String> {
    strings(&[
        r"^모든\s*사람",
        r"^누구나",
        r"^일반인",
        r"^모두$",
        r"^사람들$",
        r"^사용자$",
        r"^고객$",
        r"^everyone$",
        r"^everybody$",
        r"^anyone$",
        r"^all\s*people",
        r"^people$",
        r"^users?$",
        r"^customers?$",
    ])
}

fn default_truism_problem_patterns() -> Vec<String> {
    strings(&[
        r"(건강|행복|성공|자기계발|시간관리|생산성).*(중요하다|필요하다)$",
        r"좋다$",
        r"나쁘다$",
        r"(health|happiness|success|productivity).*(is\s+important|is\s+needed)\.?$",
    ])
}

fn default_strong_action_patterns() -> Vec<String> {
    strings(&[
        r"자동화",
        r"계산",
        r"기록",
        r"분석",
        r"추천",
        r"알림",
        r"예약",
        r"매칭",
        r"\bautomat(e|es|ed|ing|ion|ically)\b",
        r"\bcalculat(e|es|ed|ing|ion)\b",
        r"\btrack(s|ed|ing)?\b",
        r"\banaly(ze|zes|zed|zing|sis)\b",
        r"\brecommend(s|ed|ing|ation)?\b",
        r"\bschedul(e|es|ed|ing)\b",
        r"\bmatch(es|ed|ing)?\b",
    ])
}

fn default_weak_action_patterns() -> Vec<String> {
    strings(&[
        r"하는",
        r"해주는",
        r"돕는",
        r"만드는",
        r"관리",
        r"\bhelps?\b",
        r"\bmakes?\b",
        r"\breduces?\b",
        r"\bmanages?\b",
    ])
}

fn default_core_fail_threshold() -> usize {
    2
}

fn default_min_score() -> f64 {
    0.25
}

impl Default for PregatePolicy {
    fn default() -> Self {
        Self {
            hard_min_lengths: HardMinLengths::default(),
            min_lengths: SoftMinLengths::default(),
            specific_short_targets_allowlist: default_specific_short_targets(),
            vague_target_patterns: default_vague_target_patterns(),
            truism_problem_patterns: default_truism_problem_patterns(),
            strong_action_patterns: default_strong_action_patterns(),
            weak_action_patterns: default_weak_action_patterns(),
            core_fail_threshold: default_core_fail_threshold(),
            min_score: default_min_score(),
        }
    }
}

// ── Checker ───────────────────────────────────────────────────────────

const TOTAL_CHECKS: usize = 4;

const TARGET_SUGGESTION: &str = "Name a concrete customer segment, e.g. 'freelance developers who file their own taxes' instead of 'everyone'.";
const PROBLEM_SUGGESTION: &str = "Describe an observable pain with a situation and a cost, e.g. 'spends two nights every May sorting receipts for the tax return'.";
const ACTION_SUGGESTION: &str = "State what the product does with a concrete verb, e.g. 'automatically calculates and files quarterly taxes'.";
const LENGTH_SUGGESTION: &str = "Expand the short fields into full sentences so the idea can be researched.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailKind {
    Target,
    Problem,
    Action,
    Length,
}

impl FailKind {
    fn is_core(&self) -> bool {
        !matches!(self, Self::Length)
    }

    fn suggestion(&self) -> &'static str {
        match self {
            Self::Target => TARGET_SUGGESTION,
            Self::Problem => PROBLEM_SUGGESTION,
            Self::Action => ACTION_SUGGESTION,
            Self::Length => LENGTH_SUGGESTION,
        }
    }
}

fn compile(patterns: &[String], what: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid {} pattern: {}", what, p))
        })
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// A [`PregatePolicy`] with its patterns compiled.
#[derive(Debug, Clone)]
pub struct PregateChecker {
    policy: PregatePolicy,
    allowlist: Vec<Regex>,
    vague_targets: Vec<Regex>,
    truisms: Vec<Regex>,
    strong_actions: Vec<Regex>,
    weak_actions: Vec<Regex>,
}

static DEFAULT_CHECKER: LazyLock<PregateChecker> = LazyLock::new(|| {
    PregateChecker::new(&PregatePolicy::default()).expect("default pregate policy compiles")
});

/// Check an idea against the default policy.
pub fn check(
    idea_one_liner: &str,
    target_customer: &str,
    problem_statement: &str,
    current_alternatives: &str,
) -> PregateReport {
    DEFAULT_CHECKER.check(
        idea_one_liner,
        target_customer,
        problem_statement,
        current_alternatives,
    )
}

impl PregateChecker {
    pub fn new(policy: &PregatePolicy) -> Result<Self> {
        Ok(Self {
            policy: policy.clone(),
            allowlist: compile(&policy.specific_short_targets_allowlist, "short target allowlist")?,
            vague_targets: compile(&policy.vague_target_patterns, "vague target")?,
            truisms: compile(&policy.truism_problem_patterns, "truism problem")?,
            strong_actions: compile(&policy.strong_action_patterns, "strong action")?,
            weak_actions: compile(&policy.weak_action_patterns, "weak action")?,
        })
    }

    pub fn policy(&self) -> &PregatePolicy {
        &self.policy
    }

    pub fn check(
        &self,
        idea_one_liner: &str,
        target_customer: &str,
        problem_statement: &str,
        current_alternatives: &str,
    ) -> PregateReport {
        let idea = idea_one_liner.trim();
        let target = target_customer.trim();
        let problem = problem_statement.trim();
        let alternatives = current_alternatives.trim();

        let hard = &self.policy.hard_min_lengths;
        let soft = &self.policy.min_lengths;

        let mut fails: Vec<(FailKind, String)> = Vec::new();
        let mut warnings = Vec::new();
        let mut passed = 0usize;

        // Hard minimums: always invalid, independent of the score.
        for (name, value, min) in [
            ("Idea summary", idea, hard.idea_one_liner),
            ("Target customer", target, hard.target_customer),
            ("Problem statement", problem, hard.problem_statement),
        ] {
            let len = value.chars().count();
            if len < min {
                fails.push((
                    FailKind::Length,
                    format!("{} is too short: {} characters (minimum {})", name, len, min),
                ));
            }
        }

        // 1. Target specificity
        let allowlisted = any_match(&self.allowlist, target);
        let vague = any_match(&self.vague_targets, target);
        if !allowlisted && !vague && target.chars().count() < soft.target_customer {
            warnings.push(format!("Target customer is short (be more specific): '{}'", target));
        }
        if vague {
            fails.push((
                FailKind::Target,
                format!("Target customer is non-specific: '{}'", target),
            ));
        } else {
            passed += 1;
        }

        // 2. Problem is not a truism
        let truism = any_match(&self.truisms, problem);
        if !truism && problem.chars().count() < soft.problem_statement {
            warnings.push(format!("Problem statement is short (be more specific): '{}'", problem));
        }
        if truism {
            fails.push((
                FailKind::Problem,
                format!("Problem statement is a truism: '{}'", problem),
            ));
        } else {
            passed += 1;
        }

        // 3. Idea names an action
        let strong = any_match(&self.strong_actions, idea);
        let weak = !strong && any_match(&self.weak_actions, idea);
        if idea.chars().count() < soft.idea_one_liner {
            warnings.push(format!("Idea summary is short (be more specific): '{}'", idea));
        }
        if strong {
            passed += 1;
        } else if weak {
            warnings.push(format!(
                "Idea action is generic (name a more concrete action): '{}'",
                idea
            ));
            passed += 1;
        } else {
            fails.push((
                FailKind::Action,
                format!("Idea has no concrete action: '{}'", idea),
            ));
        }

        // 4. Alternatives (warning only)
        if alternatives.chars().count() < soft.current_alternatives {
            warnings.push("Current alternatives are not specified".to_string());
        } else {
            passed += 1;
        }

        let score = passed as f64 / TOTAL_CHECKS as f64;
        let hard_fail = fails.iter().any(|(kind, _)| !kind.is_core());
        let core_fails = fails.iter().filter(|(kind, _)| kind.is_core()).count();
        let is_valid = !hard_fail
            && core_fails < self.policy.core_fail_threshold
            && score >= self.policy.min_score;

        let mut suggestions: Vec<String> = Vec::new();
        for (kind, _) in &fails {
            let suggestion = kind.suggestion().to_string();
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }

        PregateReport {
            is_valid,
            score,
            fail_reasons: fails.into_iter().map(|(_, reason)| reason).collect(),
            warnings,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concrete() -> PregateReport {
        check(
            "A service that automatically calculates and files freelancer taxes",
            "Freelance developers in Seoul earning under 100M KRW",
            "Every May they spend two nights sorting receipts for the income tax return",
            "Hiring an accountant or filing by hand on Hometax",
        )
    }

    #[test]
    fn test_concrete_input_is_valid_with_full_score() {
        let report = concrete();
        assert!(report.is_valid, "{:?}", report);
        assert_eq!(report.score, 1.0);
        assert!(report.fail_reasons.is_empty());
        assert!(report.suggestions.is_empty());
    }

    #[test]
    fn test_check_is_deterministic() {
        assert_eq!(concrete(), concrete());
        let a = check("App", "everyone", "health is important", "");
        let b = check("App", "everyone", "health is important", "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_three_char_idea_is_hard_fail() {
        let report = check(
            "App",
            "Freelance developers in Seoul",
            "Every May they spend two nights sorting receipts",
            "Accountants",
        );
        assert!(!report.is_valid);
        assert!(report.fail_reasons.iter().any(|r| r.contains("Idea summary is too short")));
        assert!(report.suggestions.iter().any(|s| s.contains("Expand")));
    }

    #[test]
    fn test_vague_target_and_truism_fail_core_threshold() {
        let report = check(
            "An app that helps people be healthier",
            "everyone",
            "Health is important",
            "",
        );
        assert!(!report.is_valid);
        assert_eq!(report.fail_reasons.len(), 2);
        assert_eq!(report.suggestions.len(), 2);
        // weak action passes, alternatives missing
        assert_eq!(report.score, 0.25);
    }

    #[test]
    fn test_single_core_fail_stays_valid() {
        let report = check(
            "A tool that automatically tracks client invoices",
            "everyone",
            "Invoices get lost between email threads and payments are late",
            "Spreadsheets and reminders in the calendar",
        );
        assert!(report.is_valid);
        assert_eq!(report.score, 0.75);
        assert_eq!(report.fail_reasons.len(), 1);
        assert!(report.suggestions[0].contains("customer segment"));
    }

    #[test]
    fn test_short_allowlisted_target_gets_no_warning() {
        let mut policy = PregatePolicy::default();
        policy.min_lengths.target_customer = 20;
        let checker = PregateChecker::new(&policy).unwrap();
        let report = checker.check(
            "Automatically schedules night shifts",
            "Nurses",
            "Shift swaps are negotiated over group chat every week",
            "Paper rosters on the ward wall",
        );
        assert!(report.warnings.iter().all(|w| !w.contains("Target customer is short")));

        let report = checker.check(
            "Automatically schedules night shifts",
            "Ward staff",
            "Shift swaps are negotiated over group chat every week",
            "Paper rosters on the ward wall",
        );
        assert!(report.warnings.iter().any(|w| w.contains("Target customer is short")));
    }

    #[test]
    fn test_weak_action_passes_with_warning() {
        let report = check(
            "A coach that helps managers run better one-on-ones",
            "First-time engineering managers",
            "One-on-ones drift into status updates and reports disengage",
            "Books and ad-hoc advice from peers",
        );
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("generic")));
    }

    #[test]
    fn test_korean_patterns() {
        let report = check(
            "프리랜서 세금 자동화 서비스",
            "모든 사람",
            "건강이 중요하다",
            "",
        );
        assert!(!report.is_valid);
        assert_eq!(report.fail_reasons.len(), 2);
    }

    #[test]
    fn test_lengths_are_counted_in_characters() {
        // 4 Hangul syllables are 12 bytes but only 4 characters.
        let report = check("세금계산", "개발자", "매년 오월 세금 신고", "세무사");
        assert!(report.fail_reasons.iter().any(|r| r.contains("4 characters")));
    }

    #[test]
    fn test_min_score_threshold() {
        let mut policy = PregatePolicy::default();
        policy.min_score = 1.0;
        let checker = PregateChecker::new(&policy).unwrap();
        let report = checker.check(
            "A tool that automatically tracks client invoices",
            "Small design agencies",
            "Invoices get lost between email threads and payments are late",
            "",
        );
        assert_eq!(report.score, 0.75);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let policy = PregatePolicy {
            truism_problem_patterns: vec!["(".to_string()],
            ..Default::default()
        };
        let err = PregateChecker::new(&policy).unwrap_err();
        assert!(format!("{:#}", err).contains("truism"));
    }
}
