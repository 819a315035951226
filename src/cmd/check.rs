//! Offline specificity check: `gap-foundry check <input.json>`.

use std::path::Path;

use anyhow::{Context, Result};
use gap_foundry::config::AppConfig;
use gap_foundry::pregate::PregateChecker;
use gap_foundry::validation::models::RunInput;

/// Exit code for input rejected by the gate.
pub const EXIT_PREGATE_FAILED: i32 = 3;

/// Print the gate report as JSON. Returns whether the input passed.
pub fn cmd_check(config: &AppConfig, input_path: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read input file: {}", input_path.display()))?;
    let input: RunInput = serde_json::from_str(&content)
        .with_context(|| format!("Invalid input JSON in {}", input_path.display()))?;

    let checker = PregateChecker::new(&config.pregate)?;
    let report = checker.check(
        &input.idea_one_liner,
        &input.target_customer,
        &input.problem_statement,
        &input.current_alternatives,
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize pregate report")?
    );

    if report.is_valid {
        eprintln!(
            "{} score {:.2}",
            console::style("PASS").green().bold(),
            report.score
        );
    } else {
        eprintln!(
            "{} score {:.2}",
            console::style("REJECTED").red().bold(),
            report.score
        );
        for reason in &report.fail_reasons {
            eprintln!("  {} {}", console::style("✗").red(), reason);
        }
        for suggestion in &report.suggestions {
            eprintln!("  {} {}", console::style("→").cyan(), suggestion);
        }
    }
    for warning in &report.warnings {
        eprintln!("  {} {}", console::style("⚠").yellow(), warning);
    }

    Ok(report.is_valid)
}
