//! Output formatting - ASCII only

use ladder_common::{LadderTable, PhaseState};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::collections::BTreeMap;

pub const SEPARATOR: &str = "----------------------------------------";

/// Snapshot printed by `ladderctl status`
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub total: i64,
    pub watermark: i64,
    pub ledger_sum: i64,
    pub state: PhaseState,
    pub credits: BTreeMap<String, String>,
    pub last_notified_ms: Option<String>,
}

pub fn print_status(report: &StatusReport) {
    let state = &report.state;
    println!();
    println!("{}", "[LADDER STATUS]".bold());
    println!("{}", SEPARATOR.dimmed());
    println!("  Total XP:     {}", report.total.to_string().bright_green());
    println!("  Phase:        {} (#{})", state.phase.cyan(), state.phase_index + 1);
    println!(
        "  Level:        {} (level {})",
        state.level.cyan(),
        state.level_number()
    );
    if state.terminal {
        println!("  Progress:     {}", "complete".bright_green());
    } else {
        println!(
            "  Progress:     {:.1}% ({} to next, level starts at {})",
            state.percent, state.remaining, state.level_start_total
        );
    }

    let pending = report.ledger_sum.saturating_sub(report.watermark);
    let pending = if pending > 0 {
        format!("{} pending", pending).yellow().to_string()
    } else {
        "in sync".green().to_string()
    };
    println!(
        "  Ledger:       sum {} / watermark {} ({})",
        report.ledger_sum, report.watermark, pending
    );
    match &report.last_notified_ms {
        Some(ms) => println!("  Last notify:  {}", ms),
        None => println!("  Last notify:  {}", "never".dimmed()),
    }

    if !report.credits.is_empty() {
        println!();
        println!("{}", "[CREDITS]".bold());
        for (field, xp) in &report.credits {
            println!("  {:<24} {}", field, xp);
        }
    }
    println!();
}

pub fn print_ladder(ladder: &LadderTable) {
    println!();
    println!("{}", "[LADDER]".bold());
    println!("{}", SEPARATOR.dimmed());
    for phase in ladder.phases() {
        if let Some(span) = ladder.phase_span(&phase.name) {
            println!(
                "{} {}",
                phase.name.cyan().bold(),
                format!("[{} .. {})", span.start, span.end).dimmed()
            );
        }
        for level in &phase.levels {
            if let Some(span) = ladder.level_span(&phase.name, &level.name) {
                println!(
                    "  {:<20} cost {:>8}  [{} .. {})",
                    level.name, level.cost, span.start, span.end
                );
            }
        }
    }
    println!("{}", SEPARATOR.dimmed());
    println!("  Total: {} XP", ladder.total_cost());
    println!();
}

pub fn ok(message: &str) {
    println!("[OK] {}", message.bright_green());
}

pub fn note(message: &str) {
    println!("[NOTE] {}", message.yellow());
}

pub fn warn(message: &str) {
    println!("[WARNING] {}", message.bright_red());
}

pub fn display_error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}
