//! Console and JSON report rendering.

use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use runledger_core::{RunSummary, Statistics};

/// Serializable body of the JSON report.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report<'a> {
    pub runs: &'a [RunSummary],
    pub statistics: &'a Statistics,
}

pub fn write_json(out: &mut dyn Write, report: &Report<'_>) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_console(
    out: &mut dyn Write,
    summaries: &[RunSummary],
    stats: &Statistics,
) -> Result<()> {
    writeln!(out, "{}", "📜 Run Report".bright_cyan().bold())?;
    writeln!(out, "{}", "=".repeat(40).cyan())?;

    for summary in summaries {
        let elapsed = summary
            .last_event
            .signed_duration_since(summary.first_event)
            .num_seconds()
            .max(0);
        let mut line = format!(
            "  {:28} {:>6}s  {:>8.1}c",
            summary.name, elapsed, summary.gained
        );
        if let Some(kills) = summary.kill_count {
            line.push_str(&format!("  {kills} kills"));
        }
        if let Some(xp) = summary.experience_delta {
            line.push_str(&format!("  {xp:+} xp"));
        }
        writeln!(out, "{line}")?;
    }

    writeln!(out)?;
    writeln!(out, "{}", "Totals".bright_yellow().bold())?;
    writeln!(out, "{}", "-".repeat(40).yellow())?;
    writeln!(out, "  runs:        {}", stats.runs)?;
    writeln!(out, "  deaths:      {}", stats.misc.deaths)?;
    writeln!(out, "  kills:       {}", stats.misc.kills)?;
    writeln!(out, "  xp gained:   {}", stats.misc.experience_gained)?;

    for (area_type, bucket) in &stats.areas {
        writeln!(
            out,
            "  {:12} {:>4} runs  {:>8.1}c  {:>8.1} c/h",
            area_type.label(),
            bucket.count,
            bucket.gained,
            bucket.profit_per_hour
        )?;
    }

    let boss_entries = stats
        .bosses
        .conquerors
        .iter()
        .chain(&stats.bosses.shaper)
        .chain(&stats.bosses.sirus)
        .chain(&stats.bosses.maven);
    let mut wrote_boss_header = false;
    for (boss, tally) in boss_entries {
        if !wrote_boss_header {
            writeln!(out)?;
            writeln!(out, "{}", "Bosses".bright_yellow().bold())?;
            writeln!(out, "{}", "-".repeat(40).yellow())?;
            wrote_boss_header = true;
        }
        let fastest = tally
            .fastest
            .map_or_else(|| "-".to_string(), |f| format!("{f}s"));
        writeln!(
            out,
            "  {:32} x{:<3} fastest {:>6}  deaths {}",
            boss, tally.count, fastest, tally.deaths
        )?;
    }

    Ok(())
}
