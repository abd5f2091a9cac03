mod replay;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{stdout, BufWriter, Write};
use std::path::PathBuf;

use replay::{load_events, replay};
use report::Report;
use runledger_core::aggregate;

#[derive(Debug, Parser)]
#[command(name = "runledger", version)]
#[command(about = "Replays a raw gameplay event log into run records and statistics")]
struct Args {
    /// Event log to replay, one JSON event per line
    log: PathBuf,

    /// Trust server identifiers for same-instance detection
    #[arg(long)]
    live: bool,

    /// Force-finalize a trailing open run at the log's last event
    #[arg(long)]
    flush: bool,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["console", "json"])]
    report: String,

    /// Reference currency price used for loot conversion
    #[arg(long, default_value_t = 0.0)]
    reference_price: f64,

    /// Optional path to write the report instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let events = load_events(&args.log)?;
    if events.is_empty() {
        println!("{}", "no events in log; nothing to do".yellow());
        return Ok(());
    }

    let outcome = replay(events, args.live, args.flush).await?;
    if outcome.open_run {
        println!(
            "{}",
            "one run is still open; pass --flush to finalize it".yellow()
        );
    }

    let stats = aggregate(&outcome.records, &[], args.reference_price);
    let mut out = output_writer(args.output.as_deref())?;
    match args.report.as_str() {
        "json" => report::write_json(
            out.as_mut(),
            &Report {
                runs: &outcome.summaries,
                statistics: &stats,
            },
        )?,
        _ => report::write_console(out.as_mut(), &outcome.summaries, &stats)?,
    }
    out.flush()?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn output_writer(path: Option<&std::path::Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating report file {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(stdout().lock()),
    })
}
