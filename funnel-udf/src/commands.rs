use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use funnel_engine::{BreakdownAttribution, FunnelConfig, FunnelEngine, MatchPolicy, WindowSpec};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::ingest::{self, ColumnOverrides};
use crate::lines;

#[derive(Parser)]
#[command(version, about = "Funnel conversion analysis over event streams", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one funnel over a file of JSON-lines events and print the report
    Analyze(AnalyzeArgs),

    /// Answer one JSON funnel request per stdin line with one JSON result per stdout line
    Lines,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Attribution {
    FirstTouch,
    LastTouch,
}

impl From<Attribution> for BreakdownAttribution {
    fn from(attribution: Attribution) -> Self {
        match attribution {
            Attribution::FirstTouch => BreakdownAttribution::FirstTouch,
            Attribution::LastTouch => BreakdownAttribution::LastTouch,
        }
    }
}

#[derive(clap::Args)]
pub struct AnalyzeArgs {
    /// JSON-lines file with one event per line, "-" reads from stdin
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// The funnel steps in order, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    steps: Vec<String>,

    /// Maximum time between adjacent steps, like "24h", "90m" or "3600". Defaults to
    /// FUNNEL_DEFAULT_CONVERSION_WINDOW
    #[arg(short, long)]
    window: Option<String>,

    /// Let steps count without the previous step having been reached
    #[arg(long, default_value = "false")]
    non_sequential: bool,

    /// Count every step at its first occurrence, ignoring its neighbours. Only applies
    /// together with --non-sequential
    #[arg(long, default_value = "false")]
    allow_skip: bool,

    /// Test every occurrence of a step against the window, not only the first one
    #[arg(long, default_value = "false")]
    any_within_window: bool,

    /// Column holding the entity id, auto-detected if not set
    #[arg(long)]
    entity_column: Option<String>,

    /// Column holding the event name, auto-detected if not set
    #[arg(long)]
    event_column: Option<String>,

    /// Column holding the event timestamp, auto-detected if not set
    #[arg(long)]
    timestamp_column: Option<String>,

    /// Column to break the funnel down by
    #[arg(long)]
    breakdown_column: Option<String>,

    /// Which event of an entity decides its breakdown value
    #[arg(long, value_enum, requires = "breakdown_column")]
    breakdown_attribution: Option<Attribution>,

    /// Pretty-print the JSON report
    #[arg(long, default_value = "false")]
    pretty: bool,
}

impl AnalyzeArgs {
    fn funnel_config(&self, config: &Config) -> Result<FunnelConfig> {
        let window = match &self.window {
            Some(window) => WindowSpec::Text(window.clone()),
            None => config.default_window()?,
        };

        Ok(FunnelConfig {
            steps: self.steps.clone(),
            conversion_window: Some(window),
            sequential: !self.non_sequential,
            allow_skip: self.allow_skip,
            match_policy: if self.any_within_window {
                MatchPolicy::AnyWithinWindow
            } else {
                MatchPolicy::FirstOccurrence
            },
        })
    }

    fn column_overrides(&self) -> ColumnOverrides {
        ColumnOverrides {
            entity: self.entity_column.clone(),
            event: self.event_column.clone(),
            timestamp: self.timestamp_column.clone(),
            breakdown: self.breakdown_column.clone(),
        }
    }
}

impl Cli {
    pub fn run(config: &Config) -> Result<()> {
        let command = Cli::parse();

        match &command.command {
            Commands::Analyze(args) => analyze(args, config),
            Commands::Lines => {
                let default_window = config.default_window()?;
                let answered =
                    lines::serve(io::stdin().lock(), io::stdout().lock(), &default_window)
                        .context("failed to serve funnel requests")?;
                info!(answered, "finished answering funnel requests");
                Ok(())
            }
        }
    }
}

fn analyze(args: &AnalyzeArgs, config: &Config) -> Result<()> {
    let engine = FunnelEngine::from_config(args.funnel_config(config)?)
        .context("invalid funnel definition")?;

    let reader: Box<dyn BufRead> = if args.input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open {}", args.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let ingested = ingest::read_events(reader, &args.column_overrides())?;

    let report: Value = match args.breakdown_attribution {
        Some(attribution) => {
            serde_json::to_value(engine.analyze_by_breakdown(&ingested.events, attribution.into()))?
        }
        None if args.breakdown_column.is_some() => serde_json::to_value(
            engine.analyze_by_breakdown(&ingested.events, BreakdownAttribution::default()),
        )?,
        None => serde_json::to_value(engine.analyze(&ingested.events))?,
    };

    let mut stdout = io::stdout().lock();
    if args.pretty {
        serde_json::to_writer_pretty(&mut stdout, &report)?;
    } else {
        serde_json::to_writer(&mut stdout, &report)?;
    }
    writeln!(stdout)?;

    Ok(())
}
