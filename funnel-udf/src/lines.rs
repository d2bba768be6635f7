use std::io::{self, BufRead, Write};

use funnel_engine::{
    BreakdownAttribution, Event, FunnelConfig, FunnelEngine, FunnelError, WindowSpec,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// One funnel request, as it arrives on a single input line.
#[derive(Deserialize)]
pub struct Args {
    pub definition: FunnelConfig,
    pub events: Vec<Event>,
    #[serde(default)]
    pub breakdown_attribution: Option<BreakdownAttribution>,
}

#[derive(Error, Debug)]
pub enum LineError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),
    #[error("invalid funnel definition: {0}")]
    InvalidDefinition(#[from] FunnelError),
}

/// Answers a single request line. Failures are reported in the response instead of
/// stopping the caller, so one bad funnel does not take down the rest of the batch.
pub fn process_line(line: &str, default_window: &WindowSpec) -> Value {
    match run(line, default_window) {
        Ok(result) => json!({ "result": result }),
        Err(e) => {
            tracing::warn!("failed to process funnel request: {}", e);
            json!({ "error": e.to_string() })
        }
    }
}

fn run(line: &str, default_window: &WindowSpec) -> Result<Value, LineError> {
    let args: Args = serde_json::from_str(line)?;
    let engine =
        FunnelEngine::from_config(args.definition.with_default_window(default_window.clone()))?;

    let result = match args.breakdown_attribution {
        Some(attribution) => json!(engine.analyze_by_breakdown(&args.events, attribution)),
        None => json!(engine.analyze(&args.events)),
    };
    Ok(result)
}

/// Reads requests line by line and writes one response line for each, flushing as it goes.
/// Returns how many requests were answered.
pub fn serve<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    default_window: &WindowSpec,
) -> io::Result<usize> {
    let mut answered = 0;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        writeln!(output, "{}", process_line(&line, default_window))?;
        output.flush()?;
        answered += 1;
    }

    Ok(answered)
}
