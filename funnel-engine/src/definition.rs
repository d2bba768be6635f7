use std::collections::HashMap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::FunnelError;

pub const DEFAULT_CONVERSION_WINDOW: &str = "24h";

/// How steps relate to each other, resolved once from the `sequential` and `allow_skip` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelMode {
    /// A step counts only if the previous step was reached, within the conversion window.
    Sequential,
    /// No predecessor is required, but when the previous step was reached the window applies.
    Windowed,
    /// Every step counts at its first occurrence, independent of its neighbours.
    SkipAllowed,
}

impl FunnelMode {
    pub fn from_flags(sequential: bool, allow_skip: bool) -> Self {
        match (sequential, allow_skip) {
            (true, _) => FunnelMode::Sequential,
            (false, false) => FunnelMode::Windowed,
            (false, true) => FunnelMode::SkipAllowed,
        }
    }
}

/// Which occurrence of a step event is tested against the conversion window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Only the earliest occurrence of the step is ever tested. Later duplicates are ignored,
    /// even if one of them would fall inside the window.
    #[default]
    FirstOccurrence,
    /// Every occurrence of the previous step that qualified can anchor the window, and the
    /// earliest occurrence landing inside the window of one of them counts.
    AnyWithinWindow,
}

#[derive(Debug, Clone)]
pub struct FunnelDefinition {
    steps: Vec<String>,
    step_indexes: HashMap<String, usize>,
    conversion_window: TimeDelta,
    mode: FunnelMode,
    match_policy: MatchPolicy,
}

impl FunnelDefinition {
    pub fn new(
        steps: Vec<String>,
        conversion_window: TimeDelta,
        sequential: bool,
        allow_skip: bool,
    ) -> Result<Self, FunnelError> {
        if steps.len() < 2 {
            return Err(FunnelError::TooFewSteps(steps.len()));
        }

        if conversion_window <= TimeDelta::zero() {
            return Err(FunnelError::NonPositiveWindow(conversion_window.num_milliseconds()));
        }

        let mut step_indexes = HashMap::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            if step_indexes.insert(step.clone(), index).is_some() {
                return Err(FunnelError::DuplicateStep(step.clone()));
            }
        }

        Ok(FunnelDefinition {
            steps,
            step_indexes,
            conversion_window,
            mode: FunnelMode::from_flags(sequential, allow_skip),
            match_policy: MatchPolicy::default(),
        })
    }

    pub fn with_match_policy(mut self, match_policy: MatchPolicy) -> Self {
        self.match_policy = match_policy;
        self
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Position of `event_name` in the funnel, if it is one of the steps.
    pub fn step_index(&self, event_name: &str) -> Option<usize> {
        self.step_indexes.get(event_name).copied()
    }

    pub fn conversion_window(&self) -> TimeDelta {
        self.conversion_window
    }

    pub fn mode(&self) -> FunnelMode {
        self.mode
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }
}

/// A conversion window as it shows up in configuration: either a number of seconds
/// or a string with a unit suffix, like "90m" or "7d".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WindowSpec {
    Seconds(i64),
    Text(String),
}

impl WindowSpec {
    pub fn to_duration(&self) -> Result<TimeDelta, FunnelError> {
        match self {
            WindowSpec::Seconds(seconds) => TimeDelta::try_seconds(*seconds)
                .ok_or_else(|| FunnelError::InvalidWindow(seconds.to_string())),
            WindowSpec::Text(text) => parse_window(text),
        }
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec::Text(DEFAULT_CONVERSION_WINDOW.to_string())
    }
}

fn default_sequential() -> bool {
    true
}

/// The user-facing funnel options. Validated into a `FunnelDefinition`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FunnelConfig {
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window: Option<WindowSpec>,
    #[serde(default = "default_sequential")]
    pub sequential: bool,
    #[serde(default)]
    pub allow_skip: bool,
    #[serde(default)]
    pub match_policy: MatchPolicy,
}

impl FunnelConfig {
    pub fn new(steps: Vec<String>) -> Self {
        FunnelConfig {
            steps,
            conversion_window: None,
            sequential: default_sequential(),
            allow_skip: false,
            match_policy: MatchPolicy::default(),
        }
    }

    /// Fills in the conversion window if the config did not set one.
    pub fn with_default_window(mut self, window: WindowSpec) -> Self {
        self.conversion_window.get_or_insert(window);
        self
    }

    pub fn into_definition(self) -> Result<FunnelDefinition, FunnelError> {
        let window = self.conversion_window.unwrap_or_default().to_duration()?;
        Ok(
            FunnelDefinition::new(self.steps, window, self.sequential, self.allow_skip)?
                .with_match_policy(self.match_policy),
        )
    }
}

/// Parses durations such as "3600", "3600s", "90m", "24h", "7d" or "2w".
/// A bare number is read as seconds.
pub fn parse_window(text: &str) -> Result<TimeDelta, FunnelError> {
    let invalid = || FunnelError::InvalidWindow(text.to_string());

    let trimmed = text.trim();
    let split_at = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (amount, unit) = trimmed.split_at(split_at);

    let amount: i64 = amount.trim().parse().map_err(|_| invalid())?;
    let seconds_per_unit: i64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "seconds" => 1,
        "m" | "min" | "mins" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hours" => 60 * 60,
        "d" | "day" | "days" => 24 * 60 * 60,
        "w" | "week" | "weeks" => 7 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(invalid)
}
