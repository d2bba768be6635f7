use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::definition::{FunnelConfig, FunnelDefinition};
use crate::error::FunnelError;
use crate::event::Event;
use crate::journey::{self, EntityJourney};
use crate::matcher::{match_journey, EntityProgression};
use crate::metrics::{StepCounters, StepMetric};
use crate::summary::FunnelSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    /// None of the input events matched a funnel step. The report carries no step metrics.
    NoMatchingEvents,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunnelReport {
    pub status: ReportStatus,
    pub steps: Vec<StepMetric>,
    pub summary: FunnelSummary,
}

impl FunnelReport {
    fn from_counters(counters: StepCounters, definition: &FunnelDefinition) -> Self {
        let total_entities = counters.total_entities();
        let steps = counters.into_metrics(definition);
        let status = if steps.is_empty() {
            ReportStatus::NoMatchingEvents
        } else {
            ReportStatus::Complete
        };
        let summary = FunnelSummary::from_metrics(total_entities, &steps);

        FunnelReport {
            status,
            steps,
            summary,
        }
    }
}

/// Which of an entity's events decides the breakdown bucket it is counted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownAttribution {
    #[default]
    FirstTouch,
    LastTouch,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BreakdownReport {
    pub breakdown: Option<String>,
    #[serde(flatten)]
    pub report: FunnelReport,
}

/// Runs funnel analyses for a single definition.
///
/// Entities are independent of each other, so journeys are built and matched in parallel on
/// the rayon pool. Per-step counters are folded per worker and merged at the end.
#[derive(Debug, Clone)]
pub struct FunnelEngine {
    definition: FunnelDefinition,
}

impl FunnelEngine {
    pub fn new(definition: FunnelDefinition) -> Self {
        FunnelEngine { definition }
    }

    pub fn from_config(config: FunnelConfig) -> Result<Self, FunnelError> {
        Ok(FunnelEngine::new(config.into_definition()?))
    }

    pub fn definition(&self) -> &FunnelDefinition {
        &self.definition
    }

    /// Every entity's progression, keyed by entity id.
    pub fn progressions<'a>(&self, events: &'a [Event]) -> HashMap<&'a str, EntityProgression> {
        journey::group(events, &self.definition)
            .into_par_iter()
            .map(|(entity_id, events)| {
                let journey = EntityJourney::from_unsorted(entity_id, events);
                (entity_id, match_journey(&journey, &self.definition))
            })
            .collect()
    }

    #[instrument(skip_all, fields(steps = self.definition.num_steps(), events = events.len()))]
    pub fn analyze(&self, events: &[Event]) -> FunnelReport {
        let num_steps = self.definition.num_steps();

        let counters = journey::group(events, &self.definition)
            .into_par_iter()
            .map(|(entity_id, events)| {
                match_journey(&EntityJourney::from_unsorted(entity_id, events), &self.definition)
            })
            .fold(
                || StepCounters::new(num_steps),
                |mut counters, progression| {
                    counters.observe(&progression);
                    counters
                },
            )
            .reduce(
                || StepCounters::new(num_steps),
                |mut left, right| {
                    left.merge(&right);
                    left
                },
            );

        let report = FunnelReport::from_counters(counters, &self.definition);
        self.log_report(&report);
        report
    }

    /// Splits entities into buckets by the breakdown value of their first or last funnel event
    /// and reports on each bucket separately. Entities without a value land in the `None` bucket,
    /// which sorts first.
    #[instrument(skip_all, fields(steps = self.definition.num_steps(), events = events.len()))]
    pub fn analyze_by_breakdown(
        &self,
        events: &[Event],
        attribution: BreakdownAttribution,
    ) -> Vec<BreakdownReport> {
        let num_steps = self.definition.num_steps();

        let buckets: BTreeMap<Option<&str>, StepCounters> = journey::group(events, &self.definition)
            .into_par_iter()
            .map(|(entity_id, events)| {
                let journey = EntityJourney::from_unsorted(entity_id, events);
                let touch = match attribution {
                    BreakdownAttribution::FirstTouch => journey.first_event(),
                    BreakdownAttribution::LastTouch => journey.last_event(),
                };
                let breakdown = touch.and_then(|event| event.breakdown.as_deref());
                (breakdown, match_journey(&journey, &self.definition))
            })
            .fold(BTreeMap::new, |mut buckets, (breakdown, progression)| {
                buckets
                    .entry(breakdown)
                    .or_insert_with(|| StepCounters::new(num_steps))
                    .observe(&progression);
                buckets
            })
            .reduce(BTreeMap::new, |mut left, right| {
                for (breakdown, counters) in right {
                    left.entry(breakdown)
                        .or_insert_with(|| StepCounters::new(num_steps))
                        .merge(&counters);
                }
                left
            });

        if buckets.is_empty() {
            tracing::warn!("no events matched any funnel step");
        }
        tracing::info!(buckets = buckets.len(), "computed funnel breakdown");

        buckets
            .into_iter()
            .map(|(breakdown, counters)| BreakdownReport {
                breakdown: breakdown.map(str::to_string),
                report: FunnelReport::from_counters(counters, &self.definition),
            })
            .collect()
    }

    fn log_report(&self, report: &FunnelReport) {
        match report.status {
            ReportStatus::NoMatchingEvents => {
                tracing::warn!(
                    steps = ?self.definition.steps(),
                    "no events matched any funnel step"
                );
            }
            ReportStatus::Complete => {
                tracing::info!(
                    total_entities = report.summary.total_entities,
                    completed = report.summary.entities_completing_funnel,
                    conversion_rate = report.summary.overall_conversion_rate,
                    "computed funnel"
                );
            }
        }
    }
}
