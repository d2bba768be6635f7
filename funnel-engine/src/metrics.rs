use serde::{Deserialize, Serialize};

use crate::definition::FunnelDefinition;
use crate::matcher::EntityProgression;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepMetric {
    pub step_number: usize,
    pub step_name: String,
    pub users_entered: u64,
    pub conversion_rate_overall: f64,
    pub conversion_rate_from_previous: f64,
    pub drop_off_rate: f64,
    pub avg_time_to_next_hours: Option<f64>,
}

/// Per-step partial counts over any subset of entities.
///
/// Counters from disjoint subsets combine with `merge`, which is associative and commutative.
/// Durations are summed as whole milliseconds, so the result does not depend on how the
/// entities were split up or in which order the parts were merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCounters {
    total_entities: u64,
    entered: Vec<u64>,
    // Index i counts entities that reached both step i and step i + 1
    transitions: Vec<u64>,
    transition_millis: Vec<i128>,
}

impl StepCounters {
    pub fn new(num_steps: usize) -> Self {
        let num_transitions = num_steps.saturating_sub(1);
        StepCounters {
            total_entities: 0,
            entered: vec![0; num_steps],
            transitions: vec![0; num_transitions],
            transition_millis: vec![0; num_transitions],
        }
    }

    pub fn total_entities(&self) -> u64 {
        self.total_entities
    }

    pub fn observe(&mut self, progression: &EntityProgression) {
        self.total_entities += 1;

        for (step, entered) in self.entered.iter_mut().enumerate() {
            if progression.has_reached(step) {
                *entered += 1;
            }
        }

        for step in 0..self.transitions.len() {
            if let Some(elapsed) = progression.time_to_next(step) {
                self.transitions[step] += 1;
                self.transition_millis[step] += i128::from(elapsed.num_milliseconds());
            }
        }
    }

    pub fn merge(&mut self, other: &StepCounters) {
        self.total_entities += other.total_entities;
        add_into(&mut self.entered, &other.entered);
        add_into(&mut self.transitions, &other.transitions);
        add_into(&mut self.transition_millis, &other.transition_millis);
    }

    /// Turns the counts into one metric per step. Nothing is rounded until here.
    pub fn into_metrics(self, definition: &FunnelDefinition) -> Vec<StepMetric> {
        if self.total_entities == 0 {
            return vec![];
        }

        let total = self.total_entities as f64;

        definition
            .steps()
            .iter()
            .enumerate()
            .map(|(step, step_name)| {
                let users_entered = self.entered.get(step).copied().unwrap_or(0);

                let conversion_rate_from_previous = match step {
                    0 => 100.0,
                    _ => percentage(users_entered, self.entered[step - 1]),
                };
                let drop_off_rate = match step {
                    0 => 0.0,
                    _ => 100.0 - conversion_rate_from_previous,
                };

                let avg_time_to_next_hours = match (
                    self.transitions.get(step),
                    self.transition_millis.get(step),
                ) {
                    (Some(&count), Some(&millis)) if count > 0 => {
                        Some(round(millis as f64 / count as f64 / MILLIS_PER_HOUR))
                    }
                    _ => None,
                };

                StepMetric {
                    step_number: step + 1,
                    step_name: step_name.clone(),
                    users_entered,
                    conversion_rate_overall: round(users_entered as f64 / total * 100.0),
                    conversion_rate_from_previous: round(conversion_rate_from_previous),
                    drop_off_rate: round(drop_off_rate),
                    avg_time_to_next_hours,
                }
            })
            .collect()
    }
}

fn add_into<T: Copy + std::ops::AddAssign>(into: &mut [T], from: &[T]) {
    for (a, b) in into.iter_mut().zip(from) {
        *a += *b;
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Rounds to 2 decimal places.
pub fn round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reduces every entity's progression into per-step metrics, in step order.
/// Returns no metrics when there are no entities.
pub fn aggregate<'a, I>(progressions: I, definition: &FunnelDefinition) -> Vec<StepMetric>
where
    I: IntoIterator<Item = &'a EntityProgression>,
{
    let mut counters = StepCounters::new(definition.num_steps());
    for progression in progressions {
        counters.observe(progression);
    }
    counters.into_metrics(definition)
}
