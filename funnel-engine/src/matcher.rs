use chrono::{DateTime, TimeDelta, Utc};

use crate::definition::{FunnelDefinition, FunnelMode, MatchPolicy};
use crate::journey::EntityJourney;

/// When an entity reached each step, if it did. Indexes are 0-based step positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityProgression {
    reached: Vec<Option<DateTime<Utc>>>,
    // Occurrence of the previous step whose window admitted each step, when a window applied
    admitted_by: Vec<Option<DateTime<Utc>>>,
}

impl EntityProgression {
    pub fn reached_at(&self, step: usize) -> Option<DateTime<Utc>> {
        self.reached.get(step).copied().flatten()
    }

    pub fn has_reached(&self, step: usize) -> bool {
        self.reached_at(step).is_some()
    }

    pub fn reached_steps(&self) -> impl Iterator<Item = (usize, DateTime<Utc>)> + '_ {
        self.reached
            .iter()
            .enumerate()
            .filter_map(|(step, reached)| reached.map(|timestamp| (step, timestamp)))
    }

    /// The furthest step reached, 0-based.
    pub fn furthest_step(&self) -> Option<usize> {
        self.reached.iter().rposition(Option::is_some)
    }

    /// Time it took to get from `step` to `step + 1`, when both were reached.
    ///
    /// Measured from the occurrence of `step` that opened the window `step + 1` landed in. Without
    /// a window check that is the recorded time of `step`.
    pub fn time_to_next(&self, step: usize) -> Option<TimeDelta> {
        let from = self.reached_at(step)?;
        let to = self.reached_at(step + 1)?;
        let from = self
            .admitted_by
            .get(step + 1)
            .copied()
            .flatten()
            .unwrap_or(from);
        Some(to - from)
    }
}

/// A qualifying occurrence of a step, with the previous-step occurrence that admitted it.
#[derive(Debug, Clone, Copy)]
struct Hit {
    at: DateTime<Utc>,
    anchor: Option<DateTime<Utc>>,
}

impl Hit {
    fn unanchored(at: DateTime<Utc>) -> Self {
        Hit { at, anchor: None }
    }
}

/// Walks the funnel steps in order for a single entity.
///
/// Step 0 is reached at its first occurrence. For every later step the outcome depends on the
/// already-decided state of the step before it, so steps cannot be evaluated out of order:
///
/// - `Sequential`: the previous step must have been reached, and the candidate must land
///   within the conversion window of it.
/// - `Windowed`: if the previous step was reached the window applies, otherwise the step
///   is reached at its first occurrence.
/// - `SkipAllowed`: every step is reached at its first occurrence.
///
/// With `MatchPolicy::AnyWithinWindow` every qualifying occurrence of a step can anchor the
/// window of the next one, and the earliest qualifying occurrence is recorded.
pub fn match_journey(journey: &EntityJourney, definition: &FunnelDefinition) -> EntityProgression {
    let num_steps = definition.num_steps();

    let mut occurrences: Vec<Vec<DateTime<Utc>>> = vec![Vec::new(); num_steps];
    for journey_event in &journey.events {
        occurrences[journey_event.step].push(journey_event.event.timestamp);
    }

    let mut reached = Vec::with_capacity(num_steps);
    let mut admitted_by = Vec::with_capacity(num_steps);
    // Occurrences of the previous step that the next step is windowed against
    let mut anchors: Vec<DateTime<Utc>> = Vec::new();

    for (step, candidates) in occurrences.into_iter().enumerate() {
        let hits = match (definition.mode(), step) {
            (_, 0) | (FunnelMode::SkipAllowed, _) => {
                candidates.into_iter().map(Hit::unanchored).collect()
            }
            (FunnelMode::Sequential, _) if anchors.is_empty() => vec![],
            (FunnelMode::Windowed, _) if anchors.is_empty() => {
                candidates.into_iter().map(Hit::unanchored).collect()
            }
            _ => within_window(candidates, &anchors, definition),
        };

        let first = hits.first().copied();
        anchors = match definition.match_policy() {
            MatchPolicy::FirstOccurrence => first.map(|hit| hit.at).into_iter().collect(),
            MatchPolicy::AnyWithinWindow => hits.iter().map(|hit| hit.at).collect(),
        };
        reached.push(first.map(|hit| hit.at));
        admitted_by.push(first.and_then(|hit| hit.anchor));
    }

    EntityProgression {
        reached,
        admitted_by,
    }
}

/// Candidates are sorted oldest first, and so are anchors.
fn within_window(
    candidates: Vec<DateTime<Utc>>,
    anchors: &[DateTime<Utc>],
    definition: &FunnelDefinition,
) -> Vec<Hit> {
    let window = definition.conversion_window();

    match definition.match_policy() {
        // Only the earliest candidate is tested, even when it came before the previous step
        MatchPolicy::FirstOccurrence => {
            let (Some(&at), Some(&anchor)) = (candidates.first(), anchors.first()) else {
                return vec![];
            };
            if at - anchor <= window {
                vec![Hit {
                    at,
                    anchor: Some(anchor),
                }]
            } else {
                vec![]
            }
        }
        MatchPolicy::AnyWithinWindow => {
            let mut anchors = anchors.iter().copied().peekable();
            candidates
                .into_iter()
                .filter_map(|at| {
                    // Anchors too old for this candidate are too old for every later one as well
                    while anchors.next_if(|&anchor| at - anchor > window).is_some() {}
                    anchors
                        .peek()
                        .copied()
                        .filter(|&anchor| anchor <= at)
                        .map(|anchor| Hit {
                            at,
                            anchor: Some(anchor),
                        })
                })
                .collect()
        }
    }
}
