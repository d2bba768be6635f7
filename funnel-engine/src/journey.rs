use std::collections::HashMap;

use itertools::Itertools;

use crate::definition::FunnelDefinition;
use crate::event::Event;

/// An event that matched one of the funnel steps, tagged with that step's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JourneyEvent<'a> {
    pub step: usize,
    pub event: &'a Event,
}

/// The funnel-relevant events of one entity, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityJourney<'a> {
    pub entity_id: &'a str,
    pub events: Vec<JourneyEvent<'a>>,
}

impl<'a> EntityJourney<'a> {
    /// Sorts by timestamp. The sort is stable: events sharing a timestamp keep their input order,
    /// which decides which of them counts as the first occurrence.
    pub fn from_unsorted(entity_id: &'a str, mut events: Vec<JourneyEvent<'a>>) -> Self {
        events.sort_by_key(|e| e.event.timestamp);
        EntityJourney { entity_id, events }
    }

    pub fn first_event(&self) -> Option<&'a Event> {
        self.events.first().map(|e| e.event)
    }

    pub fn last_event(&self) -> Option<&'a Event> {
        self.events.last().map(|e| e.event)
    }
}

/// Groups funnel-relevant events by entity without sorting them.
/// Within a group, events keep the order they came in.
pub fn group<'a, I>(
    events: I,
    definition: &FunnelDefinition,
) -> HashMap<&'a str, Vec<JourneyEvent<'a>>>
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .filter_map(|event| {
            definition
                .step_index(&event.event_name)
                .map(|step| JourneyEvent { step, event })
        })
        .into_group_map_by(|e| e.event.entity_id.as_str())
}

/// Builds one sorted journey per entity that has at least one funnel-relevant event.
pub fn build<'a, I>(events: I, definition: &FunnelDefinition) -> HashMap<&'a str, EntityJourney<'a>>
where
    I: IntoIterator<Item = &'a Event>,
{
    group(events, definition)
        .into_iter()
        .map(|(entity_id, events)| (entity_id, EntityJourney::from_unsorted(entity_id, events)))
        .collect()
}
