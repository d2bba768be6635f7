use serde::{Deserialize, Serialize};

use crate::metrics::StepMetric;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DropOff {
    pub step_number: usize,
    pub step_name: String,
    pub drop_off_rate: f64,
}

/// Headline numbers for a funnel run, meant for reporting sinks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FunnelSummary {
    pub total_entities: u64,
    pub entities_completing_funnel: u64,
    pub overall_conversion_rate: f64,
    pub largest_drop_off: Option<DropOff>,
}

impl FunnelSummary {
    pub fn from_metrics(total_entities: u64, metrics: &[StepMetric]) -> Self {
        let Some(last) = metrics.last() else {
            return FunnelSummary {
                total_entities,
                ..Default::default()
            };
        };

        // Earliest step wins ties
        let largest_drop_off = metrics
            .iter()
            .filter(|metric| metric.drop_off_rate > 0.0)
            .fold(None::<&StepMetric>, |largest, metric| match largest {
                Some(largest) if largest.drop_off_rate >= metric.drop_off_rate => Some(largest),
                _ => Some(metric),
            })
            .map(|metric| DropOff {
                step_number: metric.step_number,
                step_name: metric.step_name.clone(),
                drop_off_rate: metric.drop_off_rate,
            });

        FunnelSummary {
            total_entities,
            entities_completing_funnel: last.users_entered,
            overall_conversion_rate: last.conversion_rate_overall,
            largest_drop_off,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(step_number: usize, users_entered: u64, drop_off_rate: f64) -> StepMetric {
        StepMetric {
            step_number,
            step_name: format!("step_{step_number}"),
            users_entered,
            conversion_rate_overall: users_entered as f64 * 10.0,
            conversion_rate_from_previous: 100.0 - drop_off_rate,
            drop_off_rate,
            avg_time_to_next_hours: None,
        }
    }

    #[test]
    fn test_summary_uses_the_last_step() {
        let metrics = vec![metric(1, 10, 0.0), metric(2, 6, 40.0), metric(3, 3, 50.0)];

        let summary = FunnelSummary::from_metrics(10, &metrics);

        assert_eq!(summary.total_entities, 10);
        assert_eq!(summary.entities_completing_funnel, 3);
        assert_eq!(summary.overall_conversion_rate, 30.0);
        assert_eq!(
            summary.largest_drop_off,
            Some(DropOff {
                step_number: 3,
                step_name: "step_3".to_string(),
                drop_off_rate: 50.0,
            })
        );
    }

    #[test]
    fn test_largest_drop_off_ties_go_to_the_earliest_step() {
        let metrics = vec![metric(1, 8, 0.0), metric(2, 4, 50.0), metric(3, 2, 50.0)];

        let summary = FunnelSummary::from_metrics(8, &metrics);

        assert_eq!(summary.largest_drop_off.unwrap().step_number, 2);
    }

    #[test]
    fn test_no_drop_off() {
        let metrics = vec![metric(1, 5, 0.0), metric(2, 5, 0.0)];

        let summary = FunnelSummary::from_metrics(5, &metrics);

        assert_eq!(summary.entities_completing_funnel, 5);
        assert_eq!(summary.largest_drop_off, None);
    }

    #[test]
    fn test_empty_metrics() {
        let summary = FunnelSummary::from_metrics(0, &[]);
        assert_eq!(summary, FunnelSummary::default());
    }
}
