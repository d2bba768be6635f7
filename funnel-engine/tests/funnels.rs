use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use funnel_engine::{
    journey, matcher, metrics, Event, FunnelConfig, FunnelDefinition, FunnelEngine, MatchPolicy,
    ReportStatus, WindowSpec,
};
use rstest::rstest;

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + TimeDelta::minutes(minutes)
}

fn hours(h: i64) -> i64 {
    h * 60
}

fn config(steps: &[&str], window: &str, sequential: bool, allow_skip: bool) -> FunnelConfig {
    FunnelConfig {
        steps: steps.iter().map(|s| s.to_string()).collect(),
        conversion_window: Some(WindowSpec::Text(window.to_string())),
        sequential,
        allow_skip,
        match_policy: MatchPolicy::FirstOccurrence,
    }
}

fn checkout_engine() -> FunnelEngine {
    FunnelEngine::from_config(config(&["view", "cart", "purchase"], "24h", true, false)).unwrap()
}

fn checkout_events() -> Vec<Event> {
    vec![
        Event::new("U1", "view", at(0)),
        Event::new("U1", "cart", at(hours(1))),
        Event::new("U1", "purchase", at(hours(2))),
        Event::new("U2", "view", at(0)),
        Event::new("U2", "cart", at(hours(1))),
        Event::new("U3", "view", at(0)),
    ]
}

/// A mixed bag of entities that exercises windows, gaps, duplicates and noise.
fn noisy_events() -> Vec<Event> {
    let mut events = checkout_events();
    events.extend([
        Event::new("U4", "cart", at(5)),
        Event::new("U4", "purchase", at(10)),
        Event::new("U5", "view", at(0)),
        Event::new("U5", "cart", at(hours(30))),
        Event::new("U5", "purchase", at(hours(31))),
        Event::new("U6", "purchase", at(0)),
        Event::new("U6", "view", at(1)),
        Event::new("U6", "cart", at(2)),
        Event::new("U7", "view", at(0)),
        Event::new("U7", "view", at(3)),
        Event::new("U7", "pageleave", at(4)),
        Event::new("U7", "cart", at(hours(3))),
        Event::new("U8", "signup", at(0)),
    ]);
    events
}

#[test]
fn checkout_funnel_metrics() {
    let engine = checkout_engine();

    let report = engine.analyze(&checkout_events());

    assert_eq!(report.status, ReportStatus::Complete);

    let users: Vec<_> = report.steps.iter().map(|s| s.users_entered).collect();
    let overall: Vec<_> = report.steps.iter().map(|s| s.conversion_rate_overall).collect();
    let from_previous: Vec<_> = report
        .steps
        .iter()
        .map(|s| s.conversion_rate_from_previous)
        .collect();
    let drop_off: Vec<_> = report.steps.iter().map(|s| s.drop_off_rate).collect();
    let avg_hours: Vec<_> = report.steps.iter().map(|s| s.avg_time_to_next_hours).collect();

    assert_eq!(users, vec![3, 2, 1]);
    assert_eq!(overall, vec![100.0, 66.67, 33.33]);
    assert_eq!(from_previous, vec![100.0, 66.67, 50.0]);
    assert_eq!(drop_off, vec![0.0, 33.33, 50.0]);
    assert_eq!(avg_hours, vec![Some(1.0), Some(1.0), None]);

    let names: Vec<_> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
    let numbers: Vec<_> = report.steps.iter().map(|s| s.step_number).collect();
    assert_eq!(names, vec!["view", "cart", "purchase"]);
    assert_eq!(numbers, vec![1, 2, 3]);

    assert_eq!(report.summary.total_entities, 3);
    assert_eq!(report.summary.entities_completing_funnel, 1);
    assert_eq!(report.summary.overall_conversion_rate, 33.33);
    let largest = report.summary.largest_drop_off.unwrap();
    assert_eq!(largest.step_name, "purchase");
    assert_eq!(largest.drop_off_rate, 50.0);
}

#[test]
fn report_serializes_missing_average_as_null() {
    let engine = checkout_engine();

    let report = serde_json::to_value(engine.analyze(&checkout_events())).unwrap();

    assert_eq!(report["status"], "complete");
    assert_eq!(report["steps"][2]["avg_time_to_next_hours"], serde_json::Value::Null);
    assert_eq!(report["steps"][0]["step_number"], 1);
}

#[test]
fn sequential_entry_counts_never_increase() {
    let engine = checkout_engine();

    let report = engine.analyze(&noisy_events());

    for pair in report.steps.windows(2) {
        assert!(pair[1].users_entered <= pair[0].users_entered);
    }
}

#[rstest]
#[case::sequential(true, false)]
#[case::windowed(false, false)]
#[case::skip_allowed(false, true)]
fn drop_off_and_conversion_add_up(#[case] sequential: bool, #[case] allow_skip: bool) {
    let engine = FunnelEngine::from_config(config(
        &["view", "cart", "purchase"],
        "24h",
        sequential,
        allow_skip,
    ))
    .unwrap();

    let report = engine.analyze(&noisy_events());

    assert_eq!(report.steps[0].conversion_rate_from_previous, 100.0);
    assert_eq!(report.steps[0].drop_off_rate, 0.0);
    for step in &report.steps[1..] {
        let total = step.drop_off_rate + step.conversion_rate_from_previous;
        assert!((total - 100.0).abs() < 0.011, "{total}");
    }
}

#[test]
fn step_zero_converts_everyone_who_emitted_it() {
    let events = vec![
        Event::new("a", "view", at(0)),
        Event::new("b", "view", at(7)),
        Event::new("c", "view", at(hours(100))),
        Event::new("c", "cart", at(hours(101))),
    ];
    let engine = FunnelEngine::from_config(config(&["view", "cart"], "30m", true, false)).unwrap();

    let report = engine.analyze(&events);

    assert_eq!(report.steps[0].users_entered, report.summary.total_entities);
    assert_eq!(report.steps[0].conversion_rate_overall, 100.0);
    assert_eq!(report.steps[1].users_entered, 0);
}

#[test]
fn repeated_runs_are_identical() {
    let engine = checkout_engine();
    let events = noisy_events();

    let first = serde_json::to_string(&engine.analyze(&events)).unwrap();
    let second = serde_json::to_string(&engine.analyze(&events)).unwrap();

    assert_eq!(first, second);
}

#[test]
fn parallel_engine_matches_sequential_pipeline() {
    let definition: FunnelDefinition = config(&["view", "cart", "purchase"], "24h", true, false)
        .into_definition()
        .unwrap();
    let events = noisy_events();

    let journeys = journey::build(&events, &definition);
    let progressions: Vec<_> = journeys
        .values()
        .map(|journey| matcher::match_journey(journey, &definition))
        .collect();
    let sequential = metrics::aggregate(&progressions, &definition);

    let parallel = FunnelEngine::new(definition).analyze(&events).steps;

    assert_eq!(sequential, parallel);
}

#[test]
fn window_excludes_late_conversions() {
    let events = vec![
        Event::new("u1", "A", at(0)),
        Event::new("u1", "B", at(hours(2))),
    ];
    let engine = FunnelEngine::from_config(config(&["A", "B"], "1h", true, false)).unwrap();

    let progressions = engine.progressions(&events);

    assert!(progressions["u1"].has_reached(0));
    assert!(!progressions["u1"].has_reached(1));
}

#[test]
fn sequential_funnel_requires_the_first_step() {
    let events = vec![Event::new("u1", "B", at(0))];
    let engine = FunnelEngine::from_config(config(&["A", "B"], "24h", true, false)).unwrap();

    let progressions = engine.progressions(&events);

    assert_eq!(progressions["u1"].furthest_step(), None);

    let report = engine.analyze(&events);
    assert_eq!(report.status, ReportStatus::Complete);
    assert_eq!(report.summary.total_entities, 1);
    assert_eq!(report.steps[0].users_entered, 0);
    assert_eq!(report.steps[0].conversion_rate_overall, 0.0);
}

#[test]
fn skip_mode_reaches_later_steps_alone() {
    let events = vec![Event::new("u1", "C", at(0))];
    let engine = FunnelEngine::from_config(config(&["A", "B", "C"], "24h", false, true)).unwrap();

    let progressions = engine.progressions(&events);
    let progression = &progressions["u1"];

    assert!(!progression.has_reached(0));
    assert!(!progression.has_reached(1));
    assert_eq!(progression.reached_at(2), Some(at(0)));
}

#[rstest]
#[case::first_occurrence(MatchPolicy::FirstOccurrence, 0, None)]
#[case::any_within_window(MatchPolicy::AnyWithinWindow, 1, Some(0.5))]
fn match_policy_changes_reported_conversion(
    #[case] match_policy: MatchPolicy,
    #[case] converted: u64,
    #[case] avg_hours: Option<f64>,
) {
    // The second view re-triggers the window, the first one alone is too old for the cart
    let events = vec![
        Event::new("u1", "view", at(0)),
        Event::new("u1", "view", at(hours(2))),
        Event::new("u1", "cart", at(hours(2) + 30)),
    ];
    let mut config = config(&["view", "cart"], "1h", true, false);
    config.match_policy = match_policy;

    let report = FunnelEngine::from_config(config).unwrap().analyze(&events);

    assert_eq!(report.steps[1].users_entered, converted);
    // Measured from the view that opened the window, never longer than the window itself
    assert_eq!(report.steps[0].avg_time_to_next_hours, avg_hours);
}
