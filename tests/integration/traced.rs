//! Tracing sessions end to end.

use kestrel::debug::{TraceEvent, TraceRecord, Tracer, TracerConfig};
use kestrel::prelude::*;

use super::{big_ratio, factory, ratio};

#[test]
fn tracer_records_firings_by_cycle() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    let tracer = Tracer::shared(TracerConfig::new().enabled());
    Tracer::attach(&tracer, &mut session);

    session.insert("Ratio", ratio(4, 1)).unwrap();
    session.insert("Ratio", ratio(9, 3)).unwrap();
    assert_eq!(session.fire().unwrap(), 2);

    let tracer = tracer.lock().unwrap();
    assert_eq!(tracer.cycle(), 2);
    assert_eq!(tracer.buffer().by_event_type("RuleFiring").len(), 2);
    for cycle in 1..=2 {
        let names: Vec<_> = tracer
            .buffer()
            .records_for_cycle(cycle)
            .into_iter()
            .map(TraceRecord::event_type)
            .collect();
        assert_eq!(names, vec!["RuleFiring", "FactInserting", "FactInserted", "RuleFired"]);
    }
}

#[test]
fn tracer_sees_handled_failures_after_the_handler() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    session.subscribe(|event| {
        if let EngineEvent::LhsExpressionFailed(failure) = event {
            failure.handled = true;
        }
    });
    let config = TracerConfig::new()
        .enabled()
        .with_event_filter(["LhsExpressionFailed"]);
    let tracer = Tracer::shared(config);
    Tracer::attach(&tracer, &mut session);

    session.insert("Ratio", ratio(1, 0)).unwrap();

    let tracer = tracer.lock().unwrap();
    let failures = tracer.buffer().by_rule("BigRatio");
    assert_eq!(failures.len(), 1);
    match &failures[0].event {
        TraceEvent::Failed { handled, error, .. } => {
            assert!(*handled);
            assert!(error.contains("division by zero"));
        }
        other => panic!("unexpected record: {other:?}"),
    }
    assert!(tracer.format_recent(1).contains("(handled)"));
}

#[test]
fn evaluation_events_are_opt_in() {
    let factory = factory(vec![big_ratio()]);
    let config = TracerConfig::new()
        .enabled()
        .with_event_filter(["LhsExpressionEvaluated"]);

    let mut quiet = factory.create_session().unwrap();
    let quiet_tracer = Tracer::shared(config.clone());
    Tracer::attach(&quiet_tracer, &mut quiet);
    quiet.insert("Ratio", ratio(4, 1)).unwrap();
    assert!(quiet_tracer.lock().unwrap().buffer().is_empty());

    let mut verbose = factory
        .create_session_with(SessionConfig::default().with_evaluation_events(true))
        .unwrap();
    let verbose_tracer = Tracer::shared(config);
    Tracer::attach(&verbose_tracer, &mut verbose);
    verbose.insert("Ratio", ratio(4, 1)).unwrap();

    let tracer = verbose_tracer.lock().unwrap();
    assert_eq!(tracer.buffer().len(), 1);
    assert!(tracer.format_recent(1).ends_with("= true"));
}
