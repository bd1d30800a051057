//! Wave semantics observed through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::fixtures::{connect, objects, relay, sink, source, EventLog, FanGraph};
use workgraph::agents::AgentSpec;
use workgraph::config::{EngineConfig, FiringOrder};
use workgraph::core::{
    AdaptorSpec, Endpoint, GroupPolicy, GroupSpec, PortData, State, TaskSpec, Transform, TransformSpec,
};
use workgraph::engine::Manager;
use workgraph::{Error, ErrorKind};

/// Emits a signal while the source is (or is not) completed.
#[derive(Debug)]
struct Signal {
    when_completed: bool,
}

impl Transform for Signal {
    fn kind(&self) -> &str {
        if self.when_completed {
            "follow"
        } else {
            "invert"
        }
    }

    fn apply(&self, _: Option<&PortData>, source_state: State) -> std::result::Result<Option<PortData>, String> {
        if (source_state == State::Completed) == self.when_completed {
            Ok(Some(PortData::new("signal", json!(true))))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug)]
struct Broken;

impl Transform for Broken {
    fn kind(&self) -> &str {
        "broken"
    }

    fn apply(&self, _: Option<&PortData>, _: State) -> std::result::Result<Option<PortData>, String> {
        Err("schema mismatch".to_string())
    }
}

#[test]
fn test_empty_task_and_empty_group_are_completable() {
    let mut m = Manager::default();
    let t = m.create_task(TaskSpec::new("bare")).unwrap();
    let g = m
        .create_group(GroupSpec::new("empty", GroupPolicy::AllCompleted))
        .unwrap();
    assert_eq!(m.state(t).unwrap(), State::Completable);
    assert_eq!(m.state(g).unwrap(), State::Completable);
}

#[test]
fn test_reevaluation_is_idempotent() {
    let mut fan = FanGraph::build(FiringOrder::Creation);
    fan.run();
    let before = fan.states();
    let log = EventLog::attach(&mut fan.manager);

    for _ in 0..2 {
        let report = fan.manager.reevaluate_all().unwrap();
        assert!(report.is_quiet());
    }
    let report = fan.manager.reevaluate(fan.gate).unwrap();
    assert!(report.is_quiet());
    assert_eq!(log.len(), 0);
    assert_eq!(fan.states(), before);
}

#[test]
fn test_final_states_do_not_depend_on_firing_order() {
    let mut reference = FanGraph::build(FiringOrder::Creation);
    reference.run();
    let expected = reference.states();
    assert!(expected.iter().all(|(_, s)| *s == State::Completed));

    for seed in [1, 7, 42, 1234, 99_999] {
        let mut fan = FanGraph::build(FiringOrder::Shuffled { seed });
        fan.run();
        assert_eq!(fan.states(), expected, "seed {}", seed);
        for (i, join) in fan.joins.iter().enumerate() {
            let data = fan.manager.task(*join).unwrap().port("in").unwrap().data().unwrap();
            let want = reference
                .manager
                .task(reference.joins[i])
                .unwrap()
                .port("in")
                .unwrap()
                .data()
                .unwrap();
            assert_eq!(data.value, want.value, "seed {}", seed);
        }
    }
}

#[test]
fn test_failed_wave_keeps_last_stable_state() {
    let mut m = Manager::new(EngineConfig {
        hop_bound: 4,
        ..EngineConfig::default()
    });
    m.register_transform_kind("follow", |_| Ok(Box::new(Signal { when_completed: true })));
    m.register_transform_kind("invert", |_| Ok(Box::new(Signal { when_completed: false })));
    let spec = |name: &str| {
        TaskSpec::new(name)
            .output("out")
            .agent(AgentSpec::port_data("in"))
            .auto_complete()
    };
    let a = m.create_task(spec("a")).unwrap();
    let b = m.create_task(spec("b")).unwrap();
    m.create_adaptor(
        AdaptorSpec::new(Endpoint::new(a, "out"), Endpoint::new(b, "in"))
            .with_transform(TransformSpec::new("follow", json!(null))),
    )
    .unwrap();
    let back = m
        .create_adaptor(
            AdaptorSpec::new(Endpoint::new(b, "out"), Endpoint::new(a, "in"))
                .with_transform(TransformSpec::new("invert", json!(null)))
                .disabled(),
        )
        .unwrap();
    let log = EventLog::attach(&mut m);

    let err = m.set_adaptor_enabled(back, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Convergence);
    assert!(matches!(err, Error::Convergence { task, .. } if task == a));

    assert_eq!(m.state(a).unwrap(), State::Unavailable);
    assert_eq!(m.state(b).unwrap(), State::Unavailable);
    assert!(m.task(a).unwrap().port("in").unwrap().data().is_none());
    assert!(m.task(b).unwrap().port("in").unwrap().data().is_none());
    assert!(!m.adaptor(back).unwrap().is_enabled());
    assert_eq!(log.len(), 0);

    // The manager stays usable.
    let c = m.create_task(TaskSpec::new("c")).unwrap();
    assert_eq!(m.state(c).unwrap(), State::Completable);
}

#[test]
fn test_irrelevant_child_is_ignored_by_group() {
    let mut m = Manager::default();
    let done = m
        .create_task(TaskSpec::new("done").agent(AgentSpec::always_completable()))
        .unwrap();
    let open = m
        .create_task(TaskSpec::new("open").agent(AgentSpec::always_completable()))
        .unwrap();
    m.mark_completed(done).unwrap();
    let g = m
        .create_group(
            GroupSpec::new("g", GroupPolicy::AllCompleted)
                .child(done)
                .child(open),
        )
        .unwrap();
    assert_eq!(m.state(g).unwrap(), State::Completable);

    m.set_relevant(open, false).unwrap();
    assert_eq!(m.state(open).unwrap(), State::Irrelevant);
    assert_eq!(m.state(g).unwrap(), State::Completed);

    m.set_relevant(open, true).unwrap();
    assert_eq!(m.state(open).unwrap(), State::Completable);
    assert_eq!(m.state(g).unwrap(), State::Completable);
}

#[test]
fn test_irrelevant_upstream_does_not_block() {
    let mut m = Manager::default();
    let a = source(&mut m, "a");
    let u = m
        .create_task(TaskSpec::new("u").input("in").agent(AgentSpec::upstream()))
        .unwrap();
    connect(&mut m, a, u);
    assert_eq!(m.state(u).unwrap(), State::Unavailable);

    let report = m.set_relevant(a, false).unwrap();
    assert_eq!(report.change_of(a).unwrap().new, State::Irrelevant);
    assert_eq!(m.state(u).unwrap(), State::Completable);
}

#[test]
fn test_completion_climbs_nested_groups_in_one_wave() {
    let mut m = Manager::default();
    let leaf = m
        .create_task(TaskSpec::new("leaf").agent(AgentSpec::always_completable()))
        .unwrap();
    let inner = m
        .create_group(GroupSpec::new("inner", GroupPolicy::AllCompleted).child(leaf))
        .unwrap();
    let outer = m
        .create_group(GroupSpec::new("outer", GroupPolicy::AnyCompleted).child(inner))
        .unwrap();
    assert_eq!(m.parent(leaf), Some(inner));
    assert_eq!(m.children(outer), vec![inner]);
    assert_eq!(m.state(outer).unwrap(), State::Completable);

    let report = m.mark_completed(leaf).unwrap();
    let order: Vec<_> = report.events.iter().map(|e| e.task).collect();
    assert_eq!(order, vec![leaf, inner, outer]);
    assert_eq!(m.state(outer).unwrap(), State::Completed);
}

#[test]
fn test_transform_fault_is_reported_on_target() {
    let mut m = Manager::default();
    m.register_transform_kind("broken", |_| Ok(Box::new(Broken)));
    let a = source(&mut m, "a");
    let b = sink(&mut m, "b");
    let id = m
        .create_adaptor(
            AdaptorSpec::new(Endpoint::new(a, "out"), Endpoint::new(b, "in"))
                .with_transform(TransformSpec::new("broken", json!(null))),
        )
        .unwrap();
    m.set_port_data(a, "out", objects(&["part-3"])).unwrap();

    let task = m.task(b).unwrap();
    assert_eq!(task.state(), State::Unavailable);
    assert!(task.port("in").unwrap().data().is_none());
    let diagnostic = task
        .diagnostics()
        .iter()
        .find(|d| d.source == id.to_string())
        .unwrap();
    assert!(diagnostic.agent.is_none());
    assert!(diagnostic.message.contains("schema mismatch"));

    m.destroy_adaptor(id).unwrap();
    assert!(m.task(b).unwrap().diagnostics().is_empty());
}

#[test]
fn test_unsubscribed_observer_hears_nothing() {
    let mut m = Manager::default();
    let heard = Arc::new(AtomicUsize::new(0));
    let counter = heard.clone();
    let sub = m.subscribe_state_changed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let t = relay(&mut m, "r");
    m.set_port_data(t, "in", objects(&["a"])).unwrap();
    assert_eq!(heard.load(Ordering::SeqCst), 1);

    assert!(m.unsubscribe(sub));
    m.clear_port_data(t, "in").unwrap();
    assert_eq!(heard.load(Ordering::SeqCst), 1);
    assert!(!m.unsubscribe(sub));
}
