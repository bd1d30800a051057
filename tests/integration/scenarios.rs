//! The reference behaviours: data flowing A to B, a group completing
//! through one child, and destroying a task with live adaptors.

use std::sync::Arc;

use serde_json::json;

use crate::fixtures::{connect, objects, sink, source, EventLog};
use workgraph::agents::AgentSpec;
use workgraph::collab::{Services, StaticResources};
use workgraph::config::EngineConfig;
use workgraph::core::{AdaptorSpec, Endpoint, GroupPolicy, GroupSpec, LocalVerdict, State, TaskSpec, TransformSpec};
use workgraph::engine::Manager;
use workgraph::Error;

#[test]
fn test_data_reaches_target_only_once_source_completes() {
    let mut m = Manager::default();
    let a = source(&mut m, "a");
    let b = sink(&mut m, "b");
    m.create_adaptor(
        AdaptorSpec::new(Endpoint::new(a, "out"), Endpoint::new(b, "in"))
            .with_transform(TransformSpec::new("when_completed", json!(null))),
    )
    .unwrap();

    let report = m.set_port_data(a, "out", objects(&["volume-1"])).unwrap();
    assert!(report.is_quiet());
    assert_eq!(m.state(a).unwrap(), State::Completable);
    assert_eq!(m.state(b).unwrap(), State::Unavailable);
    assert!(m.task(b).unwrap().port("in").unwrap().data().is_none());

    let report = m.mark_completed(a).unwrap();
    assert_eq!(m.state(a).unwrap(), State::Completed);
    assert_eq!(m.state(b).unwrap(), State::Completable);
    let changed: Vec<_> = report.events.iter().map(|e| (e.task, e.old, e.new)).collect();
    assert_eq!(
        changed,
        vec![
            (a, State::Completable, State::Completed),
            (b, State::Unavailable, State::Completable),
        ]
    );
    let received = m.task(b).unwrap().port("in").unwrap().data().unwrap();
    assert_eq!(received.value, json!(["volume-1"]));
}

#[test]
fn test_completed_source_feeds_directly() {
    let mut m = Manager::default();
    let a = m
        .create_task(
            TaskSpec::new("a")
                .output("out")
                .agent(AgentSpec::always(LocalVerdict::Completed)),
        )
        .unwrap();
    let b = sink(&mut m, "b");
    connect(&mut m, a, b);
    assert_eq!(m.state(b).unwrap(), State::Unavailable);

    let log = EventLog::attach(&mut m);
    m.set_port_data(a, "out", objects(&["face-7"])).unwrap();
    assert_eq!(m.state(b).unwrap(), State::Completable);
    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].task, events[0].new), (b, State::Completable));

    // Clearing the source empties the target again.
    m.clear_port_data(a, "out").unwrap();
    assert_eq!(m.state(b).unwrap(), State::Unavailable);
}

#[test]
fn test_group_completes_when_last_child_does() {
    let resources = Arc::new(StaticResources::new());
    let mut m = Manager::new(EngineConfig::default())
        .with_services(Services::new().with_resources(resources.clone()));

    let c1 = m
        .create_task(TaskSpec::new("c1").agent(AgentSpec::always_completable()))
        .unwrap();
    let c2 = m
        .create_task(TaskSpec::new("c2").agent(AgentSpec::always_completable()))
        .unwrap();
    let c3 = m
        .create_task(
            TaskSpec::new("c3")
                .agent(AgentSpec::resources("mesh", 1))
                .auto_complete(),
        )
        .unwrap();
    m.mark_completed(c1).unwrap();
    m.mark_completed(c2).unwrap();

    let g = m
        .create_group(
            GroupSpec::new("g", GroupPolicy::AllCompleted)
                .child(c1)
                .child(c2)
                .child(c3),
        )
        .unwrap();
    assert_eq!(m.state(c3).unwrap(), State::Incomplete);
    assert_eq!(m.state(g).unwrap(), State::Incomplete);

    let log = EventLog::attach(&mut m);
    resources.set("mesh", 1);
    let report = m.reevaluate(c3).unwrap();

    assert_eq!(m.state(c3).unwrap(), State::Completed);
    assert_eq!(m.state(g).unwrap(), State::Completed);
    let group_events = log.for_task(g);
    assert_eq!(group_events.len(), 1);
    assert_eq!(group_events[0].old, State::Incomplete);
    assert_eq!(group_events[0].new, State::Completed);
    assert_eq!(report.change_of(c3).unwrap().new, State::Completed);
    // The child's change is reported before the group's.
    assert_eq!(report.events.first().unwrap().task, c3);
}

#[test]
fn test_destroyed_task_detaches_its_adaptors() {
    let mut m = Manager::new(EngineConfig {
        auto_complete: true,
        ..EngineConfig::default()
    });
    let a = source(&mut m, "a");
    let t = m
        .create_task(
            TaskSpec::new("t")
                .output("out")
                .agent(AgentSpec::port_data("in")),
        )
        .unwrap();
    let c = sink(&mut m, "c");
    let upstream = connect(&mut m, a, t);
    let downstream = connect(&mut m, t, c);
    m.set_port_data(a, "out", objects(&["edge-1"])).unwrap();
    m.set_port_data(t, "out", objects(&["edge-2"])).unwrap();
    assert_eq!(m.state(c).unwrap(), State::Completed);

    let destroyed = m.destroy_task(t).unwrap();
    assert_eq!(destroyed, vec![t]);
    assert!(m.task(t).is_none());
    assert_eq!(m.adaptor_count(), 0);
    assert!(m.outgoing(a).is_empty());
    assert!(m.incoming(c).is_empty());
    assert!(m.task(c).unwrap().port("in").unwrap().data().is_none());
    assert_eq!(m.state(c).unwrap(), State::Unavailable);

    for id in [upstream, downstream] {
        let err = m.fire_adaptor(id).unwrap_err();
        assert!(matches!(err, Error::AdaptorDetached(detached) if detached == id));
        assert!(err.is_structural());
    }
    assert!(matches!(m.reevaluate(t), Err(Error::TaskNotFound(_))));
}
