//! Save/load round trips through a graph document on disk.

use serde_json::json;
use tempfile::TempDir;

use crate::fixtures::{connect, objects, sink, source, MutationLog};
use workgraph::agents::AgentSpec;
use workgraph::core::{AdaptorSpec, Endpoint, GroupPolicy, GroupSpec, State, TaskId, TaskSpec};
use workgraph::engine::{Manager, MutationKind};
use workgraph::persist::GraphDocument;
use workgraph::worklet::{AdaptorBlueprint, Bindings, Blueprint, ParameterSpec, ParameterType, PortRef, TaskBlueprint, Worklet};
use workgraph::{AdaptorId, Error};

struct Project {
    manager: Manager,
    geometry: TaskId,
    archive: TaskId,
    archive_feed: AdaptorId,
}

fn worklet() -> Worklet {
    let blueprint = Blueprint {
        parameters: vec![ParameterSpec::required("body", ParameterType::String)],
        tasks: vec![
            TaskBlueprint::group("prepare ${body}", GroupPolicy::AllCompleted),
            TaskBlueprint::new("import ${body}")
                .input("in")
                .output("out")
                .parent(0)
                .agent(AgentSpec::port_data("in")),
            TaskBlueprint::new("mesh ${body}")
                .input("in")
                .parent(0)
                .weight(2.0)
                .agent(AgentSpec::port_data("in")),
        ],
        adaptors: vec![AdaptorBlueprint::new(PortRef::new(1, "out"), PortRef::new(2, "in"))],
    };
    Worklet::new("prepare", "", blueprint).unwrap()
}

fn project() -> Project {
    let mut m = Manager::default();
    m.register_worklet(worklet()).unwrap();
    let mut b = Bindings::new();
    b.insert("body".to_string(), json!("wing"));
    let inst = m.instantiate_worklet("prepare", &b).unwrap();

    let geometry = source(&mut m, "geometry");
    m.set_port_data(geometry, "out", objects(&["wing-solid"])).unwrap();
    m.mark_completed(geometry).unwrap();
    connect(&mut m, geometry, inst.tasks[1]);
    m.mark_completed(inst.tasks[1]).unwrap();

    let archive = sink(&mut m, "archive");
    let archive_feed = m
        .create_adaptor(
            AdaptorSpec::new(Endpoint::new(geometry, "out"), Endpoint::new(archive, "in")).disabled(),
        )
        .unwrap();
    let legacy = m
        .create_task(TaskSpec::new("legacy").agent(AgentSpec::always_completable()))
        .unwrap();
    m.set_relevant(legacy, false).unwrap();
    let release = m
        .create_group(
            GroupSpec::new("release", GroupPolicy::WeightedThreshold { threshold: 0.5 })
                .child(archive)
                .child(legacy),
        )
        .unwrap();
    m.set_child_weight(release, archive, 2.0).unwrap();

    Project {
        manager: m,
        geometry,
        archive,
        archive_feed,
    }
}

type TaskShape = (
    TaskId,
    u64,
    String,
    State,
    bool,
    bool,
    Option<TaskId>,
    Vec<TaskId>,
    Vec<(String, Option<(String, serde_json::Value, u64)>)>,
    Vec<AgentSpec>,
);

fn task_shapes(m: &Manager) -> Vec<TaskShape> {
    m.tasks()
        .into_iter()
        .map(|t| {
            (
                t.id(),
                t.seq(),
                t.name().to_string(),
                t.state(),
                t.is_marked_completed(),
                t.is_relevant(),
                t.parent(),
                t.children().to_vec(),
                t.ports()
                    .iter()
                    .map(|p| {
                        (
                            p.name().to_string(),
                            p.data().map(|d| (d.type_name.clone(), d.value.clone(), d.revision)),
                        )
                    })
                    .collect(),
                t.agents().iter().map(|a| a.spec()).collect(),
            )
        })
        .collect()
}

fn adaptor_shapes(m: &Manager) -> Vec<(AdaptorId, u64, Endpoint, Endpoint, bool, String)> {
    m.adaptors()
        .into_iter()
        .map(|a| {
            (
                a.id(),
                a.seq(),
                a.source().clone(),
                a.target().clone(),
                a.is_enabled(),
                a.transform_spec().kind,
            )
        })
        .collect()
}

#[test]
fn test_save_then_load_restores_the_same_graph() {
    let p = project();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project").join("graph.json");
    p.manager.save(&path).unwrap();
    assert!(path.exists());

    let mut loaded = Manager::default();
    let log = MutationLog::attach(&mut loaded);
    let report = loaded.load(&path).unwrap();
    assert!(report.is_quiet());
    assert_eq!(log.kinds(), vec![MutationKind::Imported]);

    assert_eq!(task_shapes(&loaded), task_shapes(&p.manager));
    assert_eq!(adaptor_shapes(&loaded), adaptor_shapes(&p.manager));
    assert_eq!(loaded.worklet("prepare"), p.manager.worklet("prepare"));
    assert_eq!(loaded.topology().edge_count(), p.manager.topology().edge_count());
    let release = loaded.task_by_name("release").unwrap();
    assert_eq!(release.group().unwrap().weight(&p.archive), 2.0);
    assert_eq!(release.state(), State::Incomplete);
}

#[test]
fn test_loaded_graph_keeps_behaving_like_the_original() {
    let mut original = project();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    original.manager.save(&path).unwrap();
    let mut loaded = Manager::default();
    loaded.load(&path).unwrap();

    for m in [&mut original.manager, &mut loaded] {
        m.set_adaptor_enabled(original.archive_feed, true).unwrap();
        m.mark_completed(original.archive).unwrap();
    }
    assert_eq!(loaded.state(original.archive).unwrap(), State::Completed);
    let release = loaded.task_by_name("release").unwrap().id();
    assert_eq!(loaded.state(release).unwrap(), State::Completable);
    assert_eq!(task_shapes(&loaded).len(), task_shapes(&original.manager).len());
    for (a, b) in task_shapes(&loaded).iter().zip(task_shapes(&original.manager).iter()) {
        assert_eq!(a.3, b.3, "state of {}", a.2);
    }

    // Creation sequences continue past the restored ones.
    let next_original = original.manager.create_task(TaskSpec::new("next")).unwrap();
    let next_loaded = loaded.create_task(TaskSpec::new("next")).unwrap();
    assert_eq!(
        loaded.task(next_loaded).unwrap().seq(),
        original.manager.task(next_original).unwrap().seq()
    );

    // The restored worklet can still be instantiated.
    let mut b = Bindings::new();
    b.insert("body".to_string(), json!("tail"));
    let inst = loaded.instantiate_worklet("prepare", &b).unwrap();
    assert_eq!(loaded.task(inst.tasks[0]).unwrap().name(), "prepare tail");
    assert!(loaded.state(original.geometry).is_ok());
}

#[test]
fn test_overwrite_keeps_a_backup() {
    let p = project();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    p.manager.save(&path).unwrap();

    let mut other = Manager::default();
    other.create_task(TaskSpec::new("only")).unwrap();
    other.save(&path).unwrap();

    let backup = GraphDocument::load(&path.with_extension("json.bak")).unwrap();
    assert_eq!(backup.tasks.len(), p.manager.task_count());
    let current = GraphDocument::load(&path).unwrap();
    assert_eq!(current.tasks.len(), 1);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_corrupt_document_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, "{ \"tasks\": [ oops").unwrap();

    let mut m = Manager::default();
    assert!(matches!(m.load(&path), Err(Error::Json(_))));
    assert!(m.is_empty());

    let missing = dir.path().join("absent.json");
    assert!(matches!(m.load(&missing), Err(Error::Io(_))));
}
