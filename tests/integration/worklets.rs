//! Worklet registration and instantiation into a live graph.

use serde_json::json;

use crate::fixtures::{connect, objects, source, MutationLog};
use workgraph::agents::{AgentSpec, AlwaysAgent};
use workgraph::config::EngineConfig;
use workgraph::core::{GroupPolicy, LocalVerdict, State, TaskStyle, TransformSpec};
use workgraph::engine::{Manager, MutationKind};
use workgraph::worklet::{
    AdaptorBlueprint, Bindings, Blueprint, ParameterSpec, ParameterType, PortRef, TaskBlueprint, Worklet,
};
use workgraph::{Error, GroupSpec};

fn auto() -> Option<TaskStyle> {
    Some(TaskStyle {
        auto_complete: true,
        ..TaskStyle::default()
    })
}

/// prepare ${body}
///   import ${body}  (in -> out)
///   mesh ${body}    (in), fed from import
fn prepare_worklet() -> Worklet {
    let mut import = TaskBlueprint::new("import ${body}")
        .input("in")
        .output("out")
        .parent(0)
        .agent(AgentSpec::port_data("in"));
    import.style = auto();
    let mut mesh = TaskBlueprint::new("mesh ${body}")
        .input("in")
        .parent(0)
        .agent(AgentSpec::port_data("in"));
    mesh.style = auto();
    let blueprint = Blueprint {
        parameters: vec![
            ParameterSpec::required("body", ParameterType::String),
            ParameterSpec::optional("role", ParameterType::String, json!("volume")),
        ],
        tasks: vec![TaskBlueprint::group("prepare ${body}", GroupPolicy::AllCompleted), import, mesh],
        adaptors: vec![AdaptorBlueprint::new(PortRef::new(1, "out"), PortRef::new(2, "in"))
            .with_transform(TransformSpec::new("retag", json!({ "type_name": "${role}" })))],
    };
    Worklet::new("prepare", "Import and mesh one body", blueprint).unwrap()
}

fn bind(body: &str) -> Bindings {
    let mut b = Bindings::new();
    b.insert("body".to_string(), json!(body));
    b
}

#[test]
fn test_fragment_joins_a_larger_graph() {
    let mut m = Manager::default();
    m.register_worklet(prepare_worklet()).unwrap();
    let geometry = source(&mut m, "geometry");
    m.mark_completed(geometry).unwrap();
    let project = m
        .create_group(GroupSpec::new("project", GroupPolicy::AllCompleted))
        .unwrap();

    let inst = m.instantiate_worklet("prepare", &bind("wing")).unwrap();
    assert_eq!(inst.worklet, "prepare");
    assert_eq!(inst.tasks.len(), 3);
    assert_eq!(inst.adaptors.len(), 1);
    assert_eq!(inst.top_level, vec![inst.tasks[0]]);
    let (group, import, mesh) = (inst.tasks[0], inst.tasks[1], inst.tasks[2]);
    assert_eq!(m.task(group).unwrap().name(), "prepare wing");
    assert_eq!(m.task(mesh).unwrap().name(), "mesh wing");
    assert_eq!(m.children(group), vec![import, mesh]);
    assert_eq!(m.state(group).unwrap(), State::Unavailable);

    for top in &inst.top_level {
        m.add_child(project, *top).unwrap();
    }
    connect(&mut m, geometry, import);
    assert_eq!(m.state(project).unwrap(), State::Unavailable);

    m.set_port_data(geometry, "out", objects(&["body-1"])).unwrap();
    assert_eq!(m.state(import).unwrap(), State::Completed);
    assert_eq!(m.state(mesh).unwrap(), State::Unavailable);

    m.set_port_data(import, "out", objects(&["solid-1"])).unwrap();
    let received = m.task(mesh).unwrap().port("in").unwrap().data().unwrap();
    assert_eq!(received.type_name, "volume");
    assert_eq!(m.state(mesh).unwrap(), State::Completed);
    assert_eq!(m.state(group).unwrap(), State::Completed);
    assert_eq!(m.state(project).unwrap(), State::Completed);
}

#[test]
fn test_each_instantiation_gets_fresh_ids() {
    let mut m = Manager::default();
    m.register_worklet(prepare_worklet()).unwrap();
    let wing = m.instantiate_worklet("prepare", &bind("wing")).unwrap();
    let tail = m.instantiate_worklet("prepare", &bind("tail")).unwrap();

    assert_eq!(m.task_count(), 6);
    assert_eq!(m.adaptor_count(), 2);
    assert!(wing.tasks.iter().all(|id| !tail.tasks.contains(id)));
    assert_ne!(wing.adaptors, tail.adaptors);
    assert!(m.task_by_name("prepare tail").is_some());

    // The two fragments are independent.
    m.set_port_data(wing.tasks[1], "in", objects(&["w"])).unwrap();
    assert_eq!(m.state(wing.tasks[1]).unwrap(), State::Completed);
    assert_eq!(m.state(tail.tasks[1]).unwrap(), State::Unavailable);
}

#[test]
fn test_fault_at_any_task_leaves_no_trace() {
    let mut m = Manager::new(EngineConfig::default());
    m.register_agent_kind("flaky", |config| {
        if config["index"] == config["fail_at"] {
            return Err(Error::InvalidAgentConfig {
                kind: "flaky".to_string(),
                reason: "injected fault".to_string(),
            });
        }
        Ok(Box::new(AlwaysAgent::new(LocalVerdict::Completable)))
    });
    let tasks: Vec<TaskBlueprint> = (0..4)
        .map(|i| {
            let name = format!("step {}", i);
            let t = if i == 0 {
                TaskBlueprint::group(&name, GroupPolicy::AllCompleted)
            } else {
                TaskBlueprint::new(&name).parent(0)
            };
            t.agent(AgentSpec::new("flaky", json!({ "index": i, "fail_at": "${fail_at}" })))
        })
        .collect();
    let blueprint = Blueprint {
        parameters: vec![ParameterSpec::required("fail_at", ParameterType::Number)],
        tasks,
        adaptors: Vec::new(),
    };
    m.register_worklet(Worklet::new("steps", "", blueprint).unwrap()).unwrap();
    let existing = m
        .create_task(workgraph::TaskSpec::new("existing"))
        .unwrap();
    let log = MutationLog::attach(&mut m);

    for n in 0..4 {
        let mut b = Bindings::new();
        b.insert("fail_at".to_string(), json!(n));
        let err = m.instantiate_worklet("steps", &b).unwrap_err();
        assert!(matches!(err, Error::InvalidAgentConfig { .. }), "fault at {}", n);
        assert_eq!(m.task_count(), 1, "fault at {}", n);
        assert_eq!(m.tasks()[0].id(), existing);
    }
    assert!(log.kinds().is_empty());

    let mut b = Bindings::new();
    b.insert("fail_at".to_string(), json!(99));
    let inst = m.instantiate_worklet("steps", &b).unwrap();
    assert_eq!(m.task(inst.tasks[0]).unwrap().seq(), 2);
    assert_eq!(log.kinds(), vec![MutationKind::WorkletInstantiated]);
    assert_eq!(log.last().unwrap().tasks, inst.tasks);
}

#[test]
fn test_blueprint_is_unchanged_by_use() {
    let mut m = Manager::default();
    m.register_worklet(prepare_worklet()).unwrap();
    let before = m.worklet("prepare").unwrap().clone();

    let inst = m.instantiate_worklet("prepare", &bind("fin")).unwrap();
    m.set_port_data(inst.tasks[1], "in", objects(&["x"])).unwrap();
    m.destroy_task(inst.tasks[0]).unwrap();

    assert_eq!(m.worklet("prepare").unwrap(), &before);
    assert!(m.worklet("prepare").unwrap().blueprint.tasks[0].name.contains("${body}"));
}

#[test]
fn test_instantiation_errors() {
    let mut m = Manager::default();
    assert!(matches!(
        m.instantiate_worklet("missing", &Bindings::new()),
        Err(Error::WorkletNotFound(_))
    ));

    m.register_worklet(prepare_worklet()).unwrap();
    assert!(matches!(
        m.register_worklet(prepare_worklet()),
        Err(Error::WorkletExists(_))
    ));
    assert!(matches!(
        m.instantiate_worklet("prepare", &Bindings::new()),
        Err(Error::UnresolvedParameter(name)) if name == "body"
    ));
    let mut wrong = Bindings::new();
    wrong.insert("body".to_string(), json!(3));
    assert!(matches!(
        m.instantiate_worklet("prepare", &wrong),
        Err(Error::ParameterType { .. })
    ));
    assert_eq!(m.task_count(), 0);
}
