//! Operation submission, and completions arriving from other threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::fixtures::{connect, sink};
use workgraph::agents::AgentSpec;
use workgraph::collab::{ManualExecutor, Services, StaticResources, TokioExecutor};
use workgraph::core::{State, TaskId, TaskSpec};
use workgraph::engine::Manager;

fn mesh_agent() -> AgentSpec {
    AgentSpec::new(
        "submit",
        json!({
            "operation": "mesh",
            "parameters": { "size": 0.1 },
            "output": "out",
            "result_type": "mesh",
        }),
    )
}

fn manual() -> (Manager, Arc<ManualExecutor>, TaskId) {
    let exec = Arc::new(ManualExecutor::new());
    let mut m = Manager::default().with_services(Services::new().with_operations(exec.clone()));
    let task = m.create_task(TaskSpec::new("mesh").agent(mesh_agent())).unwrap();
    (m, exec, task)
}

#[test]
fn test_completion_from_worker_thread_completes_task() {
    let (mut m, exec, task) = manual();
    let downstream = sink(&mut m, "check");
    connect(&mut m, task, downstream);

    assert_eq!(m.state(task).unwrap(), State::Incomplete);
    assert_eq!(exec.submitted(), 1);
    assert_eq!(m.in_flight(), 1);
    let pending = exec.take_pending();
    assert_eq!(pending[0].request.operation, "mesh");
    assert_eq!(pending[0].request.parameters, json!({ "size": 0.1 }));

    let worker = thread::spawn(move || {
        for p in pending {
            assert!(p.succeed(json!({ "cells": 1200 })));
        }
    });
    worker.join().unwrap();

    let report = m.process_pending().unwrap().unwrap();
    assert_eq!(report.change_of(task).unwrap().new, State::Completed);
    assert_eq!(m.in_flight(), 0);
    let out = m.task(task).unwrap().port("out").unwrap().data().unwrap();
    assert_eq!(out.type_name, "mesh");
    assert_eq!(out.value, json!({ "cells": 1200 }));
    assert_eq!(m.state(downstream).unwrap(), State::Completable);

    // Nothing left to apply.
    assert!(m.process_pending().unwrap().is_none());
}

#[test]
fn test_failed_operation_reports_reason() {
    let (mut m, exec, task) = manual();
    for p in exec.take_pending() {
        p.fail("solver diverged");
    }
    let report = m.process_pending().unwrap().unwrap();
    assert!(report.is_quiet());

    let t = m.task(task).unwrap();
    assert_eq!(t.state(), State::Incomplete);
    assert_eq!(t.failure_reasons(), vec!["solver diverged".to_string()]);
    assert!(t
        .diagnostics()
        .iter()
        .any(|d| d.source == "submit" && d.message == "solver diverged"));

    // Reset clears the failure and submits again.
    m.reset(task).unwrap();
    assert!(m.task(task).unwrap().failure_reasons().is_empty());
    assert_eq!(exec.submitted(), 2);
}

#[test]
fn test_completion_after_destroy_is_ignored() {
    let (mut m, exec, task) = manual();
    let pending = exec.take_pending();
    m.destroy_task(task).unwrap();
    assert_eq!(m.in_flight(), 0);

    for p in pending {
        assert!(p.succeed(json!(null)));
    }
    assert!(m.process_pending().unwrap().is_none());
    assert_eq!(m.task_count(), 0);
}

#[test]
fn test_completion_after_reset_is_ignored() {
    let (mut m, exec, task) = manual();
    let stale = exec.take_pending();
    m.reset(task).unwrap();
    assert_eq!(exec.submitted(), 2);
    assert_eq!(m.in_flight(), 1);

    for p in stale {
        p.succeed(json!({ "cells": 1 }));
    }
    assert!(m.process_pending().unwrap().is_none());
    assert_eq!(m.state(task).unwrap(), State::Incomplete);

    for p in exec.take_pending() {
        p.succeed(json!({ "cells": 2 }));
    }
    m.process_pending().unwrap();
    assert_eq!(m.state(task).unwrap(), State::Completed);
    let out = m.task(task).unwrap().port("out").unwrap().data().unwrap();
    assert_eq!(out.value, json!({ "cells": 2 }));
}

#[test]
fn test_refused_submission_is_a_failure() {
    let exec = Arc::new(ManualExecutor::new());
    exec.refuse_with(Some("queue full"));
    let mut m = Manager::default().with_services(Services::new().with_operations(exec.clone()));
    let task = m.create_task(TaskSpec::new("mesh").agent(mesh_agent())).unwrap();

    assert_eq!(m.state(task).unwrap(), State::Incomplete);
    assert_eq!(m.in_flight(), 0);
    assert_eq!(
        m.task(task).unwrap().failure_reasons(),
        vec!["queue full".to_string()]
    );

    exec.refuse_with(None);
    m.reset(task).unwrap();
    assert_eq!(m.in_flight(), 1);
}

#[test]
fn test_missing_executor_is_diagnosed() {
    let mut m = Manager::default();
    let task = m.create_task(TaskSpec::new("mesh").agent(mesh_agent())).unwrap();
    let t = m.task(task).unwrap();
    assert_eq!(t.state(), State::Incomplete);
    assert!(t
        .diagnostics()
        .iter()
        .any(|d| d.agent == Some(0) && d.message.contains("operation executor")));
}

#[test]
fn test_reevaluation_requested_from_another_thread() {
    let resources = Arc::new(StaticResources::new());
    let mut m = Manager::default().with_services(Services::new().with_resources(resources.clone()));
    let task = m
        .create_task(TaskSpec::new("boundary").agent(AgentSpec::resources("boundary", 2)))
        .unwrap();
    assert_eq!(m.state(task).unwrap(), State::Incomplete);

    let handle = m.handle();
    let worker = thread::spawn(move || {
        resources.set("boundary", 2);
        handle.request_reevaluate(task)
    });
    assert!(worker.join().unwrap());

    let report = m.wait_pending(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(report.change_of(task).unwrap().new, State::Completable);
}

#[test]
fn test_tokio_executor_end_to_end() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let exec = TokioExecutor::new(runtime.handle().clone())
        .register("mesh", |request| {
            let size = request.parameters["size"].as_f64().ok_or("size missing")?;
            Ok(json!({ "cells": (1.0 / size) as u64 }))
        })
        .register("explode", |_| Err("boom".to_string()));
    let mut m = Manager::default().with_services(Services::new().with_operations(Arc::new(exec)));

    let task = m.create_task(TaskSpec::new("mesh").agent(mesh_agent())).unwrap();
    let broken = m
        .create_task(TaskSpec::new("broken").agent(AgentSpec::submit("explode", json!({}))))
        .unwrap();
    let unknown = m
        .create_task(TaskSpec::new("unknown").agent(AgentSpec::submit("nope", json!({}))))
        .unwrap();
    assert_eq!(m.in_flight(), 2);
    assert_eq!(
        m.task(unknown).unwrap().failure_reasons(),
        vec!["unknown operation 'nope'".to_string()]
    );

    while m.in_flight() > 0 {
        m.wait_pending(Duration::from_secs(5)).unwrap().unwrap();
    }
    assert_eq!(m.state(task).unwrap(), State::Completed);
    let out = m.task(task).unwrap().port("out").unwrap().data().unwrap();
    assert_eq!(out.value, json!({ "cells": 10 }));
    assert_eq!(m.state(broken).unwrap(), State::Incomplete);
    assert_eq!(m.task(broken).unwrap().failure_reasons(), vec!["boom".to_string()]);
}
