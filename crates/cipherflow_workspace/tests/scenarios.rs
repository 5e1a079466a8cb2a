// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end behavior on the `A -> B -> C` chain.

mod common;

use cipherflow_graph::{
    Configurable, Connection, ExecutionContext, ExecutionError, GraphError, NodeCategory,
    NodeError, NodeInputs, NodeOutputs, NodeSpec, NodeState, NodeType, PortSpec, PortType,
    PortValue, RunOutcome,
};
use cipherflow_workspace::{OperationError, WorkspaceError};
use common::{chain, chain_with, port, registry, value, Recorder};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[test]
fn test_chain_runs_and_delete_undo_restores_edges() {
    let mut chain = chain();
    let (a, b, c) = (chain.a, chain.b, chain.c);

    let report = chain.ws.run().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.executed, vec![a, b, c]);
    assert_eq!(
        chain.recorder.calls(),
        vec![
            (a, None),
            (b, Some(PortValue::Int(5))),
            (c, Some(PortValue::Int(6))),
        ]
    );

    let before: Vec<Connection> = chain.ws.graph().connections().cloned().collect();
    chain.ws.delete_node(b).unwrap();
    assert!(chain.ws.graph().node(b).is_none());
    assert_eq!(chain.ws.graph().connection_count(), 0);

    chain.ws.undo().unwrap();
    let after: Vec<Connection> = chain.ws.graph().connections().cloned().collect();
    assert_eq!(after, before);
    assert_eq!(chain.ws.graph().node(b).unwrap().name, "B");
}

#[test]
fn test_incompatible_edge_is_rejected() {
    let mut chain = chain();
    let t = chain.ws.add_node(NodeSpec::new("text")).unwrap();
    let c = chain.ws.add_node(NodeSpec::new("sink")).unwrap();
    let edges = chain.ws.graph().connection_count();

    let result = chain.ws.add_edge(port(&chain.ws, t, "out"), port(&chain.ws, c, "in"), false);

    match result {
        Err(WorkspaceError::Operation(OperationError::Graph { source, .. })) => {
            assert_eq!(
                source,
                GraphError::TypeMismatch {
                    from: PortType::Text,
                    to: PortType::Int
                }
            );
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(chain.ws.graph().connection_count(), edges);
}

#[test]
fn test_clone_drops_edges_leaving_selection() {
    let mut chain = chain();
    let (a, b, c) = (chain.a, chain.b, chain.c);

    let result = chain.ws.clone_selection(&[a, b]).unwrap();

    assert_eq!(result.nodes.len(), 2);
    assert_eq!(result.edges.len(), 1);
    let copy_a = result.id_map[&a];
    let copy_b = result.id_map[&b];

    let edge = chain.ws.graph().connection(result.edges[0]).unwrap();
    assert_eq!((edge.from_node, edge.to_node), (copy_a, copy_b));
    assert!(edge.is_copy);

    // Only the original B -> C still touches C
    let into_c: Vec<_> = chain.ws.graph().connections_for_node(c).collect();
    assert_eq!(into_c.len(), 1);
    assert_eq!(into_c[0].from_node, b);

    let original = chain.ws.graph().node(a).unwrap().position;
    let copied = chain.ws.graph().node(copy_a).unwrap().position;
    assert_eq!(copied, [original[0] + 50.0, original[1] + 50.0]);
}

#[test]
fn test_stop_mid_run_then_rerun() {
    let recorder = Recorder::default();
    let mut registry = registry(&recorder);

    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let blocked_once = AtomicBool::new(false);
    let rec = recorder.clone();
    registry.register(
        NodeType::new("slow", "Slow increment", NodeCategory::Logic)
            .with_port(PortSpec::input("in", PortType::Int))
            .with_port(PortSpec::output("out", PortType::Int)),
        move |inputs: &NodeInputs,
              _: &dyn Configurable,
              ctx: &ExecutionContext|
              -> Result<NodeOutputs, NodeError> {
            rec.record(ctx.node_id(), inputs.get("in").cloned());
            if !blocked_once.swap(true, Ordering::SeqCst) {
                let _ = started_tx.lock().send(());
                let deadline = Instant::now() + Duration::from_secs(10);
                while !ctx.is_stopped() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Ok(NodeOutputs::new().with("out", PortValue::Int(inputs.int("in")? + 1)))
        },
    );

    let mut chain = chain_with(recorder, registry, "slow");
    let (b, c) = (chain.b, chain.c);
    let stop = chain.ws.stop_handle();

    let report = std::thread::scope(|scope| {
        scope.spawn(move || {
            started_rx.recv().unwrap();
            stop.stop();
        });
        chain.ws.run().unwrap()
    });

    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert_eq!(chain.recorder.count(c), 0);
    assert_eq!(chain.ws.graph().node(b).unwrap().state, NodeState::Canceled);
    assert_eq!(value(&chain.ws, b, "out"), None);

    let report = chain.ws.run().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.executed, vec![chain.a, b, c]);
    assert_eq!(chain.recorder.count(c), 1);
    assert_eq!(chain.recorder.calls().last(), Some(&(c, Some(PortValue::Int(6)))));
}

#[test]
fn test_failing_node_reports_and_keeps_graph() {
    let recorder = Recorder::default();
    let mut registry = registry(&recorder);
    registry.register(
        NodeType::new("broken", "Broken cipher", NodeCategory::Logic)
            .with_port(PortSpec::input("in", PortType::Int))
            .with_port(PortSpec::output("out", PortType::Int)),
        |_: &NodeInputs, _: &dyn Configurable, _: &ExecutionContext| -> Result<NodeOutputs, NodeError> {
            Err(NodeError::Failed("key schedule exhausted".into()))
        },
    );

    let mut chain = chain_with(recorder, registry, "broken");
    let (b, c) = (chain.b, chain.c);
    let before = chain.ws.to_document();
    let depth = chain.ws.history().undo_depth();

    let result = chain.ws.run();

    match result {
        Err(WorkspaceError::Execution(ExecutionError::NodeComputation { node, name, source })) => {
            assert_eq!(node, b);
            assert_eq!(name, "B");
            assert_eq!(source, NodeError::Failed("key schedule exhausted".into()));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let graph = chain.ws.graph();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.connection_count(), 2);
    assert_eq!(chain.ws.to_document().connections, before.connections);
    assert_eq!(chain.ws.history().undo_depth(), depth);

    let failed = graph.node(b).unwrap();
    assert_eq!(failed.state, NodeState::Error);
    assert_eq!(failed.last_error.as_deref(), Some("key schedule exhausted"));
    assert_eq!(chain.recorder.count(c), 0);
}
