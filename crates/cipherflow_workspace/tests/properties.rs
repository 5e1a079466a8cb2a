// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo, batching, cloning and scheduling guarantees.

mod common;

use cipherflow_graph::{
    Annotation, ElementId, ExecutionError, GraphEvent, NodeSpec, PortValue, SettingValue,
};
use cipherflow_workspace::{
    ChangeSetting, DeleteAnnotation, DeleteEdge, DeleteNode, GraphOperation, MoveElement,
    NewAnnotation, NewEdge, NewNode, OperationError, RenameElement, ResizeElement, Workspace,
    WorkspaceConfig, WorkspaceError,
};
use common::{chain, connect, port, registry, value, Recorder};
use std::sync::Arc;

fn assert_undo_round_trip(ws: &mut Workspace, operation: Box<dyn GraphOperation>) {
    let description = operation.description().to_string();
    let before = ws.to_document();

    ws.modify(operation).unwrap();
    let after = ws.to_document();
    assert_ne!(after, before, "{description} changed nothing");

    ws.undo().unwrap();
    assert_eq!(ws.to_document(), before, "undo of {description}");

    ws.redo().unwrap();
    assert_eq!(ws.to_document(), after, "redo of {description}");
    ws.undo().unwrap();
}

#[test]
fn test_every_operation_undoes_to_identity() {
    let mut chain = chain();
    chain.ws.run().unwrap();
    let (a, b, c) = (chain.a, chain.b, chain.c);
    let ws = &mut chain.ws;

    let spare = ws.add_node(NodeSpec::new("sink").with_name("spare")).unwrap();
    let note = ws.add_annotation(Annotation::text("key schedule")).unwrap();
    let first_edge = ws.graph().connections().next().unwrap().id;

    let operations: Vec<Box<dyn GraphOperation>> = vec![
        Box::new(NewNode::new(NodeSpec::new("inc").with_position(5.0, 5.0))),
        Box::new(DeleteNode::new(b)),
        Box::new(DeleteNode::new(c)),
        Box::new(NewEdge::new(port(ws, b, "out"), port(ws, spare, "in"), false)),
        Box::new(DeleteEdge::new(first_edge)),
        Box::new(NewAnnotation::new(Annotation::text("note").with_position(1.0, 2.0))),
        Box::new(DeleteAnnotation::new(note)),
        Box::new(MoveElement::new(a.into(), [-30.0, 12.5])),
        Box::new(MoveElement::new(ElementId::Annotation(note), [90.0, 90.0])),
        Box::new(ResizeElement::new(b.into(), [320.0, 240.0])),
        Box::new(RenameElement::new(c.into(), "output")),
        Box::new(ChangeSetting::new(a, "value", SettingValue::Int(11))),
    ];

    for operation in operations {
        assert_undo_round_trip(ws, operation);
    }
}

#[test]
fn test_paste_undoes_to_identity() {
    let mut chain = chain();
    let before = chain.ws.to_document();

    chain.ws.clone_selection(&[chain.a, chain.b, chain.c]).unwrap();
    assert_eq!(chain.ws.graph().node_count(), 6);
    let after = chain.ws.to_document();

    chain.ws.undo().unwrap();
    assert_eq!(chain.ws.to_document(), before);
    chain.ws.redo().unwrap();
    assert_eq!(chain.ws.to_document(), after);
}

#[test]
fn test_failed_batch_leaves_no_trace() {
    let mut chain = chain();
    let (a, b, c) = (chain.a, chain.b, chain.c);
    let ws = &mut chain.ws;
    let before = ws.to_document();
    let depth = ws.history().undo_depth();
    let events = ws.subscribe();
    let (a_out, c_in) = (port(ws, a, "out"), port(ws, c, "in"));

    // C's input is already fed by B
    let result = ws.batch(
        "Rewire",
        vec![
            Box::new(MoveElement::new(a.into(), [1.0, 1.0])),
            Box::new(RenameElement::new(b.into(), "middle")),
            Box::new(NewEdge::new(a_out, c_in, false)),
        ],
    );

    assert!(matches!(
        result,
        Err(WorkspaceError::Operation(OperationError::Batch { index: 2, .. }))
    ));
    assert_eq!(ws.to_document(), before);
    assert_eq!(ws.history().undo_depth(), depth);
    assert_eq!(events.try_iter().count(), 0);
}

#[test]
fn test_batch_undoes_in_one_step() {
    let mut chain = chain();
    let (a, b, c) = (chain.a, chain.b, chain.c);
    let ws = &mut chain.ws;
    let before = ws.to_document();
    let events = ws.subscribe();

    ws.batch(
        "Tidy",
        vec![
            Box::new(MoveElement::new(a.into(), [0.0, 100.0])),
            Box::new(MoveElement::new(b.into(), [200.0, 100.0])),
            Box::new(RenameElement::new(c.into(), "result")),
            Box::new(ChangeSetting::new(a, "value", SettingValue::Int(8))),
        ],
    )
    .unwrap();

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        &received[0],
        GraphEvent::BatchApplied { reverted: false, .. }
    ));

    assert_eq!(ws.undo().unwrap(), "Tidy");
    assert_eq!(ws.to_document(), before);
}

#[test]
fn test_cycle_fails_without_executing() {
    let recorder = Recorder::default();
    let mut ws = Workspace::new("loop", Arc::new(registry(&recorder)), WorkspaceConfig::default());
    let seed = ws.add_node(NodeSpec::new("const")).unwrap();
    let x = ws.add_node(NodeSpec::new("inc")).unwrap();
    let y = ws.add_node(NodeSpec::new("inc")).unwrap();
    let out = ws.add_node(NodeSpec::new("sink")).unwrap();
    connect(&mut ws, x, y);
    connect(&mut ws, y, x);
    connect(&mut ws, seed, out);

    let result = ws.run();

    assert!(matches!(
        result,
        Err(WorkspaceError::Execution(ExecutionError::Cyclic(_)))
    ));
    assert!(recorder.is_empty());
    assert_eq!(value(&ws, out, "in"), None);
}

#[test]
fn test_clones_do_not_share_settings() {
    let mut chain = chain();
    let a = chain.a;
    let result = chain.ws.clone_selection(&[a]).unwrap();
    let copy = result.id_map[&a];
    assert_eq!(
        chain.ws.graph().setting(copy, "value").unwrap(),
        Some(SettingValue::Int(5))
    );

    chain.ws.change_setting(copy, "value", SettingValue::Int(9)).unwrap();
    assert_eq!(chain.ws.graph().setting(a, "value").unwrap(), Some(SettingValue::Int(5)));

    chain.ws.change_setting(a, "value", SettingValue::Int(7)).unwrap();
    assert_eq!(chain.ws.graph().setting(copy, "value").unwrap(), Some(SettingValue::Int(9)));
}

#[test]
fn test_runs_are_repeatable() {
    let mut chain = chain();
    let extra = chain.ws.add_node(NodeSpec::new("sink")).unwrap();
    let side = chain.ws.add_node(NodeSpec::new("inc")).unwrap();
    connect(&mut chain.ws, chain.a, side);
    connect(&mut chain.ws, side, extra);

    let first = chain.ws.run().unwrap();
    let first_values = chain.ws.to_document();
    let second = chain.ws.run().unwrap();

    assert_eq!(first, second);
    assert_eq!(chain.ws.to_document(), first_values);
    assert_eq!(value(&chain.ws, extra, "in"), Some(PortValue::Int(6)));
}
