// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node types shared by the integration tests.
#![allow(dead_code)]

use cipherflow_graph::{
    Configurable, ExecutionContext, NodeCategory, NodeError, NodeId, NodeInputs, NodeOutputs,
    NodeRegistry, NodeSpec, NodeType, PortId, PortSpec, PortType, PortValue, PropertyBag,
    PropertySpec, SettingKind, SettingValue,
};
use cipherflow_workspace::{Workspace, WorkspaceConfig};
use parking_lot::Mutex;
use std::sync::Arc;

/// Every computation, in call order, with the value seen on port `in`
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<(NodeId, Option<PortValue>)>>>);

impl Recorder {
    pub fn record(&self, node: NodeId, input: Option<PortValue>) {
        self.0.lock().push((node, input));
    }

    pub fn calls(&self) -> Vec<(NodeId, Option<PortValue>)> {
        self.0.lock().clone()
    }

    pub fn count(&self, node: NodeId) -> usize {
        self.0.lock().iter().filter(|(id, _)| *id == node).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Registry with `const` (int setting `value`), `inc`, `sink` and `text`
pub fn registry(recorder: &Recorder) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    let rec = recorder.clone();
    registry.register_with_settings(
        NodeType::new("const", "Constant", NodeCategory::Input)
            .with_port(PortSpec::output("out", PortType::Int)),
        move |_: &NodeInputs,
              settings: &dyn Configurable,
              ctx: &ExecutionContext|
              -> Result<NodeOutputs, NodeError> {
            rec.record(ctx.node_id(), None);
            let value = match settings.get("value") {
                Some(SettingValue::Int(v)) => v,
                _ => 0,
            };
            Ok(NodeOutputs::new().with("out", PortValue::Int(value)))
        },
        || {
            Box::new(PropertyBag::new().with(
                PropertySpec::new("value", SettingKind::Int),
                SettingValue::Int(0),
            ))
        },
    );

    let rec = recorder.clone();
    registry.register(
        NodeType::new("inc", "Increment", NodeCategory::Logic)
            .with_port(PortSpec::input("in", PortType::Int))
            .with_port(PortSpec::output("out", PortType::Int)),
        move |inputs: &NodeInputs,
              _: &dyn Configurable,
              ctx: &ExecutionContext|
              -> Result<NodeOutputs, NodeError> {
            rec.record(ctx.node_id(), inputs.get("in").cloned());
            Ok(NodeOutputs::new().with("out", PortValue::Int(inputs.int("in")? + 1)))
        },
    );

    let rec = recorder.clone();
    registry.register(
        NodeType::new("sink", "Sink", NodeCategory::Output)
            .with_port(PortSpec::input("in", PortType::Int)),
        move |inputs: &NodeInputs,
              _: &dyn Configurable,
              ctx: &ExecutionContext|
              -> Result<NodeOutputs, NodeError> {
            rec.record(ctx.node_id(), inputs.get("in").cloned());
            Ok(NodeOutputs::new())
        },
    );

    registry.register(
        NodeType::new("text", "Text", NodeCategory::Input)
            .with_port(PortSpec::output("out", PortType::Text)),
        |_: &NodeInputs, _: &dyn Configurable, _: &ExecutionContext| -> Result<NodeOutputs, NodeError> {
            Ok(NodeOutputs::new().with("out", PortValue::Text("attack at dawn".into())))
        },
    );

    registry
}

/// Port `name` of `node`
pub fn port(ws: &Workspace, node: NodeId, name: &str) -> PortId {
    let node = ws.graph().node(node).unwrap();
    node.input(name).or_else(|| node.output(name)).unwrap().id
}

/// Connect `from.out` to `to.in`
pub fn connect(ws: &mut Workspace, from: NodeId, to: NodeId) {
    let (out, input) = (port(ws, from, "out"), port(ws, to, "in"));
    ws.add_edge(out, input, false).unwrap();
}

/// Current value of port `name` on `node`
pub fn value(ws: &Workspace, node: NodeId, name: &str) -> Option<PortValue> {
    let id = port(ws, node, name);
    ws.graph().port(id).unwrap().value.clone()
}

/// The chain `A(const 5) -> B(inc) -> C(sink)`
pub struct Chain {
    pub ws: Workspace,
    pub recorder: Recorder,
    pub a: NodeId,
    pub b: NodeId,
    pub c: NodeId,
}

pub fn chain() -> Chain {
    let recorder = Recorder::default();
    chain_with(recorder.clone(), registry(&recorder), "inc")
}

/// The chain with a custom middle node type
pub fn chain_with(recorder: Recorder, registry: NodeRegistry, middle: &str) -> Chain {
    let mut ws = Workspace::new("chain", Arc::new(registry), WorkspaceConfig::default());
    let a = ws.add_node(NodeSpec::new("const").with_name("A")).unwrap();
    let b = ws
        .add_node(NodeSpec::new(middle).with_name("B").with_position(200.0, 0.0))
        .unwrap();
    let c = ws
        .add_node(NodeSpec::new("sink").with_name("C").with_position(400.0, 0.0))
        .unwrap();
    connect(&mut ws, a, b);
    connect(&mut ws, b, c);
    ws.change_setting(a, "value", SettingValue::Int(5)).unwrap();
    Chain {
        ws,
        recorder,
        a,
        b,
        c,
    }
}
