//! Graphviz DOT emission

use crate::config::StyleConfig;
use crate::scene::extract::darken_color;
use crate::scene::{
    Edge, EdgeDir, EdgeKind, LineStyle, Node, NodeKind, Scene, SceneGraph, SceneItem,
};

/// Border darkening applied to agent fills.
const AGENT_BORDER_DARKEN: f64 = 0.2;
/// Border darkening applied to nested scene backgrounds.
const CLUSTER_BORDER_DARKEN: f64 = 0.1;

/// Render the scene graph as a Graphviz digraph.
pub fn to_dot(graph: &SceneGraph, style: &StyleConfig) -> String {
    let mut out = String::new();
    out.push_str("digraph {\n");
    out.push_str(&format!(
        "\tgraph [bgcolor=\"{}\"];\n",
        escape_dot(&style.canvas_replace_bg)
    ));
    write_items(&mut out, &graph.root, style, 1);
    out.push_str("}\n");
    out
}

fn write_items(out: &mut String, scene: &Scene, style: &StyleConfig, depth: usize) {
    let indent = "\t".repeat(depth);
    for item in &scene.items {
        match item {
            SceneItem::Node(node) => {
                out.push_str(&format!(
                    "{}\"{}\" [{}];\n",
                    indent,
                    escape_dot(&node.id),
                    attr_list(&node_attrs(node, style))
                ));
            }
            SceneItem::Edge(edge) => {
                out.push_str(&format!(
                    "{}\"{}\" -> \"{}\" [{}];\n",
                    indent,
                    escape_dot(&edge.from),
                    escape_dot(&edge.to),
                    attr_list(&edge_attrs(edge, style))
                ));
            }
            SceneItem::Scene(child) => {
                out.push_str(&format!("{}subgraph \"{}\" {{\n", indent, escape_dot(&child.id)));
                out.push_str(&format!(
                    "{}\tgraph [{}];\n",
                    indent,
                    attr_list(&cluster_attrs(child, style))
                ));
                write_items(out, child, style, depth + 1);
                out.push_str(&format!("{}}}\n", indent));
            }
        }
    }
}

fn attr_list(attrs: &[(&str, String)]) -> String {
    attrs
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", key, escape_dot(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn node_attrs(node: &Node, style: &StyleConfig) -> Vec<(&'static str, String)> {
    let shapes = &style.node_shape;
    let mut attrs = vec![("label", node.label.clone())];

    let (shape, border, fill, font) = match node.kind {
        NodeKind::Start => (
            None,
            style.start_border_color.clone(),
            style.start_bg.clone(),
            style.start_font_color.as_str(),
        ),
        NodeKind::Agent => {
            let fill = node.color.clone().unwrap_or_else(|| style.fill_color.clone());
            (
                Some(shapes.agent.as_str()),
                darken_color(&fill, AGENT_BORDER_DARKEN),
                fill,
                style.node_font_color.as_str(),
            )
        }
        NodeKind::CodeExecution { success } => (
            Some(shapes.code_execution.as_str()),
            outcome_color(success, style).to_string(),
            style.fill_color.clone(),
            style.node_font_color.as_str(),
        ),
        other => {
            let shape = match other {
                NodeKind::Summary => &shapes.summary,
                NodeKind::Termination => &shapes.terminate,
                NodeKind::Invocation => &shapes.invocation,
                NodeKind::Info => &shapes.info,
                NodeKind::CustomReplyFunc => &shapes.custom_reply_func,
                NodeKind::Human => &shapes.human,
                _ => &shapes.code_execution,
            };
            (
                Some(shape.as_str()),
                style.border_color.clone(),
                style.fill_color.clone(),
                style.node_font_color.as_str(),
            )
        }
    };

    if let Some(shape) = shape {
        attrs.push(("shape", shape.to_string()));
    }
    attrs.push(("color", border));
    attrs.push(("style", "filled".to_string()));
    attrs.push(("fillcolor", fill));
    attrs.push(("fontcolor", font.to_string()));
    attrs.push(("fontname", style.font_names.clone()));
    attrs.push(("penwidth", style.node_pen_width.clone()));
    if !node.tooltip.is_empty() {
        attrs.push(("tooltip", node.tooltip.clone()));
    }
    if !node.href.is_empty() {
        attrs.push(("href", node.href.clone()));
    }
    attrs
}

fn edge_attrs(edge: &Edge, style: &StyleConfig) -> Vec<(&'static str, String)> {
    let color = match edge.kind {
        EdgeKind::Outcome { success } => outcome_color(success, style).to_string(),
        _ => style.edge_color.clone(),
    };
    // Return and start edges only carry a colour
    if matches!(edge.kind, EdgeKind::Return | EdgeKind::Start) {
        return vec![("color", color)];
    }

    let mut attrs = Vec::new();
    if !edge.label.is_empty() {
        attrs.push(("label", edge.label.clone()));
    }
    if !edge.tooltip.is_empty() {
        attrs.push(("labeltooltip", edge.tooltip.clone()));
    }
    if !edge.href.is_empty() {
        attrs.push(("labelhref", edge.href.clone()));
    }
    if edge.dir == EdgeDir::Both {
        attrs.push(("dir", "both".to_string()));
    }
    attrs.push(("labeldistance", style.label_distance.clone()));
    attrs.push(("fontcolor", style.font_color.clone()));
    attrs.push(("color", color));
    attrs.push(("fontname", style.font_names.clone()));
    if edge.kind == EdgeKind::Message {
        let line = match edge.line {
            LineStyle::Solid => &style.edge_style,
            LineStyle::Dashed => &style.edge_style_silent,
        };
        attrs.push(("style", line.clone()));
    }
    attrs
}

fn cluster_attrs(scene: &Scene, style: &StyleConfig) -> Vec<(&'static str, String)> {
    let fill = scene.color.clone().unwrap_or_else(|| style.nested_bg.clone());
    vec![
        ("style", "rounded, filled".to_string()),
        ("color", darken_color(&fill, CLUSTER_BORDER_DARKEN)),
        ("fillcolor", fill),
        ("label", scene.label.clone()),
        ("labeljust", "r".to_string()),
        ("labelloc", "b".to_string()),
        ("penwidth", "5".to_string()),
        ("margin", "35".to_string()),
        ("fontcolor", style.font_color.clone()),
        ("fontname", style.font_names.clone()),
    ]
}

fn outcome_color(success: bool, style: &StyleConfig) -> &str {
    if success {
        &style.edge_success_color
    } else {
        &style.edge_unsuccessful_color
    }
}

/// Escape a string for a double-quoted DOT attribute.
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
