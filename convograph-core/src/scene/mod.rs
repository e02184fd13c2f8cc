//! Scene graph: the abstract diagram rebuilt from a log
//!
//! The builder replays the ordered records of a [`LoadedLog`](crate::ingest::LoadedLog)
//! and emits nodes, edges and nested scenes. Nothing here knows about
//! Graphviz; shapes and colours are resolved by [`crate::render`].
//!
//! ```text
//! Scene (Root)
//! ├─ Node start
//! ├─ Node 1_1 "A (1)"
//! ├─ Edge start → 1_1
//! ├─ Scene (NestedChat)
//! │  ├─ Edge 1_1 → 2_1 "Nested Chat"
//! │  └─ ...
//! └─ ...
//! ```

mod builder;
pub mod extract;

pub use builder::{AgentRenderState, LevelExit, SceneBuilder};

use serde::Serialize;

/// Id of the single start node.
pub const START_NODE_ID: &str = "start";

/// Kind of a scene (one per builder level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    /// The top-level conversation
    Root,
    /// A nested chat started by an agent
    NestedChat,
    /// A group chat's automatic next-speaker selection
    SpeakerSelection,
}

impl SceneKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            SceneKind::Root => "Main Flow",
            SceneKind::NestedChat => "Nested Chat",
            SceneKind::SpeakerSelection => "Group Chat Auto Select Speaker",
        }
    }
}

impl std::fmt::Display for SceneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What a node represents; decides its shape and colours when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Agent,
    Summary,
    Termination,
    Invocation,
    Info,
    CodeExecution { success: bool },
    CustomReplyFunc,
    Human,
    FunctionCall,
}

/// What an edge represents; decides its colour and label styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Agent to agent message
    Message,
    /// Labeled connection (agent/event to event, parent to nested chat)
    Link,
    /// Unlabeled way back from a called node
    Return,
    /// Code execution result back to the executing agent
    Outcome { success: bool },
    /// From the start node to the first agent
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    Solid,
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDir {
    Forward,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    /// Fill colour override (agent nodes)
    pub color: Option<String>,
    pub tooltip: String,
    pub href: String,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            color: None,
            tooltip: String::new(),
            href: String::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = tooltip.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: String,
    pub tooltip: String,
    pub href: String,
    pub kind: EdgeKind,
    pub line: LineStyle,
    pub dir: EdgeDir,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: String::new(),
            tooltip: String::new(),
            href: String::new(),
            kind,
            line: LineStyle::Solid,
            dir: EdgeDir::Forward,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = tooltip.into();
        self
    }

    pub fn with_line(mut self, line: LineStyle) -> Self {
        self.line = line;
        self
    }

    pub fn with_dir(mut self, dir: EdgeDir) -> Self {
        self.dir = dir;
        self
    }
}

/// One element of a scene, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum SceneItem {
    Node(Node),
    Edge(Edge),
    Scene(Scene),
}

/// A (possibly nested) container of diagram elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    /// Graphviz subgraph name (`cluster_<n>` for nested scenes)
    pub id: String,
    pub kind: SceneKind,
    pub label: String,
    /// Background colour for nested scenes
    pub color: Option<String>,
    pub items: Vec<SceneItem>,
}

impl Scene {
    pub fn root() -> Self {
        Self {
            id: "root".to_string(),
            kind: SceneKind::Root,
            label: String::new(),
            color: None,
            items: Vec::new(),
        }
    }

    pub fn nested(id: String, kind: SceneKind, color: String) -> Self {
        Self {
            id,
            kind,
            label: kind.display_name().to_string(),
            color: Some(color),
            items: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.items.push(SceneItem::Node(node));
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.items.push(SceneItem::Edge(edge));
    }

    /// Nodes declared directly in this scene.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.items.iter().filter_map(|item| match item {
            SceneItem::Node(n) => Some(n),
            _ => None,
        })
    }

    /// Edges declared directly in this scene.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.items.iter().filter_map(|item| match item {
            SceneItem::Edge(e) => Some(e),
            _ => None,
        })
    }

    /// Nested scenes directly inside this one.
    pub fn children(&self) -> impl Iterator<Item = &Scene> {
        self.items.iter().filter_map(|item| match item {
            SceneItem::Scene(s) => Some(s),
            _ => None,
        })
    }
}

/// The complete diagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneGraph {
    pub root: Scene,
}

impl SceneGraph {
    /// All nodes, depth-first in emission order.
    pub fn all_nodes(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        collect(&self.root, &mut |item| {
            if let SceneItem::Node(n) = item {
                out.push(n);
            }
        });
        out
    }

    /// All edges, depth-first in emission order.
    pub fn all_edges(&self) -> Vec<&Edge> {
        let mut out = Vec::new();
        collect(&self.root, &mut |item| {
            if let SceneItem::Edge(e) = item {
                out.push(e);
            }
        });
        out
    }

    /// Find a node anywhere in the graph.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.all_nodes().into_iter().find(|n| n.id == id)
    }
}

fn collect<'a>(scene: &'a Scene, f: &mut dyn FnMut(&'a SceneItem)) {
    for item in &scene.items {
        f(item);
        if let SceneItem::Scene(child) = item {
            collect(child, f);
        }
    }
}
