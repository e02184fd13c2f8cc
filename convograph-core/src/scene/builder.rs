//! Recursive scene builder
//!
//! Walks [`LoadedLog::ordered`] once. Each nested chat or group chat speaker
//! selection opens a child level: the builder recurses into it, and the child
//! returns a [`LevelExit`] telling the parent where to resume.
//!
//! ## Level state
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `current_agent` | agent that last received a message in this level |
//! | `last_termination` | latest termination event in this level |
//! | `pending_invocations` | LLM calls not yet attached to a reply or summary |
//! | `last_nested_agent` | exit agent of the most recent child level |
//!
//! Agent occurrence numbers and colours are shared across levels and owned
//! by the builder, not by the agent records.

use super::extract::{
    assign_agent_color, create_tooltip, extract_code_exitcode, extract_invocation_response,
    summary_text, truncate_string, value_text, UNKNOWN_EXIT_CODE,
};
use super::{
    Edge, EdgeDir, EdgeKind, LineStyle, Node, NodeKind, Scene, SceneGraph, SceneItem, SceneKind,
    START_NODE_ID,
};
use crate::config::StyleConfig;
use crate::error::{Error, Result};
use crate::ingest::{resolve_client, LoadedLog};
use crate::types::{Agent, Client, Event, Invocation, RecordRef};
use std::collections::HashMap;

// Event names written by the framework
const NESTED_CHAT_START: &str = "_summary_from_nested_chat start";
const NESTED_CHAT_END: &str = "_summary_from_nested_chat end";
const SPEAKER_SELECT_START: [&str; 2] = ["_auto_select_speaker start", "a_auto_select_speaker start"];
const SPEAKER_SELECT_END: [&str; 2] = ["_auto_select_speaker end", "a_auto_select_speaker end"];
const RECEIVED_MESSAGE: &str = "received_message";
const REPLY_FUNC_EXECUTED: &str = "reply_func_executed";
const TOOL_CALLS_REPLY: [&str; 2] = ["generate_tool_calls_reply", "a_generate_tool_calls_reply"];
const SUMMARY_EVENTS: [&str; 2] = ["_reflection_with_llm_as_summary", "_last_msg_as_summary"];
const MAX_TURNS: &str = "_initiate_chat max_turns";
const CALLABLE_SPEAKER_PREFIX: &str = "_prepare_and_select_agents:callable:";

// Reply functions with dedicated handling
const TERMINATION_AND_HUMAN_REPLY: &str = "check_termination_and_human_reply";
const SUMMARY_FROM_NESTED_CHATS: &str = "_summary_from_nested_chats";
const CODE_EXECUTION_REPLY: &str = "generate_code_execution_reply";

/// Module prefix of the framework's built-in reply functions.
const BUILTIN_REPLY_MODULE_PREFIX: &str = "autogen.";

/// Longest next-speaker text shown in a speaker selection info node.
const NEXT_SPEAKER_MAX_LEN: usize = 30;

/// What an event name asks the builder to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventAction<'e> {
    OpenLevel(SceneKind),
    CloseLevel,
    ReceivedMessage,
    ReplyFuncExecuted,
    ToolCallsReply,
    Summary,
    MaxTurns,
    CallableSpeaker(&'e str),
    Ignore,
}

fn event_action(name: &str) -> EventAction<'_> {
    if name == NESTED_CHAT_START {
        EventAction::OpenLevel(SceneKind::NestedChat)
    } else if SPEAKER_SELECT_START.contains(&name) {
        EventAction::OpenLevel(SceneKind::SpeakerSelection)
    } else if name == NESTED_CHAT_END || SPEAKER_SELECT_END.contains(&name) {
        EventAction::CloseLevel
    } else if name == RECEIVED_MESSAGE {
        EventAction::ReceivedMessage
    } else if name == REPLY_FUNC_EXECUTED {
        EventAction::ReplyFuncExecuted
    } else if TOOL_CALLS_REPLY.contains(&name) {
        EventAction::ToolCallsReply
    } else if SUMMARY_EVENTS.contains(&name) {
        EventAction::Summary
    } else if name == MAX_TURNS {
        EventAction::MaxTurns
    } else if let Some(rest) = name.strip_prefix(CALLABLE_SPEAKER_PREFIX) {
        EventAction::CallableSpeaker(rest.split(':').next().unwrap_or(rest))
    } else {
        EventAction::Ignore
    }
}

/// Per-agent diagram state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRenderState {
    /// Number of nodes drawn for this agent so far; 0 until first drawn
    pub occurrence: u32,
    pub color: String,
}

impl AgentRenderState {
    /// Node id of the agent's current occurrence.
    pub fn node_id(&self, agent_id: u64) -> String {
        format!("{}_{}", agent_id, self.occurrence)
    }
}

/// Where a finished level hands control back to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelExit {
    /// Index into the ordered records right after the level's end event
    pub resume_index: usize,
    /// Agent active when the level ended
    pub exit_agent: Option<u64>,
}

/// Scoping state for one conversation level.
struct Level<'a> {
    kind: SceneKind,
    depth: usize,
    /// Event that opened this level (`None` for the root)
    opened_by: Option<&'a Event>,
    /// Agent that started the nested conversation
    parent_agent: Option<u64>,
    linked_to_parent: bool,
    current_agent: Option<u64>,
    last_termination: Option<&'a Event>,
    pending_invocations: Vec<&'a Invocation>,
    last_nested_agent: Option<u64>,
}

impl<'a> Level<'a> {
    fn root() -> Self {
        Self {
            kind: SceneKind::Root,
            depth: 0,
            opened_by: None,
            parent_agent: None,
            linked_to_parent: false,
            current_agent: None,
            last_termination: None,
            pending_invocations: Vec::new(),
            last_nested_agent: None,
        }
    }

    fn nested(kind: SceneKind, depth: usize, opened_by: &'a Event, parent_agent: u64) -> Self {
        Self {
            kind,
            depth,
            opened_by: Some(opened_by),
            parent_agent: Some(parent_agent),
            ..Self::root()
        }
    }

    fn is_top(&self) -> bool {
        self.kind == SceneKind::Root
    }
}

/// Rebuilds the diagram of a loaded log.
///
/// ```rust,ignore
/// let log = convograph_core::ingest::load_path(path)?;
/// let graph = SceneBuilder::new(&log, &config.style, 64).build()?;
/// ```
pub struct SceneBuilder<'a> {
    log: &'a LoadedLog,
    style: &'a StyleConfig,
    max_depth: usize,
    agents: HashMap<u64, AgentRenderState>,
    wrapper_clients: HashMap<u64, Vec<u64>>,
    start_drawn: bool,
    next_cluster: usize,
    next_info: usize,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(log: &'a LoadedLog, style: &'a StyleConfig, max_depth: usize) -> Self {
        Self {
            log,
            style,
            max_depth,
            agents: HashMap::new(),
            wrapper_clients: log.wrapper_clients.clone(),
            start_drawn: false,
            next_cluster: 0,
            next_info: 0,
        }
    }

    /// Build the scene graph.
    ///
    /// Every call starts from fresh builder state, so repeated builds of the
    /// same log produce identical graphs.
    ///
    /// Fails with [`Error::Config`] when the style has no usable palette.
    pub fn build(&mut self) -> Result<SceneGraph> {
        self.style.validate()?;
        self.agents.clear();
        self.wrapper_clients = self.log.wrapper_clients.clone();
        self.start_drawn = false;
        self.next_cluster = 0;
        self.next_info = 0;

        let mut root = Scene::root();
        let mut level = Level::root();
        self.process_level(&mut level, &mut root, 0)?;

        let graph = SceneGraph { root };
        tracing::info!(
            nodes = graph.all_nodes().len(),
            edges = graph.all_edges().len(),
            agents = self.agents.len(),
            "Scene graph built"
        );
        Ok(graph)
    }

    /// Render state of an agent after the last build.
    pub fn render_state(&self, agent_id: u64) -> Option<&AgentRenderState> {
        self.agents.get(&agent_id)
    }

    fn process_level(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        start: usize,
    ) -> Result<LevelExit> {
        let log = self.log;
        let mut i = start;

        while i < log.ordered.len() {
            match &log.ordered[i] {
                RecordRef::Client(id) => {
                    if let Some(client) = log.clients.get(id) {
                        self.register_client(client);
                    }
                }
                RecordRef::Agent(id) => {
                    if let Some(agent) = log.agents.get(*id) {
                        self.ensure_render_state(agent);
                    }
                }
                RecordRef::Event(key) => {
                    let Some(event) = log.events.get(key) else {
                        i += 1;
                        continue;
                    };
                    match event_action(&event.event_name) {
                        EventAction::OpenLevel(kind) => {
                            let exit = self.open_level(level, scene, event, kind, i)?;
                            level.last_nested_agent = exit.exit_agent;
                            i = exit.resume_index;
                            continue;
                        }
                        EventAction::CloseLevel => {
                            if level.is_top() {
                                return Err(Error::UnexpectedLevelEnd {
                                    event_name: event.event_name.clone(),
                                    event_id: event.event_id.clone(),
                                });
                            }
                            tracing::debug!(kind = %level.kind, depth = level.depth, "Level closed");
                            return Ok(LevelExit {
                                resume_index: i + 1,
                                exit_agent: level.current_agent,
                            });
                        }
                        EventAction::ReceivedMessage => {
                            self.on_received_message(level, scene, event)?
                        }
                        EventAction::ReplyFuncExecuted => {
                            self.on_reply_func_executed(level, scene, event)?
                        }
                        EventAction::ToolCallsReply => self.on_tool_calls_reply(level, scene, event)?,
                        EventAction::Summary => self.on_summary(level, scene, event)?,
                        EventAction::MaxTurns => self.on_max_turns(level, scene, event)?,
                        EventAction::CallableSpeaker(callable) => {
                            self.on_callable_speaker(scene, event, callable)?
                        }
                        EventAction::Ignore => {
                            tracing::trace!(event_name = %event.event_name, "Event not drawn");
                        }
                    }
                }
                RecordRef::Invocation(key) => {
                    if let Some(invocation) = log.invocations.get(key) {
                        self.on_invocation(level, scene, invocation)?;
                    }
                }
            }
            i += 1;
        }

        if let Some(opened_by) = level.opened_by {
            return Err(Error::UnclosedLevel {
                kind: level.kind.to_string(),
                event_id: opened_by.event_id.clone(),
            });
        }

        Ok(LevelExit {
            resume_index: i,
            exit_agent: level.current_agent,
        })
    }

    fn open_level(
        &mut self,
        parent: &Level<'a>,
        scene: &mut Scene,
        event: &'a Event,
        kind: SceneKind,
        index: usize,
    ) -> Result<LevelExit> {
        let depth = parent.depth + 1;
        if depth > self.max_depth {
            return Err(Error::NestingTooDeep {
                limit: self.max_depth,
            });
        }

        let parent_agent = self.log.agent_id_by_name(&event.source_name)?;
        let (chat_key, color) = match kind {
            SceneKind::NestedChat => ("nested_chat_id", &self.style.nested_bg),
            _ => ("auto_select_speaker_id", &self.style.groupchat_bg),
        };
        tracing::debug!(
            kind = %kind,
            depth,
            chat_id = event.payload_str(chat_key).unwrap_or_default(),
            parent = %event.source_name,
            "Level opened"
        );

        let id = format!("cluster_{}", self.next_cluster);
        self.next_cluster += 1;
        let mut child_scene = Scene::nested(id, kind, color.clone());
        let mut child = Level::nested(kind, depth, event, parent_agent);

        let exit = self.process_level(&mut child, &mut child_scene, index + 1)?;
        scene.items.push(SceneItem::Scene(child_scene));
        Ok(exit)
    }

    // ============================================
    // Agents and clients
    // ============================================

    fn register_client(&mut self, client: &Client) {
        let ids = self.wrapper_clients.entry(client.wrapper_id).or_default();
        if !ids.contains(&client.client_id) {
            ids.push(client.client_id);
        }
    }

    fn ensure_render_state(&mut self, agent: &Agent) -> &mut AgentRenderState {
        let style = self.style;
        let colored = self.agents.len();
        self.agents.entry(agent.id).or_insert_with(|| {
            let color = assign_agent_color(&style.palette, colored).to_string();
            tracing::debug!(agent = %agent.name, color = %color, "Agent colour assigned");
            AgentRenderState {
                occurrence: 0,
                color,
            }
        })
    }

    /// Draw a new occurrence of `agent`, preceded by the start node if this is
    /// the first agent node of the diagram.
    fn add_agent_node(&mut self, scene: &mut Scene, agent: &Agent) -> String {
        let state = self.ensure_render_state(agent);
        state.occurrence += 1;
        let occurrence = state.occurrence;
        let node_id = state.node_id(agent.id);
        let color = state.color.clone();

        let first = !self.start_drawn;
        if first {
            scene.add_node(Node::new(START_NODE_ID, "START", NodeKind::Start));
            self.start_drawn = true;
        }
        scene.add_node(
            Node::new(
                node_id.clone(),
                format!("{} ({})", agent.name, occurrence),
                NodeKind::Agent,
            )
            .with_color(color),
        );
        if first {
            scene.add_edge(Edge::new(START_NODE_ID, node_id.clone(), EdgeKind::Start));
        }
        node_id
    }

    /// Node id of the agent's current occurrence, drawing one if it has none yet.
    fn agent_node(&mut self, scene: &mut Scene, agent: &Agent) -> String {
        let state = self.ensure_render_state(agent);
        if state.occurrence == 0 {
            return self.add_agent_node(scene, agent);
        }
        state.node_id(agent.id)
    }

    fn current_agent(&self, level: &Level<'a>, event: &Event) -> Result<&'a Agent> {
        let log = self.log;
        level
            .current_agent
            .and_then(|id| log.agents.get(id))
            .ok_or_else(|| Error::NoActiveAgent {
                event_name: event.event_name.clone(),
                event_id: event.event_id.clone(),
            })
    }

    fn agent_by_name(&self, name: &str) -> Result<&'a Agent> {
        let log = self.log;
        log.agents.by_name(name)
    }

    // ============================================
    // Edge helpers
    // ============================================

    /// Labeled edge from an agent to a called node plus the unlabeled way back.
    fn add_return_edges(
        &mut self,
        scene: &mut Scene,
        agent: &Agent,
        target: &str,
        label: &str,
        tooltip: String,
    ) {
        let agent_id = self.agent_node(scene, agent);
        scene.add_edge(
            Edge::new(agent_id.clone(), target, EdgeKind::Link)
                .with_label(label)
                .with_tooltip(tooltip),
        );
        scene.add_edge(Edge::new(target, agent_id, EdgeKind::Return));
    }

    fn flush_invocations_to_agent(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        event: &Event,
        label: &str,
    ) -> Result<()> {
        if level.pending_invocations.is_empty() {
            return Ok(());
        }
        let source = self.agent_by_name(&event.source_name)?;
        for invocation in std::mem::take(&mut level.pending_invocations) {
            self.add_return_edges(
                scene,
                source,
                &invocation.invocation_id,
                label,
                extract_invocation_response(&invocation.response),
            );
        }
        Ok(())
    }

    // ============================================
    // Event handlers
    // ============================================

    fn on_received_message(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        event: &'a Event,
    ) -> Result<()> {
        let line = if event.payload_flag("silent") {
            LineStyle::Dashed
        } else {
            LineStyle::Solid
        };
        let sender = self.agent_by_name(required_str(event, "sender")?)?;
        let recipient = self.agent_by_name(&event.source_name)?;

        if level.is_top() && level.current_agent.is_none() {
            self.add_agent_node(scene, sender);
        }

        if !level.is_top() && !level.linked_to_parent {
            let log = self.log;
            if let Some(parent) = level.parent_agent.and_then(|id| log.agents.get(id)) {
                if parent.id != sender.id {
                    // The nested conversation starts elsewhere: draw the sender
                    // inside and link it to the agent that opened the level.
                    self.add_agent_node(scene, sender);
                    let (label, dir) = match level.kind {
                        SceneKind::SpeakerSelection => ("Auto Select Speaker", EdgeDir::Both),
                        _ => ("Nested Chat", EdgeDir::Forward),
                    };
                    let from = self.agent_node(scene, parent);
                    let to = self.agent_node(scene, sender);
                    scene.add_edge(
                        Edge::new(from, to, EdgeKind::Message)
                            .with_label(label)
                            .with_dir(dir)
                            .with_line(line),
                    );
                }
            }
            level.linked_to_parent = true;
        } else if level.last_nested_agent == Some(sender.id) {
            // Resuming after a nested level with the agent that closed it;
            // its existing node is reused.
            tracing::trace!(agent = %sender.name, "Resuming from nested level");
            level.last_nested_agent = None;
        }

        self.add_agent_node(scene, recipient);

        let tooltip = event
            .payload
            .get("message")
            .map(create_tooltip)
            .unwrap_or_default();
        let from = self.agent_node(scene, sender);
        let to = self.agent_node(scene, recipient);
        scene.add_edge(
            Edge::new(from, to, EdgeKind::Message)
                .with_label(&event.event_name)
                .with_tooltip(tooltip)
                .with_line(line),
        );

        level.current_agent = Some(recipient.id);
        Ok(())
    }

    fn on_reply_func_executed(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        event: &'a Event,
    ) -> Result<()> {
        // Intermediate reply attempts are not drawn
        if !event.payload_flag("final") {
            return Ok(());
        }

        let func = required_str(event, "reply_func_name")?;
        let reply = event.payload.get("reply").cloned().unwrap_or_default();

        match func {
            TERMINATION_AND_HUMAN_REPLY if reply.is_null() => {
                let agent = self.current_agent(level, event)?;
                scene.add_node(Node::new(&event.event_id, "Termination", NodeKind::Termination));
                let from = self.agent_node(scene, agent);
                scene.add_edge(
                    Edge::new(from, &event.event_id, EdgeKind::Link).with_label(func),
                );
                level.last_termination = Some(event);
            }
            TERMINATION_AND_HUMAN_REPLY => {
                let source = self.agent_by_name(&event.source_name)?;
                scene.add_node(Node::new(&event.event_id, "Human Reply", NodeKind::Human));
                self.add_return_edges(scene, source, &event.event_id, func, create_tooltip(&reply));
            }
            // Drawn by the nested level's own summary event
            SUMMARY_FROM_NESTED_CHATS => {}
            CODE_EXECUTION_REPLY => {
                let text = match &reply {
                    serde_json::Value::String(s) => s.clone(),
                    other => create_tooltip(other),
                };
                let exitcode = extract_code_exitcode(&text);
                if exitcode != UNKNOWN_EXIT_CODE {
                    let success = exitcode == 0;
                    let executing = self.agent_by_name(&event.source_name)?;
                    scene.add_node(
                        Node::new(
                            &event.event_id,
                            "Code Execution",
                            NodeKind::CodeExecution { success },
                        )
                        .with_tooltip(text),
                    );
                    let agent_id = self.agent_node(scene, executing);
                    scene.add_edge(
                        Edge::new(&event.event_id, agent_id, EdgeKind::Outcome { success })
                            .with_label(if success { "Success" } else { "Unsuccessful" })
                            .with_dir(EdgeDir::Both),
                    );
                }
            }
            _ => {
                let module = required_str(event, "reply_func_module")?;
                if !module.starts_with(BUILTIN_REPLY_MODULE_PREFIX) {
                    let agent = self.current_agent(level, event)?;
                    scene.add_node(Node::new(&event.event_id, func, NodeKind::CustomReplyFunc));
                    self.add_return_edges(
                        scene,
                        agent,
                        &event.event_id,
                        "",
                        create_tooltip(&reply),
                    );
                }
            }
        }

        self.flush_invocations_to_agent(level, scene, event, func)
    }

    fn on_tool_calls_reply(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        event: &'a Event,
    ) -> Result<()> {
        let function_name = required_str(event, "function_name")?;
        let agent = self.current_agent(level, event)?;
        scene.add_node(Node::new(&event.event_id, function_name, NodeKind::FunctionCall));
        let return_value = event
            .payload
            .get("return_value")
            .map(value_text)
            .unwrap_or_default();
        self.add_return_edges(scene, agent, &event.event_id, &event.event_name, return_value);
        Ok(())
    }

    fn on_callable_speaker(&mut self, scene: &mut Scene, event: &'a Event, callable: &str) -> Result<()> {
        let next_agent = required_str(event, "next_agent")?;
        let source = self.agent_by_name(&event.source_name)?;
        scene.add_node(Node::new(&event.event_id, callable, NodeKind::FunctionCall));
        self.add_return_edges(scene, source, &event.event_id, next_agent, String::new());
        Ok(())
    }

    fn on_summary(&mut self, level: &mut Level<'a>, scene: &mut Scene, event: &'a Event) -> Result<()> {
        let summary = event
            .payload
            .get("summary")
            .and_then(summary_text)
            .ok_or_else(|| Error::Summary(event.event_id.clone()))?;
        let agent = self.current_agent(level, event)?;

        scene.add_node(Node::new(&event.event_id, "Summarize", NodeKind::Summary));

        // Link from whichever happened later: the termination or the agent
        let from = match level.last_termination {
            Some(termination) if termination.timestamp > agent.created_ts => {
                termination.event_id.clone()
            }
            _ => self.agent_node(scene, agent),
        };
        scene.add_edge(
            Edge::new(from, &event.event_id, EdgeKind::Link)
                .with_label(&event.event_name)
                .with_tooltip(summary.clone()),
        );

        for invocation in std::mem::take(&mut level.pending_invocations) {
            scene.add_edge(
                Edge::new(&event.event_id, &invocation.invocation_id, EdgeKind::Link)
                    .with_label(&event.event_name)
                    .with_tooltip(summary.clone()),
            );
            scene.add_edge(Edge::new(
                &invocation.invocation_id,
                &event.event_id,
                EdgeKind::Return,
            ));
        }

        if level.kind == SceneKind::SpeakerSelection {
            let info_id = format!("info_{}", self.next_info);
            self.next_info += 1;
            scene.add_node(Node::new(
                info_id.clone(),
                truncate_string(&summary, NEXT_SPEAKER_MAX_LEN),
                NodeKind::Info,
            ));
            scene.add_edge(
                Edge::new(&event.event_id, info_id, EdgeKind::Link).with_label("next speaker"),
            );
        }
        Ok(())
    }

    fn on_max_turns(&mut self, level: &mut Level<'a>, scene: &mut Scene, event: &'a Event) -> Result<()> {
        let turns = event
            .payload
            .get("turns")
            .map(value_text)
            .ok_or_else(|| missing_field(event, "turns"))?;
        let agent = self.current_agent(level, event)?;

        scene.add_node(Node::new(&event.event_id, "Termination", NodeKind::Termination));
        let from = self.agent_node(scene, agent);
        scene.add_edge(
            Edge::new(from, &event.event_id, EdgeKind::Link)
                .with_label(format!("Max turns hit ({})", turns)),
        );
        level.last_termination = Some(event);
        Ok(())
    }

    fn on_invocation(
        &mut self,
        level: &mut Level<'a>,
        scene: &mut Scene,
        invocation: &'a Invocation,
    ) -> Result<()> {
        let client = resolve_client(
            &self.log.clients,
            &self.wrapper_clients,
            invocation.client_id,
            invocation.wrapper_id,
        )?;
        scene.add_node(Node::new(
            &invocation.invocation_id,
            &client.class_name,
            NodeKind::Invocation,
        ));
        level.pending_invocations.push(invocation);
        Ok(())
    }
}

fn missing_field(event: &Event, field: &str) -> Error {
    Error::MissingField {
        event_name: event.event_name.clone(),
        field: field.to_string(),
    }
}

fn required_str<'e>(event: &'e Event, field: &str) -> Result<&'e str> {
    event
        .payload_str(field)
        .ok_or_else(|| missing_field(event, field))
}
