//! The agent-script interpreter.
//!
//! An [`ExecutionModel`] walks a script's nodes in declaration order and
//! applies each segment to its [`ExecutionState`]. `@effect run` is the only
//! point where it stops on its own: [`ExecutionModel::step`] returns
//! [`StepOutcome::Suspended`] with a [`RunRequest`], and the caller resumes it
//! with the agent's answer.
//!
//! Control flow is kept on an explicit frame stack rather than the Rust call
//! stack, so a `run` inside a loop body suspends mid-iteration and resumes
//! with the next segment of the same iteration.
//!
//! A failure keeps the failing segment. [`ExecutionModel::retry`] re-enters
//! it without replaying anything that was already committed.

use super::registry::FunctionRegistry;
use super::state::{ExecutionState, ToolCall};
use crate::ast::{EffectCall, Expr, Node, Template};
use crate::context::Context;
use crate::error::EffectError;
use crate::eval::{LoopItems, evaluate, evaluate_condition, evaluate_iterable};
use crate::events::{EventKind, SessionEvent};
use crate::render::Renderer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Variable that receives the agent's response when none is configured.
pub const DEFAULT_LAST_RESULT_VARIABLE: &str = "last_result";

/// Lifecycle of an [`ExecutionModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    Running,
    /// Waiting for the agent's response to a run.
    Suspended,
    Completed,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ready => write!(f, "ready"),
            Status::Running => write!(f, "running"),
            Status::Suspended => write!(f, "suspended"),
            Status::Completed => write!(f, "completed"),
            Status::Failed => write!(f, "failed"),
        }
    }
}

/// What the agent is handed when a script runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Turn number of this run (0 for the first).
    pub turn: u32,
    /// Output buffer fragments, in order.
    pub buffer: Vec<String>,
    /// Registered tools, in registration order.
    pub tools: Vec<String>,
}

impl RunRequest {
    /// The buffer as a single prompt string.
    pub fn prompt(&self) -> String {
        self.buffer.concat()
    }
}

/// The agent's answer to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
}

impl AgentResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// How a suspended run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Response(AgentResponse),
    /// The agent channel failed (including timeouts).
    Failed(String),
    Cancelled,
}

/// Result of [`ExecutionModel::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Suspended(RunRequest),
    Completed(ExecutionState),
    Failed(EffectError),
}

/// Result of [`ExecutionModel::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// One segment was executed; more may follow.
    Advanced,
    Suspended(RunRequest),
    Completed,
}

enum Frame {
    /// A node sequence and the loop bindings active for it.
    Seq {
        nodes: Vec<Node>,
        pos: usize,
        bindings: Map<String, Value>,
    },
    /// A loop in progress. Each item pushes a `Seq` for the body.
    Loop {
        var: String,
        body: Vec<Node>,
        items: LoopItems,
        bindings: Map<String, Value>,
    },
}

/// The segment to re-enter after a failure.
enum RetryPoint {
    Segment {
        node: Node,
        bindings: Map<String, Value>,
    },
    /// A run that failed or was cancelled; retrying suspends again.
    Run(RunRequest),
}

/// Interprets one script for one session.
///
/// ```
/// use margarita::exec::{AgentResponse, ExecutionModel, FunctionRegistry, Resume, StepOutcome};
/// use margarita::parser::parse;
/// use std::sync::Arc;
///
/// let template = parse("<<What is 2 + 2?>>\n@effect run\n<<Answer: ${last_result}>>")?;
/// let mut model = ExecutionModel::new(Arc::new(template), Arc::new(FunctionRegistry::new()));
///
/// let StepOutcome::Suspended(request) = model.step(None) else { panic!() };
/// assert_eq!(request.prompt(), "What is 2 + 2?\n");
///
/// let resume = Resume::Response(AgentResponse::new("4"));
/// let StepOutcome::Completed(state) = model.step(Some(resume)) else { panic!() };
/// assert_eq!(state.buffer_text(), "What is 2 + 2?\n4Answer: 4\n");
/// # Ok::<(), margarita::error::ParseError>(())
/// ```
pub struct ExecutionModel {
    registry: Arc<FunctionRegistry>,
    renderer: Renderer,
    base: Map<String, Value>,
    base_dir: PathBuf,
    last_result_variable: String,
    state: ExecutionState,
    status: Status,
    frames: Vec<Frame>,
    /// Imported function name -> module it was imported from.
    call_table: HashMap<String, String>,
    events: Vec<SessionEvent>,
    /// Request of the run currently awaiting a response.
    pending_run: Option<RunRequest>,
    retry_point: Option<RetryPoint>,
}

impl ExecutionModel {
    pub fn new(template: Arc<Template>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            renderer: Renderer::default(),
            base: Map::new(),
            base_dir: PathBuf::from("."),
            last_result_variable: DEFAULT_LAST_RESULT_VARIABLE.to_string(),
            state: ExecutionState::new(),
            status: Status::Ready,
            frames: vec![Frame::Seq {
                nodes: template.ast.clone(),
                pos: 0,
                bindings: Map::new(),
            }],
            call_table: HashMap::new(),
            events: Vec::new(),
            pending_run: None,
            retry_point: None,
        }
    }

    /// Read-only variables visible to every segment, below the persistent
    /// store.
    pub fn with_context(mut self, ctx: &Context<'_>) -> Self {
        self.base = ctx.flatten();
        self
    }

    /// Seed the session from a previously saved state.
    pub fn with_state(mut self, state: ExecutionState) -> Self {
        self.state = state;
        self
    }

    /// Directory that top-level includes resolve against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Renderer used for prose segments (options and include cache).
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_last_result_variable(mut self, name: impl Into<String>) -> Self {
        self.last_result_variable = name.into();
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn into_state(self) -> ExecutionState {
        self.state
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Session events recorded so far.
    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Drain the recorded events.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.state.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.state.variables.insert(name.into(), value);
    }

    /// Run until the script suspends, completes or fails.
    ///
    /// Pass `None` to start and `Some` to answer a pending run. A call that
    /// does not match the model's status returns
    /// [`EffectError::InvalidStep`] and changes nothing.
    pub fn step(&mut self, resume: Option<Resume>) -> StepOutcome {
        match (self.status, resume) {
            (Status::Suspended, Some(resume)) => {
                if let Err(err) = self.resume(resume) {
                    self.retry_point = self.pending_run.take().map(RetryPoint::Run);
                    return StepOutcome::Failed(self.fail(err));
                }
            }
            (Status::Suspended, None) => {
                return StepOutcome::Failed(EffectError::InvalidStep(
                    "the model is suspended; a run response is required".to_string(),
                ));
            }
            (Status::Ready | Status::Running, None) => {}
            (Status::Ready | Status::Running, Some(_)) => {
                return StepOutcome::Failed(EffectError::InvalidStep(
                    "no run is pending".to_string(),
                ));
            }
            (status @ (Status::Completed | Status::Failed), _) => {
                return StepOutcome::Failed(EffectError::InvalidStep(format!(
                    "the model has already {}",
                    status
                )));
            }
        }

        self.run_until_stopped()
    }

    /// Re-enter the segment that failed and keep going.
    ///
    /// A failed or cancelled run suspends again with the request it was
    /// originally handed. Any other segment is executed again with the loop
    /// bindings it had. Effects committed before the failure are neither
    /// rolled back nor repeated. Returns [`EffectError::InvalidStep`] unless
    /// the model has failed.
    pub fn retry(&mut self) -> StepOutcome {
        if self.status != Status::Failed {
            return StepOutcome::Failed(EffectError::InvalidStep(format!(
                "only a failed model can be retried (model is {})",
                self.status
            )));
        }
        let Some(point) = self.retry_point.take() else {
            return StepOutcome::Failed(EffectError::InvalidStep(
                "no failed segment to retry".to_string(),
            ));
        };

        info!(turn = self.state.turn, "retrying failed segment");
        match point {
            RetryPoint::Run(request) => {
                self.status = Status::Suspended;
                self.record(EventKind::Retry, json!({"segment": "run"}));
                self.pending_run = Some(request.clone());
                StepOutcome::Suspended(request)
            }
            RetryPoint::Segment { node, bindings } => {
                self.status = Status::Running;
                self.record(EventKind::Retry, json!({"segment": segment_name(&node)}));
                match self.execute_segment(node, bindings) {
                    Ok(Progress::Suspended(request)) => StepOutcome::Suspended(request),
                    Ok(_) => self.run_until_stopped(),
                    Err(err) => StepOutcome::Failed(err),
                }
            }
        }
    }

    fn run_until_stopped(&mut self) -> StepOutcome {
        loop {
            match self.advance() {
                Ok(Progress::Advanced) => {}
                Ok(Progress::Suspended(request)) => return StepOutcome::Suspended(request),
                Ok(Progress::Completed) => return StepOutcome::Completed(self.state.clone()),
                Err(err) => return StepOutcome::Failed(err),
            }
        }
    }

    /// Execute exactly one segment.
    ///
    /// Errors move the model to [`Status::Failed`]; effects committed before
    /// the failing segment stay applied.
    pub fn advance(&mut self) -> Result<Progress, EffectError> {
        match self.status {
            Status::Ready | Status::Running => {}
            Status::Suspended => {
                return Err(EffectError::InvalidStep(
                    "the model is suspended; resume it with step()".to_string(),
                ));
            }
            status => {
                return Err(EffectError::InvalidStep(format!(
                    "the model has already {}",
                    status
                )));
            }
        }
        self.status = Status::Running;

        let Some((node, bindings)) = self.next_segment() else {
            self.status = Status::Completed;
            info!(turn = self.state.turn, "script completed");
            self.record(EventKind::Completed, json!({}));
            return Ok(Progress::Completed);
        };

        self.execute_segment(node, bindings)
    }

    /// Execute one segment, remembering it if it fails.
    fn execute_segment(
        &mut self,
        node: Node,
        bindings: Map<String, Value>,
    ) -> Result<Progress, EffectError> {
        match self.execute(&node, bindings.clone()) {
            Ok(Some(request)) => Ok(Progress::Suspended(request)),
            Ok(None) => Ok(Progress::Advanced),
            Err(err) => {
                self.retry_point = Some(RetryPoint::Segment { node, bindings });
                Err(self.fail(err))
            }
        }
    }

    /// Invoke a tool on behalf of the agent while a run is pending.
    ///
    /// `get_variable(name)` and `set_variable(name, value)` are always
    /// available. Any other tool must be registered for this run and provided
    /// by the host registry. Every call is recorded in the pending tool-call
    /// list until the run is resumed.
    pub fn invoke_tool(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EffectError> {
        if self.status != Status::Suspended {
            return Err(EffectError::InvalidStep(format!(
                "tools can only be invoked while a run is pending (model is {})",
                self.status
            )));
        }

        let result = match name {
            "get_variable" => {
                let var = string_arg(name, &args, 0)?;
                self.get_variable(var).cloned().unwrap_or(Value::Null)
            }
            "set_variable" => {
                let var = string_arg(name, &args, 0)?.to_string();
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                self.set_variable(var, value.clone());
                value
            }
            _ => {
                if !self.state.has_tool(name) {
                    return Err(EffectError::UnknownTool(name.to_string()));
                }
                let function = match self.call_table.get(name) {
                    Some(module) => self.registry.lookup(module, name).ok_or_else(|| {
                        EffectError::RegistryMiss {
                            name: name.to_string(),
                            module: module.clone(),
                        }
                    })?,
                    None => self
                        .registry
                        .get(name)
                        .ok_or_else(|| EffectError::UnknownFunction(name.to_string()))?,
                };
                function
                    .call(&args)
                    .map_err(|message| EffectError::FunctionFailed {
                        name: name.to_string(),
                        message,
                    })?
            }
        };

        debug!(tool = name, "tool invoked");
        self.record(EventKind::ToolCall, json!({"name": name, "args": args}));
        self.state.pending_tool_calls.push(ToolCall {
            name: name.to_string(),
            args,
            result: result.clone(),
        });
        Ok(result)
    }

    fn resume(&mut self, resume: Resume) -> Result<(), EffectError> {
        match resume {
            Resume::Response(response) => {
                self.state.buffer.push(response.text.clone());
                self.state.variables.insert(
                    self.last_result_variable.clone(),
                    Value::String(response.text),
                );
                self.state.pending_tool_calls.clear();
                self.state.turn += 1;
                self.pending_run = None;
                self.status = Status::Running;
                info!(turn = self.state.turn, "run resumed");
                self.record(EventKind::Resume, json!({}));
                Ok(())
            }
            Resume::Failed(message) => Err(EffectError::RunFailed(message)),
            Resume::Cancelled => Err(EffectError::Cancelled),
        }
    }

    fn fail(&mut self, err: EffectError) -> EffectError {
        self.status = Status::Failed;
        self.record(EventKind::Failed, json!({"error": err.to_string()}));
        err
    }

    /// Pop finished frames and return the next node to execute.
    fn next_segment(&mut self) -> Option<(Node, Map<String, Value>)> {
        loop {
            let next = match self.frames.last_mut()? {
                Frame::Seq {
                    nodes,
                    pos,
                    bindings,
                } => match nodes.get(*pos) {
                    Some(node) => {
                        *pos += 1;
                        return Some((node.clone(), bindings.clone()));
                    }
                    None => None,
                },
                Frame::Loop {
                    var,
                    body,
                    items,
                    bindings,
                } => items.next().map(|item| {
                    let mut scope = bindings.clone();
                    scope.insert(var.clone(), item);
                    Frame::Seq {
                        nodes: body.clone(),
                        pos: 0,
                        bindings: scope,
                    }
                }),
            };
            match next {
                Some(frame) => self.frames.push(frame),
                None => {
                    self.frames.pop();
                }
            }
        }
    }

    /// Base context, then persistent variables, then loop bindings.
    fn scope(&self, bindings: &Map<String, Value>) -> Context<'static> {
        let mut vars = self.base.clone();
        for (name, value) in self.state.variables.iter().chain(bindings) {
            vars.insert(name.clone(), value.clone());
        }
        Context::from_map(vars)
    }

    fn execute(
        &mut self,
        node: &Node,
        bindings: Map<String, Value>,
    ) -> Result<Option<RunRequest>, EffectError> {
        match node {
            Node::Conditional {
                branches,
                else_body,
            } => {
                let ctx = self.scope(&bindings);
                let mut chosen = else_body.as_ref();
                for branch in branches {
                    if evaluate_condition(&branch.condition, &ctx)? {
                        chosen = Some(&branch.body);
                        break;
                    }
                }
                if let Some(body) = chosen {
                    self.frames.push(Frame::Seq {
                        nodes: body.clone(),
                        pos: 0,
                        bindings,
                    });
                }
            }
            Node::Loop {
                var,
                iterable,
                body,
            } => {
                let items = evaluate_iterable(iterable, &self.scope(&bindings))?;
                self.frames.push(Frame::Loop {
                    var: var.clone(),
                    body: body.clone(),
                    items,
                    bindings,
                });
            }
            Node::FunctionImport { names, source } => {
                for name in names {
                    self.call_table.insert(name.clone(), source.clone());
                }
                debug!(?names, source = %source, "functions imported");
                self.record(EventKind::Import, json!({"names": names, "source": source}));
            }
            Node::StateAssign { name, value } => {
                let value = self.evaluate_value(value, &bindings)?;
                debug!(name = %name, "state assigned");
                self.state.variables.insert(name.clone(), value);
                self.record(EventKind::State, json!({"name": name}));
            }
            Node::Effect(effect) => return self.execute_effect(effect, &bindings),
            Node::Text(_) | Node::Interpolation(_) | Node::Block(_) | Node::Include(_) => {
                let ctx = self.scope(&bindings);
                let text = self.renderer.render(
                    std::slice::from_ref(node),
                    &ctx,
                    &self.base_dir,
                )?;
                let len = text.len();
                if !text.is_empty() {
                    self.state.buffer.push(text);
                }
                self.record(EventKind::Prose, json!({"bytes": len}));
            }
        }
        Ok(None)
    }

    fn execute_effect(
        &mut self,
        effect: &EffectCall,
        bindings: &Map<String, Value>,
    ) -> Result<Option<RunRequest>, EffectError> {
        debug!(effect = effect.kind_name(), "effect");
        match effect {
            EffectCall::FunctionCall { name, args, target } => {
                let module = self
                    .call_table
                    .get(name)
                    .ok_or_else(|| EffectError::UnknownFunction(name.clone()))?;
                let function = self.registry.lookup(module, name).ok_or_else(|| {
                    EffectError::RegistryMiss {
                        name: name.clone(),
                        module: module.clone(),
                    }
                })?;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate_value(arg, bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = function
                    .call(&args)
                    .map_err(|message| EffectError::FunctionFailed {
                        name: name.clone(),
                        message,
                    })?;
                if let Some(target) = target {
                    self.state.variables.insert(target.clone(), value);
                }
                self.record(
                    EventKind::FunctionCall,
                    json!({"name": name, "target": target}),
                );
            }
            EffectCall::ToolRegister(names) => {
                for name in names {
                    self.state.register_tool(name);
                }
                self.record(EventKind::ToolRegister, json!({"names": names}));
            }
            EffectCall::ContextClear => {
                self.state.buffer.clear();
                self.record(EventKind::ContextClear, json!({}));
            }
            EffectCall::ToolClear => {
                self.state.tools.clear();
                self.record(EventKind::ToolClear, json!({}));
            }
            EffectCall::Run => {
                let request = RunRequest {
                    turn: self.state.turn,
                    buffer: self.state.buffer.clone(),
                    tools: self.state.tools.clone(),
                };
                self.status = Status::Suspended;
                info!(
                    turn = request.turn,
                    tools = request.tools.len(),
                    "run suspended for agent"
                );
                self.record(EventKind::Run, json!({"tools": request.tools}));
                self.pending_run = Some(request.clone());
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    /// Evaluate an expression for storage. Absent becomes `null`.
    fn evaluate_value(
        &self,
        expr: &Expr,
        bindings: &Map<String, Value>,
    ) -> Result<Value, EffectError> {
        let ctx = self.scope(bindings);
        Ok(evaluate(expr, &ctx)?.unwrap_or(Value::Null))
    }

    fn record(&mut self, kind: EventKind, details: Value) {
        self.events
            .push(SessionEvent::new(kind, self.state.turn).with_details(details));
    }
}

impl fmt::Debug for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionModel")
            .field("status", &self.status)
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

fn segment_name(node: &Node) -> &'static str {
    match node {
        Node::Text(_) | Node::Interpolation(_) | Node::Block(_) => "prose",
        Node::Include(_) => "include",
        Node::Conditional { .. } => "conditional",
        Node::Loop { .. } => "loop",
        Node::FunctionImport { .. } => "import",
        Node::StateAssign { .. } => "state",
        Node::Effect(effect) => effect.kind_name(),
    }
}

fn string_arg<'a>(tool: &str, args: &'a [Value], index: usize) -> Result<&'a str, EffectError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| EffectError::FunctionFailed {
            name: tool.to_string(),
            message: format!("argument {} must be a variable name", index + 1),
        })
}
