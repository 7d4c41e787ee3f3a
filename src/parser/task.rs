// ABOUTME: Task definition tree structures and per-kind configuration
// ABOUTME: Defines the immutable, path-addressable task definitions parsed from workflow YAML

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Ordered name → definition mapping used by every task list (`do`, `try`, branches, ...).
///
/// In YAML a task list is a sequence of single-key maps, which keeps the
/// declaration order while letting each entry carry its own name.
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    tasks: IndexMap<String, Arc<TaskDefinition>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, definition: TaskDefinition) -> bool {
        self.tasks
            .insert(name.into(), Arc::new(definition))
            .is_none()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDefinition>> {
        self.tasks.get(name)
    }

    pub fn get_index(&self, index: usize) -> Option<(&String, &Arc<TaskDefinition>)> {
        self.tasks.get_index(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.tasks.get_index_of(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<TaskDefinition>)> {
        self.tasks.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}

impl<'de> Deserialize<'de> for TaskList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<IndexMap<String, TaskDefinition>> = Vec::deserialize(deserializer)?;
        let mut list = TaskList::new();
        for entry in entries {
            if entry.len() != 1 {
                return Err(D::Error::custom(format!(
                    "each task list entry must declare exactly one named task, found {}",
                    entry.len()
                )));
            }
            for (name, definition) in entry {
                if !list.push(name.clone(), definition) {
                    return Err(D::Error::custom(format!("duplicate task name '{}'", name)));
                }
            }
        }
        Ok(list)
    }
}

/// The continuation chosen after a task completes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlowDirective {
    #[default]
    Continue,
    Exit,
    End,
    Goto(String),
}

impl FlowDirective {
    pub fn as_str(&self) -> &str {
        match self {
            FlowDirective::Continue => "continue",
            FlowDirective::Exit => "exit",
            FlowDirective::End => "end",
            FlowDirective::Goto(target) => target,
        }
    }
}

impl From<String> for FlowDirective {
    fn from(value: String) -> Self {
        match value.as_str() {
            "continue" => FlowDirective::Continue,
            "exit" => FlowDirective::Exit,
            "end" => FlowDirective::End,
            _ => FlowDirective::Goto(value),
        }
    }
}

impl From<&str> for FlowDirective {
    fn from(value: &str) -> Self {
        FlowDirective::from(value.to_string())
    }
}

impl From<FlowDirective> for String {
    fn from(value: FlowDirective) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FlowDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A duration written either as a humantime string (`5s`, `1m 30s`) or as parts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationDefinition {
    Text(#[serde(with = "humantime_serde")] Duration),
    Parts(DurationParts),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationParts {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub milliseconds: u64,
}

impl DurationDefinition {
    pub fn to_duration(&self) -> Duration {
        match self {
            DurationDefinition::Text(duration) => *duration,
            DurationDefinition::Parts(parts) => {
                let seconds =
                    parts.days * 86_400 + parts.hours * 3_600 + parts.minutes * 60 + parts.seconds;
                Duration::from_secs(seconds) + Duration::from_millis(parts.milliseconds)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimeoutDefinition {
    After { after: DurationDefinition },
    Duration(DurationDefinition),
}

impl TimeoutDefinition {
    fn to_duration(&self) -> Duration {
        match self {
            TimeoutDefinition::After { after } => after.to_duration(),
            TimeoutDefinition::Duration(duration) => duration.to_duration(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDefinition {
    pub from: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDefinition {
    #[serde(rename = "as")]
    pub as_: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportDefinition {
    #[serde(rename = "as")]
    pub as_: Option<Value>,
}

/// One node of the task definition tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTaskDefinition")]
pub struct TaskDefinition {
    pub if_: Option<String>,
    pub input: Option<InputDefinition>,
    pub output: Option<OutputDefinition>,
    pub export: Option<ExportDefinition>,
    pub then: Option<FlowDirective>,
    pub timeout: Option<Duration>,
    pub metadata: IndexMap<String, Value>,
    pub kind: TaskKind,
    /// Set on loop bodies: a `then` target outside the block is handed to the loop.
    pub hands_off_flow: bool,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Set(Value),
    Raise(RaiseDefinition),
    Emit(EmitDefinition),
    Wait(Duration),
    Switch(SwitchDefinition),
    Try(TryDefinition),
    Do(TaskList),
    Fork(ForkDefinition),
    For(ForDefinition),
    Listen(ListenDefinition),
    Call(CallDefinition),
    Run(RunDefinition),
    Extension(ExtensionDefinition),
    Composite(CompositeDefinition),
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Set(_) => "set",
            TaskKind::Raise(_) => "raise",
            TaskKind::Emit(_) => "emit",
            TaskKind::Wait(_) => "wait",
            TaskKind::Switch(_) => "switch",
            TaskKind::Try(_) => "try",
            TaskKind::Do(_) => "do",
            TaskKind::Fork(_) => "fork",
            TaskKind::For(_) => "for",
            TaskKind::Listen(_) => "listen",
            TaskKind::Call(_) => "call",
            TaskKind::Run(_) => "run",
            TaskKind::Extension(_) => "extension",
            TaskKind::Composite(_) => "execute",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TaskDefinition {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            if_: None,
            input: None,
            output: None,
            export: None,
            then: None,
            timeout: None,
            metadata: IndexMap::new(),
            kind,
            hands_off_flow: false,
        }
    }

    /// A bare sequential block, used for loop bodies, catch handlers and per-event bodies.
    pub fn sequence(tasks: TaskList) -> Self {
        Self::new(TaskKind::Do(tasks))
    }

    /// The body of a `for` loop.
    pub fn loop_body(tasks: TaskList) -> Self {
        Self {
            hands_off_flow: true,
            ..Self::sequence(tasks)
        }
    }

    pub fn with_then(mut self, then: impl Into<FlowDirective>) -> Self {
        self.then = Some(then.into());
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// The directive declared by this task, defaulting to `continue`.
    pub fn then_directive(&self) -> FlowDirective {
        self.then.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaiseDefinition {
    pub error: ErrorReference,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorReference {
    Inline(ErrorDefinition),
    Named(String),
}

/// Declarative error; every field may itself be an expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorDefinition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: Value,
    pub title: Option<String>,
    pub detail: Option<String>,
    pub instance: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmitDefinition {
    pub event: EventDefinition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventDefinition {
    pub with: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SwitchDefinition {
    pub cases: IndexMap<String, SwitchCaseDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchCaseDefinition {
    pub when: Option<String>,
    pub then: Option<FlowDirective>,
}

#[derive(Debug, Clone)]
pub struct TryDefinition {
    pub try_: TaskList,
    pub catch: CatchDefinition,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatchDefinition {
    pub errors: Option<ErrorFilterDefinition>,
    #[serde(rename = "as")]
    pub as_: Option<String>,
    pub when: Option<String>,
    pub except_when: Option<String>,
    pub retry: Option<RetryPolicyDefinition>,
    #[serde(rename = "do")]
    pub do_: Option<TaskList>,
}

impl CatchDefinition {
    pub fn error_variable(&self) -> &str {
        self.as_.as_deref().unwrap_or("error")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorFilterDefinition {
    pub with: ErrorFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorFilter {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub status: Option<u16>,
    pub instance: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicyDefinition {
    pub when: Option<String>,
    pub except_when: Option<String>,
    pub delay: Option<DurationDefinition>,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    pub multiplier: Option<f64>,
    pub max_delay: Option<DurationDefinition>,
    pub limit: Option<RetryLimitDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryLimitDefinition {
    pub attempt: Option<AttemptLimitDefinition>,
    pub duration: Option<DurationDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttemptLimitDefinition {
    pub count: Option<u32>,
    pub duration: Option<DurationDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForkDefinition {
    pub branches: TaskList,
    #[serde(default)]
    pub compete: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForLoopDefinition {
    #[serde(default = "default_each")]
    pub each: String,
    #[serde(rename = "in")]
    pub in_: String,
    #[serde(default = "default_at")]
    pub at: String,
}

#[derive(Debug, Clone)]
pub struct ForDefinition {
    pub for_: ForLoopDefinition,
    pub while_: Option<String>,
    pub do_: TaskList,
}

#[derive(Debug, Clone)]
pub struct ListenDefinition {
    pub listen: ListenerDefinition,
    pub foreach: Option<ForeachDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerDefinition {
    pub to: EventConsumptionStrategy,
    #[serde(default)]
    pub read: EventReadMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventConsumptionStrategy {
    One(EventFilterDefinition),
    Any(Vec<EventFilterDefinition>),
    All(Vec<EventFilterDefinition>),
}

impl EventConsumptionStrategy {
    pub fn filters(&self) -> Vec<&EventFilterDefinition> {
        match self {
            EventConsumptionStrategy::One(filter) => vec![filter],
            EventConsumptionStrategy::Any(filters) | EventConsumptionStrategy::All(filters) => {
                filters.iter().collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventFilterDefinition {
    #[serde(default)]
    pub with: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventReadMode {
    #[default]
    Data,
    Envelope,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeachDefinition {
    #[serde(default = "default_each")]
    pub item: String,
    #[serde(default = "default_at")]
    pub at: String,
    #[serde(rename = "do")]
    pub do_: Option<TaskList>,
    pub output: Option<OutputDefinition>,
    pub export: Option<ExportDefinition>,
}

#[derive(Debug, Clone)]
pub struct CallDefinition {
    pub call: String,
    pub with: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRunDefinition")]
pub struct RunDefinition {
    pub process: ProcessKind,
    pub configuration: Value,
    pub await_: bool,
    pub return_: ProcessReturnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Shell,
    Script,
    Container,
    Workflow,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Shell => "shell",
            ProcessKind::Script => "script",
            ProcessKind::Container => "container",
            ProcessKind::Workflow => "workflow",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessReturnType {
    #[default]
    Stdout,
    Stderr,
    Code,
    All,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionDefinition {
    #[serde(rename = "do")]
    pub do_: TaskList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeDefinition {
    pub sequentially: Option<TaskList>,
    pub concurrently: Option<TaskList>,
    #[serde(default)]
    pub compete: bool,
}

fn default_each() -> String {
    "item".to_string()
}

fn default_at() -> String {
    "index".to_string()
}

fn default_await() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRunDefinition {
    shell: Option<Value>,
    script: Option<Value>,
    container: Option<Value>,
    workflow: Option<Value>,
    #[serde(rename = "await", default = "default_await")]
    await_: bool,
    #[serde(rename = "return", default)]
    return_: ProcessReturnType,
}

impl TryFrom<RawRunDefinition> for RunDefinition {
    type Error = String;

    fn try_from(raw: RawRunDefinition) -> Result<Self, Self::Error> {
        let mut processes: Vec<(ProcessKind, Value)> = [
            (ProcessKind::Shell, raw.shell),
            (ProcessKind::Script, raw.script),
            (ProcessKind::Container, raw.container),
            (ProcessKind::Workflow, raw.workflow),
        ]
        .into_iter()
        .filter_map(|(kind, value)| value.map(|value| (kind, value)))
        .collect();

        if processes.len() != 1 {
            return Err(format!(
                "run must declare exactly one of shell, script, container or workflow, found {}",
                processes.len()
            ));
        }
        let (process, configuration) = processes.remove(0);

        Ok(Self {
            process,
            configuration,
            await_: raw.await_,
            return_: raw.return_,
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTaskDefinition {
    #[serde(rename = "if")]
    if_: Option<String>,
    input: Option<InputDefinition>,
    output: Option<OutputDefinition>,
    export: Option<ExportDefinition>,
    then: Option<FlowDirective>,
    timeout: Option<TimeoutDefinition>,
    #[serde(default)]
    metadata: IndexMap<String, Value>,

    set: Option<Value>,
    raise: Option<RaiseDefinition>,
    emit: Option<EmitDefinition>,
    wait: Option<DurationDefinition>,
    switch: Option<Vec<IndexMap<String, SwitchCaseDefinition>>>,
    #[serde(rename = "try")]
    try_: Option<TaskList>,
    catch: Option<CatchDefinition>,
    #[serde(rename = "do")]
    do_: Option<TaskList>,
    fork: Option<ForkDefinition>,
    #[serde(rename = "for")]
    for_: Option<ForLoopDefinition>,
    #[serde(rename = "while")]
    while_: Option<String>,
    listen: Option<ListenerDefinition>,
    foreach: Option<ForeachDefinition>,
    call: Option<String>,
    with: Option<Value>,
    run: Option<RunDefinition>,
    extension: Option<ExtensionDefinition>,
    execute: Option<CompositeDefinition>,
}

impl RawTaskDefinition {
    fn declared_kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        let flags = [
            ("set", self.set.is_some()),
            ("raise", self.raise.is_some()),
            ("emit", self.emit.is_some()),
            ("wait", self.wait.is_some()),
            ("switch", self.switch.is_some()),
            ("try", self.try_.is_some()),
            ("fork", self.fork.is_some()),
            ("for", self.for_.is_some()),
            ("listen", self.listen.is_some()),
            ("call", self.call.is_some()),
            ("run", self.run.is_some()),
            ("extension", self.extension.is_some()),
            ("execute", self.execute.is_some()),
        ];
        for (name, present) in flags {
            if present {
                kinds.push(name);
            }
        }
        // `do` is the body of a `for`, otherwise its own kind
        if self.do_.is_some() && self.for_.is_none() {
            kinds.push("do");
        }
        kinds
    }
}

impl TryFrom<RawTaskDefinition> for TaskDefinition {
    type Error = String;

    fn try_from(raw: RawTaskDefinition) -> Result<Self, Self::Error> {
        let kinds = raw.declared_kinds();
        match kinds.len() {
            0 => {
                return Err(
                    "task declares no kind (expected one of set, raise, emit, wait, switch, try, do, fork, for, listen, call, run, extension, execute)"
                        .to_string(),
                )
            }
            1 => {}
            _ => return Err(format!("task declares more than one kind: {:?}", kinds)),
        }

        if raw.catch.is_some() && raw.try_.is_none() {
            return Err("'catch' is only valid on a try task".to_string());
        }
        if raw.while_.is_some() && raw.for_.is_none() {
            return Err("'while' is only valid on a for task".to_string());
        }
        if raw.foreach.is_some() && raw.listen.is_none() {
            return Err("'foreach' is only valid on a listen task".to_string());
        }
        if raw.with.is_some() && raw.call.is_none() {
            return Err("'with' is only valid on a call task".to_string());
        }

        let kind = if let Some(value) = raw.set {
            TaskKind::Set(value)
        } else if let Some(raise) = raw.raise {
            TaskKind::Raise(raise)
        } else if let Some(emit) = raw.emit {
            TaskKind::Emit(emit)
        } else if let Some(wait) = raw.wait {
            TaskKind::Wait(wait.to_duration())
        } else if let Some(entries) = raw.switch {
            let mut cases = IndexMap::new();
            for entry in entries {
                if entry.len() != 1 {
                    return Err("each switch entry must declare exactly one named case".to_string());
                }
                for (name, case) in entry {
                    if cases.insert(name.clone(), case).is_some() {
                        return Err(format!("duplicate switch case '{}'", name));
                    }
                }
            }
            TaskKind::Switch(SwitchDefinition { cases })
        } else if let Some(body) = raw.try_ {
            let catch = raw
                .catch
                .ok_or_else(|| "a try task requires a 'catch' block".to_string())?;
            TaskKind::Try(TryDefinition { try_: body, catch })
        } else if let Some(fork) = raw.fork {
            TaskKind::Fork(fork)
        } else if let Some(for_) = raw.for_ {
            let body = raw
                .do_
                .ok_or_else(|| "a for task requires a 'do' block".to_string())?;
            TaskKind::For(ForDefinition {
                for_,
                while_: raw.while_,
                do_: body,
            })
        } else if let Some(listen) = raw.listen {
            TaskKind::Listen(ListenDefinition {
                listen,
                foreach: raw.foreach,
            })
        } else if let Some(call) = raw.call {
            TaskKind::Call(CallDefinition {
                call,
                with: raw.with.unwrap_or(Value::Null),
            })
        } else if let Some(run) = raw.run {
            TaskKind::Run(run)
        } else if let Some(extension) = raw.extension {
            TaskKind::Extension(extension)
        } else if let Some(execute) = raw.execute {
            TaskKind::Composite(execute)
        } else if let Some(tasks) = raw.do_ {
            TaskKind::Do(tasks)
        } else {
            return Err("task declares no kind".to_string());
        };

        Ok(TaskDefinition {
            if_: raw.if_,
            input: raw.input,
            output: raw.output,
            export: raw.export,
            then: raw.then,
            timeout: raw.timeout.map(|timeout| timeout.to_duration()),
            metadata: raw.metadata,
            kind,
            hands_off_flow: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> TaskDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_flow_directive_parsing() {
        assert_eq!(FlowDirective::from("continue"), FlowDirective::Continue);
        assert_eq!(FlowDirective::from("exit"), FlowDirective::Exit);
        assert_eq!(FlowDirective::from("end"), FlowDirective::End);
        assert_eq!(
            FlowDirective::from("cleanup"),
            FlowDirective::Goto("cleanup".to_string())
        );
        assert_eq!(FlowDirective::Goto("x".to_string()).to_string(), "x");
    }

    #[test]
    fn test_parse_for_consumes_do_body() {
        let definition = parse(
            r#"
for:
  in: "{{input.items}}"
while: "{{lt index 10}}"
do:
  - double:
      set:
        value: "{{item}}"
"#,
        );
        match definition.kind {
            TaskKind::For(for_) => {
                assert_eq!(for_.for_.each, "item");
                assert_eq!(for_.for_.at, "index");
                assert_eq!(for_.do_.len(), 1);
                assert!(for_.while_.is_some());
            }
            other => panic!("expected for, got {}", other),
        }
    }

    #[test]
    fn test_parse_try_with_retry() {
        let definition = parse(
            r#"
try:
  - flaky:
      call: http
      with:
        endpoint: http://localhost
catch:
  errors:
    with:
      type: https://serverlessworkflow.io/spec/1.0.0/errors/communication
  as: failure
  retry:
    delay: 2s
    backoff: exponential
    limit:
      attempt:
        count: 3
"#,
        );
        let TaskKind::Try(try_) = definition.kind else {
            panic!("expected try");
        };
        assert_eq!(try_.catch.error_variable(), "failure");
        let retry = try_.catch.retry.unwrap();
        assert_eq!(retry.backoff, BackoffStrategy::Exponential);
        assert_eq!(retry.delay.unwrap().to_duration(), Duration::from_secs(2));
        assert_eq!(retry.limit.unwrap().attempt.unwrap().count, Some(3));
    }

    #[test]
    fn test_parse_switch_preserves_case_order() {
        let definition = parse(
            r#"
switch:
  - high:
      when: "{{gt input.value 10}}"
      then: escalate
  - fallback:
      then: end
"#,
        );
        let TaskKind::Switch(switch) = definition.kind else {
            panic!("expected switch");
        };
        let names: Vec<_> = switch.cases.keys().cloned().collect();
        assert_eq!(names, vec!["high", "fallback"]);
        assert_eq!(
            switch.cases["fallback"].then,
            Some(FlowDirective::End)
        );
    }

    #[test]
    fn test_parse_durations_and_timeout() {
        let definition = parse(
            r#"
wait:
  minutes: 1
  seconds: 30
timeout:
  after: 5m
"#,
        );
        let TaskKind::Wait(duration) = definition.kind else {
            panic!("expected wait");
        };
        assert_eq!(duration, Duration::from_secs(90));
        assert_eq!(definition.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_run_shell() {
        let definition = parse(
            r#"
run:
  shell:
    command: echo hello
  return: all
"#,
        );
        let TaskKind::Run(run) = definition.kind else {
            panic!("expected run");
        };
        assert_eq!(run.process, ProcessKind::Shell);
        assert!(run.await_);
        assert_eq!(run.return_, ProcessReturnType::All);
    }

    #[test]
    fn test_reject_multiple_kinds() {
        let result: Result<TaskDefinition, _> = serde_yaml::from_str(
            r#"
set:
  a: 1
wait: 1s
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_orphan_catch() {
        let result: Result<TaskDefinition, _> = serde_yaml::from_str(
            r#"
set: {}
catch: {}
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_duplicate_task_names() {
        let result: Result<TaskDefinition, _> = serde_yaml::from_str(
            r#"
do:
  - same:
      set: {}
  - same:
      set: {}
"#,
        );
        assert!(result.is_err());
    }
}
