//! Command registry and dispatch
//!
//! Commands are named operations with typed parameters. Invocation never
//! fails from the caller's point of view: every problem, including a
//! panicking handler, is turned into the `error` payload of a
//! [`CommandOutcome`].

mod builtin;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::CommandError;
use crate::session::Session;

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Bool,
    /// One or more flows, given as ids or a selector such as `@all`
    Flows,
    /// Any number of trailing strings. Only valid as the last parameter.
    VarStr,
}

impl ParamKind {
    fn type_name(&self) -> &'static str {
        match self {
            ParamKind::Str | ParamKind::VarStr => "str",
            ParamKind::Int => "int",
            ParamKind::Bool => "bool",
            ParamKind::Flows => "flow[]",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl Param {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }
}

/// A converted argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    Flows(Vec<String>),
    VarStr(Vec<String>),
}

/// Arguments of one invocation, in parameter order
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    fn missing(index: usize) -> CommandError {
        CommandError::Failed(format!("missing argument {}", index))
    }

    pub fn str(&self, index: usize) -> Result<&str, CommandError> {
        match self.0.get(index) {
            Some(Arg::Str(s)) => Ok(s),
            _ => Err(Self::missing(index)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, CommandError> {
        match self.0.get(index) {
            Some(Arg::Int(i)) => Ok(*i),
            _ => Err(Self::missing(index)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, CommandError> {
        match self.0.get(index) {
            Some(Arg::Bool(b)) => Ok(*b),
            _ => Err(Self::missing(index)),
        }
    }

    pub fn flows(&self, index: usize) -> Result<&[String], CommandError> {
        match self.0.get(index) {
            Some(Arg::Flows(ids)) => Ok(ids),
            _ => Err(Self::missing(index)),
        }
    }

    pub fn var(&self, index: usize) -> &[String] {
        match self.0.get(index) {
            Some(Arg::VarStr(values)) => values,
            _ => &[],
        }
    }
}

/// A registered command
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn help(&self) -> &'static str;

    fn params(&self) -> &'static [Param] {
        &[]
    }

    fn return_type(&self) -> Option<&'static str> {
        None
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError>;
}

/// Result of an invocation, serialized as `{"value": ..}` or `{"error": ..}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
    Value(Value),
    Error(String),
}

impl CommandOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, CommandOutcome::Error(_))
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn convert(
    session: &Session,
    command: &str,
    params: &[Param],
    raw: Vec<Value>,
) -> Result<Args, CommandError> {
    let usage = |reason: String| CommandError::Arguments {
        command: command.to_string(),
        reason,
    };

    let (fixed, tail) = match params.split_last() {
        Some((last, init)) if last.kind == ParamKind::VarStr => (init, Some(last)),
        _ => (params, None),
    };
    if raw.len() < fixed.len() {
        return Err(usage(format!("missing argument: {}", fixed[raw.len()].name)));
    }
    if tail.is_none() && raw.len() > fixed.len() {
        return Err(usage(format!(
            "expected {} argument(s), got {}",
            fixed.len(),
            raw.len()
        )));
    }

    let mut raw = raw.into_iter();
    let mut args = Vec::with_capacity(params.len());
    for (param, value) in fixed.iter().zip(raw.by_ref()) {
        args.push(convert_value(session, command, param, value)?);
    }
    if let Some(param) = tail {
        let rest = raw
            .map(|v| text_of(&v).ok_or_else(|| usage(format!("{} must be strings", param.name))))
            .collect::<Result<Vec<_>, _>>()?;
        args.push(Arg::VarStr(rest));
    }
    Ok(Args(args))
}

/// Convert one positional value. A variadic parameter given here receives
/// the single value.
fn convert_value(
    session: &Session,
    command: &str,
    param: &Param,
    value: Value,
) -> Result<Arg, CommandError> {
    let wrong = || CommandError::Arguments {
        command: command.to_string(),
        reason: format!("{} must be {}, got {}", param.name, param.kind.type_name(), value),
    };
    let arg = match param.kind {
        ParamKind::Str => Arg::Str(text_of(&value).ok_or_else(wrong)?),
        ParamKind::VarStr => Arg::VarStr(vec![text_of(&value).ok_or_else(wrong)?]),
        ParamKind::Int => {
            let n = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            Arg::Int(n.ok_or_else(wrong)?)
        }
        ParamKind::Bool => match &value {
            Value::Bool(b) => Arg::Bool(*b),
            Value::String(s) if s == "true" => Arg::Bool(true),
            Value::String(s) if s == "false" => Arg::Bool(false),
            _ => return Err(wrong()),
        },
        ParamKind::Flows => {
            let specs: Vec<String> = match &value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<_>>()
                    .ok_or_else(wrong)?,
                _ => return Err(wrong()),
            };
            let mut ids = Vec::new();
            for spec in &specs {
                for id in session.resolve_flows(spec)? {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            Arg::Flows(ids)
        }
    };
    Ok(arg)
}

/// Name → command registry
pub struct CommandDispatcher {
    commands: BTreeMap<&'static str, Arc<dyn Command>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in command
    pub fn with_builtins() -> Self {
        let mut dispatcher = Self::new();
        for command in builtin::all() {
            if let Err(e) = dispatcher.register(command) {
                tracing::error!(error = %e, "failed to register built-in command");
            }
        }
        dispatcher
    }

    /// Add a command. Names must be unique and a variadic parameter may
    /// only come last.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<(), CommandError> {
        let name = command.name();
        let invalid = |reason: &str| CommandError::Definition {
            command: name.to_string(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if self.commands.contains_key(name) {
            return Err(invalid("already registered"));
        }
        let params = command.params();
        if let Some(pos) = params.iter().position(|p| p.kind == ParamKind::VarStr) {
            if pos + 1 != params.len() {
                return Err(invalid("variadic parameter must be last"));
            }
        }
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().copied()
    }

    /// Run a command by name
    pub async fn execute(&self, session: &Session, name: &str, raw: Vec<Value>) -> CommandOutcome {
        let Some(command) = self.commands.get(name).cloned() else {
            return CommandOutcome::Error(CommandError::Unknown(name.to_string()).to_string());
        };

        let args = match convert(session, name, command.params(), raw) {
            Ok(args) => args,
            Err(e) => return CommandOutcome::Error(e.to_string()),
        };

        tracing::debug!(command = name, "executing command");
        match AssertUnwindSafe(command.call(session, args)).catch_unwind().await {
            Ok(Ok(value)) => CommandOutcome::Value(value),
            Ok(Err(e)) => {
                tracing::debug!(command = name, error = %e, "command failed");
                CommandOutcome::Error(e.to_string())
            }
            Err(_) => {
                tracing::error!(command = name, "command panicked");
                CommandOutcome::Error(format!("Command {} failed unexpectedly.", name))
            }
        }
    }

    /// `{name: {help, parameters, return_type, signature_help}}`
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .commands
            .iter()
            .map(|(name, command)| (name.to_string(), describe(command.as_ref())))
            .collect();
        Value::Object(map)
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(command: &dyn Command) -> Value {
    let params = command.params();
    let parameters: Vec<Value> = params
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "type": p.kind.type_name(),
                "kind": if p.kind == ParamKind::VarStr { "VAR_POSITIONAL" } else { "POSITIONAL_OR_KEYWORD" },
            })
        })
        .collect();

    let mut signature = command.name().to_string();
    for p in params {
        signature.push(' ');
        if p.kind == ParamKind::VarStr {
            signature.push('*');
        }
        signature.push_str(p.name);
    }
    if let Some(ret) = command.return_type() {
        signature.push_str(" -> ");
        signature.push_str(ret);
    }

    json!({
        "help": command.help(),
        "parameters": parameters,
        "return_type": command.return_type(),
        "signature_help": signature,
    })
}
