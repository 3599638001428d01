//! Live, typed options
//!
//! Options are read and changed by observers at runtime. Every successful
//! change is pushed to observers as a single `options/update` message that
//! carries only the options whose value actually changed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{ConfigError, OptionError};
use crate::intercept::InterceptRule;
use crate::updates::{Resource, UpdateBroadcaster, UpdateCmd};

/// Value type of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Str,
    OptionalStr,
    OptionalInt,
    SeqStr,
}

impl OptionType {
    pub fn type_name(&self) -> &'static str {
        match self {
            OptionType::Bool => "bool",
            OptionType::Str => "str",
            OptionType::OptionalStr => "optional str",
            OptionType::OptionalInt => "optional int",
            OptionType::SeqStr => "sequence of str",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionType::Bool => value.is_boolean(),
            OptionType::Str => value.is_string(),
            OptionType::OptionalStr => value.is_null() || value.is_string(),
            OptionType::OptionalInt => value.is_null() || value.is_i64(),
            OptionType::SeqStr => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "bool".into(),
        Value::Number(n) if n.is_i64() => "int".into(),
        Value::Number(_) => "float".into(),
        Value::String(s) => format!("str {:?}", s),
        Value::Array(_) => "list".into(),
        Value::Object(_) => "object".into(),
    }
}

type Validator = fn(&Value) -> Result<(), String>;

/// Static description of an option
pub struct OptionDef {
    pub name: &'static str,
    pub kind: OptionType,
    pub default: fn() -> Value,
    pub help: &'static str,
    pub choices: Option<&'static [&'static str]>,
    validate: Option<Validator>,
}

fn valid_port(value: &Value) -> Result<(), String> {
    match value.as_i64() {
        None => Ok(()),
        Some(port) if (0..=65535).contains(&port) => Ok(()),
        Some(port) => Err(format!("{} is not a valid port", port)),
    }
}

fn valid_filter(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(expr) if !expr.trim().is_empty() => InterceptRule::parse(expr)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => Ok(()),
    }
}

const VIEW_ORDERS: &[&str] = &["time", "method", "url", "size"];
const VERBOSITY: &[&str] = &["error", "warn", "info", "alert", "debug"];

fn builtin_options() -> Vec<OptionDef> {
    fn def(
        name: &'static str,
        kind: OptionType,
        default: fn() -> Value,
        help: &'static str,
    ) -> OptionDef {
        OptionDef {
            name,
            kind,
            default,
            help,
            choices: None,
            validate: None,
        }
    }

    vec![
        def("anticache", OptionType::Bool, || json!(false),
            "Strip out request headers that might cause the server to return 304-not-modified."),
        def("anticomp", OptionType::Bool, || json!(false),
            "Try to convince servers to send us un-compressed data."),
        def("showhost", OptionType::Bool, || json!(false),
            "Use the Host header to construct URLs for display."),
        OptionDef {
            validate: Some(valid_filter),
            ..def("intercept", OptionType::OptionalStr, || Value::Null,
                "Intercept filter expression.")
        },
        def("intercept_active", OptionType::Bool, || json!(false),
            "Intercept toggle"),
        OptionDef {
            validate: Some(valid_filter),
            ..def("view_filter", OptionType::OptionalStr, || Value::Null,
                "Limit the view to matching flows.")
        },
        OptionDef {
            choices: Some(VIEW_ORDERS),
            ..def("view_order", OptionType::Str, || json!("time"), "Flow sort order.")
        },
        def("view_order_reversed", OptionType::Bool, || json!(false),
            "Reverse the sorting order."),
        def("listen_host", OptionType::Str, || json!(""),
            "Address to bind proxy server(s) to (may be overridden for individual modes, see `mode`)."),
        OptionDef {
            validate: Some(valid_port),
            ..def("listen_port", OptionType::OptionalInt, || Value::Null,
                "Port to bind proxy server(s) to (may be overridden for individual modes, see `mode`).")
        },
        def("mode", OptionType::SeqStr, || json!(["regular"]),
            "The proxy server type(s) to spawn."),
        def("http2", OptionType::Bool, || json!(true),
            "Enable/disable HTTP/2 support."),
        def("ssl_insecure", OptionType::Bool, || json!(false),
            "Do not verify upstream server SSL/TLS certificates."),
        def("upstream_cert", OptionType::Bool, || json!(true),
            "Connect to upstream server to look up certificate details."),
        def("stream_large_bodies", OptionType::OptionalStr, || Value::Null,
            "Stream data to the client if request or response body exceeds the given threshold. \
             If streamed, the body will not be stored in any way."),
        OptionDef {
            choices: Some(VERBOSITY),
            ..def("console_eventlog_verbosity", OptionType::Str, || json!("info"),
                "EventLog verbosity.")
        },
        def("web_columns", OptionType::SeqStr,
            || json!(["tls", "icon", "path", "method", "status", "size", "time"]),
            "Columns to show in the flow list"),
    ]
}

struct OptionEntry {
    def: OptionDef,
    value: Value,
}

impl OptionEntry {
    fn to_json(&self) -> Value {
        json!({
            "value": self.value,
            "choices": self.def.choices,
            "default": (self.def.default)(),
            "help": self.def.help,
            "type": self.def.kind.type_name(),
        })
    }

    fn is_default(&self) -> bool {
        self.value == (self.def.default)()
    }
}

/// Live option registry
pub struct Options {
    entries: BTreeMap<&'static str, OptionEntry>,
    updates: Arc<UpdateBroadcaster>,
}

impl Options {
    pub fn new(updates: Arc<UpdateBroadcaster>) -> Self {
        let entries = builtin_options()
            .into_iter()
            .map(|def| {
                let value = (def.default)();
                (def.name, OptionEntry { def, value })
            })
            .collect();
        Self { entries, updates }
    }

    fn entry(&self, name: &str) -> Result<&OptionEntry, OptionError> {
        self.entries
            .get(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&Value, OptionError> {
        Ok(&self.entry(name)?.value)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).ok().and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).ok().and_then(Value::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).ok().and_then(Value::as_i64)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().copied()
    }

    /// Check one value without applying it
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), OptionError> {
        let def = &self.entry(name)?.def;
        if !def.kind.accepts(value) {
            return Err(OptionError::WrongType {
                name: name.to_string(),
                expected: def.kind.type_name().to_string(),
                got: describe(value),
            });
        }
        if let (Some(choices), Some(s)) = (def.choices, value.as_str()) {
            if !choices.contains(&s) {
                return Err(OptionError::InvalidChoice {
                    name: name.to_string(),
                    value: s.to_string(),
                    choices: choices.join(", "),
                });
            }
        }
        if let Some(validate) = def.validate {
            validate(value).map_err(|reason| OptionError::InvalidValue {
                name: name.to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Apply a set of changes atomically
    ///
    /// Either every value is valid and all are applied, or nothing changes.
    /// Returns the names of the options whose value changed.
    pub fn set(&mut self, changes: Map<String, Value>) -> Result<Vec<String>, OptionError> {
        for (name, value) in &changes {
            self.validate(name, value)?;
        }

        let mut changed = Map::new();
        for (name, value) in changes {
            if let Some(entry) = self.entries.get_mut(name.as_str()) {
                if entry.value != value {
                    entry.value = value;
                    changed.insert(name, entry.to_json());
                }
            }
        }

        let names: Vec<String> = changed.keys().cloned().collect();
        if !names.is_empty() {
            tracing::info!(options = ?names, "options changed");
            self.updates
                .publish(Resource::Options, UpdateCmd::Update, Value::Object(changed));
        }
        Ok(names)
    }

    /// Parse command-line style values and apply them
    ///
    /// Booleans accept `true`/`false`, or no value for `true`. Optional
    /// options are cleared by giving no value. Sequences take every value.
    pub fn set_from_str(&mut self, name: &str, values: &[String]) -> Result<Vec<String>, OptionError> {
        let mut changes = Map::new();
        changes.insert(name.to_string(), self.parse_str(name, values)?);
        self.set(changes)
    }

    /// The value [`Options::set_from_str`] would apply, without applying it
    pub fn parse_str(&self, name: &str, values: &[String]) -> Result<Value, OptionError> {
        let kind = self.entry(name)?.def.kind;
        let wrong = |got: &str| OptionError::WrongType {
            name: name.to_string(),
            expected: kind.type_name().to_string(),
            got: got.to_string(),
        };
        let joined = values.join(" ");

        let value = match kind {
            OptionType::Bool => match joined.as_str() {
                "" | "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => return Err(wrong(other)),
            },
            OptionType::Str => Value::String(joined),
            OptionType::OptionalStr if joined.is_empty() => Value::Null,
            OptionType::OptionalStr => Value::String(joined),
            OptionType::OptionalInt if joined.is_empty() => Value::Null,
            OptionType::OptionalInt => {
                let n: i64 = joined.trim().parse().map_err(|_| wrong(&joined))?;
                Value::from(n)
            }
            OptionType::SeqStr => Value::Array(values.iter().cloned().map(Value::String).collect()),
        };
        Ok(value)
    }

    /// Restore one option to its default
    pub fn reset_one(&mut self, name: &str) -> Result<Vec<String>, OptionError> {
        let mut changes = Map::new();
        changes.insert(name.to_string(), self.default_of(name)?);
        self.set(changes)
    }

    pub fn default_of(&self, name: &str) -> Result<Value, OptionError> {
        Ok((self.entry(name)?.def.default)())
    }

    /// `{name: {value, choices, default, help, type}}` for every option
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(name, entry)| (name.to_string(), entry.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Write every option that differs from its default as TOML
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut table = toml::Table::new();
        for (name, entry) in &self.entries {
            if entry.is_default() {
                continue;
            }
            if let Some(value) = json_to_toml(&entry.value) {
                table.insert(name.to_string(), value);
            }
        }
        let content = toml::to_string_pretty(&table).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.display().to_string(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), options = table.len(), "options saved");
        Ok(())
    }

    /// Read a TOML options file written by [`Options::save`] into a change set
    pub fn read_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let table: toml::Table =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(table
            .into_iter()
            .map(|(k, v)| (k, toml_to_json(v)))
            .collect())
    }
}

fn json_to_toml(value: &Value) -> Option<toml::Value> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        Value::Number(n) => n.as_i64().map(toml::Value::Integer),
        Value::String(s) => Some(toml::Value::String(s.clone())),
        Value::Array(items) => Some(toml::Value::Array(
            items.iter().filter_map(json_to_toml).collect(),
        )),
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::String(s) => Value::String(s),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(t) => Value::Object(t.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect()),
    }
}
