//! Control-plane session
//!
//! One [`Session`] owns every piece of live state: the flow store, the
//! interception controller, options, the event log, the update broadcaster,
//! the command registry and the engine handle. It is shared as
//! `Arc<Session>`; there are no globals.
//!
//! Locks are always taken in the order store, intercept, options, events,
//! broadcaster, and none is held across an `.await`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;

use crate::commands::{CommandDispatcher, CommandOutcome};
use crate::engine::ProtocolEngine;
use crate::error::{ConfigError, EngineError, FlowError, OptionError};
use crate::events::{entry_to_json, EventLog};
use crate::flow::{flow_to_json, set_message_content, Flow, FlowUpdate};
use crate::intercept::{FlowFilter, InterceptDecision, InterceptRule, InterceptionController};
use crate::options::Options;
use crate::store::{FlowStore, ViewOrder};
use crate::updates::{Observer, UpdateBroadcaster};

/// Which HTTP message of a flow an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePart {
    Request,
    Response,
}

impl MessagePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePart::Request => "request",
            MessagePart::Response => "response",
        }
    }
}

impl fmt::Display for MessagePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessagePart {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(MessagePart::Request),
            "response" => Ok(MessagePart::Response),
            other => Err(FlowError::InvalidArgument(format!("unknown message: {}", other))),
        }
    }
}

/// Sizing and file locations of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Events kept in the event log
    pub eventlog_capacity: usize,

    /// Messages buffered per observer before it is disconnected
    pub observer_queue_size: usize,

    /// Where `save_options` writes
    pub options_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            eventlog_capacity: 10_000,
            observer_queue_size: 1024,
            options_file: None,
        }
    }
}

pub struct Session {
    store: Mutex<FlowStore>,
    intercept: Mutex<InterceptionController>,
    options: Mutex<Options>,
    events: Arc<EventLog>,
    updates: Arc<UpdateBroadcaster>,
    commands: CommandDispatcher,
    engine: Arc<dyn ProtocolEngine>,
    history: Mutex<Vec<String>>,
    options_file: Option<PathBuf>,
}

impl Session {
    pub fn new(config: SessionConfig, engine: Arc<dyn ProtocolEngine>) -> Arc<Self> {
        let updates = UpdateBroadcaster::new(config.observer_queue_size);
        let events = Arc::new(EventLog::new(config.eventlog_capacity, updates.clone()));
        Arc::new(Self {
            store: Mutex::new(FlowStore::new(events.clone(), updates.clone())),
            intercept: Mutex::new(InterceptionController::new()),
            options: Mutex::new(Options::new(updates.clone())),
            events,
            updates,
            commands: CommandDispatcher::with_builtins(),
            engine,
            history: Mutex::new(Vec::new()),
            options_file: config.options_file,
        })
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn updates(&self) -> &Arc<UpdateBroadcaster> {
        &self.updates
    }

    pub fn engine(&self) -> &Arc<dyn ProtocolEngine> {
        &self.engine
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    /// Register a new observer of live updates
    pub fn subscribe(&self) -> Observer {
        self.updates.subscribe()
    }

    // --- flows -----------------------------------------------------------

    /// Filter and ordering of the flow list, from the `view_*` options.
    /// Callers hold the store lock already.
    fn view_settings(&self) -> (Option<InterceptRule>, ViewOrder, bool) {
        let options = self.options.lock();
        let filter = options
            .get_str("view_filter")
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
            .and_then(|expr| InterceptRule::parse(expr).ok());
        let order = options
            .get_str("view_order")
            .and_then(ViewOrder::parse)
            .unwrap_or_default();
        (filter, order, options.get_bool("view_order_reversed"))
    }

    fn with_view<T>(&self, f: impl FnOnce(Vec<&Flow>) -> T) -> T {
        let store = self.store.lock();
        let (filter, order, reversed) = self.view_settings();
        f(store.view(filter.as_ref().map(|r| r as &dyn FlowFilter), order, reversed))
    }

    /// The flow list observers see
    pub fn flows_json(&self) -> Value {
        self.with_view(|flows| Value::Array(flows.into_iter().map(flow_to_json).collect()))
    }

    /// Number of flows in the view
    pub fn view_len(&self) -> usize {
        self.with_view(|flows| flows.len())
    }

    pub fn flow_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Snapshot of one flow
    pub fn get_flow(&self, id: &str) -> Result<Flow, FlowError> {
        self.store.lock().get_by_id(id).cloned()
    }

    /// Run a read-only closure against one flow without copying it
    pub fn with_flow<T>(&self, id: &str, f: impl FnOnce(&Flow) -> T) -> Result<T, FlowError> {
        let store = self.store.lock();
        Ok(f(store.get_by_id(id)?))
    }

    /// Resolve a flow selector to ids
    ///
    /// `@all`, `@marked`, `@unmarked` and `@intercepted` select by state,
    /// `@shown` and `@hidden` by the current view filter, a selector
    /// starting with `~` is a filter expression, anything else is a flow id
    /// that must exist.
    pub fn resolve_flows(&self, spec: &str) -> Result<Vec<String>, FlowError> {
        let store = self.store.lock();
        let (view_filter, _, _) = self.view_settings();
        let shown = |f: &Flow| view_filter.as_ref().map_or(true, |rule| rule.matches(f));
        let select = |pred: &dyn Fn(&Flow) -> bool| {
            store
                .iter()
                .filter(|f| pred(f))
                .map(|f| f.id.clone())
                .collect::<Vec<_>>()
        };
        let ids = match spec {
            "@all" => select(&|_: &Flow| true),
            "@marked" => select(&|f: &Flow| !f.marked.is_empty()),
            "@unmarked" => select(&|f: &Flow| f.marked.is_empty()),
            "@intercepted" => select(&|f: &Flow| f.intercepted),
            "@shown" => select(&shown),
            "@hidden" => select(&|f: &Flow| !shown(f)),
            expr if expr.starts_with('~') => {
                let rule = InterceptRule::parse(expr)?;
                select(&|f: &Flow| rule.matches(f))
            }
            id => {
                store.get_by_id(id)?;
                vec![id.to_string()]
            }
        };
        Ok(ids)
    }

    /// Accept a new flow from the engine
    ///
    /// If the intercept filter holds it, the decision channel is returned
    /// with it, registered under the same locks so no resume or kill can
    /// slip in between.
    pub fn ingest(&self, flow: Flow) -> Result<Option<oneshot::Receiver<InterceptDecision>>, FlowError> {
        let id = flow.id.clone();
        let mut store = self.store.lock();
        store.add(vec![flow])?;
        let mut intercept = self.intercept.lock();
        if !intercept.check(&mut store, &id)? {
            return Ok(None);
        }
        intercept.gate(&store, &id).map(Some)
    }

    /// Channel on which the engine receives the decision for a flow an
    /// operator held after it was ingested
    pub fn intercept_gate(&self, id: &str) -> Result<oneshot::Receiver<InterceptDecision>, FlowError> {
        let store = self.store.lock();
        self.intercept.lock().gate(&store, id)
    }

    pub fn intercept_flow(&self, id: &str) -> Result<bool, FlowError> {
        let mut store = self.store.lock();
        self.intercept.lock().intercept_one(&mut store, id)
    }

    /// Apply an observer edit. A backup is taken first so the edit can be
    /// reverted; a failed edit changes nothing.
    pub fn update_flow(&self, id: &str, update: FlowUpdate) -> Result<(), FlowError> {
        self.store.lock().update(id, |flow| {
            let had_backup = flow.has_backup();
            flow.backup();
            update.apply(flow).map_err(|e| {
                if !had_backup {
                    flow.discard_backup();
                }
                e
            })
        })
    }

    /// Replace the body of one message, re-applying its content encoding
    pub fn replace_content(&self, id: &str, part: MessagePart, content: &[u8]) -> Result<(), FlowError> {
        self.store.lock().update(id, |flow| {
            let present = match part {
                MessagePart::Request => flow.request().is_some(),
                MessagePart::Response => flow.response().is_some(),
            };
            if !present {
                return Err(FlowError::InvalidArgument(format!("flow has no {}", part)));
            }
            flow.backup();
            match part {
                MessagePart::Request => flow.request_mut().map(|m| set_message_content(m, content)),
                MessagePart::Response => flow.response_mut().map(|m| set_message_content(m, content)),
            };
            Ok(())
        })
    }

    pub fn revert_flow(&self, id: &str) -> Result<(), FlowError> {
        self.store.lock().update(id, |flow| {
            flow.revert();
            Ok(())
        })
    }

    /// Copy a flow under a new id. Returns the new id.
    pub fn duplicate_flow(&self, id: &str) -> Result<String, FlowError> {
        let mut store = self.store.lock();
        let copy = store.get_by_id(id)?.duplicate();
        let new_id = copy.id.clone();
        store.add(vec![copy])?;
        Ok(new_id)
    }

    /// Remove a flow, killing it first if the engine is still holding it
    pub fn remove_flow(&self, id: &str) -> Result<(), FlowError> {
        let mut store = self.store.lock();
        if store.get_by_id(id)?.killable() {
            self.intercept.lock().kill_one(&mut store, id)?;
        }
        store.remove(&[id]);
        Ok(())
    }

    pub fn mark_flow(&self, id: &str, marker: &str) -> Result<(), FlowError> {
        self.store.lock().update(id, |flow| {
            flow.marked = marker.to_string();
            Ok(())
        })
    }

    pub fn comment_flow(&self, id: &str, comment: &str) -> Result<(), FlowError> {
        self.store.lock().update(id, |flow| {
            flow.comment = comment.to_string();
            Ok(())
        })
    }

    pub fn resume_flow(&self, id: &str) -> Result<bool, FlowError> {
        let mut store = self.store.lock();
        self.intercept.lock().resume_one(&mut store, id)
    }

    pub fn kill_flow(&self, id: &str) -> Result<bool, FlowError> {
        let mut store = self.store.lock();
        self.intercept.lock().kill_one(&mut store, id)
    }

    pub fn resume_all(&self) -> usize {
        let mut store = self.store.lock();
        self.intercept.lock().resume_all(&mut store)
    }

    pub fn kill_all(&self) -> usize {
        let mut store = self.store.lock();
        self.intercept.lock().kill_all(&mut store)
    }

    /// Replay a flow through the `replay.client` command
    pub async fn replay(&self, id: &str) -> Result<(), EngineError> {
        match self.execute("replay.client", vec![json!(id)]).await {
            CommandOutcome::Value(_) => Ok(()),
            CommandOutcome::Error(message) => Err(EngineError::Rejected(message)),
        }
    }

    // --- commands --------------------------------------------------------

    pub async fn execute(&self, name: &str, args: Vec<Value>) -> CommandOutcome {
        self.commands.execute(self, name, args).await
    }

    pub fn history_add(&self, command: &str) {
        self.history.lock().push(command.to_string());
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    pub fn history_clear(&self) {
        self.history.lock().clear();
    }

    // --- options ---------------------------------------------------------

    pub fn options_json(&self) -> Value {
        self.options.lock().to_json()
    }

    pub fn option_value(&self, name: &str) -> Result<Value, OptionError> {
        self.options.lock().get(name).cloned()
    }

    /// Apply one batch of option changes together with its side effects on
    /// interception. A new `intercept` filter also switches
    /// `intercept_active`, unless the batch sets that explicitly.
    fn change_options(
        &self,
        build: impl FnOnce(&Options) -> Result<Map<String, Value>, OptionError>,
    ) -> Result<Vec<String>, OptionError> {
        let mut intercept = self.intercept.lock();
        let mut options = self.options.lock();
        let mut changes = build(&options)?;

        let filter = match changes.get("intercept") {
            Some(value) => {
                let rule = match value.as_str().map(str::trim) {
                    Some(expr) if !expr.is_empty() => {
                        Some(InterceptRule::parse(expr).map_err(|e| OptionError::InvalidValue {
                            name: "intercept".into(),
                            reason: e.to_string(),
                        })?)
                    }
                    _ => None,
                };
                if !changes.contains_key("intercept_active") {
                    changes.insert("intercept_active".into(), Value::Bool(rule.is_some()));
                }
                Some(rule)
            }
            None => None,
        };

        let changed = options.set(changes)?;
        if let Some(rule) = filter {
            intercept.set_filter(rule.map(|r| Box::new(r) as Box<dyn FlowFilter>));
        }
        intercept.set_active(options.get_bool("intercept_active"));
        Ok(changed)
    }

    /// Set options atomically. Returns the names that changed.
    pub fn set_options(&self, changes: Map<String, Value>) -> Result<Vec<String>, OptionError> {
        self.change_options(|_| Ok(changes))
    }

    pub fn set_option_str(&self, name: &str, values: &[String]) -> Result<Vec<String>, OptionError> {
        self.change_options(|options| {
            let mut changes = Map::new();
            changes.insert(name.to_string(), options.parse_str(name, values)?);
            Ok(changes)
        })
    }

    pub fn reset_option(&self, name: &str) -> Result<Vec<String>, OptionError> {
        self.change_options(|options| {
            let mut changes = Map::new();
            changes.insert(name.to_string(), options.default_of(name)?);
            Ok(changes)
        })
    }

    fn options_path(&self) -> Result<PathBuf, ConfigError> {
        self.options_file
            .clone()
            .ok_or_else(|| ConfigError::ValidationError {
                field: "general.options_file".into(),
                reason: "no options file configured".into(),
            })
    }

    /// Write non-default options to the configured options file
    pub fn save_options(&self) -> Result<PathBuf, ConfigError> {
        let path = self.options_path()?;
        self.options.lock().save(&path)?;
        self.events.info(format!("Options saved to {}", path.display()));
        Ok(path)
    }

    /// Apply the options file if one exists. Returns the names that changed.
    pub fn load_options(&self) -> Result<Vec<String>, ConfigError> {
        let path = self.options_path()?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let changes = Options::read_file(&path)?;
        self.set_options(changes).map_err(|e| ConfigError::ValidationError {
            field: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    // --- events and lifecycle -------------------------------------------

    pub fn events_json(&self) -> Value {
        Value::Array(self.events.entries().iter().map(entry_to_json).collect())
    }

    /// Drop every flow and event. Engines waiting on a gate see it closed.
    pub fn clear(&self) {
        let mut store = self.store.lock();
        self.intercept.lock().cancel_all();
        store.clear();
    }

    /// Tear the session down: clear state, stop replays, disconnect observers
    pub fn close(&self) {
        self.clear();
        let stopped = self.engine.stop_replays();
        self.updates.close_all();
        tracing::info!(replays_stopped = stopped, "session closed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::{ReplayConsumer, ReplayQueue};
    use crate::flow::testing::tflow;
    use crate::flow::KILLED_MESSAGE;
    use crate::updates::{Resource, UpdateCmd};
    use tempfile::TempDir;

    /// Session preloaded with `flows`, backed by a replay queue
    pub(crate) fn test_session(flows: Vec<Flow>) -> (Arc<Session>, ReplayConsumer) {
        test_session_with(SessionConfig::default(), flows)
    }

    pub(crate) fn test_session_with(
        config: SessionConfig,
        flows: Vec<Flow>,
    ) -> (Arc<Session>, ReplayConsumer) {
        let (queue, consumer) = ReplayQueue::new(16);
        let session = Session::new(config, Arc::new(queue));
        for flow in flows {
            session.ingest(flow).unwrap();
        }
        (session, consumer)
    }

    fn set(session: &Session, value: Value) -> Result<Vec<String>, OptionError> {
        session.set_options(value.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_intercept_option_holds_new_flows() {
        let (session, _consumer) = test_session(vec![]);
        set(&session, json!({"intercept": "~m GET"})).unwrap();
        assert_eq!(session.option_value("intercept_active").unwrap(), json!(true));

        let f = tflow(false, false, false);
        let id = f.id.clone();
        let gate = session.ingest(f).unwrap().unwrap();
        assert!(session.resume_flow(&id).unwrap());
        match gate.await.unwrap() {
            InterceptDecision::Resume(flow) => assert_eq!(flow.id, id),
            other => panic!("unexpected decision {:?}", other),
        }

        set(&session, json!({"intercept": ""})).unwrap();
        assert_eq!(session.option_value("intercept_active").unwrap(), json!(false));
        assert!(session.ingest(tflow(false, false, false)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_hands_out_gate_before_decisions() {
        let (session, _consumer) = test_session(vec![]);
        set(&session, json!({"intercept": "~q"})).unwrap();

        let killed = tflow(false, false, false);
        let killed_id = killed.id.clone();
        let gate = session.ingest(killed).unwrap().unwrap();
        assert!(session.kill_flow(&killed_id).unwrap());
        assert!(matches!(gate.await.unwrap(), InterceptDecision::Kill));

        let resumed = tflow(false, false, false);
        let resumed_id = resumed.id.clone();
        let early = session.ingest(resumed).unwrap().unwrap();
        assert!(session.resume_flow(&resumed_id).unwrap());
        assert!(matches!(early.await.unwrap(), InterceptDecision::Resume(_)));
        // asking again after the decision is not an error
        let late = session.intercept_gate(&resumed_id).unwrap();
        assert!(matches!(late.await.unwrap(), InterceptDecision::Resume(_)));
    }

    #[test]
    fn test_intercept_change_is_one_update() {
        let (session, _consumer) = test_session(vec![]);
        let mut observer = session.subscribe();
        let mut changed = set(&session, json!({"intercept": "~m GET"})).unwrap();
        changed.sort();
        assert_eq!(changed, ["intercept", "intercept_active"]);

        let message = observer.try_recv().unwrap();
        assert_eq!(message.resource, Resource::Options);
        assert_eq!(message.data["intercept"]["value"], "~m GET");
        assert_eq!(message.data["intercept_active"]["value"], true);
        assert!(observer.try_recv().is_none());

        // an explicit toggle in the same request wins
        set(&session, json!({"intercept": "~m POST", "intercept_active": false})).unwrap();
        assert_eq!(session.option_value("intercept_active").unwrap(), json!(false));
        assert!(session.ingest(tflow(false, false, false)).unwrap().is_none());
        let mut post = tflow(false, false, false);
        post.request_mut().unwrap().method = "POST".into();
        assert!(session.ingest(post).unwrap().is_none());
    }

    #[test]
    fn test_view_options_shape_flow_list() {
        let get = tflow(true, false, false);
        let get_id = get.id.clone();
        let mut post = tflow(false, false, false);
        let req = post.request_mut().unwrap();
        req.method = "POST".into();
        req.timestamp_start = get.request().unwrap().timestamp_start + chrono::Duration::seconds(1);
        let post_id = post.id.clone();
        let (session, _consumer) = test_session(vec![get, post]);

        let ids = |session: &Session| -> Vec<String> {
            session.flows_json().as_array().unwrap().iter()
                .map(|f| f["id"].as_str().unwrap().to_string())
                .collect()
        };
        assert_eq!(ids(&session), [get_id.clone(), post_id.clone()]);

        set(&session, json!({"view_order": "method", "view_order_reversed": true})).unwrap();
        assert_eq!(ids(&session), [post_id.clone(), get_id.clone()]);

        set(&session, json!({"view_filter": "~m POST"})).unwrap();
        assert_eq!(ids(&session), [post_id.clone()]);
        assert_eq!(session.view_len(), 1);
        assert_eq!(session.flow_count(), 2);
        assert_eq!(session.resolve_flows("@shown").unwrap(), [post_id]);
        assert_eq!(session.resolve_flows("@hidden").unwrap(), [get_id]);
    }

    #[test]
    fn test_invalid_intercept_filter_changes_nothing() {
        let (session, _consumer) = test_session(vec![]);
        let err = set(&session, json!({"anticache": true, "intercept": "~m"})).unwrap_err();
        assert!(matches!(err, OptionError::InvalidValue { .. }));
        assert_eq!(session.option_value("anticache").unwrap(), json!(false));
        assert_eq!(session.option_value("intercept").unwrap(), Value::Null);
    }

    #[test]
    fn test_update_flow_backs_up_and_rolls_back() {
        let f = tflow(true, false, false);
        let id = f.id.clone();
        let (session, _consumer) = test_session(vec![f]);

        let upd = FlowUpdate::from_json(json!({"request": {"method": "PATCH"}, "comment": "x"})).unwrap();
        session.update_flow(&id, upd).unwrap();
        let flow = session.get_flow(&id).unwrap();
        assert_eq!(flow.request().unwrap().method, "PATCH");
        assert!(flow.modified());

        session.revert_flow(&id).unwrap();
        let flow = session.get_flow(&id).unwrap();
        assert_eq!(flow.request().unwrap().method, "GET");
        assert!(!flow.has_backup());

        let no_response = tflow(false, false, false);
        let nr_id = no_response.id.clone();
        session.ingest(no_response).unwrap();
        let upd = FlowUpdate::from_json(json!({"response": {"code": 500}})).unwrap();
        assert!(session.update_flow(&nr_id, upd).is_err());
        assert!(!session.get_flow(&nr_id).unwrap().has_backup());
    }

    #[test]
    fn test_replace_content() {
        let f = tflow(true, false, false);
        let id = f.id.clone();
        let (session, _consumer) = test_session(vec![f]);

        session.replace_content(&id, MessagePart::Request, b"new").unwrap();
        let flow = session.get_flow(&id).unwrap();
        assert_eq!(flow.request().unwrap().content.as_deref(), Some(&b"new"[..]));
        assert!(flow.modified());

        let bare = tflow(false, false, false);
        let bare_id = bare.id.clone();
        session.ingest(bare).unwrap();
        assert!(session.replace_content(&bare_id, MessagePart::Response, b"x").is_err());
    }

    #[tokio::test]
    async fn test_remove_kills_held_flow() {
        let f = tflow(false, false, false);
        let id = f.id.clone();
        let (session, _consumer) = test_session(vec![f]);
        session.intercept_flow(&id).unwrap();
        let gate = session.intercept_gate(&id).unwrap();

        session.remove_flow(&id).unwrap();
        assert!(matches!(gate.await.unwrap(), InterceptDecision::Kill));
        assert!(matches!(session.get_flow(&id), Err(FlowError::NotFound(_))));
        assert!(matches!(session.remove_flow(&id), Err(FlowError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_and_bulk_transitions() {
        let f = tflow(false, false, false);
        let id = f.id.clone();
        let (session, _consumer) = test_session(vec![f]);
        let copy = session.duplicate_flow(&id).unwrap();
        assert_ne!(copy, id);
        assert_eq!(session.flow_count(), 2);

        assert_eq!(session.resolve_flows("@all").unwrap().len(), 2);
        session.intercept_flow(&id).unwrap();
        session.intercept_flow(&copy).unwrap();
        assert_eq!(session.resolve_flows("@intercepted").unwrap().len(), 2);
        assert_eq!(session.resolve_flows("~m GET").unwrap().len(), 2);
        assert!(session.resolve_flows("missing").is_err());

        assert_eq!(session.kill_all(), 2);
        assert_eq!(session.resume_all(), 0);
        let flow = session.get_flow(&copy).unwrap();
        assert_eq!(flow.error.unwrap().msg, KILLED_MESSAGE);
    }

    #[test]
    fn test_save_and_load_options() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig {
            options_file: Some(dir.path().join("options.toml")),
            ..SessionConfig::default()
        };
        let (session, _consumer) = test_session_with(config.clone(), vec![]);
        set(&session, json!({"anticomp": true})).unwrap();
        session.save_options().unwrap();

        let (fresh, _consumer) = test_session_with(config, vec![]);
        assert_eq!(fresh.load_options().unwrap(), vec!["anticomp"]);
        assert_eq!(fresh.option_value("anticomp").unwrap(), json!(true));

        let (unconfigured, _consumer) = test_session(vec![]);
        assert!(unconfigured.save_options().is_err());
    }

    #[tokio::test]
    async fn test_close_disconnects_observers() {
        let (session, _consumer) = test_session(vec![tflow(false, false, false)]);
        let mut obs = session.subscribe();
        session.close();

        let reset = obs.recv().await.unwrap();
        assert_eq!((reset.resource, reset.cmd), (Resource::Flows, UpdateCmd::Reset));
        let reset = obs.recv().await.unwrap();
        assert_eq!((reset.resource, reset.cmd), (Resource::Events, UpdateCmd::Reset));
        assert!(obs.recv().await.is_none());
        assert_eq!(session.flow_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_surfaces_errors() {
        let mut f = tflow(true, false, false);
        f.intercepted = true;
        let id = f.id.clone();
        let (session, _consumer) = test_session(vec![f]);
        let err = session.replay(&id).await.unwrap_err();
        assert_eq!(err.to_string(), "Can't replay intercepted flow.");
    }
}
