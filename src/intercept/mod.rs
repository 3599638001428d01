//! Flow interception
//!
//! A flow is either running normally or held (intercepted). A held flow is
//! released by resume or aborted by kill; a killed flow keeps its place in
//! the store with an error attached. The protocol engine waits on a gate
//! for the operator's decision about each held flow.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tokio::sync::oneshot;

use crate::error::FlowError;
use crate::flow::Flow;
use crate::store::FlowStore;

/// Predicate selecting flows
pub trait FlowFilter: Send + Sync {
    fn matches(&self, flow: &Flow) -> bool;
}

impl<F> FlowFilter for F
where
    F: Fn(&Flow) -> bool + Send + Sync,
{
    fn matches(&self, flow: &Flow) -> bool {
        self(flow)
    }
}

/// Rule compiled from an `intercept` filter expression
///
/// Supported terms, all of which must match:
/// - `~m METHOD`: request method, case-insensitive
/// - `~d DOMAIN`: request host equals or is a subdomain of `DOMAIN`
/// - `~u REGEX` or a bare word: regex over the full URL, case-insensitive
/// - `~q`: no response yet
/// - `~s`: has a response
#[derive(Debug, Clone)]
pub struct InterceptRule {
    /// Expression the rule was compiled from
    pub expression: String,

    /// Match on URL pattern (regex)
    url_pattern: Option<Regex>,

    /// Match on host
    host: Option<String>,

    /// Match on method
    method: Option<String>,

    /// Require (`Some(true)`) or forbid (`Some(false)`) a response
    has_response: Option<bool>,
}

impl InterceptRule {
    pub fn parse(expression: &str) -> Result<Self, FlowError> {
        let invalid = |reason: String| FlowError::InvalidArgument(format!("invalid filter expression: {}", reason));

        let mut rule = Self {
            expression: expression.trim().to_string(),
            url_pattern: None,
            host: None,
            method: None,
            has_response: None,
        };
        let mut url_terms = Vec::new();
        let mut tokens = expression.split_whitespace();
        while let Some(token) = tokens.next() {
            let mut argument = |flag: &str| {
                tokens
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("{} needs an argument", flag)))
            };
            match token {
                "~m" => rule.method = Some(argument("~m")?.to_ascii_uppercase()),
                "~d" => rule.host = Some(argument("~d")?.to_ascii_lowercase()),
                "~u" => url_terms.push(argument("~u")?),
                "~q" => rule.has_response = Some(false),
                "~s" => rule.has_response = Some(true),
                t if t.starts_with('~') => return Err(invalid(format!("unknown operator {}", t))),
                t => url_terms.push(t.to_string()),
            }
        }

        if !url_terms.is_empty() {
            let pattern = url_terms.join(" ");
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| invalid(e.to_string()))?;
            rule.url_pattern = Some(regex);
        }
        if rule.url_pattern.is_none()
            && rule.host.is_none()
            && rule.method.is_none()
            && rule.has_response.is_none()
        {
            return Err(invalid("empty expression".into()));
        }
        Ok(rule)
    }
}

impl FlowFilter for InterceptRule {
    fn matches(&self, flow: &Flow) -> bool {
        let Some(request) = flow.request() else {
            return false;
        };

        if let Some(want) = self.has_response {
            if flow.response().is_some() != want {
                return false;
            }
        }

        if let Some(method) = &self.method {
            if !request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        if let Some(domain) = &self.host {
            let host = request.pretty_host().to_ascii_lowercase();
            if host != *domain && !host.ends_with(&format!(".{}", domain)) {
                return false;
            }
        }

        if let Some(regex) = &self.url_pattern {
            if !regex.is_match(&request.url()) {
                return false;
            }
        }

        true
    }
}

/// Operator decision delivered to the engine for a held flow
#[derive(Debug)]
pub enum InterceptDecision {
    /// Continue with this (possibly edited) copy of the flow
    Resume(Box<Flow>),
    /// Abort the connection
    Kill,
}

/// Interception state machine over the flows of a [`FlowStore`]
pub struct InterceptionController {
    /// Automatic interception filter
    filter: Option<Box<dyn FlowFilter>>,

    /// Whether the filter is applied to new flows
    active: bool,

    /// Decision channels keyed by flow id.
    /// The engine awaits the receiver; resume/kill send through the sender.
    pending: HashMap<String, oneshot::Sender<InterceptDecision>>,
}

impl InterceptionController {
    pub fn new() -> Self {
        Self {
            filter: None,
            active: false,
            pending: HashMap::new(),
        }
    }

    pub fn set_filter(&mut self, filter: Option<Box<dyn FlowFilter>>) {
        self.filter = filter;
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Hold a newly ingested flow if the active filter matches it
    pub fn check(&mut self, store: &mut FlowStore, id: &str) -> Result<bool, FlowError> {
        if !self.active {
            return Ok(false);
        }
        let Some(filter) = &self.filter else {
            return Ok(false);
        };
        if !filter.matches(store.get_by_id(id)?) {
            return Ok(false);
        }
        self.intercept_one(store, id)
    }

    /// Hold one flow. Killed or already held flows are left alone.
    pub fn intercept_one(&mut self, store: &mut FlowStore, id: &str) -> Result<bool, FlowError> {
        let changed = store.apply(id, Flow::intercept)?;
        if changed {
            tracing::debug!(flow = %id, "flow intercepted");
        }
        Ok(changed)
    }

    /// Hold every flow matching `filter`. Returns how many changed.
    pub fn intercept_matching(&mut self, store: &mut FlowStore, filter: &dyn FlowFilter) -> usize {
        store
            .update_many(|f| filter.matches(f) && f.intercept())
            .len()
    }

    /// Register the engine's wait for a decision on a flow
    ///
    /// A flow that is no longer held gets its decision right away: `Kill`
    /// if it was killed, `Resume` otherwise.
    pub fn gate(
        &mut self,
        store: &FlowStore,
        id: &str,
    ) -> Result<oneshot::Receiver<InterceptDecision>, FlowError> {
        let flow = store.get_by_id(id)?;
        let (tx, rx) = oneshot::channel();
        if flow.intercepted {
            self.pending.insert(id.to_string(), tx);
        } else {
            let decision = if flow.is_killed() {
                InterceptDecision::Kill
            } else {
                InterceptDecision::Resume(Box::new(flow.clone()))
            };
            let _ = tx.send(decision);
        }
        Ok(rx)
    }

    fn resolve(&mut self, id: &str, decision: InterceptDecision) {
        if let Some(tx) = self.pending.remove(id) {
            // the engine may have given up on the flow already
            let _ = tx.send(decision);
        }
    }

    fn release(&mut self, store: &FlowStore, id: &str) {
        if let Ok(flow) = store.get_by_id(id) {
            let snapshot = Box::new(flow.clone());
            self.resolve(id, InterceptDecision::Resume(snapshot));
        }
    }

    /// Release one held flow
    pub fn resume_one(&mut self, store: &mut FlowStore, id: &str) -> Result<bool, FlowError> {
        let changed = store.apply(id, Flow::resume)?;
        if changed {
            self.release(store, id);
            tracing::debug!(flow = %id, "flow resumed");
        }
        Ok(changed)
    }

    /// Release every held flow. Returns how many changed.
    pub fn resume_all(&mut self, store: &mut FlowStore) -> usize {
        let changed = store.update_many(Flow::resume);
        for id in &changed {
            self.release(store, id);
        }
        changed.len()
    }

    /// Abort one held flow
    pub fn kill_one(&mut self, store: &mut FlowStore, id: &str) -> Result<bool, FlowError> {
        let changed = store.apply(id, Flow::kill)?;
        if changed {
            self.resolve(id, InterceptDecision::Kill);
            tracing::debug!(flow = %id, "flow killed");
        }
        Ok(changed)
    }

    /// Abort every killable flow. Returns how many changed.
    pub fn kill_all(&mut self, store: &mut FlowStore) -> usize {
        let changed = store.update_many(Flow::kill);
        for id in &changed {
            self.resolve(id, InterceptDecision::Kill);
        }
        changed.len()
    }

    /// Number of flows the engine is waiting on
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop all decision channels; waiting engines see the sender closed
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }
}

impl Default for InterceptionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::flow::testing::{tflow, ttcpflow};
    use crate::flow::KILLED_MESSAGE;
    use crate::updates::UpdateBroadcaster;
    use std::sync::Arc;

    fn store_with(flows: Vec<Flow>) -> FlowStore {
        let updates = UpdateBroadcaster::new(64);
        let events = Arc::new(EventLog::new(100, updates.clone()));
        let mut store = FlowStore::new(events, updates);
        store.add(flows).unwrap();
        store
    }

    #[test]
    fn test_resume_and_kill_transitions() {
        let f = tflow(false, false, false);
        let id = f.id.clone();
        let mut store = store_with(vec![f]);
        let mut ctl = InterceptionController::new();

        assert!(!ctl.resume_one(&mut store, &id).unwrap());
        assert!(ctl.intercept_one(&mut store, &id).unwrap());
        assert!(store.get_by_id(&id).unwrap().killable());

        assert!(ctl.resume_one(&mut store, &id).unwrap());
        assert!(!store.get_by_id(&id).unwrap().intercepted);

        ctl.intercept_one(&mut store, &id).unwrap();
        assert!(ctl.kill_one(&mut store, &id).unwrap());
        let flow = store.get_by_id(&id).unwrap();
        assert!(!flow.intercepted);
        assert_eq!(flow.error.as_ref().unwrap().msg, KILLED_MESSAGE);

        // killed flows cannot be held again
        assert!(!ctl.intercept_one(&mut store, &id).unwrap());
        assert!(!ctl.kill_one(&mut store, &id).unwrap());
    }

    #[test]
    fn test_unknown_flow() {
        let mut store = store_with(vec![]);
        let mut ctl = InterceptionController::new();
        assert!(matches!(ctl.resume_one(&mut store, "x"), Err(FlowError::NotFound(_))));
    }

    #[test]
    fn test_bulk_operations_count_changes() {
        let mut store = store_with(vec![
            tflow(false, false, false),
            tflow(true, false, false),
            ttcpflow(false),
        ]);
        let mut ctl = InterceptionController::new();

        let http_only = |f: &Flow| f.kind() == "http";
        assert_eq!(ctl.intercept_matching(&mut store, &http_only), 2);
        assert_eq!(ctl.intercept_matching(&mut store, &http_only), 0);
        assert_eq!(ctl.kill_all(&mut store), 2);
        assert_eq!(ctl.resume_all(&mut store), 0);
        assert_eq!(store.iter().filter(|f| f.is_killed()).count(), 2);
    }

    #[tokio::test]
    async fn test_gate_receives_decisions() {
        let a = tflow(false, false, false);
        let b = tflow(false, false, false);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let mut store = store_with(vec![a, b]);
        let mut ctl = InterceptionController::new();

        assert!(ctl.gate(&store, "nope").is_err());
        ctl.intercept_one(&mut store, &a_id).unwrap();
        ctl.intercept_one(&mut store, &b_id).unwrap();
        let gate_a = ctl.gate(&store, &a_id).unwrap();
        let gate_b = ctl.gate(&store, &b_id).unwrap();
        assert_eq!(ctl.pending_count(), 2);

        store
            .update(&a_id, |f| {
                f.request_mut().unwrap().path = "/edited".into();
                Ok(())
            })
            .unwrap();
        ctl.resume_one(&mut store, &a_id).unwrap();
        ctl.kill_one(&mut store, &b_id).unwrap();

        match gate_a.await.unwrap() {
            InterceptDecision::Resume(flow) => assert_eq!(flow.request().unwrap().path, "/edited"),
            other => panic!("unexpected decision {:?}", other),
        }
        assert!(matches!(gate_b.await.unwrap(), InterceptDecision::Kill));
        assert_eq!(ctl.pending_count(), 0);

        // late gates are settled from the flow's current state
        let late_a = ctl.gate(&store, &a_id).unwrap();
        assert!(matches!(late_a.await.unwrap(), InterceptDecision::Resume(_)));
        let late_b = ctl.gate(&store, &b_id).unwrap();
        assert!(matches!(late_b.await.unwrap(), InterceptDecision::Kill));
        assert_eq!(ctl.pending_count(), 0);
    }

    #[test]
    fn test_rule_parsing_and_matching() {
        let f = tflow(false, false, false);

        assert!(InterceptRule::parse("~m get").unwrap().matches(&f));
        assert!(!InterceptRule::parse("~m post").unwrap().matches(&f));
        assert!(InterceptRule::parse("~d address").unwrap().matches(&f));
        assert!(InterceptRule::parse("PATH").unwrap().matches(&f));
        assert!(InterceptRule::parse("~q ~m GET /path").unwrap().matches(&f));
        assert!(!InterceptRule::parse("~s").unwrap().matches(&f));
        assert!(!InterceptRule::parse("~q").unwrap().matches(&ttcpflow(false)));

        assert!(InterceptRule::parse("").is_err());
        assert!(InterceptRule::parse("~m").is_err());
        assert!(InterceptRule::parse("~x foo").is_err());
        assert!(InterceptRule::parse("(unclosed").is_err());
    }

    #[test]
    fn test_check_applies_active_filter() {
        let f = tflow(false, false, false);
        let id = f.id.clone();
        let mut store = store_with(vec![f]);
        let mut ctl = InterceptionController::new();
        ctl.set_filter(Some(Box::new(InterceptRule::parse("~m GET").unwrap())));

        assert!(!ctl.check(&mut store, &id).unwrap());
        ctl.set_active(true);
        assert!(ctl.check(&mut store, &id).unwrap());
        assert!(store.get_by_id(&id).unwrap().intercepted);
    }
}
