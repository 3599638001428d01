//! Live flow store
//!
//! Flows are kept in arrival order and indexed by id. Every accepted
//! mutation is pushed to observers before the call returns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::FlowError;
use crate::events::EventLog;
use crate::flow::{flow_to_json, Flow, Message};
use crate::intercept::FlowFilter;
use crate::updates::{Resource, UpdateBroadcaster, UpdateCmd};

/// Sort key of the flow list observers see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewOrder {
    #[default]
    Time,
    Method,
    Url,
    Size,
}

impl ViewOrder {
    /// Parse a `view_order` option value
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "time" => Some(ViewOrder::Time),
            "method" => Some(ViewOrder::Method),
            "url" => Some(ViewOrder::Url),
            "size" => Some(ViewOrder::Size),
            _ => None,
        }
    }
}

fn started(flow: &Flow) -> DateTime<Utc> {
    flow.request()
        .map(|r| r.timestamp_start)
        .unwrap_or(flow.timestamp_created)
}

fn body_size(flow: &Flow) -> usize {
    let request = flow.request().and_then(|r| r.content()).map_or(0, <[u8]>::len);
    let response = flow.response().and_then(|r| r.content()).map_or(0, <[u8]>::len);
    request + response
}

pub struct FlowStore {
    /// Flow ids in insertion order
    order: Vec<String>,

    /// Flows by id. Always holds exactly the ids in `order`.
    flows: HashMap<String, Flow>,

    events: Arc<EventLog>,
    updates: Arc<UpdateBroadcaster>,
}

impl FlowStore {
    pub fn new(events: Arc<EventLog>, updates: Arc<UpdateBroadcaster>) -> Self {
        Self {
            order: Vec::new(),
            flows: HashMap::new(),
            events,
            updates,
        }
    }

    fn publish(&self, cmd: UpdateCmd, data: Value) {
        self.updates.publish(Resource::Flows, cmd, data);
    }

    /// Append flows in order
    ///
    /// A flow whose id is already present is skipped; the remaining flows
    /// are still added and the first duplicate id is reported afterwards.
    pub fn add(&mut self, flows: Vec<Flow>) -> Result<usize, FlowError> {
        let mut added = 0;
        let mut duplicate = None;
        for flow in flows {
            if self.flows.contains_key(&flow.id) {
                tracing::warn!(flow = %flow.id, "refusing to add duplicate flow");
                duplicate.get_or_insert_with(|| flow.id.clone());
                continue;
            }
            self.publish(UpdateCmd::Add, flow_to_json(&flow));
            self.order.push(flow.id.clone());
            self.flows.insert(flow.id.clone(), flow);
            added += 1;
        }
        match duplicate {
            Some(id) => Err(FlowError::DuplicateId(id)),
            None => Ok(added),
        }
    }

    /// Remove flows by id. Unknown ids are ignored. Returns how many were removed.
    pub fn remove<S: AsRef<str>>(&mut self, ids: &[S]) -> usize {
        let mut removed = 0;
        for id in ids {
            let id = id.as_ref();
            if self.flows.remove(id).is_some() {
                self.order.retain(|o| o != id);
                self.publish(UpdateCmd::Remove, Value::String(id.to_string()));
                removed += 1;
            }
        }
        removed
    }

    pub fn get_by_id(&self, id: &str) -> Result<&Flow, FlowError> {
        self.flows
            .get(id)
            .ok_or_else(|| FlowError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains_key(id)
    }

    /// Run a mutation on one flow and publish the result. Nothing is
    /// published when the closure fails.
    pub fn update<T>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Flow) -> Result<T, FlowError>,
    ) -> Result<T, FlowError> {
        let flow = self
            .flows
            .get_mut(id)
            .ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        let result = f(flow)?;
        let json = flow_to_json(flow);
        self.publish(UpdateCmd::Update, json);
        Ok(result)
    }

    /// Like [`FlowStore::update`] for closures that report whether they
    /// changed anything. Only changes are published.
    pub fn apply(&mut self, id: &str, f: impl FnOnce(&mut Flow) -> bool) -> Result<bool, FlowError> {
        let flow = self
            .flows
            .get_mut(id)
            .ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        let changed = f(flow);
        if changed {
            let json = flow_to_json(flow);
            self.publish(UpdateCmd::Update, json);
        }
        Ok(changed)
    }

    /// Apply `f` to every flow in order. Returns the ids of the flows it
    /// reported as changed.
    pub fn update_many(&mut self, mut f: impl FnMut(&mut Flow) -> bool) -> Vec<String> {
        let mut changed = Vec::new();
        for id in &self.order {
            if let Some(flow) = self.flows.get_mut(id) {
                if f(flow) {
                    self.updates
                        .publish(Resource::Flows, UpdateCmd::Update, flow_to_json(flow));
                    changed.push(id.clone());
                }
            }
        }
        changed
    }

    /// Drop every flow and the event log
    pub fn clear(&mut self) {
        let count = self.order.len();
        self.order.clear();
        self.flows.clear();
        self.publish(UpdateCmd::Reset, Value::Null);
        self.events.clear();
        tracing::info!(flows = count, "store cleared");
    }

    /// Flows in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Flow> {
        self.order.iter().filter_map(|id| self.flows.get(id))
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Flows passing `filter`, sorted by `order`. Equal keys keep arrival
    /// order.
    pub fn view(&self, filter: Option<&dyn FlowFilter>, order: ViewOrder, reversed: bool) -> Vec<&Flow> {
        let mut flows: Vec<&Flow> = self
            .iter()
            .filter(|f| filter.map_or(true, |p| p.matches(f)))
            .collect();
        match order {
            ViewOrder::Time => flows.sort_by_key(|f| started(f)),
            ViewOrder::Method => {
                flows.sort_by_cached_key(|f| f.request().map(|r| r.method.clone()).unwrap_or_default())
            }
            ViewOrder::Url => flows.sort_by_cached_key(|f| f.request().map(|r| r.url()).unwrap_or_default()),
            ViewOrder::Size => flows.sort_by_key(|f| body_size(f)),
        }
        if reversed {
            flows.reverse();
        }
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::tflow;
    use crate::updates::Observer;

    fn store() -> (FlowStore, Observer) {
        let updates = UpdateBroadcaster::new(64);
        let observer = updates.subscribe();
        let events = Arc::new(EventLog::new(100, updates.clone()));
        (FlowStore::new(events, updates), observer)
    }

    #[tokio::test]
    async fn test_add_keeps_order_and_publishes() {
        let (mut store, mut obs) = store();
        let a = tflow(false, false, false);
        let b = tflow(true, false, false);
        let ids = vec![a.id.clone(), b.id.clone()];

        assert_eq!(store.add(vec![a, b]).unwrap(), 2);
        assert_eq!(store.ids(), ids);

        for id in &ids {
            let msg = obs.recv().await.unwrap();
            assert_eq!(msg.cmd, UpdateCmd::Add);
            assert_eq!(msg.data["id"], id.as_str());
        }
    }

    #[test]
    fn test_view_filters_and_sorts() {
        use chrono::TimeZone;

        let (mut store, _obs) = store();
        let flow = |method: &str, secs: i64, resp: bool, content: Option<&[u8]>| {
            let mut f = tflow(resp, false, false);
            let req = f.request_mut().unwrap();
            req.method = method.into();
            req.timestamp_start = Utc.timestamp_opt(secs, 0).unwrap();
            req.content = content.map(<[u8]>::to_vec);
            f
        };
        let get = flow("GET", 300, false, Some(b"content"));
        let post = flow("POST", 100, true, Some(b"content"));
        let put = flow("PUT", 200, false, None);
        fn ids(flows: Vec<&Flow>) -> Vec<String> {
            flows.iter().map(|f| f.request().unwrap().method.clone()).collect()
        }
        store.add(vec![get, post, put]).unwrap();

        assert_eq!(ids(store.view(None, ViewOrder::Time, false)), ["POST", "PUT", "GET"]);
        assert_eq!(ids(store.view(None, ViewOrder::Method, false)), ["GET", "POST", "PUT"]);
        assert_eq!(ids(store.view(None, ViewOrder::Size, true)), ["POST", "GET", "PUT"]);

        let posts = |f: &Flow| f.request().map_or(false, |r| r.method == "POST");
        assert_eq!(ids(store.view(Some(&posts as &dyn FlowFilter), ViewOrder::Time, false)), ["POST"]);
        assert_eq!(store.len(), 3);

        assert_eq!(ViewOrder::parse("url"), Some(ViewOrder::Url));
        assert_eq!(ViewOrder::parse("color"), None);
    }

    #[test]
    fn test_duplicate_is_skipped() {
        let (mut store, _obs) = store();
        let a = tflow(false, false, false);
        let again = a.clone();
        let c = tflow(false, false, false);
        let dup_id = a.id.clone();

        store.add(vec![a]).unwrap();
        let err = store.add(vec![again, c]).unwrap_err();
        assert_eq!(err, FlowError::DuplicateId(dup_id));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_ignores_unknown() {
        let (mut store, mut obs) = store();
        let f = tflow(false, false, false);
        let id = f.id.clone();
        store.add(vec![f]).unwrap();

        assert_eq!(store.remove(&[id.as_str(), "nope"]), 1);
        assert!(store.is_empty());
        assert!(matches!(store.get_by_id(&id), Err(FlowError::NotFound(_))));

        obs.recv().await.unwrap();
        let msg = obs.recv().await.unwrap();
        assert_eq!(msg.cmd, UpdateCmd::Remove);
        assert_eq!(msg.data, Value::String(id));
    }

    #[tokio::test]
    async fn test_failed_update_publishes_nothing() {
        let (mut store, mut obs) = store();
        let f = tflow(false, false, false);
        let id = f.id.clone();
        store.add(vec![f]).unwrap();
        obs.recv().await.unwrap();

        let res: Result<(), _> =
            store.update(&id, |_| Err(FlowError::InvalidArgument("no".into())));
        assert!(res.is_err());
        assert!(obs.try_recv().is_none());

        store
            .update(&id, |f| {
                f.comment = "note".into();
                Ok(())
            })
            .unwrap();
        let msg = obs.recv().await.unwrap();
        assert_eq!(msg.cmd, UpdateCmd::Update);
        assert_eq!(msg.data["comment"], "note");

        assert!(!store.apply(&id, |_| false).unwrap());
        assert!(obs.try_recv().is_none());
    }

    #[test]
    fn test_update_many_reports_changed_ids() {
        let (mut store, _obs) = store();
        let mut held = tflow(false, false, false);
        held.intercepted = true;
        let held_id = held.id.clone();
        store.add(vec![held, tflow(false, false, false)]).unwrap();

        let changed = store.update_many(|f| f.resume());
        assert_eq!(changed, vec![held_id]);
    }

    #[tokio::test]
    async fn test_clear_resets_flows_and_events() {
        let (mut store, mut obs) = store();
        store.add(vec![tflow(false, false, false)]).unwrap();
        store.events.info("something happened");
        store.clear();

        assert!(store.is_empty());
        assert!(store.events.is_empty());

        let mut cmds = Vec::new();
        while let Some(msg) = obs.try_recv() {
            cmds.push((msg.resource, msg.cmd));
        }
        assert_eq!(
            cmds,
            vec![
                (Resource::Flows, UpdateCmd::Add),
                (Resource::Events, UpdateCmd::Add),
                (Resource::Flows, UpdateCmd::Reset),
                (Resource::Events, UpdateCmd::Reset),
            ]
        );
    }
}
