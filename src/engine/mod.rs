//! Seam to the protocol engine
//!
//! The network side (proxy servers, TLS, wire parsers) lives outside this
//! crate. It reaches the control plane through [`crate::session::Session`]
//! and is reached back only through [`ProtocolEngine`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::flow::{Flow, FlowData};

/// Operations the control plane requests from the engine
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Re-issue the request of `flow`. Returns once the replay was accepted.
    async fn replay(&self, flow: Flow) -> Result<(), EngineError>;

    /// Replays accepted but not finished
    fn replay_count(&self) -> usize;

    /// Abandon all pending replays. Returns how many were dropped.
    fn stop_replays(&self) -> usize;
}

/// Replay ids in flight, each with the generation of its queue entry
#[derive(Default)]
struct InFlightState {
    generations: HashMap<String, u64>,
    next_generation: u64,
}

type InFlight = Arc<Mutex<InFlightState>>;

/// Bundled engine side of replay: a bounded queue drained by a consumer task
pub struct ReplayQueue {
    tx: mpsc::Sender<(u64, Flow)>,
    in_flight: InFlight,
}

/// Receiving half of a [`ReplayQueue`]
pub struct ReplayConsumer {
    rx: mpsc::Receiver<(u64, Flow)>,
    in_flight: InFlight,
}

impl ReplayQueue {
    pub fn new(capacity: usize) -> (Self, ReplayConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let in_flight: InFlight = Arc::new(Mutex::new(InFlightState::default()));
        (
            Self {
                tx,
                in_flight: in_flight.clone(),
            },
            ReplayConsumer { rx, in_flight },
        )
    }
}

#[async_trait]
impl ProtocolEngine for ReplayQueue {
    async fn replay(&self, flow: Flow) -> Result<(), EngineError> {
        let id = flow.id.clone();
        let generation = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.generations.contains_key(&id) {
                return Err(EngineError::Rejected(format!("Flow {} is already replaying.", id)));
            }
            let generation = in_flight.next_generation;
            in_flight.next_generation += 1;
            in_flight.generations.insert(id.clone(), generation);
            generation
        };
        if self.tx.send((generation, flow)).await.is_err() {
            self.in_flight.lock().generations.remove(&id);
            return Err(EngineError::Unavailable);
        }
        tracing::debug!(flow = %id, generation, "replay queued");
        Ok(())
    }

    fn replay_count(&self) -> usize {
        self.in_flight.lock().generations.len()
    }

    fn stop_replays(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.generations.len();
        in_flight.generations.clear();
        count
    }
}

impl ReplayConsumer {
    /// Next queued replay that was not stopped in the meantime
    pub async fn next(&mut self) -> Option<Flow> {
        while let Some((generation, flow)) = self.rx.recv().await {
            if self.in_flight.lock().generations.get(&flow.id) == Some(&generation) {
                return Some(flow);
            }
            tracing::debug!(flow = %flow.id, generation, "skipping stopped replay");
        }
        None
    }

    /// Mark a replay as done
    pub fn finish(&self, id: &str) {
        self.in_flight.lock().generations.remove(id);
    }
}

/// The flow a replay produces: a fresh copy of the request, marked as replay
pub fn replay_copy(flow: &Flow) -> Flow {
    let mut copy = flow.duplicate();
    copy.is_replay = Some("request".to_string());
    copy.error = None;
    if let FlowData::Http { response, websocket, .. } = &mut copy.data {
        *response = None;
        *websocket = None;
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::tflow;

    #[tokio::test]
    async fn test_queue_rejects_duplicates_until_finished() {
        let (queue, mut consumer) = ReplayQueue::new(4);
        let f = tflow(true, false, false);
        let id = f.id.clone();

        queue.replay(f.clone()).await.unwrap();
        let err = queue.replay(f.clone()).await.unwrap_err();
        assert!(err.to_string().contains("already replaying"));
        assert_eq!(queue.replay_count(), 1);

        let got = consumer.next().await.unwrap();
        assert_eq!(got.id, id);
        consumer.finish(&id);
        assert_eq!(queue.replay_count(), 0);
        queue.replay(f).await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_replays_are_skipped() {
        let (queue, mut consumer) = ReplayQueue::new(4);
        let first = tflow(false, false, false);
        let second = tflow(false, false, false);
        queue.replay(first).await.unwrap();
        assert_eq!(queue.stop_replays(), 1);

        let second_id = second.id.clone();
        queue.replay(second).await.unwrap();
        assert_eq!(consumer.next().await.unwrap().id, second_id);
    }

    #[tokio::test]
    async fn test_stale_entry_of_replayed_again_flow_is_skipped() {
        let (queue, mut consumer) = ReplayQueue::new(4);
        let mut f = tflow(false, false, false);
        f.request_mut().unwrap().path = "/old".into();
        queue.replay(f.clone()).await.unwrap();
        assert_eq!(queue.stop_replays(), 1);

        f.request_mut().unwrap().path = "/new".into();
        queue.replay(f.clone()).await.unwrap();
        assert_eq!(queue.replay_count(), 1);

        let got = consumer.next().await.unwrap();
        assert_eq!(got.request().unwrap().path, "/new");
        consumer.finish(&f.id);
        assert_eq!(queue.replay_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_consumer_is_unavailable() {
        let (queue, consumer) = ReplayQueue::new(1);
        drop(consumer);
        let err = queue.replay(tflow(false, false, false)).await.unwrap_err();
        assert_eq!(err, EngineError::Unavailable);
        assert_eq!(queue.replay_count(), 0);
    }

    #[test]
    fn test_replay_copy() {
        let f = tflow(true, true, false);
        let copy = replay_copy(&f);
        assert_ne!(copy.id, f.id);
        assert_eq!(copy.is_replay.as_deref(), Some("request"));
        assert!(copy.response().is_none());
        assert!(copy.error.is_none());
        assert_eq!(copy.request(), f.request());
    }
}
