//! In-process client for the worker.
//!
//! All events flow back over one channel, as they would from a browser
//! worker's `postMessage`; a router task fans them out to the request they
//! belong to. Each request gets its own id, so any number can be in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use shpflat_core::{protocol::Event, Config, Feature, FlattenParams, Request, RequestId, Worker};
use tokio::sync::{mpsc, oneshot};

use crate::files::LocalFile;

enum Envelope {
    Register(RequestId, oneshot::Sender<Vec<Event>>),
    Event(Event),
    Done(RequestId),
}

struct Pending {
    events: Vec<Event>,
    reply: oneshot::Sender<Vec<Event>>,
}

pub struct WorkerClient {
    worker: Arc<Worker>,
    tx: mpsc::UnboundedSender<Envelope>,
    next_id: AtomicU64,
}

async fn route(mut rx: mpsc::UnboundedReceiver<Envelope>) {
    let mut pending: HashMap<RequestId, Pending> = HashMap::new();
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Register(id, reply) => {
                pending.insert(id, Pending { events: Vec::new(), reply });
            }
            Envelope::Event(Event::Log { msg }) => info!("worker: {}", msg),
            Envelope::Event(event) => match event.id().and_then(|id| pending.get_mut(&id)) {
                Some(entry) => entry.events.push(event),
                None => warn!("dropping event for unknown request: {:?}", event),
            },
            Envelope::Done(id) => match pending.remove(&id) {
                Some(Pending { events, reply }) => {
                    if reply.send(events).is_err() {
                        debug!("{}: caller went away", id);
                    }
                }
                None => warn!("{} finished but was never registered", id),
            },
        }
    }
}

fn assign_id(request: Request<LocalFile>, id: RequestId) -> Request<LocalFile> {
    match request {
        Request::ProcessUpload { files, .. } => Request::ProcessUpload { id, files },
        Request::Flatten { shapes, params, source, .. } => Request::Flatten { id, shapes, params, source },
        Request::Unknown => Request::Unknown,
    }
}

impl WorkerClient {
    /// Starts the event router on the current tokio runtime.
    pub fn spawn(config: Config) -> Self {
        Self::with_worker(Worker::new(config))
    }

    pub fn with_worker(worker: Worker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(route(rx));
        Self {
            worker: Arc::new(worker),
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends `request` under a fresh id and waits for all of its events.
    pub async fn send(&self, request: Request<LocalFile>) -> Result<(RequestId, Vec<Event>)> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Envelope::Register(id, reply))
            .map_err(|_| anyhow!("worker router stopped"))?;

        let worker = self.worker.clone();
        let tx = self.tx.clone();
        let request = assign_id(request, id);
        tokio::spawn(async move {
            let sink = |event: Event| {
                let _ = tx.send(Envelope::Event(event));
            };
            worker.handle(request, &sink).await;
            let _ = tx.send(Envelope::Done(id));
        });

        let events = done.await.map_err(|_| anyhow!("{} was dropped before finishing", id))?;
        Ok((id, events))
    }

    pub async fn upload(&self, files: Vec<LocalFile>) -> Result<Vec<Event>> {
        let (_, events) = self.send(Request::ProcessUpload { id: RequestId::default(), files }).await?;
        Ok(events)
    }

    pub async fn flatten(&self, shapes: JsonValue, params: Option<FlattenParams>) -> Result<Option<Feature>> {
        let request = Request::Flatten {
            id: RequestId::default(),
            shapes,
            params,
            source: None,
        };
        let (id, events) = self.send(request).await?;
        for event in events {
            match event {
                Event::Flattened { geo_json, .. } => return Ok(geo_json),
                Event::Error { msg, error, .. } => bail!("{}: {}: {}", id, msg, error),
                _ => {}
            }
        }
        bail!("{} finished without a result", id)
    }
}
