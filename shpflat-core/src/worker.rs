//! Request dispatch for the background worker.
//!
//! A [`Worker`] owns the ingestion and flatten pipelines and turns each
//! inbound [`Request`] into a stream of [`Event`]s. Failures that escape a
//! pipeline, panics included, become a single `error` event; the worker
//! itself keeps serving.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use log::{debug, error, info};
use serde_json::Value as JsonValue;

use crate::{
    config::Config,
    error::Error,
    flatten::{FlattenParams, Flattener},
    ingest::{FileOutcome, FileSource, Ingestor},
    protocol::{Event, EventSink, Request, RequestId},
};

pub struct Worker {
    ingestor: Ingestor,
    flattener: Flattener,
    config: Config,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Worker {
    pub fn new(config: Config) -> Self {
        Self {
            ingestor: Ingestor::new(config.ingest.clone()),
            flattener: Flattener::new(config.flatten.clone()),
            config,
        }
    }

    /// Swaps in custom pipelines, keeping `config` for request defaults.
    pub fn with_parts(config: Config, ingestor: Ingestor, flattener: Flattener) -> Self {
        Self { ingestor, flattener, config }
    }

    /// Runs `request` to completion, reporting through `sink`.
    ///
    /// Panics become an `error` event only where unwinding is available; on
    /// `wasm32-unknown-unknown` a panic aborts the instance instead.
    pub async fn handle<F: FileSource>(&self, request: Request<F>, sink: &impl EventSink) {
        let id = request.id();
        let result = AssertUnwindSafe(self.dispatch(request, sink)).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!("request {:?} failed: {}", id, failure);
        sink.emit(Event::Error {
            id,
            msg: "Encountered an error".to_string(),
            error: failure,
        });
    }

    async fn dispatch<F: FileSource>(&self, request: Request<F>, sink: &impl EventSink) -> Result<(), Error> {
        match request {
            Request::ProcessUpload { id, files } => {
                self.process_upload(id, files, sink).await;
                Ok(())
            }
            Request::Flatten { id, shapes, params, source } => self.flatten(id, shapes, params, source, sink),
            Request::Unknown => {
                debug!("ignoring message of unknown type");
                Ok(())
            }
        }
    }

    fn log_event(&self, sink: &impl EventSink, msg: impl Into<String>) {
        if self.config.emit_log_events {
            sink.emit(Event::log(msg));
        }
    }

    async fn process_upload<F: FileSource>(&self, id: RequestId, files: Vec<F>, sink: &impl EventSink) {
        self.log_event(sink, "Process Upload Top");
        if files.is_empty() {
            sink.emit(Event::log("Message didn't have any files!"));
        } else {
            let outcomes = self.ingestor.process_batch(id, &files, sink).await;
            let processed = outcomes.iter().filter(|o| matches!(o, FileOutcome::Processed { .. })).count();
            info!("{}: {}/{} files processed", id, processed, outcomes.len());
        }
        self.log_event(sink, "Process Upload Bottom");
    }

    fn flatten(
        &self,
        id: RequestId,
        shapes: JsonValue,
        params: Option<FlattenParams>,
        source: Option<JsonValue>,
        sink: &impl EventSink,
    ) -> Result<(), Error> {
        let params = params.unwrap_or_default();
        debug!("{}: flattening with cutoff {:?}", id, params.vertex_cutoff);
        let geo_json = self.flattener.flatten(shapes, &params)?;
        sink.emit(Event::Flattened { id, geo_json, source });
        Ok(())
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
