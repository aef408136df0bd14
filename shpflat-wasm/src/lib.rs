//! Web worker bindings for shapefile ingestion and flattening.
//!
//! A page (or a dedicated worker script) creates one [`GeometryWorker`] with a
//! `post` callback; every event the pipelines emit is handed to that callback
//! as a plain JSON-compatible object, in the same shape `postMessage` would
//! carry it.

use std::rc::Rc;

use js_sys::{Function, Promise};
use log::{error, info};
use serde::Serialize;
use shpflat_core::{protocol::Event, Config, EventSink, MemoryFile, Request, RequestId, Worker};
use wasm_bindgen::prelude::*;
use wasm_bindgen_console_logger::DEFAULT_LOGGER;
use wasm_bindgen_futures::spawn_local;

/// Initializes the logging system for WASM.
///
/// Sets up console logging and panic hooks for better error reporting in the browser.
/// Should be called once at application startup.
#[wasm_bindgen]
pub fn init_logs() {
    match log::set_logger(&DEFAULT_LOGGER) {
        Ok(_) => info!("Initialized console.logger"),
        Err(e) => error!("failed to set console.logger: {}", e),
    };
    console_error_panic_hook::set_once();
}

/// Updates the log level filter.
///
/// # Arguments
/// * `level` - Log level string: "error", "warn", "info", "debug", or "trace".
///   Defaults to "info" if empty or null.
#[wasm_bindgen]
pub fn update_log_level(level: JsValue) -> Result<(), JsError> {
    let level: Option<String> = serde_wasm_bindgen::from_value(level)?;
    let level = shpflat_core::parse_log_level(level.as_deref())?;
    log::set_max_level(level);
    Ok(())
}

/// Forwards events to a JS callback.
struct PostMessage(Function);

impl EventSink for PostMessage {
    fn emit(&self, event: Event) {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        match event.serialize(&serializer) {
            Ok(value) => {
                if let Err(e) = self.0.call1(&JsValue::NULL, &value) {
                    error!("post callback threw: {:?}", e);
                }
            }
            Err(e) => error!("could not serialize {:?} event: {}", event.id(), e),
        }
    }
}

#[wasm_bindgen]
pub struct GeometryWorker {
    worker: Rc<Worker>,
    post: Rc<PostMessage>,
}

#[wasm_bindgen]
impl GeometryWorker {
    /// Creates a worker that reports through `post`.
    ///
    /// `config` may be `undefined`/`null` for defaults, or a partial config
    /// object (`{ ingest: { maxRetries: 3 } }`).
    #[wasm_bindgen(constructor)]
    pub fn new(post: Function, config: JsValue) -> Result<GeometryWorker, JsError> {
        let config: Config = if config.is_undefined() || config.is_null() {
            Config::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        let level = shpflat_core::parse_log_level(config.log_level.as_deref())?;
        log::set_max_level(level);
        Ok(GeometryWorker {
            worker: Rc::new(Worker::new(config)),
            post: Rc::new(PostMessage(post)),
        })
    }

    /// Handles one protocol message (`processUpload` with in-memory files, or
    /// `flatten`). The promise resolves once every event for it is posted.
    #[wasm_bindgen(js_name = onMessage)]
    pub fn on_message(&self, msg: JsValue) -> Promise {
        let request: Result<Request<MemoryFile>, _> = serde_wasm_bindgen::from_value(msg);
        let request = match request {
            Ok(request) => request,
            Err(e) => return Promise::reject(&JsError::new(&format!("Invalid message: {}", e)).into()),
        };
        self.run(request)
    }

    /// Ingests one file read by the page (e.g. from a `File`'s `arrayBuffer()`).
    #[wasm_bindgen(js_name = processFile)]
    pub fn process_file(&self, id: f64, name: String, mime_type: String, bytes: Vec<u8>) -> Promise {
        let file = MemoryFile::new(name, mime_type, bytes);
        self.run(Request::ProcessUpload {
            id: RequestId(id as u64),
            files: vec![file],
        })
    }

    fn run(&self, request: Request<MemoryFile>) -> Promise {
        let worker = self.worker.clone();
        let post = self.post.clone();
        let mut request = Some(request);
        Promise::new(&mut |resolve, _reject| {
            let worker = worker.clone();
            let post = post.clone();
            let Some(request) = request.take() else { return };
            spawn_local(async move {
                worker.handle(request, post.as_ref()).await;
                let _ = resolve.call0(&JsValue::NULL);
            });
        })
    }
}
