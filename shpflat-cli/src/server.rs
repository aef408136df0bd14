//! WebSocket server speaking the worker protocol.
//!
//! Each text frame is one request (`processUpload` with server-local file
//! paths, or `flatten`); every event it produces is sent back as a text frame.
//! Requests from one socket run concurrently and are told apart by `id`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shpflat_core::{protocol::Event, Request, Worker};
use tokio::sync::mpsc;

use crate::files::LocalFile;

/// Run the WebSocket server
pub async fn run_server(port: u16, worker: Worker) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(worker));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("WebSocket server listening on ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, worker))
}

async fn handle_socket(socket: WebSocket, worker: Arc<Worker>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending events back to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("could not serialize event for {:?}: {}", event.id(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                debug!("socket error: {}", e);
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<Request<LocalFile>>(&text) {
                Ok(request) => {
                    let worker = worker.clone();
                    let tx = tx.clone();
                    // Decoding and merging are CPU-bound; keep them off the socket tasks
                    let handle = tokio::runtime::Handle::current();
                    tokio::task::spawn_blocking(move || {
                        let sink = |event: Event| {
                            let _ = tx.send(event);
                        };
                        handle.block_on(worker.handle(request, &sink));
                    });
                }
                Err(e) => {
                    warn!("invalid message: {}", e);
                    let _ = tx.send(Event::Error {
                        id: None,
                        msg: "Invalid message".to_string(),
                        error: e.to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Clean up
    drop(tx);
    let _ = send_task.await;
}
