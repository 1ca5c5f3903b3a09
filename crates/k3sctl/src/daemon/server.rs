//! WebSocket server for the cluster API

use crate::daemon::handlers;
use crate::protocol::{Request, Response};
use anyhow::{Context, Result};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::accept_async;
use async_tungstenite::tungstenite::Message;
use cluster_orchestration::{ClusterWatch, Orchestrator};
use futures::StreamExt;
use smol::Task;
use tracing::{debug, error, info, warn};

/// Bind `addr` and serve until the process exits
pub async fn run(orchestrator: Orchestrator, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("k3sctl API listening on ws://{}", listener.local_addr()?);
    serve(listener, orchestrator).await
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, orchestrator: Orchestrator) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!("New connection from {}", peer_addr);
                let orchestrator = orchestrator.clone();
                smol::spawn(async move {
                    if let Err(e) = handle_connection(stream, orchestrator).await {
                        error!("Connection handler error: {}", e);
                    }
                })
                .detach();
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a WebSocket connection.
///
/// Responses and pushed events go out through one queue drained by a
/// writer task. Watches opened on the connection end with it.
async fn handle_connection(stream: TcpStream, orchestrator: Orchestrator) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .context("Failed to accept WebSocket connection")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, rx) = async_channel::unbounded::<Response>();
    let mut watches: Vec<Task<()>> = Vec::new();

    let writer = smol::spawn(async move {
        while let Ok(response) = rx.recv().await {
            let text = serde_json::to_string(&response)?;
            ws_sender.send(Message::Text(text.into())).await?;
        }
        ws_sender.close(None).await?;
        anyhow::Ok(())
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let request: Request = match serde_json::from_str(&text) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        let response = Response::Error {
                            kind: "InvalidOption".into(),
                            message: format!("Invalid request format: {e}"),
                        };
                        if tx.send(response).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let response = match request {
                    Request::Watch => match orchestrator.watch() {
                        Ok(watch) => {
                            if tx.send(Response::Watching).await.is_err() {
                                break;
                            }
                            watches.push(forward_events(watch, tx.clone()));
                            continue;
                        }
                        Err(e) => Response::error(&e),
                    },
                    request => handlers::handle_request(request, &orchestrator).await,
                };
                if tx.send(response).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    for watch in watches {
        watch.cancel().await;
    }
    tx.close();
    if let Err(e) = writer.await {
        debug!("Writer finished with: {}", e);
    }
    debug!("Connection closed");
    Ok(())
}

/// Push events from `watch` into `tx` until the returned task is dropped or
/// cancelled
fn forward_events(watch: ClusterWatch, tx: async_channel::Sender<Response>) -> Task<()> {
    smol::spawn(async move {
        while let Some(event) = watch.next().await {
            if tx.send(Response::from(event)).await.is_err() {
                break;
            }
        }
        debug!("Watch stream ended");
    })
}
