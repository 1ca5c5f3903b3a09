//! WebSocket client for the API server

use crate::protocol::{Request, Response};
use anyhow::{Context, Result, anyhow};
use async_net::TcpStream;
use async_tungstenite::tungstenite::Message;
use async_tungstenite::{WebSocketStream, client_async};
use futures::{SinkExt, StreamExt};
use tracing::debug;

/// Connection to a running `k3sctl serve`
pub struct ApiClient {
    ws: WebSocketStream<TcpStream>,
}

impl ApiClient {
    /// Connect to the server at `addr` (`host:port`)
    pub async fn connect(addr: &str) -> Result<Self> {
        let url = format!("ws://{addr}/");
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to k3sctl API at {addr}"))?;
        let (ws, _) = client_async(&url, stream)
            .await
            .context("Failed to establish WebSocket connection")?;
        debug!("Connected to k3sctl API at {}", addr);
        Ok(Self { ws })
    }

    /// Send a request and wait for its response
    pub async fn send_request(&mut self, request: Request) -> Result<Response> {
        let request_json = serde_json::to_string(&request)?;
        self.ws.send(Message::Text(request_json.into())).await?;
        self.next_response().await
    }

    /// Next message from the server, such as a pushed event
    pub async fn next_response(&mut self) -> Result<Response> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).context("Failed to parse API response");
                }
                Some(Ok(Message::Close(_))) => return Err(anyhow!("Connection closed by server")),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(anyhow!("WebSocket error: {}", e)),
                None => return Err(anyhow!("Connection closed unexpectedly")),
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
