//! Local WebSocket server for integration tests.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use amora_realtime::ServerEndpoint;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// One accepted client connection.
pub struct ServerConn {
    /// Request path and query, e.g. `/ws/me?token=tok`
    pub path: String,
    pub ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next text frame from the client, parsed. `None` once the client is gone.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match tokio::time::timeout(TIMEOUT, self.ws.next()).await.ok()?? {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Next client frame of `kind`, skipping keepalive pings and anything else.
    pub async fn recv_kind(&mut self, kind: &str) -> Option<serde_json::Value> {
        loop {
            let value = self.recv_json().await?;
            if value["kind"] == kind {
                return Some(value);
            }
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let callback = |req: &Request, resp: Response| {
                        path = req.uri().to_string();
                        Ok(resp)
                    };
                    let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                    if let Ok(ws) = accepted {
                        let _ = tx.send(ServerConn { path, ws });
                    }
                });
            }
        });

        Self { addr, conns }
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            host: self.addr.to_string(),
            secure: false,
            api_base_url: format!("http://{}", self.addr),
        }
    }

    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(TIMEOUT, self.conns.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("server stopped")
    }

    /// Whether a client connects within `window`.
    pub async fn try_accept(&mut self, window: Duration) -> Option<ServerConn> {
        tokio::time::timeout(window, self.conns.recv()).await.ok()?
    }
}

/// An address nothing listens on.
pub async fn dead_endpoint() -> ServerEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ServerEndpoint {
        host: addr.to_string(),
        secure: false,
        api_base_url: format!("http://{addr}"),
    }
}
