//! Simulated remote tunnel endpoint for integration tests.
//!
//! The remote is a plain `tokio-tungstenite` server that accepts a single
//! WebSocket connection and runs a test-supplied script against it.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub type RemoteSocket = WebSocketStream<TcpStream>;

/// How long a script waits for any single frame before giving up.
pub const FRAME_WAIT: Duration = Duration::from_secs(5);

/// Binds a remote on the current runtime.  Returns its `ws://` URL and the
/// task running the script.
pub async fn bind_remote<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(RemoteSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind remote listener");
    let addr = listener.local_addr().expect("remote local addr");

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("remote accept");
        let ws = accept_async(stream).await.expect("remote upgrade");
        script(ws).await;
    });

    (format!("ws://{addr}/devices/test"), task)
}

/// A remote running on its own runtime, for tests whose main thread blocks
/// (the embedded handle).
pub struct RemoteThread {
    pub url: String,
    // Dropping the runtime stops the script.
    _runtime: Runtime,
}

impl RemoteThread {
    pub fn spawn<F, Fut>(script: F) -> Self
    where
        F: FnOnce(RemoteSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("remote runtime");
        let (url, _task) = runtime.block_on(bind_remote(script));
        Self {
            url,
            _runtime: runtime,
        }
    }
}

// ── Script helpers ────────────────────────────────────────────────────────────

/// Next text or binary frame, skipping ping/pong.  `None` once the peer has
/// closed or nothing arrived within [`FRAME_WAIT`].
pub async fn next_data(ws: &mut RemoteSocket) -> Option<Message> {
    loop {
        match timeout(FRAME_WAIT, ws.next()).await {
            Ok(Some(Ok(msg @ (Message::Text(_) | Message::Binary(_))))) => return Some(msg),
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => {
                return None
            }
            Ok(Some(Ok(_))) => continue,
        }
    }
}

pub async fn send_text(ws: &mut RemoteSocket, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("remote send text");
}

pub async fn send_binary(ws: &mut RemoteSocket, payload: &[u8]) {
    ws.send(Message::Binary(payload.to_vec()))
        .await
        .expect("remote send binary");
}

/// Sends `device:ok` and waits for the bridge's `client:ok`.
pub async fn handshake(ws: &mut RemoteSocket) {
    send_text(ws, "device:ok").await;
    match next_data(ws).await {
        Some(Message::Text(text)) => assert_eq!(text, "client:ok"),
        other => panic!("expected client:ok, got {other:?}"),
    }
}

/// Keeps the connection open until the bridge closes it.
pub async fn hold_open(ws: &mut RemoteSocket) {
    while let Some(Ok(msg)) = ws.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
