//! In-process relay and helpers shared by the integration tests.
//!
//! The relay mimics the external collaboration server: every text frame
//! received on `/design/{id}` is fanned out to every socket on the same
//! path, the sender included.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use forma_collab::{CollabSession, Operation, SessionConfig, SessionEvent};
use forma_core::DesignStore;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const STEP: Duration = Duration::from_secs(3);

pub type PeerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Rooms = Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>;

pub struct Relay {
    pub port: u16,
    rooms: Rooms,
    paths: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    acceptor: JoinHandle<()>,
}

impl Relay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let rooms = rooms.clone();
            let paths = paths.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let task = tokio::spawn(serve(stream, rooms.clone(), paths.clone()));
                    connections.lock().await.push(task);
                }
            })
        };

        Self {
            port,
            rooms,
            paths,
            connections,
            acceptor,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Paths requested by connecting clients, in accept order.
    pub async fn paths(&self) -> Vec<String> {
        self.paths.lock().await.clone()
    }

    /// Kill every open socket but keep accepting new ones.
    pub async fn drop_connections(&self) {
        for task in self.connections.lock().await.drain(..) {
            task.abort();
        }
        self.rooms.lock().await.clear();
    }

    pub async fn shutdown(self) {
        self.acceptor.abort();
        self.drop_connections().await;
    }
}

async fn serve(stream: TcpStream, rooms: Rooms, paths: Arc<Mutex<Vec<String>>>) {
    let mut path = String::new();
    let record_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, record_path).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    paths.lock().await.push(path.clone());

    let room = rooms
        .lock()
        .await
        .entry(path)
        .or_insert_with(|| broadcast::channel(256).0)
        .clone();
    let mut fanout = room.subscribe();
    let (mut sender, mut receiver) = ws.split();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = room.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            out = fanout.recv() => match out {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Session config pointing at `relay` with a short retry delay.
pub fn test_config(relay: &Relay) -> SessionConfig {
    let mut config = SessionConfig::with_server(relay.url());
    config.reconnect.delay_ms = 50;
    config
}

/// Raw socket on a design channel, standing in for another browser.
pub async fn connect_peer(relay: &Relay, design_id: &str) -> PeerSocket {
    let url = format!("{}/design/{design_id}", relay.url());
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    // Let the relay subscribe this socket before anything is broadcast.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ws
}

pub async fn send_raw(peer: &mut PeerSocket, text: &str) {
    peer.send(Message::Text(text.to_owned().into())).await.unwrap();
}

pub async fn send_op(peer: &mut PeerSocket, op: &Operation) {
    send_raw(peer, &op.encode().unwrap()).await;
}

/// Next operation frame seen by a raw peer.
pub async fn recv_op(peer: &mut PeerSocket) -> Operation {
    loop {
        let msg = timeout(STEP, peer.next())
            .await
            .expect("peer timed out")
            .expect("peer socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return Operation::decode(text.as_str()).unwrap();
        }
    }
}

pub async fn next_event(session: &mut CollabSession, store: &mut DesignStore) -> SessionEvent {
    timeout(STEP, session.next_event(store))
        .await
        .expect("no session event in time")
        .expect("session driver stopped")
}

/// Skip events until one matches `pred`.
pub async fn wait_for(
    session: &mut CollabSession,
    store: &mut DesignStore,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(session, store).await;
        if pred(&event) {
            return event;
        }
    }
}
