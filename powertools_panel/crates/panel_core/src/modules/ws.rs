use crate::modules::error::{PanelError, PanelResult};
use crate::modules::protocol::{BackendCall, ClientCommand, ServerMessage, PROTOCOL_VERSION};
use crate::modules::transport::Transport;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ReplyTx = oneshot::Sender<PanelResult<Value>>;

enum TransportCommand {
    Call { call: BackendCall, reply: ReplyTx },
    Shutdown,
}

struct Queued {
    call: BackendCall,
    reply: ReplyTx,
}

enum Exit {
    Reconnect,
    Shutdown,
}

/// Websocket link to the backend, driven by a background task that owns the
/// socket, reconnects with backoff and matches replies to calls.
pub struct WsTransport {
    commands: mpsc::Sender<TransportCommand>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl WsTransport {
    pub fn spawn(url: Url) -> Self {
        let (commands, rx) = mpsc::channel(64);
        let (ready_tx, ready) = watch::channel(false);
        let task = tokio::spawn(run(url, rx, ready_tx));
        Self {
            commands,
            ready,
            task,
        }
    }

    /// True while a session with the backend is established.
    pub fn is_connected(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.try_send(TransportCommand::Shutdown);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Transport for WsTransport {
    fn handshake(&self) -> BoxFuture<'_, PanelResult<()>> {
        let mut ready = self.ready.clone();
        async move {
            let done = ready.wait_for(|r| *r).await.is_ok();
            if done {
                Ok(())
            } else {
                Err(PanelError::Disconnected)
            }
        }
        .boxed()
    }

    fn call(&self, call: BackendCall) -> BoxFuture<'_, PanelResult<Value>> {
        let commands = self.commands.clone();
        async move {
            let (reply, rx) = oneshot::channel();
            commands
                .send(TransportCommand::Call { call, reply })
                .await
                .map_err(|_| PanelError::Disconnected)?;
            rx.await.map_err(|_| PanelError::Disconnected)?
        }
        .boxed()
    }
}

async fn run(
    url: Url,
    mut commands: mpsc::Receiver<TransportCommand>,
    ready: watch::Sender<bool>,
) {
    let mut failures: u32 = 0;
    let mut backlog: VecDeque<Queued> = VecDeque::new();
    let mut next_call_id: u64 = 1;

    loop {
        let mut socket = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                failures = 0;
                info!("connected to backend at {url}");
                socket
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let retry = reconnect_delay(failures);
                warn!("backend connect to {url} failed: {e}; retrying in {retry:?}");
                let sleep = tokio::time::sleep(retry);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        cmd = commands.recv() => match cmd {
                            Some(TransportCommand::Call { call, reply }) => {
                                backlog.push_back(Queued { call, reply });
                            }
                            Some(TransportCommand::Shutdown) | None => {
                                fail_backlog(&mut backlog);
                                return;
                            }
                        }
                    }
                }
                continue;
            }
        };

        let mut session_token: Option<String> = None;
        let mut pending: HashMap<u64, ReplyTx> = HashMap::new();

        let exit = 'conn: loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(TransportCommand::Call { call, reply }) => match session_token.as_deref() {
                        Some(token) => {
                            let id = next_call_id;
                            next_call_id += 1;
                            if send_call(&mut socket, token, id, call, reply, &mut pending).await.is_err() {
                                break 'conn Exit::Reconnect;
                            }
                        }
                        None => backlog.push_back(Queued { call, reply }),
                    },
                    Some(TransportCommand::Shutdown) | None => break 'conn Exit::Shutdown,
                },
                incoming = socket.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let msg = match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                debug!("ignoring unparsable backend frame: {e}");
                                continue;
                            }
                        };
                        match msg {
                            ServerMessage::Handshake { session_token: token, version } => {
                                if version != PROTOCOL_VERSION {
                                    warn!("backend speaks protocol v{version}, expected v{PROTOCOL_VERSION}");
                                }
                                let ack = ClientCommand::HandshakeAck { session_token: token.clone() };
                                if send_json(&mut socket, &ack).await.is_err() {
                                    break 'conn Exit::Reconnect;
                                }
                                ready.send_replace(true);
                                debug!("backend session established, flushing {} queued calls", backlog.len());
                                while let Some(Queued { call, reply }) = backlog.pop_front() {
                                    let id = next_call_id;
                                    next_call_id += 1;
                                    if send_call(&mut socket, &token, id, call, reply, &mut pending).await.is_err() {
                                        break 'conn Exit::Reconnect;
                                    }
                                }
                                session_token = Some(token);
                            }
                            ServerMessage::Reply { call_id, value } => match pending.remove(&call_id) {
                                Some(reply) => {
                                    let _ = reply.send(Ok(value));
                                }
                                None => debug!("reply for unknown call {call_id}"),
                            },
                            ServerMessage::Error { call_id: Some(call_id), msg, code } => {
                                if let Some(reply) = pending.remove(&call_id) {
                                    let _ = reply.send(Err(PanelError::Backend { code, msg }));
                                }
                            }
                            ServerMessage::Error { call_id: None, msg, code } => {
                                warn!("backend error ({code:?}): {msg}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break 'conn Exit::Reconnect,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("backend socket error: {e}");
                        break 'conn Exit::Reconnect;
                    }
                }
            }
        };

        ready.send_replace(false);
        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(PanelError::Disconnected));
        }
        let _ = socket.close(None).await;

        match exit {
            Exit::Shutdown => {
                fail_backlog(&mut backlog);
                info!("backend transport shut down");
                return;
            }
            Exit::Reconnect => info!("backend connection lost, reconnecting"),
        }
    }
}

fn fail_backlog(backlog: &mut VecDeque<Queued>) {
    for queued in backlog.drain(..) {
        let _ = queued.reply.send(Err(PanelError::Disconnected));
    }
}

async fn send_call(
    socket: &mut Socket,
    token: &str,
    call_id: u64,
    call: BackendCall,
    reply: ReplyTx,
    pending: &mut HashMap<u64, ReplyTx>,
) -> Result<(), ()> {
    let cmd = ClientCommand::Call {
        session_token: token.to_string(),
        call_id,
        call,
    };
    pending.insert(call_id, reply);
    send_json(socket, &cmd).await
}

async fn send_json(socket: &mut Socket, msg: &ClientCommand) -> Result<(), ()> {
    let payload = serde_json::to_string(msg).map_err(|_| ())?;
    socket.send(Message::Text(payload.into())).await.map_err(|_| ())
}

/// Pause before each reconnect attempt; the last entry repeats.
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Delay after the `failures`-th consecutive failed connect (1-based).
pub fn reconnect_delay(failures: u32) -> Duration {
    let idx = usize::try_from(failures.saturating_sub(1))
        .unwrap_or(usize::MAX)
        .min(RECONNECT_DELAYS.len() - 1);
    RECONNECT_DELAYS[idx]
}
