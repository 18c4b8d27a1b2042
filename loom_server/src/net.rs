use crate::protocol::{ClientCommand, ClientId, InboundMsg, OutboundMsg, ServerMessage, Severity};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message};

const REPLACED_REASON: &str = "another client took control";
/// How long a new client may take to send its HTTP upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Short read timeout on an established client so the loop keeps moving.
const POLL_TIMEOUT: Duration = Duration::from_millis(30);
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

struct ActiveClient {
    ws: tungstenite::WebSocket<TcpStream>,
    client_id: ClientId,
}

pub struct NetworkThread {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkThread {
    /// Bind `addr` and serve websocket clients on a new thread. Port 0
    /// picks a free port; see [`NetworkThread::listen_addr`].
    pub fn spawn_with_addr(
        addr: &str,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "websocket server listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle =
            thread::spawn(move || run_server(listener, in_tx, out_rx, shutdown_for_thread));

        Ok(Self {
            local_addr,
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(
    listener: TcpListener,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    let mut active: Option<ActiveClient> = None;
    let mut next_client_id: ClientId = 1;

    while !shutdown.load(Ordering::Relaxed) {
        // Accept new connections. The newest client always wins.
        loop {
            match listener.accept() {
                Ok((stream, socket_addr)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(WRITE_TIMEOUT));

                    let ws = match tungstenite::accept(stream) {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(%socket_addr, error = %e, "ws handshake failed");
                            continue;
                        }
                    };
                    let _ = ws.get_ref().set_read_timeout(Some(POLL_TIMEOUT));

                    if let Some(mut prev) = active.take() {
                        info!(client_id = prev.client_id, "closing replaced client");
                        let _ = prev.ws.close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: REPLACED_REASON.into(),
                        }));
                        let _ = prev.ws.flush();
                        let _ = in_tx.send(InboundMsg::ClientDisconnected {
                            client_id: prev.client_id,
                        });
                    }

                    let client_id = next_client_id;
                    next_client_id += 1;
                    if in_tx
                        .send(InboundMsg::ClientConnected {
                            client_id,
                            socket_addr,
                        })
                        .is_err()
                    {
                        // The hub is gone; nothing left to serve.
                        let mut ws = ws;
                        let _ = ws.close(None);
                        return;
                    }
                    active = Some(ActiveClient { ws, client_id });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "ws accept failed");
                    break;
                }
            }
        }

        // Outbound: drain queued messages. Anything addressed to a client
        // that has since been replaced is dropped.
        loop {
            match out_rx.try_recv() {
                Ok(OutboundMsg::Send { client_id, msg }) => {
                    let Some(client) = active.as_mut() else {
                        continue;
                    };
                    if client.client_id != client_id {
                        continue;
                    }
                    if send_server_message(&mut client.ws, &msg).is_err() {
                        let client_id = client.client_id;
                        let _ = client.ws.close(None);
                        active = None;
                        let _ = in_tx.try_send(InboundMsg::ClientDisconnected { client_id });
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // Inbound: read at most one message per loop (timeouts keep the loop moving).
        if let Some(client) = active.as_mut() {
            let client_id = client.client_id;
            let keep = match client.ws.read() {
                Ok(msg) => handle_inbound(&in_tx, client, msg).is_ok(),
                Err(tungstenite::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    true
                }
                Err(e) => {
                    debug!(client_id, error = %e, "ws read ended");
                    false
                }
            };
            if !keep {
                let _ = client.ws.close(None);
                active = None;
                info!(client_id, "client gone");
                let _ = in_tx.try_send(InboundMsg::ClientDisconnected { client_id });
            }
        } else {
            // If no active client, avoid busy-looping.
            thread::sleep(Duration::from_millis(25));
        }
    }

    if let Some(mut client) = active {
        let _ = client.ws.close(None);
    }
}

fn handle_inbound(
    in_tx: &Sender<InboundMsg>,
    client: &mut ActiveClient,
    msg: Message,
) -> Result<(), ()> {
    let text = match msg {
        Message::Text(s) => s,
        Message::Binary(_) => return Ok(()),
        Message::Ping(payload) => {
            let _ = client.ws.send(Message::Pong(payload));
            return Ok(());
        }
        Message::Pong(_) => return Ok(()),
        Message::Close(_) => return Err(()),
        Message::Frame(_) => return Ok(()),
    };

    let cmd: ClientCommand = match serde_json::from_str(&text) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "rejecting malformed command");
            let _ = send_server_message(
                &mut client.ws,
                &ServerMessage::problem(Severity::Error, format!("invalid command: {e}")),
            );
            return Ok(());
        }
    };

    // Commands must not be dropped; the hub drains quickly.
    if in_tx
        .send(InboundMsg::Command {
            client_id: client.client_id,
            cmd,
        })
        .is_err()
    {
        return Err(());
    }
    Ok(())
}

fn send_server_message(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    msg: &ServerMessage,
) -> Result<(), ()> {
    let payload = serde_json::to_string(msg).map_err(|_| ())?;
    ws.send(Message::Text(payload.into())).map_err(|_| ())
}
