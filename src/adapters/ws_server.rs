//! WebSocket server adapter.
//!
//! Poll-based `tungstenite` server over std sockets. Every socket is
//! non-blocking. An opening handshake that cannot finish in one go is parked
//! as a [`MidHandshake`] and resumed on the next [`WsServer::poll`], so a
//! slow or silent peer never holds up the other clients.
//!
//! Client ids are slot indices in `0..MAX_WS_CLIENTS`. Connections beyond
//! capacity are closed right after the handshake. At most
//! `MAX_PENDING_HANDSHAKES` handshakes are parked at once, each for at most
//! `HANDSHAKE_TIMEOUT`.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tungstenite::handshake::server::{NoCallback, ServerHandshake};
use tungstenite::handshake::{HandshakeError, MidHandshake};
use tungstenite::{accept, Message, WebSocket};

use crate::error::TransportError;
use crate::noble::auth::{ClientId, MAX_WS_CLIENTS};
use crate::noble::transport::{TransportEvent, WsTransport};

/// Bound on a client's opening handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

const MAX_PENDING_HANDSHAKES: usize = MAX_WS_CLIENTS;

type WsStream = WebSocket<TcpStream>;
type Handshake = MidHandshake<ServerHandshake<TcpStream, NoCallback>>;

struct Pending {
    handshake: Handshake,
    peer: SocketAddr,
    deadline: Instant,
}

pub struct WsServer {
    listener: TcpListener,
    clients: [Option<WsStream>; MAX_WS_CLIENTS],
    pending: Vec<Pending>,
}

impl WsServer {
    /// Bind and start listening on `addr:port`.
    pub fn bind(addr: &str, port: u16) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((addr, port)).map_err(|e| {
            warn!("WS: bind {}:{} failed: {}", addr, port, e);
            TransportError::BindFailed
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|_| TransportError::BindFailed)?;
        if let Ok(local) = listener.local_addr() {
            info!("WS: listening on {}", local);
        }
        Ok(Self {
            listener,
            clients: core::array::from_fn(|_| None),
            pending: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    pub fn connected(&self) -> usize {
        self.clients.iter().flatten().count()
    }

    /// Handshakes still waiting on their peer.
    pub fn handshaking(&self) -> usize {
        self.pending.len()
    }

    fn accept_pending(&mut self, events: &mut Vec<TransportEvent>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Some(client) = self.begin_handshake(stream, peer) {
                        events.push(TransportEvent::Connected(client));
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("WS: accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn begin_handshake(&mut self, stream: TcpStream, peer: SocketAddr) -> Option<ClientId> {
        if self.pending.len() >= MAX_PENDING_HANDSHAKES {
            warn!("WS: {} dropped, {} handshakes pending", peer, self.pending.len());
            return None;
        }
        // Accepted sockets do not inherit non-blocking mode everywhere.
        if stream.set_nonblocking(true).is_err() {
            return None;
        }
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        self.progress(accept(stream), peer, deadline)
    }

    /// Resume every parked handshake once.
    fn resume_handshakes(&mut self, events: &mut Vec<TransportEvent>) {
        for Pending {
            handshake,
            peer,
            deadline,
        } in std::mem::take(&mut self.pending)
        {
            if Instant::now() >= deadline {
                warn!("WS: handshake with {} timed out", peer);
                continue;
            }
            if let Some(client) = self.progress(handshake.handshake(), peer, deadline) {
                events.push(TransportEvent::Connected(client));
            }
        }
    }

    fn progress(
        &mut self,
        step: Result<WsStream, HandshakeError<ServerHandshake<TcpStream, NoCallback>>>,
        peer: SocketAddr,
        deadline: Instant,
    ) -> Option<ClientId> {
        match step {
            Ok(ws) => self.admit(ws, peer),
            Err(HandshakeError::Interrupted(handshake)) => {
                self.pending.push(Pending {
                    handshake,
                    peer,
                    deadline,
                });
                None
            }
            Err(HandshakeError::Failure(e)) => {
                warn!("WS: handshake with {} failed: {}", peer, e);
                None
            }
        }
    }

    fn admit(&mut self, mut ws: WsStream, peer: SocketAddr) -> Option<ClientId> {
        let Some(slot) = self.clients.iter().position(Option::is_none) else {
            warn!("WS: {} rejected, {} clients connected", peer, MAX_WS_CLIENTS);
            let _ = ws.close(None);
            let _ = ws.flush();
            return None;
        };
        info!("WS: client {} connected from {}", slot, peer);
        self.clients[slot] = Some(ws);
        Some(slot as ClientId)
    }

    fn read_ready(&mut self, events: &mut Vec<TransportEvent>) {
        for (slot, entry) in self.clients.iter_mut().enumerate() {
            let Some(ws) = entry else {
                continue;
            };
            let client = slot as ClientId;
            let mut closed = false;

            loop {
                match ws.read() {
                    Ok(Message::Text(text)) => events.push(TransportEvent::Text(client, text)),
                    Ok(Message::Binary(_)) => debug!("WS: client {} sent binary, ignored", client),
                    Ok(Message::Close(_)) => {
                        closed = true;
                        break;
                    }
                    // Ping, pong and raw frames are answered by tungstenite.
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                        break;
                    }
                    Err(e) => {
                        debug!("WS: client {} read error: {}", client, e);
                        closed = true;
                        break;
                    }
                }
            }

            if closed {
                let _ = ws.close(None);
                let _ = ws.flush();
                *entry = None;
                info!("WS: client {} disconnected", client);
                events.push(TransportEvent::Disconnected(client));
            }
        }
    }
}

impl WsTransport for WsServer {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        self.resume_handshakes(&mut events);
        self.accept_pending(&mut events);
        self.read_ready(&mut events);
        events
    }

    fn send(&mut self, client: ClientId, text: &str) -> Result<(), TransportError> {
        let ws = self
            .clients
            .get_mut(client as usize)
            .and_then(Option::as_mut)
            .ok_or(TransportError::UnknownClient)?;
        match ws.send(Message::Text(text.to_owned())) {
            Ok(()) => Ok(()),
            // Queued inside tungstenite; flushed on the next write or read.
            Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                debug!("WS: send to client {} failed: {}", client, e);
                Err(TransportError::SendFailed)
            }
        }
    }
}
