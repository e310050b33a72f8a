//! Client authentication: AES-128-CBC challenge-response.
//!
//! 1. On connect the gateway draws a random 16-byte challenge and sends it as
//!    hex in `{"type":"auth","challenge":…}`.
//! 2. The client encrypts the credential `admin:<password>` (zero-padded)
//!    with the shared key, using the raw challenge bytes as IV, and answers
//!    `{"action":"auth","response":<hex ciphertext>}`.
//! 3. The gateway decrypts, reads the plaintext up to its first NUL and
//!    compares in constant time. A wrong answer earns a fresh challenge.
//!
//! Each client also carries a `burster` token bucket that bounds how many
//! frames per second the bridge will process for it.

use burster::Limiter;
use core::time::Duration;

use crate::crypto::{self, Cipher, Iv};

// ── Constants ────────────────────────────────────────────────

/// Maximum number of concurrent WebSocket clients.
pub const MAX_WS_CLIENTS: usize = 8;

/// Burst capacity and refill rate (frames per second) per client.
const RATE_LIMIT_BURST: u64 = 20;
const RATE_LIMIT_PER_SEC: u64 = 20;

/// Client identifier (index into the client table).
pub type ClientId = u8;

// ── Per-client session ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the response to this challenge.
    Challenged(Iv),
    Authenticated,
}

pub struct ClientSession {
    state: AuthState,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl ClientSession {
    /// New session with a freshly drawn challenge.
    pub fn new() -> Self {
        Self {
            state: AuthState::Challenged(crypto::generate_iv()),
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                RATE_LIMIT_PER_SEC,
                RATE_LIMIT_BURST,
                monotonic_now as fn() -> Duration,
            ),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Outstanding challenge, if the client has not authenticated yet.
    pub fn challenge(&self) -> Option<Iv> {
        match self.state {
            AuthState::Challenged(iv) => Some(iv),
            AuthState::Authenticated => None,
        }
    }

    /// Replace the outstanding challenge with a fresh one.
    pub fn rechallenge(&mut self) -> Iv {
        let iv = crypto::generate_iv();
        self.state = AuthState::Challenged(iv);
        iv
    }

    /// Check a hex `response` against the outstanding challenge.
    ///
    /// Transitions to `Authenticated` on success. Leaves the state untouched
    /// on failure; the caller decides whether to re-challenge.
    pub fn verify(&mut self, cipher: &Cipher, response: &str, credential: &[u8]) -> bool {
        let AuthState::Challenged(iv) = self.state else {
            return false;
        };

        let plaintext = match crypto::from_hex(response).and_then(|ct| cipher.decrypt(&iv, &ct)) {
            Ok(pt) => pt,
            Err(_) => return false,
        };
        let end = plaintext
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(plaintext.len());

        if !crypto::constant_time_eq(&plaintext[..end], credential) {
            return false;
        }
        self.state = AuthState::Authenticated;
        true
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Consume one rate-limit token; returns `false` when exhausted.
    pub fn check_rate_limit(&mut self) -> bool {
        self.rate_limiter.try_consume(1).is_ok()
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

// ── Client table ─────────────────────────────────────────────

/// Fixed-size table of connected clients, indexed by [`ClientId`].
pub struct ClientTable {
    sessions: [Option<ClientSession>; MAX_WS_CLIENTS],
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            sessions: core::array::from_fn(|_| None),
        }
    }

    /// Register a newly connected client. Returns its first challenge, or
    /// `None` if the id is out of range.
    pub fn open(&mut self, client: ClientId) -> Option<Iv> {
        let slot = self.sessions.get_mut(client as usize)?;
        let session = ClientSession::new();
        let challenge = session.challenge();
        *slot = Some(session);
        challenge
    }

    /// Forget a client. Returns `true` if it was registered.
    pub fn close(&mut self, client: ClientId) -> bool {
        self.sessions
            .get_mut(client as usize)
            .and_then(Option::take)
            .is_some()
    }

    pub fn get(&self, client: ClientId) -> Option<&ClientSession> {
        self.sessions.get(client as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, client: ClientId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(client as usize)?.as_mut()
    }

    pub fn is_authenticated(&self, client: ClientId) -> bool {
        self.get(client).is_some_and(ClientSession::is_authenticated)
    }

    /// Number of connected clients, authenticated or not.
    pub fn connected(&self) -> usize {
        self.sessions.iter().flatten().count()
    }

    /// Ids of every authenticated client, in slot order.
    pub fn authenticated(&self) -> heapless::Vec<ClientId, MAX_WS_CLIENTS> {
        self.sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_ref().is_some_and(ClientSession::is_authenticated))
            .map(|(i, _)| i as ClientId)
            .collect()
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

// ── Client side (used by tests and tooling) ──────────────────

/// Build the hex `response` a well-behaved client sends for `challenge`.
pub fn encrypt_response(cipher: &Cipher, challenge: &Iv, credential: &[u8]) -> String {
    crypto::to_hex(&cipher.encrypt(challenge, credential))
}

/// Parse a hex challenge as received on the wire.
pub fn parse_challenge(challenge_hex: &str) -> Option<Iv> {
    let bytes = crypto::from_hex(challenge_hex).ok()?;
    bytes.try_into().ok()
}

// ── Time source for the rate limiter ─────────────────────────

fn monotonic_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────
