//! Fuzz target: `ClientSession::verify` (auth response path)
//!
//! Splits the input into a 16-byte key and a response string and checks the
//! handshake surface against it.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - A session only becomes authenticated when `verify` returns `true`
//! - A failed verify leaves the session challenged
//!
//! cargo fuzz run fuzz_auth_response

#![no_main]

use blegateway::crypto::Cipher;
use blegateway::noble::auth::{AuthState, ClientSession};
use libfuzzer_sys::fuzz_target;

const CREDENTIAL: &[u8] = b"admin:admin";

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (key, rest) = data.split_at(16);
    let key: [u8; 16] = key.try_into().unwrap();
    let response = String::from_utf8_lossy(rest);

    let cipher = Cipher::new(&key);
    let mut session = ClientSession::new();
    let accepted = session.verify(&cipher, &response, CREDENTIAL);

    assert_eq!(accepted, session.is_authenticated());
    if !accepted {
        assert!(matches!(session.state(), AuthState::Challenged(_)));
    }

    let _ = session.check_rate_limit();
});
