//! Integration tests for the challenge-response handshake and the client
//! table, using the same client-side helper a tool would.

use std::thread;
use std::time::Duration;

use blegateway::crypto::{self, Cipher};
use blegateway::noble::auth::{
    encrypt_response, parse_challenge, AuthState, ClientSession, ClientTable, MAX_WS_CLIENTS,
};

use crate::mock_gateway::TEST_KEY;

const CREDENTIAL: &[u8] = b"admin:s3cret";

#[test]
fn fresh_session_is_challenged() {
    let session = ClientSession::new();
    assert!(!session.is_authenticated(), "new session must start unauthenticated");
    assert!(matches!(session.state(), AuthState::Challenged(_)));
}

#[test]
fn wire_challenge_round_trips_through_hex() {
    let session = ClientSession::new();
    let iv = session.challenge().unwrap();
    let wire = crypto::to_hex(&iv);
    assert_eq!(parse_challenge(&wire), Some(iv));
    assert_eq!(parse_challenge(&wire.to_lowercase()), Some(iv));
    assert_eq!(parse_challenge(&wire[..30]), None);
}

#[test]
fn challenges_are_not_reused() {
    let mut session = ClientSession::new();
    let first = session.challenge().unwrap();
    let second = session.rechallenge();
    assert_ne!(first, second);
    assert_eq!(session.challenge(), Some(second));
}

#[test]
fn credential_longer_than_one_block_authenticates() {
    let cipher = Cipher::new(&TEST_KEY);
    let credential = b"admin:a-much-longer-password-over-sixteen";
    let mut session = ClientSession::new();
    let iv = session.challenge().unwrap();
    let response = encrypt_response(&cipher, &iv, credential);
    assert_eq!(response.len(), 2 * crypto::padded_len(credential.len()));
    assert!(session.verify(&cipher, &response, credential));
}

#[test]
fn response_for_another_client_is_rejected() {
    let cipher = Cipher::new(&TEST_KEY);
    let mut table = ClientTable::new();
    let iv_a = table.open(0).unwrap();
    let iv_b = table.open(1).unwrap();
    assert_ne!(iv_a, iv_b);

    let for_a = encrypt_response(&cipher, &iv_a, CREDENTIAL);
    let b = table.get_mut(1).unwrap();
    assert!(!b.verify(&cipher, &for_a, CREDENTIAL));
    assert!(!table.is_authenticated(1));

    let a = table.get_mut(0).unwrap();
    assert!(a.verify(&cipher, &for_a, CREDENTIAL));
    assert_eq!(table.authenticated().as_slice(), &[0]);
}

#[test]
fn table_rejects_out_of_range_ids() {
    let mut table = ClientTable::new();
    assert!(table.open(MAX_WS_CLIENTS as u8).is_none());
    assert!(!table.close(MAX_WS_CLIENTS as u8));
    for id in 0..MAX_WS_CLIENTS as u8 {
        assert!(table.open(id).is_some());
    }
    assert_eq!(table.connected(), MAX_WS_CLIENTS);
}

#[test]
fn rate_limit_exhaustion_then_refill() {
    let mut session = ClientSession::new();
    let mut rejected = 0;
    for _ in 0..60 {
        if !session.check_rate_limit() {
            rejected += 1;
        }
    }
    assert!(rejected > 0, "rate limit should reject requests once bucket is empty");

    // 20 tokens per second: a quarter second buys several back.
    thread::sleep(Duration::from_millis(250));
    assert!(
        session.check_rate_limit(),
        "after refill, at least one request should be accepted"
    );
}
