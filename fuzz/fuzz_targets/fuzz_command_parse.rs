//! Fuzz target: `Command::parse` (client frame decoder)
//!
//! Feeds arbitrary text frames to the parser.
//!
//! Invariants checked:
//! - No panics under any input
//! - Anything that parses re-serializes and parses back to the same command
//! - Peripheral-scoped commands always expose their target id
//!
//! cargo fuzz run fuzz_command_parse

#![no_main]

use blegateway::noble::protocol::Command;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Some(command) = Command::parse(text) else {
        return;
    };

    let again = serde_json::to_string(&command).expect("parsed command must serialize");
    assert_eq!(Command::parse(&again), Some(command.clone()));

    match command {
        Command::Auth { .. } | Command::StartScanning { .. } | Command::StopScanning => {
            assert!(command.peripheral().is_none());
        }
        _ => assert!(command.peripheral().is_some()),
    }
});
