//! Validation helpers shared by the settings and config adapters.

/// Longest accepted gateway name or admin password.
pub(super) const MAX_SETTING_LEN: usize = 32;

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
pub(super) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Names and passwords: printable ASCII, 1 to [`MAX_SETTING_LEN`] bytes.
pub(super) fn is_valid_setting(s: &str) -> bool {
    (1..=MAX_SETTING_LEN).contains(&s.len()) && is_printable_ascii(s)
}
