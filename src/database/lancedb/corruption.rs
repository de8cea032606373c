//! Classification of LanceDB driver errors.
//!
//! LanceDB reports unreadable index files through generic error variants, so
//! corruption is recognised by message signature. This module is the only place
//! that inspects error text; everything above it works with [`StoreError`].

use super::StoreError;

/// Lower-cased fragments that identify an unreadable or damaged index
pub const CORRUPTION_SIGNATURES: &[&str] = &[
    "index segment unreadable",
    "nothing found on disk",
    "not found on disk",
    "corrupt",
    "invalid",
    "malformed",
];

#[inline]
pub fn is_corruption_message(message: &str) -> bool {
    let message = message.to_lowercase();
    CORRUPTION_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Map a driver error message into the store taxonomy
#[inline]
pub fn classify(context: &str, message: &str) -> StoreError {
    if is_corruption_message(message) {
        StoreError::Corrupt(format!("{}: {}", context, message))
    } else {
        StoreError::Backend(format!("{}: {}", context, message))
    }
}

/// Adapter for `map_err` on LanceDB and Arrow results
#[inline]
pub fn lance_error<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| classify(context, &e.to_string())
}
