//! Error code contract shared by every service error type.
//!
//! DESIGN
//! ======
//! Each module owns its own `thiserror` enum. This trait gives all of them a
//! grepable `E_*` code and a retryable flag so routes can render a uniform
//! error body without knowing the concrete type.

/// Grepable error code and retryable flag for structured error responses.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
