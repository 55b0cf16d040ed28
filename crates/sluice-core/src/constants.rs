//! Package-level constants.

/// Current version of sluice (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "sluice";

/// Close code sent on a client-initiated disconnect.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close reason sent on a client-initiated disconnect.
pub const CLIENT_CLOSE_REASON: &str = "Client disconnecting";
