//! Utility module
//!
//! This module provides common helpers used by applications and tests
//! embedding the library.

use tracing::Level;

/// Installs a formatting `tracing` subscriber at `level`.
///
/// Returns `false` if a global subscriber was already installed, which is
/// expected when several tests initialise logging.
pub fn init_tracing(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
