//! Shared relay server state.
//!
//! DESIGN
//! ======
//! `RelayState` is injected into Axum handlers via the `State` extractor.
//! It holds the relay core (room registry plus one outbound channel per
//! connected client) behind a single `tokio::sync::Mutex`; routing work
//! under the lock is a lookup and `try_send`, never I/O.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::relay::RelayCore;

/// Clone is required by Axum; inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct RelayState {
    pub core: Arc<Mutex<RelayCore>>,
    pub config: RelayConfig,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { core: Arc::new(Mutex::new(RelayCore::new())), config }
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Relay state with default config for handler tests.
    #[must_use]
    pub fn test_relay_state() -> RelayState {
        RelayState::new(RelayConfig::default())
    }
}
