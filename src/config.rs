//! Runtime configuration parsed from environment variables.
//!
//! Every knob has a compiled-in default so a session or relay starts with no
//! environment at all. Unparseable values fall back to the default.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RELAY_CLIENT_QUEUE: usize = 256;

const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_NEGOTIATION_ATTEMPTS: u8 = 2;
const DEFAULT_SESSION_TICK_MS: u64 = 250;
const DEFAULT_OUTBOX_RETRY_BASE_MS: u64 = 200;
const DEFAULT_OUTBOX_RETRY_MAX_MS: u64 = 5_000;
const DEFAULT_OUTBOX_RETRY_JITTER_MS: u64 = 50;
const DEFAULT_OUTBOX_MAX_FAILURES: u32 = 8;

const DEFAULT_AUTHORITY_URL: &str = "http://localhost:4000";
const DEFAULT_AUTHORITY_TIMEOUT_SECS: u64 = 10;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// RELAY
// =============================================================================

/// Relay server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// TCP port the relay listens on.
    pub port: u16,
    /// Per-connection outbound frame queue capacity.
    pub client_queue: usize,
}

impl RelayConfig {
    /// - `PORT`: default 3000
    /// - `RELAY_CLIENT_QUEUE`: default 256
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            client_queue: env_parse("RELAY_CLIENT_QUEUE", DEFAULT_RELAY_CLIENT_QUEUE),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, client_queue: DEFAULT_RELAY_CLIENT_QUEUE }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Retry policy for frames queued while the transport is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    /// Upper bound of the random delay added to each retry.
    pub jitter: Duration,
    /// Consecutive failures after which the session reports `Disconnected`.
    pub max_failures: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_OUTBOX_RETRY_BASE_MS),
            max: Duration::from_millis(DEFAULT_OUTBOX_RETRY_MAX_MS),
            jitter: Duration::from_millis(DEFAULT_OUTBOX_RETRY_JITTER_MS),
            max_failures: DEFAULT_OUTBOX_MAX_FAILURES,
        }
    }
}

/// Peer negotiation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshConfig {
    /// How long an offer or answer may stay unconfirmed.
    pub negotiation_timeout: Duration,
    /// Total negotiation attempts per link before it is reported unreachable.
    pub max_attempts: u8,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_millis(DEFAULT_NEGOTIATION_TIMEOUT_MS),
            max_attempts: DEFAULT_NEGOTIATION_ATTEMPTS,
        }
    }
}

/// Client session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub mesh: MeshConfig,
    pub backoff: BackoffConfig,
    /// Period of the session housekeeping tick (timeouts, outbox retry).
    pub tick: Duration,
}

impl SessionConfig {
    /// - `NEGOTIATION_TIMEOUT_MS`: default 15000
    /// - `NEGOTIATION_ATTEMPTS`: default 2
    /// - `SESSION_TICK_MS`: default 250
    /// - `OUTBOX_RETRY_BASE_MS` / `OUTBOX_RETRY_MAX_MS` / `OUTBOX_RETRY_JITTER_MS`
    /// - `OUTBOX_MAX_FAILURES`: default 8
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            mesh: MeshConfig {
                negotiation_timeout: Duration::from_millis(env_parse(
                    "NEGOTIATION_TIMEOUT_MS",
                    DEFAULT_NEGOTIATION_TIMEOUT_MS,
                )),
                max_attempts: env_parse("NEGOTIATION_ATTEMPTS", DEFAULT_NEGOTIATION_ATTEMPTS).max(1),
            },
            backoff: BackoffConfig {
                base: Duration::from_millis(env_parse("OUTBOX_RETRY_BASE_MS", DEFAULT_OUTBOX_RETRY_BASE_MS)),
                max: Duration::from_millis(env_parse("OUTBOX_RETRY_MAX_MS", DEFAULT_OUTBOX_RETRY_MAX_MS)),
                jitter: Duration::from_millis(env_parse("OUTBOX_RETRY_JITTER_MS", DEFAULT_OUTBOX_RETRY_JITTER_MS)),
                max_failures: env_parse("OUTBOX_MAX_FAILURES", DEFAULT_OUTBOX_MAX_FAILURES),
            },
            tick: Duration::from_millis(env_parse("SESSION_TICK_MS", DEFAULT_SESSION_TICK_MS)),
        }
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        if self.tick.is_zero() { Duration::from_millis(DEFAULT_SESSION_TICK_MS) } else { self.tick }
    }
}

// =============================================================================
// AUTHORITY
// =============================================================================

/// Connection settings for the external board authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Base URL; boards live under `{base_url}/boards/{room}`.
    pub base_url: String,
    /// Optional bearer token issued by the external auth service.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl AuthorityConfig {
    /// - `AUTHORITY_URL`: default `http://localhost:4000`
    /// - `AUTHORITY_TOKEN`: optional bearer token
    /// - `AUTHORITY_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("AUTHORITY_URL")
                .unwrap_or_else(|_| DEFAULT_AUTHORITY_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            token: std::env::var("AUTHORITY_TOKEN").ok().filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(env_parse("AUTHORITY_TIMEOUT_SECS", DEFAULT_AUTHORITY_TIMEOUT_SECS)),
        }
    }
}
