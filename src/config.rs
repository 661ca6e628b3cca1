//! Process configuration.
//!
//! All tunables and secrets are collected once at startup into an immutable
//! `OracleConfig` that is passed by reference into each component. No
//! component reads the environment directly.

use std::fmt;
use std::time::Duration;

use crate::error::{OracleError, Result};
use crate::models::now;

/// Default alignment interval for stored price samples (5 minutes).
pub const DEFAULT_PRICE_IVAL: u64 = 60 * 5;
/// Default scanner partition window (24 hours).
pub const DEFAULT_WINDOW_SIZE: u64 = 60 * 60 * 24;
/// Default sub-window granularity for gap markers (1 hour).
pub const DEFAULT_GAP_STEP: u64 = 60 * 60;
/// Default spacing between upstream requests.
pub const DEFAULT_QUEUE_INTERVAL_MS: u64 = 500;
/// Default delay between periodic gap scans.
pub const DEFAULT_SCAN_INTERVAL: u64 = 60 * 15;
/// How far back the oracle tracks history by default (90 days).
pub const DEFAULT_HISTORY_DEPTH: u64 = 60 * 60 * 24 * 90;

const DEFAULT_PORT: u16 = 8082;
const DEFAULT_DB_PATH: &str = "price_history.db";

#[derive(Clone)]
pub struct OracleConfig {
    /// Path to the price history database.
    pub db_path: String,
    /// Alignment interval for stored stamps, in seconds.
    pub price_ival: u64,
    /// Scanner partition window, in seconds.
    pub window_size: u64,
    /// Scanner gap-marker granularity, in seconds.
    pub gap_step: u64,
    /// Minimum spacing between dispatched upstream requests.
    pub queue_interval: Duration,
    /// Oldest stamp the scanner will walk back to.
    pub genesis_stamp: u64,
    /// Seconds between periodic gap scans.
    pub scan_interval: u64,
    /// HTTP server port.
    pub server_port: u16,
    /// Upstream market-data API host. Required for the live fetcher only.
    pub api_host: Option<String>,
    /// Upstream market-data API key. Required for the live fetcher only.
    pub api_key: Option<String>,
    /// Master secret for threshold-key derivation.
    pub hmac_secret: Vec<u8>,
    /// secp256k1 signing key (32 bytes).
    pub sign_secret: [u8; 32],
}

impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("db_path", &self.db_path)
            .field("price_ival", &self.price_ival)
            .field("window_size", &self.window_size)
            .field("gap_step", &self.gap_step)
            .field("queue_interval", &self.queue_interval)
            .field("genesis_stamp", &self.genesis_stamp)
            .field("scan_interval", &self.scan_interval)
            .field("server_port", &self.server_port)
            .field("api_host", &self.api_host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("hmac_secret", &"<redacted>")
            .field("sign_secret", &"<redacted>")
            .finish()
    }
}

impl OracleConfig {
    /// Load configuration from the environment. `HMAC_SECRET` and
    /// `SIGN_SECRET` are required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let hmac_secret = require_env("HMAC_SECRET")?.into_bytes();
        let sign_secret = parse_sign_secret(&require_env("SIGN_SECRET")?)?;

        let price_ival = env_u64("PRICE_IVAL", DEFAULT_PRICE_IVAL)?;
        if price_ival == 0 {
            return Err(OracleError::Config("PRICE_IVAL must be positive".into()));
        }

        let genesis_default = now().saturating_sub(DEFAULT_HISTORY_DEPTH);

        Ok(Self {
            db_path: std::env::var("ORACLE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into()),
            price_ival,
            window_size: env_u64("WINDOW_SIZE", DEFAULT_WINDOW_SIZE)?,
            gap_step: env_u64("GAP_STEP", DEFAULT_GAP_STEP)?,
            queue_interval: Duration::from_millis(env_u64(
                "QUEUE_INTERVAL_MS",
                DEFAULT_QUEUE_INTERVAL_MS,
            )?),
            genesis_stamp: env_u64("GENESIS_STAMP", genesis_default)?,
            scan_interval: env_u64("SCAN_INTERVAL", DEFAULT_SCAN_INTERVAL)?,
            server_port: env_u64("SERVER_PORT", DEFAULT_PORT as u64)? as u16,
            api_host: std::env::var("ORACLE_API_HOST").ok(),
            api_key: std::env::var("ORACLE_API_KEY").ok(),
            hmac_secret,
            sign_secret,
        })
    }

    /// Fixed-secret configuration for tests. Not wired to the environment.
    pub fn for_tests() -> Self {
        Self {
            db_path: ":memory:".into(),
            price_ival: 300,
            window_size: DEFAULT_WINDOW_SIZE,
            gap_step: DEFAULT_GAP_STEP,
            queue_interval: Duration::from_millis(10),
            genesis_stamp: 0,
            scan_interval: 60,
            server_port: 0,
            api_host: None,
            api_key: None,
            hmac_secret: b"test-hmac-secret".to_vec(),
            sign_secret: [0x42; 32],
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| OracleError::Config(format!("{key} variable is undefined")))
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| OracleError::Config(format!("{key} must be an unsigned integer: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_sign_secret(raw: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(raw)
        .map_err(|_| OracleError::Config("SIGN_SECRET must be hex-encoded".into()))?;
    bytes
        .try_into()
        .map_err(|_| OracleError::Config("SIGN_SECRET must be exactly 32 bytes".into()))
}
