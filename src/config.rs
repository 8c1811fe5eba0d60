use std::fmt;
use std::str::FromStr;

use crate::{ConnectError, ConnectOptions, Result};

const URI_VARS: [&str; 2] = ["DOCSTORE_URI", "DOCSTORE_URL"];
const TOKEN_VAR: &str = "DOCSTORE_TOKEN";

/// Everything needed to reach the store: where, as whom, and how patiently.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct StoreConfig {
    uri: Option<String>,
    token: Option<String>,
    pub options: ConnectOptions,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("uri", &self.uri)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: non_empty(uri.into()),
            ..Self::default()
        }
    }

    /// A configuration with no URI. Every acquisition fails with
    /// [`ConnectError::Configuration`].
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = non_empty(token.into());
        self
    }

    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Loads the configuration from process environment variables.
    ///
    /// Reads:
    /// - `DOCSTORE_URI` (or `DOCSTORE_URL`): connection URI
    /// - `DOCSTORE_TOKEN`: access token, `Bearer` prefix optional
    /// - `DOCSTORE_*` tuning knobs, see [`StoreConfig::from_lookup`]
    ///
    /// A missing URI is not an error here; it is reported by every
    /// acquisition instead.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same parsing as [`StoreConfig::from_env`] over an arbitrary lookup.
    ///
    /// Tuning keys, each overriding the serverless default:
    /// `DOCSTORE_DISCOVERY_TIMEOUT_MS`, `DOCSTORE_CONNECT_TIMEOUT_MS`,
    /// `DOCSTORE_IDLE_OPERATION_TIMEOUT_MS`, `DOCSTORE_MAX_POOL_SIZE`,
    /// `DOCSTORE_MIN_POOL_SIZE`, `DOCSTORE_MAX_IDLE_TIME_MS`,
    /// `DOCSTORE_MAX_ATTEMPTS`, `DOCSTORE_RETRY_DELAY_MS`,
    /// `DOCSTORE_IPV4_ONLY`, `DOCSTORE_RECORD_IDLE_TIMEOUT_MS` (`0` or unset
    /// disables record eviction).
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let uri = URI_VARS
            .iter()
            .find_map(|key| lookup(*key).and_then(non_empty));
        let token = lookup(TOKEN_VAR).and_then(non_empty);

        let mut options = ConnectOptions::default();
        read_into(&lookup, "DOCSTORE_DISCOVERY_TIMEOUT_MS", &mut options.discovery_timeout_ms)?;
        read_into(&lookup, "DOCSTORE_CONNECT_TIMEOUT_MS", &mut options.connect_timeout_ms)?;
        read_into(
            &lookup,
            "DOCSTORE_IDLE_OPERATION_TIMEOUT_MS",
            &mut options.idle_operation_timeout_ms,
        )?;
        read_into(&lookup, "DOCSTORE_MAX_POOL_SIZE", &mut options.max_pool_size)?;
        read_into(&lookup, "DOCSTORE_MIN_POOL_SIZE", &mut options.min_pool_size)?;
        read_into(&lookup, "DOCSTORE_MAX_IDLE_TIME_MS", &mut options.max_idle_time_ms)?;
        read_into(&lookup, "DOCSTORE_MAX_ATTEMPTS", &mut options.max_attempts)?;
        read_into(&lookup, "DOCSTORE_RETRY_DELAY_MS", &mut options.retry_delay_ms)?;
        read_into(&lookup, "DOCSTORE_IPV4_ONLY", &mut options.ipv4_only)?;
        let mut record_idle_timeout_ms = 0_u64;
        read_into(
            &lookup,
            "DOCSTORE_RECORD_IDLE_TIMEOUT_MS",
            &mut record_idle_timeout_ms,
        )?;
        options.record_idle_timeout_ms = Some(record_idle_timeout_ms).filter(|ms| *ms > 0);
        options.validate().map_err(ConnectError::Configuration)?;

        Ok(Self {
            uri,
            token,
            options,
        })
    }
}

fn read_into<L, T>(lookup: &L, key: &str, slot: &mut T) -> Result<()>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(key).and_then(non_empty) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|err| ConnectError::Configuration(format!("{key}={raw:?} is invalid: {err}")))?;
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
