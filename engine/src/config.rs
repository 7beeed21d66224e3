//! Engine configuration.

use std::time::Duration;

/// Default cooldown during which a completed pull or push is reused.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Tuning and wire naming shared by every table of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Cooldown after a successful pull/push during which new callers join
    /// the finished operation instead of starting another.
    pub min_interval: Duration,
    /// Attribute carrying the record identity on the wire and in the
    /// application view.
    pub id_attribute: String,
    /// Attribute carrying the mutation timestamp on the wire.
    pub updated_at_attribute: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            id_attribute: "id".to_string(),
            updated_at_attribute: "updated_at".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    pub fn with_updated_at_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.updated_at_attribute = attribute.into();
        self
    }
}

/// Settings for [`crate::transport::HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Base URL; tables live at `{base_url}/{table}`
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when present
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
