//! HTTP client settings.

use std::time::Duration;

/// Settings for [`SfHttpClient`](crate::SfHttpClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ask for gzip/deflate responses.
    pub compression: bool,
    /// Whole-request timeout. `None` (the default) waits indefinitely, so a
    /// long result download is never cut off.
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
    /// Log each request and response status at debug level.
    pub trace_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            compression: true,
            timeout: None,
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 4,
            user_agent: crate::USER_AGENT.to_string(),
            trace_requests: true,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`], starting from the defaults.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// How long an unused pooled connection is kept.
    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn with_pool_max_idle(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_request_tracing(mut self, enabled: bool) -> Self {
        self.config.trace_requests = enabled;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
