use std::time::Duration;

/// Repository configuration
///
/// Built with the same fluent style as a connection config:
///
/// ```
/// use memrepo::RepositoryConfig;
/// use std::time::Duration;
///
/// let config = RepositoryConfig::new()
///     .lock_timeout(Duration::from_millis(250))
///     .max_page_size(500);
/// assert_eq!(config.max_page_size, 500);
/// ```
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// How long a pessimistic lock (or a writer) waits for a row lock
    pub lock_timeout: Duration,

    /// Sleep between lock attempts while waiting
    pub lock_poll_interval: Duration,

    /// Flush staged entity changes before every query
    pub flush_before_query: bool,

    /// Page sizes above this are clamped
    pub max_page_size: usize,

    /// Page size used by `PageRequest::default`-style helpers
    pub default_page_size: usize,
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            lock_poll_interval: Duration::from_millis(5),
            flush_before_query: true,
            max_page_size: 2000,
            default_page_size: 20,
        }
    }

    /// Set lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set lock polling interval
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Enable or disable auto-flush before queries
    pub fn flush_before_query(mut self, enabled: bool) -> Self {
        self.flush_before_query = enabled;
        self
    }

    /// Set maximum page size
    pub fn max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max.max(1);
        self
    }

    /// Set default page size
    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size.max(1);
        self
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
