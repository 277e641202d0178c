//! Pool and client error types.

use thiserror::Error;

/// Errors surfaced to callers of the pool manager.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The node URL was never registered with `add_node_pool`.
    #[error("node URL not registered: {url}")]
    UnknownUrl {
        /// The URL the caller asked for.
        url: String,
    },

    /// A caller-supplied option key is not in the allow-list for the
    /// connection mode, or its value could not be parsed.
    #[error("invalid pool options: {}", .keys.join(", "))]
    InvalidOptions {
        /// The offending option keys.
        keys: Vec<String>,
    },

    /// No healthy, non-saturated pool could be obtained within the
    /// caller's budget: readiness retries were exhausted, every pool is
    /// unhealthy, or a wait for capacity timed out.
    #[error("no healthy pools available for {url}")]
    NoHealthyPools {
        /// The node the request was for.
        url: String,
    },
}

impl PoolError {
    pub(crate) fn invalid_options(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::InvalidOptions {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Shorthand for [`PoolError::NoHealthyPools`].
    pub fn no_healthy_pools(url: impl Into<String>) -> Self {
        Self::NoHealthyPools { url: url.into() }
    }
}

/// Errors produced by a backend client handle.
///
/// The manager never inspects these beyond success/failure; they exist so
/// client implementations can report what went wrong in logs.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend refused or dropped the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport-level IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_options_lists_keys() {
        let err = PoolError::invalid_options(["bogus_key", "another"]);
        assert_eq!(err.to_string(), "invalid pool options: bogus_key, another");
    }

    #[test]
    fn no_healthy_pools_names_the_node() {
        let err = PoolError::no_healthy_pools("redis://cache-1");
        assert!(err.to_string().contains("redis://cache-1"));
    }
}
