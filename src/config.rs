//! Immutable configuration and its fluent builder.
//!
//! Each setter call on the builder produces a new value rather than
//! mutating in place.

use std::time::Duration;

/// Immutable server configuration.
///
/// Construct via [`Config::builder`]; there is no public way to mutate a
/// `Config` in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    max_request_head_size: usize,
    max_request_body_buffer_size: u64,
    max_request_trailers_size: usize,
    max_error_responses: u32,
    min_http_version: (u8, u8),
    discard_rejected_informational: bool,
    immediately_continue_expect100: bool,
    timeout_file_lock: Duration,
    timeout_idle_connection: Duration,
    implement_missing_options: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_request_head_size: 8000,
            max_request_body_buffer_size: 20 * 1024 * 1024,
            max_request_trailers_size: 8000,
            max_error_responses: 3,
            min_http_version: (1, 0),
            discard_rejected_informational: true,
            immediately_continue_expect100: false,
            timeout_file_lock: Duration::from_secs(3),
            timeout_idle_connection: Duration::from_secs(180),
            implement_missing_options: true,
        }
    }
}

impl Config {
    /// Starts a new builder seeded with the default configuration.
    pub fn builder() -> Builder {
        Builder { config: Config::default() }
    }

    pub fn max_request_head_size(&self) -> usize {
        self.max_request_head_size
    }

    pub fn max_request_body_buffer_size(&self) -> u64 {
        self.max_request_body_buffer_size
    }

    pub fn max_request_trailers_size(&self) -> usize {
        self.max_request_trailers_size
    }

    pub fn max_error_responses(&self) -> u32 {
        self.max_error_responses
    }

    pub fn min_http_version(&self) -> (u8, u8) {
        self.min_http_version
    }

    pub fn discard_rejected_informational(&self) -> bool {
        self.discard_rejected_informational
    }

    pub fn immediately_continue_expect100(&self) -> bool {
        self.immediately_continue_expect100
    }

    pub fn timeout_file_lock(&self) -> Duration {
        self.timeout_file_lock
    }

    pub fn timeout_idle_connection(&self) -> Duration {
        self.timeout_idle_connection
    }

    pub fn implement_missing_options(&self) -> bool {
        self.implement_missing_options
    }
}

/// Fluent builder for [`Config`]. Every setter consumes `self` and
/// returns a new `Builder`; no builder generation is mutated after it is
/// handed to the next setter.
#[derive(Debug, Clone)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn max_request_head_size(mut self, n: usize) -> Builder {
        self.config.max_request_head_size = n;
        self
    }

    pub fn max_request_body_buffer_size(mut self, n: u64) -> Builder {
        self.config.max_request_body_buffer_size = n;
        self
    }

    pub fn max_request_trailers_size(mut self, n: usize) -> Builder {
        self.config.max_request_trailers_size = n;
        self
    }

    pub fn max_error_responses(mut self, n: u32) -> Builder {
        self.config.max_error_responses = n;
        self
    }

    pub fn min_http_version(mut self, major: u8, minor: u8) -> Builder {
        self.config.min_http_version = (major, minor);
        self
    }

    pub fn discard_rejected_informational(mut self, yes: bool) -> Builder {
        self.config.discard_rejected_informational = yes;
        self
    }

    pub fn immediately_continue_expect100(mut self, yes: bool) -> Builder {
        self.config.immediately_continue_expect100 = yes;
        self
    }

    pub fn timeout_file_lock(mut self, d: Duration) -> Builder {
        self.config.timeout_file_lock = d;
        self
    }

    pub fn timeout_idle_connection(mut self, d: Duration) -> Builder {
        self.config.timeout_idle_connection = d;
        self
    }

    pub fn implement_missing_options(mut self, yes: bool) -> Builder {
        self.config.implement_missing_options = yes;
        self
    }

    /// Finalizes the builder into an immutable [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.max_request_head_size(), 8000);
        assert_eq!(c.max_request_body_buffer_size(), 20 * 1024 * 1024);
        assert_eq!(c.max_error_responses(), 3);
        assert_eq!(c.timeout_idle_connection(), Duration::from_secs(180));
        assert!(c.implement_missing_options());
    }

    #[test]
    fn each_setter_yields_independent_builder() {
        let base = Config::builder();
        let a = base.clone().max_error_responses(1).build();
        let b = base.max_error_responses(5).build();
        assert_eq!(a.max_error_responses(), 1);
        assert_eq!(b.max_error_responses(), 5);
    }
}
