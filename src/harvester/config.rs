// SPDX-License-Identifier: Apache-2.0

//! Timing and positioning policy shared by every harvester in a process.

use std::time::Duration;

use crate::harvester::error::{Error, Result};

/// Delay between empty reads at end of file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Delay between attempts to open a path that is not there (yet).
pub const DEFAULT_OPEN_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// How long a harvester keeps polling a file that produces nothing.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Start new harvesters at the beginning of their file instead of the end.
    /// An explicit non-zero starting offset still wins.
    pub from_beginning: bool,
    pub poll_interval: Duration,
    /// Opening is retried forever at this fixed interval.
    pub open_retry_interval: Duration,
    pub idle_timeout: Duration,
    /// Longer lines are emitted cut to this many bytes; offsets still count
    /// every byte of the line.
    pub max_line_bytes: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            from_beginning: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            open_retry_interval: DEFAULT_OPEN_RETRY_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl HarvesterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be positive".to_string()));
        }
        if self.open_retry_interval.is_zero() {
            return Err(Error::Config(
                "open_retry_interval must be positive".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be positive".to_string()));
        }
        if self.max_line_bytes == 0 {
            return Err(Error::Config("max_line_bytes must be positive".to_string()));
        }
        Ok(())
    }
}
