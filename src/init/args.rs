// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harvester::{HarvestOptions, HarvesterConfig, Tags};
use crate::init::parse::{parse_key_val, parse_successor};

#[derive(Debug, Args, Clone)]
pub struct HarvesterArgs {
    /// Files to harvest. "-" reads standard input
    #[arg(required = true, env = "HARVESTER_PATHS", value_delimiter = ',')]
    pub paths: Vec<PathBuf>,

    /// Start at the beginning of each file instead of tailing from the end
    #[arg(long, env = "HARVESTER_FROM_BEGINNING", default_value = "false")]
    pub from_beginning: bool,

    /// Read from the first byte even when tailing from the end
    #[arg(long, env = "HARVESTER_REWIND", default_value = "false")]
    pub rewind: bool,

    /// Do not register files, allowing more than one harvester per file
    #[arg(long, env = "HARVESTER_NO_REGISTER", default_value = "false")]
    pub no_register: bool,

    /// Byte offset to start reading at. Overrides --from-beginning and --rewind
    #[arg(long, env = "HARVESTER_OFFSET", default_value = "0")]
    pub offset: u64,

    /// Tag added to every emitted event, as KEY=value. May be repeated;
    /// the value is taken verbatim, commas included
    #[arg(long = "tag", value_parser = parse_key_val::<String, String>)]
    pub tags: Vec<(String, String)>,

    /// Mark events as coming from a rotation target
    #[arg(long, env = "HARVESTER_ROTATED", default_value = "false")]
    pub rotated: bool,

    /// Resume on NEXT once PATH is truncated, as PATH=NEXT. May be repeated
    #[arg(long = "successor", value_parser = parse_successor)]
    pub successors: Vec<(PathBuf, PathBuf)>,

    /// Delay in milliseconds between reads at end of file
    #[arg(long, env = "HARVESTER_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Delay in milliseconds between attempts to open a missing file
    #[arg(long, env = "HARVESTER_OPEN_RETRY_INTERVAL_MS", default_value = "5000")]
    pub open_retry_interval_ms: u64,

    /// Stop harvesting a file after this many seconds without a new line
    #[arg(long, env = "HARVESTER_IDLE_TIMEOUT_SECS", default_value = "86400")]
    pub idle_timeout_secs: u64,

    /// Maximum line size in bytes (longer lines are cut)
    #[arg(long, env = "HARVESTER_MAX_LINE_BYTES", default_value = "1048576")]
    pub max_line_bytes: usize,

    /// Number of events buffered between the harvesters and the output
    #[arg(long, env = "HARVESTER_CHANNEL_SIZE", default_value = "1000")]
    pub channel_size: usize,
}

impl HarvesterArgs {
    pub fn build_config(&self) -> HarvesterConfig {
        HarvesterConfig {
            from_beginning: self.from_beginning,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            open_retry_interval: Duration::from_millis(self.open_retry_interval_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_line_bytes: self.max_line_bytes,
        }
    }

    pub fn options(&self) -> HarvestOptions {
        HarvestOptions {
            rewind: self.rewind,
            no_register: self.no_register,
        }
    }

    pub fn tags(&self) -> Tags {
        self.tags.iter().cloned().collect()
    }

    /// Hand-off targets keyed by the harvested path. A later mapping for the
    /// same path replaces an earlier one.
    pub fn successor_map(&self) -> HashMap<&Path, &Path> {
        self.successors
            .iter()
            .map(|(path, next)| (path.as_path(), next.as_path()))
            .collect()
    }
}
