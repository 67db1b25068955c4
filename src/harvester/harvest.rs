// SPDX-License-Identifier: Apache-2.0

//! The per-file harvester and its read loop.
//!
//! A harvester owns one open input for its whole life. It emits every line
//! it reads into the shared sink and, whenever it reaches the end of the
//! file, checks the open handle for truncation or deletion:
//!
//! - truncated in place: hand off to the successor path (once), rewind, keep reading
//! - unlinked with bytes left: keep draining
//! - unlinked and drained: stop
//!
//! Harvesters run on dedicated OS threads. Reads, backoff sleeps and the
//! blocking send into the sink are all allowed to block.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::harvester::config::HarvesterConfig;
use crate::harvester::error::{Error, Result};
use crate::harvester::event::{HarvestEvent, Tags, line_text, with_rotated_tag};
use crate::harvester::file_id::FileId;
use crate::harvester::open::{Input, OpenedInput, open};
use crate::harvester::registry::Registry;
use crate::harvester::status::FileStatus;

/// Option bits for [`Harvester::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestOptions {
    /// Start from the first byte regardless of the process-wide mode.
    pub rewind: bool,
    /// Skip the dedup registry.
    pub no_register: bool,
}

impl HarvestOptions {
    pub const REWIND: Self = Self {
        rewind: true,
        no_register: false,
    };
    pub const NO_REGISTER: Self = Self {
        rewind: false,
        no_register: true,
    };

    pub const fn with_rewind(mut self) -> Self {
        self.rewind = true;
        self
    }

    pub const fn with_no_register(mut self) -> Self {
        self.no_register = true;
        self
    }
}

/// Why a harvester stopped.
#[derive(Debug)]
pub enum ExitReason {
    /// No line was read for longer than the idle timeout.
    IdleTimeout,
    Failed(Error),
}

/// Outcome of a harvester run.
#[derive(Debug)]
pub struct Exit {
    pub reason: ExitReason,
    /// Hand-off harvesters started on truncation. They run independently;
    /// the driver may join them or let them be.
    pub successors: Vec<HarvesterHandle>,
}

impl Exit {
    pub(crate) fn failed(error: Error) -> Self {
        Self {
            reason: ExitReason::Failed(error),
            successors: Vec::new(),
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.reason {
            ExitReason::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// A harvester running on its own thread.
#[derive(Debug)]
pub struct HarvesterHandle {
    path: PathBuf,
    thread: JoinHandle<Exit>,
}

impl HarvesterHandle {
    pub(crate) fn spawn<F>(path: PathBuf, f: F) -> Self
    where
        F: FnOnce() -> Exit + Send + 'static,
    {
        Self {
            path,
            thread: std::thread::spawn(f),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the harvester to stop. `None` if its thread panicked.
    pub fn join(self) -> Option<Exit> {
        match self.thread.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!(path = ?self.path, "Harvester thread panicked");
                None
            }
        }
    }
}

/// Tails a single file and emits its lines as [`HarvestEvent`]s.
#[derive(Debug)]
pub struct Harvester {
    pub(crate) path: PathBuf,
    source: String,
    tags: Arc<Tags>,
    /// Set when a watcher started this harvester for a rotation target.
    rotated: bool,
    /// Path to hand off to on the next truncation; used at most once.
    successor: Option<PathBuf>,
    sink: BoundedSender<HarvestEvent>,
    registry: Arc<Registry>,
    pub(crate) config: Arc<HarvesterConfig>,
}

impl Harvester {
    pub fn builder(
        path: impl Into<PathBuf>,
        sink: BoundedSender<HarvestEvent>,
        registry: Arc<Registry>,
    ) -> HarvesterBuilder {
        HarvesterBuilder {
            path: path.into(),
            tags: Tags::new(),
            rotated: false,
            successor: None,
            sink,
            registry,
            config: Arc::new(HarvesterConfig::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn is_rotated(&self) -> bool {
        self.rotated
    }

    pub fn successor(&self) -> Option<&Path> {
        self.successor.as_deref()
    }

    /// Runs the harvester on a new thread.
    pub fn spawn(self, offset: u64, options: HarvestOptions) -> HarvesterHandle {
        let path = self.path.clone();
        HarvesterHandle::spawn(path, move || self.run(offset, options))
    }

    /// Opens the file (waiting for it if needed), registers it unless told
    /// not to, and reads it until a terminal condition.
    pub fn run(self, offset: u64, options: HarvestOptions) -> Exit {
        info!(path = ?self.path, offset, "Starting harvester");

        let opened = match open(&self.path, offset, options, &self.config) {
            Ok(opened) => opened,
            Err(e) => {
                error!(path = ?self.path, error = %e, "Unable to position file");
                return Exit::failed(e.into());
            }
        };
        self.harvest(opened, !options.no_register)
    }

    /// Registers (when asked) and runs the read loop over an opened input.
    /// The registration and the input are both released before this returns.
    pub(crate) fn harvest(mut self, opened: OpenedInput, register: bool) -> Exit {
        let _registration = if register && !opened.input.is_stdin() {
            match self.registry.claim(opened.file_id, &self.path) {
                Ok(registration) => Some(registration),
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "Harvester unable to register");
                    return Exit::failed(e);
                }
            }
        } else {
            None
        };

        let mut successors = Vec::new();
        let reason = match self.read_lines(opened, &mut successors) {
            Ok(reason) => reason,
            Err(e) => ExitReason::Failed(e),
        };

        match &reason {
            ExitReason::Failed(e) => warn!(path = ?self.path, error = %e, "Harvester stopping"),
            ExitReason::IdleTimeout => info!(path = ?self.path, "Harvester timed out"),
        }
        info!(path = ?self.path, "Harvester done reading file");

        Exit { reason, successors }
    }

    fn read_lines(
        &mut self,
        opened: OpenedInput,
        successors: &mut Vec<HarvesterHandle>,
    ) -> Result<ExitReason> {
        let OpenedInput { mut input, file_id } = opened;

        let mut offset = input.position()?;
        let mut line = Vec::with_capacity(256);
        let mut last = Vec::new();
        let mut last_activity = Instant::now();

        loop {
            line.clear();
            let n = match input.read_line(&mut line) {
                Ok(n) => n,
                Err(e) => {
                    error!(path = ?self.path, offset, error = %e, "Unable to read line");
                    return Err(e.into());
                }
            };
            if n > 0 {
                last.clone_from(&line);
            }

            if line.ends_with(b"\n") {
                self.emit(&line, offset, file_id)?;
                offset += n as u64;
                last_activity = Instant::now();
                continue;
            }

            if n > 0 {
                // No delimiter yet. Emit what is there; if the writer later
                // finishes the line, the rest arrives as a second event.
                debug!(path = ?self.path, offset, "Harvester hit EOF with a partial line");
                self.emit(&line, offset, file_id)?;
                offset += n as u64;
                last_activity = Instant::now();
                std::thread::sleep(self.config.poll_interval);
                continue;
            }

            if self.auto_rewind(&mut input, offset, &last, successors)? {
                offset = 0;
            }

            if last_activity.elapsed() > self.config.idle_timeout {
                return Ok(ExitReason::IdleTimeout);
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Checks the open file for truncation or deletion. Returns `true` when
    /// the input was rewound to the first byte.
    fn auto_rewind(
        &mut self,
        input: &mut Input,
        offset: u64,
        last: &[u8],
        successors: &mut Vec<HarvesterHandle>,
    ) -> Result<bool> {
        match input.status(offset)? {
            FileStatus::Ok => Ok(false),
            FileStatus::Gone => Err(Error::FileGone(self.path.clone())),
            FileStatus::Trunc => {
                if let Some(next) = self.successor.take() {
                    info!(
                        path = ?self.path,
                        successor = ?next,
                        offset,
                        "File truncated, handing off to successor"
                    );
                    let successor = self.successor_harvester(next);
                    successors.push(successor.spawn_resume(offset, last.to_vec()));
                }
                input.rewind()?;
                info!(path = ?self.path, "Rewind");
                Ok(true)
            }
        }
    }

    fn successor_harvester(&self, path: PathBuf) -> Harvester {
        Harvester {
            source: path.to_string_lossy().into_owned(),
            path,
            tags: with_rotated_tag((*self.tags).clone(), false),
            rotated: false,
            successor: None,
            sink: self.sink.clone(),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }

    fn emit(&self, raw: &[u8], offset: u64, file_id: Option<FileId>) -> Result<()> {
        let event = HarvestEvent {
            source: self.source.clone(),
            offset,
            text: line_text(raw, self.config.max_line_bytes),
            tags: Arc::clone(&self.tags),
            rotated: self.rotated,
            file_id,
        };
        self.sink.send_blocking(event).map_err(|_| Error::SinkClosed)
    }
}

#[derive(Debug)]
pub struct HarvesterBuilder {
    path: PathBuf,
    tags: Tags,
    rotated: bool,
    successor: Option<PathBuf>,
    sink: BoundedSender<HarvestEvent>,
    registry: Arc<Registry>,
    config: Arc<HarvesterConfig>,
}

impl HarvesterBuilder {
    #[must_use]
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Marks the harvester as started for a rotation target.
    #[must_use]
    pub fn rotated(mut self, rotated: bool) -> Self {
        self.rotated = rotated;
        self
    }

    /// Path to resume on after the harvested file is next truncated.
    #[must_use]
    pub fn successor(mut self, path: impl Into<PathBuf>) -> Self {
        self.successor = Some(path.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: Arc<HarvesterConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harvester {
        Harvester {
            source: self.path.to_string_lossy().into_owned(),
            path: self.path,
            tags: with_rotated_tag(self.tags, self.rotated),
            rotated: self.rotated,
            successor: self.successor,
            sink: self.sink,
            registry: self.registry,
            config: self.config,
        }
    }
}
