// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::harvester::file_id::FileId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("already harvesting file {0}")]
    AlreadyRegistered(FileId),

    #[error("no file identity for {0:?}, refusing to register")]
    NoIdentity(PathBuf),

    #[error("file is gone: {0:?}")]
    FileGone(PathBuf),

    #[error("illegal attempt to resume stdin at offset {0}")]
    ResumeStdin(u64),

    #[error("resume line does not match {path:?} before offset {offset}")]
    ResumeMismatch { path: PathBuf, offset: u64 },

    #[error("resume line of {len} bytes does not fit before offset {offset}")]
    ResumeOutOfRange { offset: u64, len: usize },

    #[error("output channel closed")]
    SinkClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
