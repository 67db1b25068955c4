// SPDX-License-Identifier: Apache-2.0

//! Opening and positioning a harvester's input.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Stdin};
use std::path::Path;

use tracing::{info, warn};

use crate::harvester::config::HarvesterConfig;
use crate::harvester::file_id::FileId;
use crate::harvester::harvest::HarvestOptions;
use crate::harvester::status::{FileStatus, status};

/// Path that means "read standard input".
pub const STDIN_PATH: &str = "-";

pub fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN_PATH
}

/// A buffered input a harvester reads lines from.
#[derive(Debug)]
pub enum Input {
    Stdin(BufReader<Stdin>),
    File(BufReader<File>),
}

impl Input {
    /// Reads up to and including the next `\n`, appending to `buf`.
    /// A short read without the delimiter means end of stream was hit.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            Input::Stdin(r) => r.read_until(b'\n', buf),
            Input::File(r) => r.read_until(b'\n', buf),
        }
    }

    pub fn file(&self) -> Option<&File> {
        match self {
            Input::Stdin(_) => None,
            Input::File(r) => Some(r.get_ref()),
        }
    }

    /// Current logical read position. Stdin always starts at zero.
    pub fn position(&mut self) -> io::Result<u64> {
        match self {
            Input::Stdin(_) => Ok(0),
            Input::File(r) => r.stream_position(),
        }
    }

    /// Classifies the open file against `offset`. Stdin is never rotated.
    pub fn status(&self, offset: u64) -> io::Result<FileStatus> {
        match self.file() {
            Some(file) => status(file, offset),
            None => Ok(FileStatus::Ok),
        }
    }

    /// Seeks back to the first byte, discarding anything buffered.
    pub fn rewind(&mut self) -> io::Result<()> {
        match self {
            Input::Stdin(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot rewind standard input",
            )),
            Input::File(r) => r.seek(SeekFrom::Start(0)).map(|_| ()),
        }
    }

    pub fn is_stdin(&self) -> bool {
        matches!(self, Input::Stdin(_))
    }
}

/// An open, positioned input and the identity of the file behind it.
#[derive(Debug)]
pub struct OpenedInput {
    pub input: Input,
    pub file_id: Option<FileId>,
}

/// Where a freshly opened file is positioned.
///
/// An explicit offset wins, then beginning-of-file (process-wide mode or the
/// rewind option), otherwise the end of the file.
pub fn start_position(offset: u64, options: HarvestOptions, config: &HarvesterConfig) -> SeekFrom {
    if offset > 0 {
        SeekFrom::Start(offset)
    } else if config.from_beginning || options.rewind {
        SeekFrom::Start(0)
    } else {
        SeekFrom::End(0)
    }
}

/// Opens `path`, retrying forever at `config.open_retry_interval` until it
/// exists and is readable, then positions it per [`start_position`].
///
/// A file whose identity cannot be taken is still returned, with no
/// `file_id`; registering it will fail later.
pub fn open(
    path: &Path,
    offset: u64,
    options: HarvestOptions,
    config: &HarvesterConfig,
) -> io::Result<OpenedInput> {
    if is_stdin(path) {
        return Ok(OpenedInput {
            input: Input::Stdin(BufReader::new(io::stdin())),
            file_id: None,
        });
    }

    let mut file = loop {
        match File::open(path) {
            Ok(file) => break file,
            Err(e) => {
                warn!(
                    ?path,
                    error = %e,
                    retry_in = ?config.open_retry_interval,
                    "Failed opening file, will retry"
                );
                std::thread::sleep(config.open_retry_interval);
            }
        }
    };

    let position = start_position(offset, options, config);
    let at = file.seek(position)?;
    match position {
        SeekFrom::Start(0) => info!(?path, "Reading from beginning"),
        SeekFrom::Start(_) => info!(?path, offset = at, "Reading from offset"),
        _ => info!(?path, offset = at, "Reading from end"),
    }

    let file_id = match FileId::from_file(&file) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(?path, error = %e, "Unable to stat file");
            None
        }
    };

    Ok(OpenedInput {
        input: Input::File(BufReader::new(file)),
        file_id,
    })
}
