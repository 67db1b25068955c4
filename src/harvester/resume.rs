// SPDX-License-Identifier: Apache-2.0

//! Rotation hand-off.
//!
//! A successor harvester only takes over once it has proven that its file
//! continues where the predecessor stopped: the bytes just before the
//! hand-off offset must equal the predecessor's last line.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{error, info, warn};

use crate::harvester::error::{Error, Result};
use crate::harvester::harvest::{Exit, HarvestOptions, Harvester, HarvesterHandle};
use crate::harvester::open::{is_stdin, open};

impl Harvester {
    /// Runs [`Harvester::resume`] on a new thread.
    pub fn spawn_resume(self, offset: u64, line: Vec<u8>) -> HarvesterHandle {
        let path = self.path.clone();
        HarvesterHandle::spawn(path, move || self.resume(offset, line))
    }

    /// Resumes at `offset` after verifying that the file holds `line` right
    /// before it. Nothing is emitted when the check fails.
    pub fn resume(self, offset: u64, line: Vec<u8>) -> Exit {
        info!(path = ?self.path, offset, "Trying to resume");
        if is_stdin(&self.path) {
            error!(offset, "Illegal attempt to resume stdin");
            return Exit::failed(Error::ResumeStdin(offset));
        }

        let opened = match open(&self.path, offset, HarvestOptions::default(), &self.config) {
            Ok(opened) => opened,
            Err(e) => {
                error!(path = ?self.path, error = %e, "Unable to position resume file");
                return Exit::failed(e.into());
            }
        };

        let Some(file) = opened.input.file() else {
            return Exit::failed(Error::ResumeStdin(offset));
        };
        if let Err(e) = verify_continuity(file, &self.path, offset, &line) {
            warn!(path = ?self.path, offset, error = %e, "Couldn't resume");
            return Exit::failed(e);
        }
        self.harvest(opened, true)
    }
}

/// Checks that `file` holds exactly `line` in `[offset - line.len(), offset)`
/// and leaves the file positioned at `offset`.
pub(crate) fn verify_continuity(
    mut file: &File,
    path: &Path,
    offset: u64,
    line: &[u8],
) -> Result<()> {
    let start = offset
        .checked_sub(line.len() as u64)
        .ok_or(Error::ResumeOutOfRange {
            offset,
            len: line.len(),
        })?;

    let mut found = vec![0u8; line.len()];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut found)?;
    file.seek(SeekFrom::Start(offset))?;

    if found != line {
        return Err(Error::ResumeMismatch {
            path: path.to_path_buf(),
            offset,
        });
    }
    Ok(())
}
