// SPDX-License-Identifier: Apache-2.0

//! Rotation and truncation detection.
//!
//! The open handle is stat'ed, never the path: once a new file has been
//! created under the harvested name, the handle still describes the old
//! inode, which is exactly what has to be drained or classified.

use std::fs::File;
use std::io;

use tracing::{debug, info};

/// The parts of a stat result the classification looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Hard link count; `None` where the platform does not report it.
    pub nlink: Option<u64>,
}

/// Something that can be stat'ed: the harvester's open file, or a fake in tests.
pub trait StatSource {
    fn stat(&self) -> io::Result<FileStat>;
}

impl StatSource for File {
    #[cfg(unix)]
    fn stat(&self) -> io::Result<FileStat> {
        use std::os::unix::fs::MetadataExt;

        let metadata = self.metadata()?;
        Ok(FileStat {
            size: metadata.len(),
            nlink: Some(metadata.nlink()),
        })
    }

    #[cfg(not(unix))]
    fn stat(&self) -> io::Result<FileStat> {
        Ok(FileStat {
            size: self.metadata()?.len(),
            nlink: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Nothing unusual: no new bytes yet, or an unlinked file still has bytes
    /// left to drain through the open descriptor.
    Ok,
    /// The file shrank below the read offset: truncated or rewritten in place.
    Trunc,
    /// Unlinked and fully drained.
    Gone,
}

/// Classifies a stat result against the current read offset.
pub fn classify(stat: FileStat, offset: u64) -> FileStatus {
    match stat.nlink {
        Some(0) if stat.size > offset => FileStatus::Ok,
        Some(0) => FileStatus::Gone,
        _ if stat.size < offset => FileStatus::Trunc,
        _ => FileStatus::Ok,
    }
}

/// Stats `source` and classifies it. A failing stat is returned as the error.
pub fn status<S: StatSource + ?Sized>(source: &S, offset: u64) -> io::Result<FileStatus> {
    let stat = source.stat()?;
    let status = classify(stat, offset);
    match status {
        FileStatus::Ok if stat.nlink == Some(0) => {
            debug!(
                size = stat.size,
                offset, "Deleted file has more data, continuing to drain"
            );
        }
        FileStatus::Trunc => {
            info!(size = stat.size, offset, "File is smaller than read offset");
        }
        _ => {}
    }
    Ok(status)
}
