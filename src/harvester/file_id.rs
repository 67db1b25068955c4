// SPDX-License-Identifier: Apache-2.0

//! Identity of an open file: device + inode on Unix, volume serial + file
//! index on Windows.
//!
//! The identity follows the file's data, not its name. A harvester snapshots
//! it once after opening and uses it as its registry key, so two paths that
//! point at the same inode (hard links, a rename racing a reopen) are only
//! ever harvested once.

use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub(crate) const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Stats the open handle, never the path it was opened from.
    pub fn from_file(file: &File) -> io::Result<Self> {
        sys::identify(file)
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        sys::identify(&File::open(path)?)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::MetadataExt;

    use super::FileId;

    pub(super) fn identify(file: &File) -> io::Result<FileId> {
        let metadata = file.metadata()?;
        Ok(FileId::new(metadata.dev(), metadata.ino()))
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
    };

    use super::FileId;

    /// Volume serial number plus the 64-bit file index.
    pub(super) fn identify(file: &File) -> io::Result<FileId> {
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        let ok = unsafe { GetFileInformationByHandle(file.as_raw_handle() as HANDLE, &mut info) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        let index = (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow);
        Ok(FileId::new(u64::from(info.dwVolumeSerialNumber), index))
    }
}
