// SPDX-License-Identifier: Apache-2.0

//! Rotation-aware file harvesting.
//!
//! A [`Harvester`] follows one file, emitting every appended line into a
//! shared channel. It survives copy-truncate rotation (rewinding, and
//! optionally handing off to a successor file after verifying continuity),
//! drains files that were unlinked while open, and waits for files that do
//! not exist yet. A shared [`Registry`] keeps two harvesters from reading
//! the same file at once.

pub mod config;
pub mod error;
pub mod event;
pub mod file_id;
pub mod harvest;
pub mod open;
pub mod registry;
pub mod resume;
pub mod status;

pub use config::HarvesterConfig;
pub use error::{Error, Result};
pub use event::{HarvestEvent, ROTATED_TAG, Tags};
pub use file_id::FileId;
pub use harvest::{Exit, ExitReason, HarvestOptions, Harvester, HarvesterBuilder, HarvesterHandle};
pub use open::STDIN_PATH;
pub use registry::{Registration, Registry};
pub use status::{FileStat, FileStatus, StatSource, classify};
