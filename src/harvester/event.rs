// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::harvester::file_id::FileId;

/// Tag key carrying whether the harvester was started for a rotated file.
pub const ROTATED_TAG: &str = "rotated";

/// Tags attached to every event of one harvester.
pub type Tags = BTreeMap<String, String>;

/// One line read from a harvested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestEvent {
    /// Path the harvester was started with (`-` for stdin).
    pub source: String,
    /// Byte offset at which the line began.
    pub offset: u64,
    /// The line with surrounding whitespace trimmed.
    pub text: String,
    /// Shared with every other event of the same harvester.
    pub tags: Arc<Tags>,
    pub rotated: bool,
    /// Identity of the file the line was read from, if it could be taken.
    pub file_id: Option<FileId>,
}

impl HarvestEvent {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Adds the `rotated` tag to a harvester's tag set.
pub(crate) fn with_rotated_tag(mut tags: Tags, rotated: bool) -> Arc<Tags> {
    tags.insert(ROTATED_TAG.to_string(), rotated.to_string());
    Arc::new(tags)
}

/// Decodes a raw line (lossily), trims it, and caps it at `max_bytes` on a
/// char boundary.
pub(crate) fn line_text(raw: &[u8], max_bytes: usize) -> String {
    let decoded = String::from_utf8_lossy(raw);
    let trimmed = decoded.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut end = max_bytes;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
