//! Read-only views of directory entries

use crate::property::{Property, PropertyType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of entry as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryType {
    Root,
    Storage,
    Stream,
}

/// Snapshot of one directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    /// Entry name
    pub name: String,
    /// Names from the root down to this entry (empty for the root)
    pub path: Vec<String>,
    pub entry_type: EntryType,
    /// Stream size in bytes (mini stream size for the root, 0 for storages)
    pub size: u64,
    /// Class id as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, if set
    pub clsid: Option<String>,
    pub state_bits: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl EntryInfo {
    pub(crate) fn from_property(property: &Property, path: Vec<String>) -> Self {
        let entry_type = match property.property_type() {
            PropertyType::Root => EntryType::Root,
            PropertyType::Directory => EntryType::Storage,
            _ => EntryType::Stream,
        };
        let clsid = property.clsid();

        Self {
            name: property.name().to_string(),
            path,
            entry_type,
            size: if entry_type == EntryType::Storage {
                0
            } else {
                property.size()
            },
            clsid: (!clsid.is_nil()).then(|| clsid.to_string()),
            state_bits: property.user_flags(),
            created: property.created(),
            modified: property.modified(),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::Stream
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.entry_type, EntryType::Storage | EntryType::Root)
    }
}
