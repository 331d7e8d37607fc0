use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed view of a note header block.
///
/// Every supported key has its own field. Keys the codec does not know are
/// kept in `extra` in file order; they are never interpreted and never written
/// back out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderFields {
    pub uid: Option<String>,
    /// Legacy alias of `uid`.
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub attachments: Vec<String>,
    pub reminders: Vec<DateTime<Utc>>,
    pub pinned: bool,
    pub archived: bool,
    pub deleted: Option<bool>,
    /// Legacy alias of `deleted`.
    pub trash: Option<bool>,
    pub hidden: bool,
    pub color: Option<String>,
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl HeaderFields {
    /// `deleted` wins whenever present, `trash` is the fallback.
    pub fn is_deleted(&self) -> bool {
        self.deleted.or(self.trash).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        *self == HeaderFields::default()
    }
}
