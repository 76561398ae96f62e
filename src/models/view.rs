use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::document::Permission;

/// Save indicator shown next to the editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Unsaved,
    Saving,
    Saved,
    Error,
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveStatus::Unsaved => write!(f, "unsaved"),
            SaveStatus::Saving => write!(f, "saving"),
            SaveStatus::Saved => write!(f, "saved"),
            SaveStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Avatar {
    pub initial: String,
    pub color: String,
    pub name: String,
}

/// Other live collaborators: up to three avatars, the rest as a count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CollaboratorsView {
    pub avatars: Vec<Avatar>,
    pub overflow: usize,
}

impl CollaboratorsView {
    pub fn total(&self) -> usize {
        self.avatars.len() + self.overflow
    }
}

/// Everything a UI layer needs to draw one document session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub doc_id: String,
    pub name: String,
    pub content: String,
    pub permission: Permission,
    pub read_only: bool,
    pub status: SaveStatus,
    pub dirty: bool,
    pub last_modified: DateTime<Utc>,
    pub collaborators: CollaboratorsView,
}
