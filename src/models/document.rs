use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

// Helper function to deserialize null as default value
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Access level granted to a session, either by ownership or by a share token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

impl Permission {
    pub fn can_edit(self) -> bool {
        matches!(self, Permission::Edit)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::View => write!(f, "view"),
            Permission::Edit => write!(f, "edit"),
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(Permission::View),
            "edit" => Ok(Permission::Edit),
            other => Err(format!("Invalid permission '{}'. Use 'view' or 'edit'.", other)),
        }
    }
}

/// A session announcing that an identity has the document open for editing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// `<identity>_<registration millis>`
    pub id: String,
    pub name: String,
    pub color: String,
    pub last_seen: DateTime<Utc>,
}

impl Presence {
    pub fn belongs_to(&self, identity: &str) -> bool {
        self.id.starts_with(&format!("{}_", identity))
    }
}

/// Capability token granting `permission` to whoever presents it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub token: String,
    pub permission: Permission,
    pub created_at: DateTime<Utc>,
}

/// The unit of truth shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Opaque serialized body, replaced wholesale on save.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub content: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub active_users: Vec<Presence>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub share_links: Vec<ShareLink>,
}

impl Document {
    /// A fresh, empty document owned by `owner_id` with a random id.
    pub fn new(owner_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            content: String::new(),
            last_modified: now,
            active_users: Vec::new(),
            share_links: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Merge-write the fields present in `patch`.
    pub fn apply(&mut self, patch: DocumentPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(last_modified) = patch.last_modified {
            self.last_modified = last_modified;
        }
        if let Some(active_users) = patch.active_users {
            self.active_users = active_users;
        }
        if let Some(share_links) = patch.share_links {
            self.share_links = share_links;
        }
    }
}

/// Top-level fields to merge into a stored document. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users: Option<Vec<Presence>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_links: Option<Vec<ShareLink>>,
}

impl DocumentPatch {
    pub fn save(name: String, content: String, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: Some(name),
            content: Some(content),
            last_modified: Some(last_modified),
            ..Default::default()
        }
    }

    pub fn active_users(active_users: Vec<Presence>) -> Self {
        Self {
            active_users: Some(active_users),
            ..Default::default()
        }
    }

    pub fn share_links(share_links: Vec<ShareLink>) -> Self {
        Self {
            share_links: Some(share_links),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.content.is_none()
            && self.last_modified.is_none()
            && self.active_users.is_none()
            && self.share_links.is_none()
    }

    /// Whether this patch touches the fields owned by the save path.
    pub fn writes_content(&self) -> bool {
        self.content.is_some() || self.name.is_some() || self.last_modified.is_some()
    }
}
