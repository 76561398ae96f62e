use tracing::{debug, info};

use crate::error::SyncError;
use crate::models::{Document, Permission};

/// Decide, at document open time, what the caller may do.
///
/// A share token takes precedence over identity: when present it must match a
/// link exactly and its permission is returned verbatim. Without a token only
/// the owner gets in, always with `edit`. The result is never re-checked for
/// the lifetime of the session.
pub fn evaluate(doc: &Document, identity: Option<&str>, token: Option<&str>) -> Result<Permission, SyncError> {
    if let Some(token) = token {
        return match doc.share_links.iter().find(|link| link.token == token) {
            Some(link) => {
                info!("Share token accepted for document {} with permission {}", doc.id, link.permission);
                Ok(link.permission)
            }
            None => {
                debug!("Unknown share token presented for document {}", doc.id);
                Err(SyncError::AccessDenied("invalid or expired share link".to_string()))
            }
        };
    }

    match identity {
        Some(identity) if identity == doc.owner_id => Ok(Permission::Edit),
        Some(identity) => {
            debug!("Identity {} is not the owner of document {}", identity, doc.id);
            Err(SyncError::AccessDenied("you do not have permission to access this document".to_string()))
        }
        None => Err(SyncError::AccessDenied("authentication or a share link is required".to_string())),
    }
}

/// Owner-only operations (share link management) require the exact owner identity.
pub fn ensure_owner(doc: &Document, identity: Option<&str>) -> Result<(), SyncError> {
    match identity {
        Some(identity) if identity == doc.owner_id => Ok(()),
        _ => Err(SyncError::AccessDenied("only the owner can manage share links".to_string())),
    }
}
