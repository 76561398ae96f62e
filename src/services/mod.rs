pub mod access_service;
pub mod auth_service;
pub mod presence_service;
pub mod share_service;
pub mod sync_scheduler;

pub use auth_service::IdentityResolver;
pub use presence_service::{PresenceSettings, PresenceTracker};
pub use share_service::ShareLinkManager;
pub use sync_scheduler::{RemoteDecision, SaveTrigger, SyncScheduler, SyncState};
