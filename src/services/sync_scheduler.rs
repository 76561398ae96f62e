//! Dirty/clean lifecycle of a session's local draft.
//!
//! The scheduler is a pure state machine: it owns no timers and performs no
//! I/O. The session loop asks it for the debounce deadline, tells it when that
//! deadline passed, and reports save completions and remote notifications.
//!
//! ```text
//!            edit                debounce / manual          ok
//!   Idle ─────────────▶ Editing ───────────────────▶ Saving ────▶ Idle
//!    ▲                    ▲  │ edit: re-arm             │ err
//!    │   remote applied   │  └──────┘                   ▼
//!    └────────────────────┴──────────────────────── Editing (dirty kept)
//! ```
//!
//! `Disabled` is the only state of read-only sessions. `applying_remote` is
//! orthogonal and is set while a remote version is written into the draft.
//!
//! Conflicts are resolved last-writer-wins on the whole document: a remote
//! version that arrives while the editor is focused or a save is in flight is
//! dropped, and this session's next save overwrites it.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SyncError;
use crate::models::SaveStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disabled,
    Idle,
    Editing,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Debounce,
    Manual,
}

/// Identifies one save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTicket {
    /// Edit generation captured when the save started.
    pub generation: u64,
    /// `lastModified` written by this save.
    pub saved_at: DateTime<Utc>,
    pub trigger: SaveTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    Apply,
    /// Not strictly newer than what this session already observed.
    Stale,
    DroppedFocused,
    DroppedSaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Accepted,
    /// The mutation is the echo of a remote version being applied.
    IgnoredDuringApply,
}

#[derive(Debug)]
pub struct SyncScheduler {
    state: SyncState,
    dirty: bool,
    applying_remote: bool,
    debounce: Duration,
    deadline: Option<Instant>,
    generation: u64,
    last_observed: DateTime<Utc>,
    in_flight: Option<SaveTicket>,
    queued: Option<SaveTrigger>,
    status: SaveStatus,
}

impl SyncScheduler {
    pub fn editable(debounce: Duration, last_modified: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Idle,
            dirty: false,
            applying_remote: false,
            debounce,
            deadline: None,
            generation: 0,
            last_observed: last_modified,
            in_flight: None,
            queued: None,
            status: SaveStatus::Saved,
        }
    }

    pub fn read_only(last_modified: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Disabled,
            ..Self::editable(Duration::ZERO, last_modified)
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Newest `lastModified` this session has observed or written.
    pub fn last_observed(&self) -> DateTime<Utc> {
        self.last_observed
    }

    /// When the pending autosave fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A local mutation of content or name. Re-arms the debounce deadline.
    pub fn local_edit(&mut self, now: Instant) -> Result<EditOutcome, SyncError> {
        if self.state == SyncState::Disabled {
            return Err(SyncError::ReadOnly);
        }
        if self.applying_remote {
            return Ok(EditOutcome::IgnoredDuringApply);
        }

        self.dirty = true;
        self.generation += 1;
        self.deadline = Some(now + self.debounce);
        if self.state != SyncState::Saving {
            self.state = SyncState::Editing;
        }
        self.status = SaveStatus::Unsaved;
        Ok(EditOutcome::Accepted)
    }

    /// The debounce deadline passed without further edits.
    pub fn debounce_elapsed(&mut self, now: DateTime<Utc>) -> Option<SaveTicket> {
        self.deadline = None;
        self.begin_save(SaveTrigger::Debounce, now)
    }

    /// Explicit save request. Persists immediately, whatever the debounce state.
    pub fn request_save(&mut self, now: DateTime<Utc>) -> Result<Option<SaveTicket>, SyncError> {
        if self.state == SyncState::Disabled {
            return Err(SyncError::ReadOnly);
        }
        self.deadline = None;
        Ok(self.begin_save(SaveTrigger::Manual, now))
    }

    /// Start a save, or queue it behind the one in flight.
    pub fn begin_save(&mut self, trigger: SaveTrigger, now: DateTime<Utc>) -> Option<SaveTicket> {
        match self.state {
            SyncState::Disabled => None,
            SyncState::Saving => {
                self.queued = match (self.queued, trigger) {
                    (Some(SaveTrigger::Manual), _) | (_, SaveTrigger::Manual) => Some(SaveTrigger::Manual),
                    _ => Some(SaveTrigger::Debounce),
                };
                debug!("Save requested while saving, queued {:?}", self.queued);
                None
            }
            SyncState::Idle | SyncState::Editing => {
                let ticket = SaveTicket {
                    generation: self.generation,
                    saved_at: self.next_timestamp(now),
                    trigger,
                };
                self.state = SyncState::Saving;
                self.status = SaveStatus::Saving;
                self.in_flight = Some(ticket);
                Some(ticket)
            }
        }
    }

    /// Record the outcome of the save identified by `ticket`.
    ///
    /// Returns the trigger of a save queued meanwhile, which the caller should
    /// start right away with [`SyncScheduler::begin_save`].
    pub fn save_finished(&mut self, ticket: SaveTicket, succeeded: bool) -> Option<SaveTrigger> {
        self.in_flight = None;
        if succeeded {
            if ticket.saved_at > self.last_observed {
                self.last_observed = ticket.saved_at;
            }
            if self.generation == ticket.generation {
                self.dirty = false;
                self.state = SyncState::Idle;
                self.status = SaveStatus::Saved;
            } else {
                self.state = SyncState::Editing;
                self.status = SaveStatus::Unsaved;
            }
        } else {
            self.state = if self.dirty { SyncState::Editing } else { SyncState::Idle };
            self.status = SaveStatus::Error;
        }
        self.queued.take()
    }

    /// Decide whether a remote version replaces the local draft.
    pub fn remote_update(&mut self, incoming: DateTime<Utc>, editor_focused: bool) -> RemoteDecision {
        if self.state == SyncState::Disabled {
            if incoming > self.last_observed {
                self.last_observed = incoming;
            }
            return RemoteDecision::Apply;
        }
        if incoming <= self.last_observed {
            return RemoteDecision::Stale;
        }

        self.last_observed = incoming;
        if self.state == SyncState::Saving {
            RemoteDecision::DroppedSaving
        } else if editor_focused {
            RemoteDecision::DroppedFocused
        } else {
            RemoteDecision::Apply
        }
    }

    pub fn begin_apply_remote(&mut self) {
        self.applying_remote = true;
    }

    /// The remote version is now the local draft; nothing is left to save.
    pub fn finish_apply_remote(&mut self) {
        self.applying_remote = false;
        if self.state == SyncState::Disabled {
            return;
        }
        self.dirty = false;
        self.deadline = None;
        self.state = SyncState::Idle;
        self.status = SaveStatus::Saved;
    }

    // Saves must be strictly newer than anything observed, or other sessions
    // would treat them as stale.
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now > self.last_observed {
            now
        } else {
            self.last_observed + chrono::Duration::milliseconds(1)
        }
    }
}
