use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::SharedStore;
use crate::error::StoreError;
use crate::models::{Avatar, CollaboratorsView, DocumentPatch, Presence};
use crate::utils::SharedClock;

/// Avatar palette; one color is drawn per registration.
pub const PRESENCE_COLORS: [&str; 8] = [
    "#4f46e5", "#ec4899", "#8b5cf6", "#10b981", "#f59e0b", "#ef4444", "#06b6d4", "#6366f1",
];

/// Number of collaborator avatars rendered before collapsing into a count.
pub const MAX_AVATARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    pub heartbeat_interval: Duration,
    /// Entries whose `lastSeen` is at least this old are stale.
    pub stale_after: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(10_000),
            stale_after: Duration::from_millis(30_000),
        }
    }
}

pub fn random_color() -> String {
    let idx = rand::rng().random_range(0..PRESENCE_COLORS.len());
    PRESENCE_COLORS[idx].to_string()
}

/// `<identity>_<registration millis>`
pub fn presence_id(identity: &str, registered_at: DateTime<Utc>) -> String {
    format!("{}_{}", identity, registered_at.timestamp_millis())
}

pub fn is_stale(presence: &Presence, now: DateTime<Utc>, stale_after: Duration) -> bool {
    let threshold = chrono::Duration::milliseconds(stale_after.as_millis() as i64);
    now - presence.last_seen >= threshold
}

pub fn prune_stale(users: Vec<Presence>, now: DateTime<Utc>, stale_after: Duration) -> Vec<Presence> {
    users
        .into_iter()
        .filter(|p| !is_stale(p, now, stale_after))
        .collect()
}

/// Replace every earlier registration of `identity` with `entry`.
pub fn with_registration(users: Vec<Presence>, identity: &str, entry: Presence) -> Vec<Presence> {
    let mut users: Vec<Presence> = users.into_iter().filter(|p| !p.belongs_to(identity)).collect();
    users.push(entry);
    users
}

/// Refresh `presence_id` and evict every stale entry, in one pass.
pub fn heartbeat_pass(users: Vec<Presence>, presence_id: &str, now: DateTime<Utc>, stale_after: Duration) -> Vec<Presence> {
    let refreshed = users
        .into_iter()
        .map(|mut p| {
            if p.id == presence_id {
                p.last_seen = now;
            }
            p
        })
        .collect();
    prune_stale(refreshed, now, stale_after)
}

/// Live collaborators other than `self_id`, ready for display.
pub fn render_collaborators(
    users: &[Presence],
    self_id: Option<&str>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> CollaboratorsView {
    let others: Vec<&Presence> = users
        .iter()
        .filter(|p| Some(p.id.as_str()) != self_id && !is_stale(p, now, stale_after))
        .collect();

    let avatars = others
        .iter()
        .take(MAX_AVATARS)
        .map(|p| Avatar {
            initial: p
                .name
                .chars()
                .next()
                .map(|c| c.to_uppercase().collect())
                .unwrap_or_else(|| "?".to_string()),
            color: p.color.clone(),
            name: p.name.clone(),
        })
        .collect();

    CollaboratorsView {
        avatars,
        overflow: others.len().saturating_sub(MAX_AVATARS),
    }
}

/// Remove one presence entry. Returns whether it was present.
pub async fn remove_presence(store: &SharedStore, doc_id: &str, presence_id: &str) -> Result<bool, StoreError> {
    let doc = match store.get(doc_id).await? {
        Some(doc) => doc,
        None => return Ok(false),
    };
    let before = doc.active_users.len();
    let remaining: Vec<Presence> = doc.active_users.into_iter().filter(|p| p.id != presence_id).collect();
    if remaining.len() == before {
        return Ok(false);
    }
    store.update(doc_id, DocumentPatch::active_users(remaining)).await?;
    Ok(true)
}

/// Announces one editing session on a document and keeps it alive.
///
/// The staleness filter applied by every heartbeat, from any participant, is
/// what actually cleans up crashed sessions; `leave` is only a courtesy.
pub struct PresenceTracker {
    store: SharedStore,
    doc_id: String,
    clock: SharedClock,
    settings: PresenceSettings,
    presence_id: Option<String>,
}

impl PresenceTracker {
    pub fn new(store: SharedStore, doc_id: &str, clock: SharedClock, settings: PresenceSettings) -> Self {
        Self {
            store,
            doc_id: doc_id.to_string(),
            clock,
            settings,
            presence_id: None,
        }
    }

    pub fn presence_id(&self) -> Option<&str> {
        self.presence_id.as_deref()
    }

    /// Add a fresh presence for `identity`, dropping its earlier registrations.
    pub async fn register(&mut self, identity: &str, display_name: &str) -> Result<String, StoreError> {
        let now = self.clock.now();
        let id = presence_id(identity, now);

        let doc = self
            .store
            .get(&self.doc_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.doc_id.clone()))?;

        let entry = Presence {
            id: id.clone(),
            name: display_name.to_string(),
            color: random_color(),
            last_seen: now,
        };
        let users = with_registration(doc.active_users, identity, entry);
        self.store
            .update(&self.doc_id, DocumentPatch::active_users(users))
            .await?;

        info!("Registered presence {} on document {}", id, self.doc_id);
        self.presence_id = Some(id.clone());
        Ok(id)
    }

    /// Refresh own `lastSeen` and evict stale entries of every participant.
    pub async fn heartbeat(&self) -> Result<(), StoreError> {
        let Some(presence_id) = self.presence_id.as_deref() else {
            return Ok(());
        };
        let Some(doc) = self.store.get(&self.doc_id).await? else {
            return Err(StoreError::NotFound(self.doc_id.clone()));
        };

        let now = self.clock.now();
        let before = doc.active_users.len();
        let users = heartbeat_pass(doc.active_users, presence_id, now, self.settings.stale_after);
        if users.len() < before {
            debug!("Evicted {} stale presences from document {}", before - users.len(), self.doc_id);
        }
        self.store
            .update(&self.doc_id, DocumentPatch::active_users(users))
            .await
    }

    /// Best-effort removal of own presence.
    pub async fn leave(&self) -> Result<bool, StoreError> {
        match self.presence_id.as_deref() {
            Some(presence_id) => remove_presence(&self.store, &self.doc_id, presence_id).await,
            None => Ok(false),
        }
    }
}

/// Heartbeat loop for one tracker, first beating at `first_beat`. Runs until
/// the task is aborted.
pub async fn run_heartbeat(tracker: Arc<PresenceTracker>, first_beat: time::Instant) {
    let period = tracker.settings.heartbeat_interval;
    let mut interval = time::interval_at(first_beat, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(e) = tracker.heartbeat().await {
            warn!(
                "Presence heartbeat for {:?} on document {} failed: {}",
                tracker.presence_id(),
                tracker.doc_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStore, MemoryDocumentStore};
    use crate::models::Document;
    use crate::utils::TokioClock;

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn presence(id: &str, last_seen: i64) -> Presence {
        Presence {
            id: id.to_string(),
            name: id.to_string(),
            color: PRESENCE_COLORS[0].to_string(),
            last_seen: ts(last_seen),
        }
    }

    const STALE: Duration = Duration::from_millis(30_000);

    #[test]
    fn staleness_threshold_is_inclusive() {
        let p = presence("u1_0", 0);
        assert!(!is_stale(&p, ts(29_999), STALE));
        assert!(is_stale(&p, ts(30_000), STALE));
    }

    #[test]
    fn heartbeat_pass_leaves_no_stale_entry() {
        let users = vec![
            presence("me_0", 0),
            presence("u2_0", 0),
            presence("u3_0", 15_000),
            presence("u4_0", 39_999),
        ];
        let now = ts(45_000);
        let after = heartbeat_pass(users, "me_0", now, STALE);

        assert!(after.iter().all(|p| !is_stale(p, now, STALE)));
        let ids: Vec<&str> = after.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["me_0", "u4_0"]);
        assert_eq!(after[0].last_seen, now);
    }

    #[test]
    fn heartbeat_pass_does_not_resurrect_an_evicted_self() {
        let after = heartbeat_pass(vec![presence("u2_0", 40_000)], "me_0", ts(45_000), STALE);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "u2_0");
    }

    #[test]
    fn registration_replaces_prior_entries_of_the_same_identity() {
        let users = vec![presence("u1_0", 0), presence("u10_5", 0), presence("u2_0", 0)];
        let after = with_registration(users, "u1", presence("u1_1000", 1_000));

        let ids: Vec<&str> = after.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["u10_5", "u2_0", "u1_1000"]);
    }

    #[test]
    fn render_excludes_self_and_stale_and_caps_avatars() {
        let users = vec![
            presence("me_0", 10_000),
            presence("alice_0", 10_000),
            presence("bob_0", 10_000),
            presence("carol_0", 10_000),
            presence("dave_0", 10_000),
            presence("ghost_0", 0),
        ];
        let view = render_collaborators(&users, Some("me_0"), ts(31_000), STALE);

        assert_eq!(view.avatars.len(), 3);
        assert_eq!(view.overflow, 1);
        assert_eq!(view.avatars[0].initial, "A");
        assert_eq!(view.avatars[0].name, "alice_0");
        assert!(view.avatars.iter().all(|a| a.name != "me_0" && a.name != "ghost_0"));
    }

    #[test]
    fn render_without_others_is_empty() {
        let view = render_collaborators(&[presence("me_0", 0)], Some("me_0"), ts(1), STALE);
        assert_eq!(view, CollaboratorsView::default());
    }

    #[test]
    fn colors_come_from_the_palette() {
        for _ in 0..32 {
            assert!(PRESENCE_COLORS.contains(&random_color().as_str()));
        }
    }

    async fn seeded_store() -> (SharedStore, MemoryDocumentStore) {
        let mem = MemoryDocumentStore::new();
        let mut doc = Document::new("owner", "Notes", ts(0));
        doc.id = "d1".to_string();
        doc.active_users = vec![presence("other_0", 0)];
        mem.insert(doc).await.unwrap();
        (Arc::new(mem.clone()), mem)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn register_then_reregister_keeps_one_entry_per_identity() {
        let (store, _) = seeded_store().await;
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));

        let mut tab_a = PresenceTracker::new(store.clone(), "d1", clock.clone(), PresenceSettings::default());
        let first = tab_a.register("u1", "u1@example.com").await.unwrap();
        assert_eq!(first, "u1_0");

        time::advance(Duration::from_millis(1_000)).await;
        let mut tab_b = PresenceTracker::new(store.clone(), "d1", clock, PresenceSettings::default());
        let second = tab_b.register("u1", "u1@example.com").await.unwrap();
        assert_eq!(second, "u1_1000");

        let users = store.get("d1").await.unwrap().unwrap().active_users;
        let mine: Vec<&Presence> = users.iter().filter(|p| p.belongs_to("u1")).collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "u1_1000");
        assert!(users.iter().any(|p| p.id == "other_0"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn heartbeat_refreshes_self_and_evicts_others() {
        let (store, _) = seeded_store().await;
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));
        let mut tracker = PresenceTracker::new(store.clone(), "d1", clock, PresenceSettings::default());
        tracker.register("u1", "u1").await.unwrap();

        time::advance(Duration::from_millis(30_000)).await;
        tracker.heartbeat().await.unwrap();

        let users = store.get("d1").await.unwrap().unwrap().active_users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1_0");
        assert_eq!(users[0].last_seen, ts(30_000));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn heartbeat_loop_beats_one_period_after_registration() {
        let (store, _) = seeded_store().await;
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));
        let mut tracker = PresenceTracker::new(store.clone(), "d1", clock, PresenceSettings::default());
        tracker.register("u1", "u1").await.unwrap();
        let first_beat = time::Instant::now() + Duration::from_millis(10_000);

        // The task is scheduled late; the beat must not drift with it.
        time::advance(Duration::from_millis(5_000)).await;
        let heartbeat = tokio::spawn(run_heartbeat(Arc::new(tracker), first_beat));
        time::advance(Duration::from_millis(5_000)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let users = store.get("d1").await.unwrap().unwrap().active_users;
        let me = users.iter().find(|p| p.id == "u1_0").unwrap();
        assert_eq!(me.last_seen, ts(10_000));
        heartbeat.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn leave_removes_only_own_entry() {
        let (store, _) = seeded_store().await;
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));
        let mut tracker = PresenceTracker::new(store.clone(), "d1", clock, PresenceSettings::default());
        tracker.register("u1", "u1").await.unwrap();

        assert!(tracker.leave().await.unwrap());
        assert!(!tracker.leave().await.unwrap());
        let users = store.get("d1").await.unwrap().unwrap().active_users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "other_0");
    }
}
