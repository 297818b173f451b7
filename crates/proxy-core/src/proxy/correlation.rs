//! Correlation table
//!
//! Maps protocol entity ids to the dialogue they belong to. One table exists
//! per application; an entity id seen by two applications resolves
//! independently in each.
//!
//! The dialogues and their keys live under a single lock so that removing a
//! dialogue drops every key pointing at it in the same step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{Dialogue, DialogueId};

/// Kind of entity a correlation key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Channel,
    Bridge,
    Recording,
    Playback,
    /// Id learned from a command response whose entity kind is unknown
    CommandOrigin,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            EntityKind::Channel => "channel",
            EntityKind::Bridge => "bridge",
            EntityKind::Recording => "recording",
            EntityKind::Playback => "playback",
            EntityKind::CommandOrigin => "command-origin",
        };
        f.write_str(kind)
    }
}

/// An entity id qualified by its kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub kind: EntityKind,
    pub id: String,
}

impl CorrelationKey {
    pub fn new(kind: EntityKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// Key of a channel
    pub fn channel(id: &str) -> Self {
        Self::new(EntityKind::Channel, id)
    }

    /// Key of a bridge
    pub fn bridge(id: &str) -> Self {
        Self::new(EntityKind::Bridge, id)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Default)]
struct TableState {
    dialogues: HashMap<DialogueId, Arc<Dialogue>>,
    keys: HashMap<CorrelationKey, DialogueId>,
}

/// Dialogues of one application and the entity keys pointing at them
pub struct CorrelationTable {
    application: String,
    state: Mutex<TableState>,
}

impl CorrelationTable {
    /// Empty table for `application`
    pub fn new(application: &str) -> Self {
        Self {
            application: application.to_string(),
            state: Mutex::new(TableState::default()),
        }
    }

    /// Add a dialogue to the active set keyed by its primary entity.
    ///
    /// Returns false, leaving the table untouched, if the key already
    /// belongs to another dialogue.
    pub fn insert_dialogue(&self, dialogue: Arc<Dialogue>, primary: CorrelationKey) -> bool {
        let mut state = self.state.lock();
        if let Some(owner) = state.keys.get(&primary) {
            warn!(
                application = %self.application,
                key = %primary,
                dialogue_id = %owner,
                "Primary key already assigned, not adding dialogue"
            );
            return false;
        }

        let id = dialogue.id();
        state.keys.insert(primary, id);
        state.dialogues.insert(id, dialogue);
        true
    }

    /// Point `key` at an active dialogue. An already assigned key is never
    /// moved to another dialogue.
    pub fn attach(&self, key: CorrelationKey, dialogue_id: DialogueId) -> bool {
        let mut state = self.state.lock();
        if !state.dialogues.contains_key(&dialogue_id) {
            debug!(application = %self.application, %key, %dialogue_id, "Not attaching key to inactive dialogue");
            return false;
        }
        if let Some(owner) = state.keys.get(&key) {
            if *owner != dialogue_id {
                warn!(
                    application = %self.application,
                    %key,
                    dialogue_id = %owner,
                    "Correlation key already assigned to another dialogue"
                );
            }
            return false;
        }

        debug!(application = %self.application, %key, %dialogue_id, "Correlation key attached");
        state.keys.insert(key, dialogue_id);
        true
    }

    /// Find the dialogue owning `key`. Ids learned from command responses
    /// match any entity kind.
    pub fn resolve(&self, key: &CorrelationKey) -> Option<Arc<Dialogue>> {
        let state = self.state.lock();
        let id = state.keys.get(key).or_else(|| {
            if key.kind == EntityKind::CommandOrigin {
                return None;
            }
            state
                .keys
                .get(&CorrelationKey::new(EntityKind::CommandOrigin, &key.id))
        })?;
        state.dialogues.get(id).cloned()
    }

    /// Exact key lookup, without the command-origin fallback
    pub fn contains_key(&self, key: &CorrelationKey) -> bool {
        self.state.lock().keys.contains_key(key)
    }

    /// Drop a dialogue and every key pointing at it
    pub fn remove_dialogue(&self, dialogue_id: DialogueId) -> Option<Arc<Dialogue>> {
        let mut state = self.state.lock();
        let removed = state.dialogues.remove(&dialogue_id)?;
        state.keys.retain(|_, owner| *owner != dialogue_id);
        debug!(application = %self.application, %dialogue_id, "Dialogue removed from correlation table");
        Some(removed)
    }

    /// A dialogue of this table by id
    pub fn dialogue(&self, dialogue_id: DialogueId) -> Option<Arc<Dialogue>> {
        self.state.lock().dialogues.get(&dialogue_id).cloned()
    }

    /// Snapshot of the dialogues in the table
    pub fn dialogues(&self) -> Vec<Arc<Dialogue>> {
        self.state.lock().dialogues.values().cloned().collect()
    }

    /// Every key owned by a dialogue
    pub fn keys_for(&self, dialogue_id: DialogueId) -> Vec<CorrelationKey> {
        self.state
            .lock()
            .keys
            .iter()
            .filter(|(_, owner)| **owner == dialogue_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().dialogues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
