//! Per-window editing state.
//!
//! A window keeps two copies of every note it touches: the authoritative copy
//! last seen on disk (or via a change event), and an editing overlay holding
//! unsaved local edits. The overlay always wins for display; external changes
//! only ever replace the authoritative copy.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::SessionError;
use crate::store::sort_newest_first;
use crate::types::{now_millis, Note, NotePatch};

#[derive(Debug, Default)]
pub struct EditingSession {
    authoritative: HashMap<String, Note>,
    overlays: HashMap<String, Note>,
    dirty: HashSet<String>,
}

impl EditingSession {
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            authoritative: notes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            ..Self::default()
        }
    }

    pub fn authoritative(&self, id: &str) -> Option<&Note> {
        self.authoritative.get(id)
    }

    /// What the window shows for `id`: the overlay if one exists, otherwise
    /// the authoritative copy.
    pub fn display_copy(&self, id: &str) -> Option<&Note> {
        self.overlays.get(id).or_else(|| self.authoritative.get(id))
    }

    /// Every known note with overlays substituted, newest first.
    pub fn display_notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .authoritative
            .keys()
            .chain(self.overlays.keys().filter(|id| !self.authoritative.contains_key(*id)))
            .filter_map(|id| self.display_copy(id).cloned())
            .collect();
        sort_newest_first(&mut notes);
        notes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.authoritative.contains_key(id) || self.overlays.contains_key(id)
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.contains(id)
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.dirty.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Merge a local edit into the overlay and mark the note dirty. The
    /// result's `updated_at` never moves backwards.
    pub fn update(&mut self, id: &str, patch: NotePatch) -> Result<&Note, SessionError> {
        let mut note = self
            .display_copy(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))?;
        patch.apply_to(&mut note);
        note.updated_at = now_millis().max(note.updated_at);

        self.dirty.insert(id.to_string());
        self.overlays.insert(id.to_string(), note);
        Ok(&self.overlays[id])
    }

    /// A note that exists only in this window so far (freshly created, or
    /// handed over unsaved from another window).
    pub fn insert_local(&mut self, note: Note) {
        self.dirty.insert(note.id.clone());
        self.overlays.insert(note.id.clone(), note);
    }

    /// Snapshot to hand to the store when saving `id`, stamped later than
    /// both the local copy and the newest version seen from elsewhere. The
    /// overlay takes the same stamp so [`commit_saved`](Self::commit_saved)
    /// can still recognise it.
    pub fn begin_save(&mut self, id: &str) -> Option<Note> {
        let floor = self
            .authoritative
            .get(id)
            .map_or(i64::MIN, |n| n.updated_at.saturating_add(1));
        let mut note = self.display_copy(id).cloned()?;
        note.updated_at = now_millis().max(note.updated_at).max(floor);

        if let Some(overlay) = self.overlays.get_mut(id) {
            overlay.updated_at = note.updated_at;
        }
        Some(note)
    }

    /// Fold a successful save back in. The overlay is dropped only if it still
    /// matches what was written; edits made while the save was in flight stay
    /// dirty.
    pub fn commit_saved(&mut self, saved: &Note) {
        if self.overlays.get(&saved.id) == Some(saved) {
            self.overlays.remove(&saved.id);
            self.dirty.remove(&saved.id);
        }
        self.authoritative.insert(saved.id.clone(), saved.clone());
    }

    /// Drop local edits. Returns false if there were none. A note that never
    /// reached the store disappears entirely.
    pub fn discard(&mut self, id: &str) -> bool {
        self.dirty.remove(id);
        self.overlays.remove(id).is_some()
    }

    /// Another window (or the watcher) saved `note`. Older versions than the
    /// authoritative copy are ignored. Returns whether anything changed.
    pub fn apply_note_changed(&mut self, note: Note) -> bool {
        if let Some(current) = self.authoritative.get(&note.id) {
            if note.updated_at < current.updated_at {
                debug!(
                    "ignoring stale change for note {} ({} < {})",
                    note.id, note.updated_at, current.updated_at
                );
                return false;
            }
            if *current == note {
                return false;
            }
        }
        if self.dirty.contains(&note.id) {
            debug!("note {} changed elsewhere while dirty here, keeping local edits", note.id);
        }
        self.authoritative.insert(note.id.clone(), note);
        true
    }

    /// The note is gone from disk: drop every trace of it, local edits included.
    pub fn apply_note_deleted(&mut self, id: &str) -> bool {
        let had_auth = self.authoritative.remove(id).is_some();
        let had_overlay = self.overlays.remove(id).is_some();
        self.dirty.remove(id);
        had_auth || had_overlay
    }

    /// Replace the authoritative set wholesale after a reload. Overlays are
    /// kept, so unsaved edits survive a refresh.
    pub fn replace_authoritative(&mut self, notes: Vec<Note>) {
        self.authoritative = notes.into_iter().map(|n| (n.id.clone(), n)).collect();
    }

    /// Ids of every note (authoritative or local-only) in `folder_id`, as displayed.
    pub fn ids_in_folder(&self, folder_id: &str) -> Vec<String> {
        self.display_notes()
            .into_iter()
            .filter(|n| n.folder_id == folder_id)
            .map(|n| n.id)
            .collect()
    }
}
