//! One open window: its editing session, folder list, settings and the inbox
//! of change events pushed by other windows.

use tracing::{debug, info, warn};

use crate::bus::{EventReceiver, SyncEvent, SyncListener};
use crate::error::{SessionError, StoreError};
use crate::hub::{NoteHub, WindowOpen};
use crate::reconcile::{self, BlankCleanup, StartupRole};
use crate::registry::{CloseOutcome, WindowHandle, WindowId};
use crate::session::EditingSession;
use crate::types::{
    is_builtin_folder, now_millis, Folder, Note, NotePatch, Settings, ARCHIVE_FOLDER_ID,
    BUILTIN_FOLDERS, CATCH_ALL_FOLDER_ID, WELCOME_NOTE_ID,
};

// In-memory state every incoming event is applied to
#[derive(Debug)]
struct WindowModel {
    session: EditingSession,
    folders: Vec<Folder>,
    settings: Settings,
}

impl SyncListener for WindowModel {
    fn on_note_changed(&mut self, note: Note) {
        self.session.apply_note_changed(note);
    }

    fn on_note_deleted(&mut self, id: String) {
        self.session.apply_note_deleted(&id);
    }

    fn on_folders_changed(&mut self, folders: Vec<Folder>) {
        self.folders = folders;
    }

    fn on_settings_changed(&mut self, settings: Settings) {
        self.settings = settings;
    }
}

#[derive(Debug)]
pub struct Window {
    handle: WindowHandle,
    hub: NoteHub,
    events: EventReceiver,
    model: WindowModel,
    removed_blank: Vec<String>,
    cleanup: Option<BlankCleanup>,
}

impl Window {
    pub(crate) async fn start(hub: NoteHub, handle: WindowHandle, events: EventReceiver) -> Self {
        let role = match &handle.bound_note_id {
            Some(id) => StartupRole::Floating(id.clone()),
            None => StartupRole::Main,
        };
        let held_elsewhere = hub.registry().held_elsewhere(handle.id);

        let startup = reconcile::run(&hub, Some(handle.id), &role, &held_elsewhere).await;
        hub.registry().mark_ready(handle.id);

        Self {
            handle,
            hub,
            events,
            model: WindowModel {
                session: EditingSession::new(startup.notes),
                folders: startup.folders,
                settings: startup.settings,
            },
            removed_blank: startup.removed_blank,
            cleanup: Some(startup.cleanup),
        }
    }

    pub fn handle(&self) -> &WindowHandle {
        &self.handle
    }

    pub fn id(&self) -> WindowId {
        self.handle.id
    }

    pub fn session(&self) -> &EditingSession {
        &self.model.session
    }

    /// Notes as displayed (overlays substituted), newest first.
    pub fn notes(&self) -> Vec<Note> {
        self.model.session.display_notes()
    }

    pub fn display_copy(&self, id: &str) -> Option<&Note> {
        self.model.session.display_copy(id)
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.model.session.is_dirty(id)
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        self.model.session.dirty_ids()
    }

    /// User-created folders only.
    pub fn folders(&self) -> &[Folder] {
        &self.model.folders
    }

    /// Built-in folders followed by user folders.
    pub fn all_folders(&self) -> Vec<Folder> {
        BUILTIN_FOLDERS
            .iter()
            .map(|(id, name)| Folder {
                id: id.to_string(),
                name: name.to_string(),
                icon: None,
            })
            .chain(self.model.folders.iter().cloned())
            .collect()
    }

    pub fn settings(&self) -> &Settings {
        &self.model.settings
    }

    /// Blank notes removed when this window started.
    pub fn removed_blank(&self) -> &[String] {
        &self.removed_blank
    }

    /// Wait for the startup blank-note deletions to finish.
    pub async fn wait_for_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.finished().await;
        }
    }

    // ---- Editing ----

    /// New empty note in `active_folder` (or the catch-all folder when the
    /// active one is the catch-all or the archive). Lives only in this window
    /// until saved.
    pub fn create_note(&mut self, active_folder: &str) -> Note {
        let folder_id = if active_folder == CATCH_ALL_FOLDER_ID || active_folder == ARCHIVE_FOLDER_ID
        {
            CATCH_ALL_FOLDER_ID
        } else {
            active_folder
        };
        let note = Note::with_generated_id(folder_id);
        self.model.session.insert_local(note.clone());
        self.track_unsaved();
        note
    }

    pub fn update(&mut self, id: &str, patch: NotePatch) -> Result<&Note, SessionError> {
        self.model.session.update(id, patch)?;
        self.track_unsaved();
        self.display_copy(id)
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))
    }

    /// Returns false when the tag was already there (or empty).
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool, SessionError> {
        let mut note = self
            .display_copy(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))?;
        if !note.add_tag(tag) {
            return Ok(false);
        }
        self.update(
            id,
            NotePatch {
                tags: Some(note.tags),
                ..NotePatch::default()
            },
        )?;
        Ok(true)
    }

    /// Flip the pinned flag and return the new value.
    pub fn toggle_pin(&mut self, id: &str) -> Result<bool, SessionError> {
        let pinned = !self
            .display_copy(id)
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))?
            .is_pinned;
        self.update(
            id,
            NotePatch {
                is_pinned: Some(pinned),
                ..NotePatch::default()
            },
        )?;
        Ok(pinned)
    }

    pub fn move_to_folder(&mut self, id: &str, folder_id: &str) -> Result<&Note, SessionError> {
        self.update(id, NotePatch::folder(folder_id))
    }

    /// Persist `id`. On failure the overlay and dirty flag are left as they were.
    pub async fn save(&mut self, id: &str) -> Result<(), SessionError> {
        let note = self
            .model
            .session
            .begin_save(id)
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))?;
        self.hub.save_note(Some(self.id()), &note).await?;
        self.model.session.commit_saved(&note);
        self.track_unsaved();
        Ok(())
    }

    /// Save every dirty note in one bulk call. Notes that saved are committed
    /// even when others failed.
    pub async fn save_all_dirty(&mut self) -> Result<Vec<String>, SessionError> {
        let pending: Vec<Note> = self
            .dirty_ids()
            .iter()
            .filter_map(|id| self.model.session.begin_save(id))
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let result = self.hub.save_notes(Some(self.id()), &pending).await;
        let saved = match &result {
            Ok(ids) => ids,
            Err(e) => &e.saved,
        };
        for note in pending.iter().filter(|n| saved.contains(&n.id)) {
            self.model.session.commit_saved(note);
        }
        self.track_unsaved();
        Ok(result?)
    }

    /// Throw away unsaved edits for `id`.
    pub fn discard(&mut self, id: &str) -> bool {
        let discarded = self.model.session.discard(id);
        self.track_unsaved();
        discarded
    }

    pub async fn delete_note(&mut self, id: &str) -> Result<(), SessionError> {
        self.hub.delete_note(Some(self.id()), id).await?;
        self.model.session.apply_note_deleted(id);
        self.track_unsaved();
        self.close_if_bound_note_gone(id);
        Ok(())
    }

    /// Delete each id in turn. Every id is attempted; the first failure is returned.
    pub async fn delete_notes(&mut self, ids: &[String]) -> Result<(), SessionError> {
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.delete_note(id).await {
                warn!("could not delete note {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn save_image(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        self.hub.save_image(name, bytes).await
    }

    // ---- Folders ----

    pub async fn create_folder(&mut self, name: &str) -> Result<Folder, StoreError> {
        let folder = Folder::new(name.trim());
        let mut folders = self.model.folders.clone();
        folders.push(folder.clone());
        self.hub.save_folders(Some(self.id()), &folders).await?;
        self.model.folders = folders;
        Ok(folder)
    }

    /// Rename a user folder. Built-in and unknown ids are left alone.
    pub async fn rename_folder(&mut self, id: &str, name: &str) -> Result<bool, StoreError> {
        if is_builtin_folder(id) {
            return Ok(false);
        }
        let mut folders = self.model.folders.clone();
        let Some(folder) = folders.iter_mut().find(|f| f.id == id) else {
            return Ok(false);
        };
        folder.name = name.trim().to_string();
        self.hub.save_folders(Some(self.id()), &folders).await?;
        self.model.folders = folders;
        Ok(true)
    }

    /// Delete a user folder. Its saved notes move to the catch-all folder in
    /// one bulk save; unsaved ones are moved in their overlay and stay dirty.
    pub async fn delete_folder(&mut self, id: &str) -> Result<(), SessionError> {
        if is_builtin_folder(id) {
            debug!("refusing to delete built-in folder {}", id);
            return Ok(());
        }

        let mut moved = Vec::new();
        for note_id in self.model.session.ids_in_folder(id) {
            if self.is_dirty(&note_id) {
                self.update(&note_id, NotePatch::folder(CATCH_ALL_FOLDER_ID))?;
            } else if let Some(note) = self.display_copy(&note_id) {
                let mut note = note.clone();
                note.folder_id = CATCH_ALL_FOLDER_ID.to_string();
                note.updated_at = now_millis().max(note.updated_at);
                moved.push(note);
            }
        }

        let reassigned = self.hub.save_notes(Some(self.id()), &moved).await;
        let saved = match &reassigned {
            Ok(ids) => ids,
            Err(e) => &e.saved,
        };
        for note in moved.iter().filter(|n| saved.contains(&n.id)) {
            self.model.session.commit_saved(note);
        }

        let folders: Vec<Folder> = self
            .model
            .folders
            .iter()
            .filter(|f| f.id != id)
            .cloned()
            .collect();
        self.hub.save_folders(Some(self.id()), &folders).await?;
        self.model.folders = folders;

        info!("deleted folder {} ({} notes reassigned)", id, saved.len());
        reassigned?;
        Ok(())
    }

    // ---- Settings ----

    pub async fn update_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.hub.save_settings(Some(self.id()), &settings).await?;
        self.model.settings = settings;
        Ok(())
    }

    // ---- Events ----

    /// Wait for the next change pushed by another window, apply it, and hand
    /// it back for the view layer. `None` once the window is destroyed.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        let event = self.events.recv().await?;
        self.apply_event(event.clone());
        Some(event)
    }

    /// Apply everything already queued without waiting.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut applied = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event.clone());
            applied.push(event);
        }
        applied
    }

    fn apply_event(&mut self, event: SyncEvent) {
        let deleted = match &event {
            SyncEvent::NoteDeleted(id) => Some(id.clone()),
            _ => None,
        };
        event.dispatch(&mut self.model);
        if let Some(id) = deleted {
            self.track_unsaved();
            self.close_if_bound_note_gone(&id);
        }
    }

    // Registry copy of the dirty set, read by windows starting up
    fn track_unsaved(&self) {
        self.hub
            .registry()
            .record_unsaved(self.id(), self.model.session.dirty_ids());
    }

    // A floating window has nothing left to show once its note is deleted
    fn close_if_bound_note_gone(&mut self, id: &str) {
        if self.handle.bound_note_id.as_deref() == Some(id) {
            info!("note {} deleted, closing {}", id, self.handle.id);
            self.hub.registry().destroy(self.handle.id);
        }
    }

    // ---- Lifecycle ----

    /// Show and focus this window, then reload everything from disk.
    /// Unsaved edits survive the reload.
    pub async fn focus(&mut self) -> Result<(), StoreError> {
        self.hub.registry().focus(self.id());
        self.refresh().await
    }

    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let mut notes = self.hub.load_all_notes().await?;
        let folders = self.hub.load_folders().await?;
        let settings = self.hub.load_settings().await?;

        // Notes that only ever lived in memory would vanish on reload
        let keep_in_memory = [self.handle.bound_note_id.as_deref(), Some(WELCOME_NOTE_ID)];
        for id in keep_in_memory.into_iter().flatten() {
            if notes.iter().all(|n| n.id != id) {
                if let Some(note) = self.model.session.authoritative(id) {
                    notes.push(note.clone());
                }
            }
        }

        self.model.session.replace_authoritative(notes);
        self.model.folders = folders;
        self.model.settings = settings;
        Ok(())
    }

    /// Ask to close the window. The main window (and the last window) only
    /// hides unless the app is quitting. When the window really goes away its
    /// unsaved notes are saved in the background, without waiting.
    pub fn request_close(&mut self) -> CloseOutcome {
        let outcome = self.hub.registry().close_requested(self.id());
        if outcome == CloseOutcome::Destroyed {
            self.flush_in_background();
        }
        outcome
    }

    fn flush_in_background(&mut self) {
        for id in self.dirty_ids() {
            let Some(note) = self.model.session.begin_save(&id) else {
                continue;
            };
            if note.is_blank() {
                continue;
            }
            let hub = self.hub.clone();
            let origin = self.id();
            tokio::spawn(async move {
                if let Err(e) = hub.save_note(Some(origin), &note).await {
                    warn!("could not save note {} while closing window: {}", note.id, e);
                }
            });
        }
    }

    /// Move `id` into its own floating window. A newly created window takes
    /// over this window's unsaved copy and this window drops it; if the
    /// floating window already existed it is just brought forward.
    pub async fn detach_to_floating(&mut self, id: &str) -> Result<WindowOpen, SessionError> {
        let note = self
            .display_copy(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownNote(id.to_string()))?;
        let dirty = self.is_dirty(id);

        let mut opened = self.hub.open_floating_window_for(id).await?;
        if let WindowOpen::Created(floating) = &mut opened {
            floating.adopt(note, dirty);
            self.discard(id);
        }
        Ok(opened)
    }

    // Take over a note handed across from another window
    fn adopt(&mut self, note: Note, dirty: bool) {
        if dirty {
            self.model.session.insert_local(note);
            self.track_unsaved();
        } else {
            self.model.session.apply_note_changed(note);
        }
    }
}
