//! Process-wide entry point: the File Store, the Window Registry and the
//! Broadcast Bus behind one cloneable handle.
//!
//! Every write that goes through here is followed by a broadcast, so views
//! only ever call the hub (or a [`Window`]) and never touch the store
//! directly.

use tracing::info;

use crate::bus::{BroadcastBus, SyncEvent};
use crate::config::AppConfig;
use crate::error::{BulkSaveError, StoreError};
use crate::registry::{OpenOutcome, WindowHandle, WindowId, WindowRegistry};
use crate::store::{sort_newest_first, validate_note_id, FileStore};
use crate::types::{Folder, Note, Settings, CATCH_ALL_FOLDER_ID};
use crate::window::Window;

/// Result of opening a window through the hub.
#[derive(Debug)]
pub enum WindowOpen {
    Created(Window),
    /// A matching window already existed and was shown and focused.
    Refocused(WindowHandle),
}

impl WindowOpen {
    pub fn handle(&self) -> &WindowHandle {
        match self {
            WindowOpen::Created(window) => window.handle(),
            WindowOpen::Refocused(handle) => handle,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, WindowOpen::Created(_))
    }

    pub fn into_window(self) -> Option<Window> {
        match self {
            WindowOpen::Created(window) => Some(window),
            WindowOpen::Refocused(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoteHub {
    store: FileStore,
    registry: WindowRegistry,
    bus: BroadcastBus,
}

impl NoteHub {
    pub fn new(store: FileStore) -> Self {
        let registry = WindowRegistry::new();
        let bus = BroadcastBus::new(registry.clone());
        Self {
            store,
            registry,
            bus,
        }
    }

    /// Hub over `config.data_dir`, with the directory tree created.
    pub async fn open(config: &AppConfig) -> Result<Self, StoreError> {
        let store = FileStore::new(&config.data_dir);
        store.bootstrap().await?;
        info!("data directory: {}", store.data_dir().display());
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    // ---- Notes ----

    /// Every stored note, newest first.
    pub async fn load_all_notes(&self) -> Result<Vec<Note>, StoreError> {
        let mut notes = self.store.load_all_notes().await?;
        sort_newest_first(&mut notes);
        Ok(notes)
    }

    pub async fn load_note(&self, id: &str) -> Result<Note, StoreError> {
        self.store.load_note(id).await
    }

    pub async fn save_note(&self, origin: Option<WindowId>, note: &Note) -> Result<(), StoreError> {
        self.store.save_note(note).await?;
        self.bus.publish(origin, SyncEvent::NoteChanged(note.clone()));
        Ok(())
    }

    /// Bulk save; each note that made it to disk is broadcast individually.
    pub async fn save_notes(
        &self,
        origin: Option<WindowId>,
        notes: &[Note],
    ) -> Result<Vec<String>, BulkSaveError> {
        let result = self.store.save_notes(notes).await;
        let saved = match &result {
            Ok(ids) => ids,
            Err(e) => &e.saved,
        };
        for note in notes.iter().filter(|n| saved.contains(&n.id)) {
            self.bus.publish(origin, SyncEvent::NoteChanged(note.clone()));
        }
        result
    }

    pub async fn delete_note(&self, origin: Option<WindowId>, id: &str) -> Result<(), StoreError> {
        self.store.delete_note(id).await?;
        self.bus.publish(origin, SyncEvent::NoteDeleted(id.to_string()));
        Ok(())
    }

    // ---- Folders & settings ----

    pub async fn load_folders(&self) -> Result<Vec<Folder>, StoreError> {
        self.store.load_folders().await
    }

    pub async fn save_folders(
        &self,
        origin: Option<WindowId>,
        folders: &[Folder],
    ) -> Result<(), StoreError> {
        self.store.save_folders(folders).await?;
        self.bus.publish(origin, SyncEvent::FoldersChanged(folders.to_vec()));
        Ok(())
    }

    pub async fn load_settings(&self) -> Result<Settings, StoreError> {
        self.store.load_settings().await
    }

    pub async fn save_settings(
        &self,
        origin: Option<WindowId>,
        settings: &Settings,
    ) -> Result<(), StoreError> {
        self.store.save_settings(settings).await?;
        self.bus.publish(origin, SyncEvent::SettingsChanged(settings.clone()));
        Ok(())
    }

    pub async fn save_image(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        self.store.save_image(name, bytes).await
    }

    // ---- Windows ----

    pub async fn open_main_window(&self) -> WindowOpen {
        match self.registry.open_main() {
            OpenOutcome::Created { handle, events } => {
                WindowOpen::Created(Window::start(self.clone(), handle, events).await)
            }
            OpenOutcome::Refocused(handle) => WindowOpen::Refocused(handle),
        }
    }

    /// Open the floating window for `note_id`, or bring the existing one forward.
    pub async fn open_floating_window_for(&self, note_id: &str) -> Result<WindowOpen, StoreError> {
        validate_note_id(note_id)?;
        Ok(match self.registry.open_floating(note_id) {
            OpenOutcome::Created { handle, events } => {
                WindowOpen::Created(Window::start(self.clone(), handle, events).await)
            }
            OpenOutcome::Refocused(handle) => WindowOpen::Refocused(handle),
        })
    }

    /// Quick note from the tray: persist a blank note, tell every window
    /// about it, then give it its own floating window.
    pub async fn create_floating_note(&self) -> Result<WindowOpen, StoreError> {
        let note = Note::with_generated_id(CATCH_ALL_FOLDER_ID);
        self.save_note(None, &note).await?;
        self.open_floating_window_for(&note.id).await
    }

    /// Enter the quitting state; from now on closing any window destroys it.
    pub fn begin_quit(&self) {
        info!("quit requested");
        self.registry.begin_quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WindowKind;

    async fn hub() -> (tempfile::TempDir, NoteHub) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.bootstrap().await.unwrap();
        (dir, NoteHub::new(store))
    }

    fn titled(id: &str, title: &str) -> Note {
        let mut note = Note::new(id, CATCH_ALL_FOLDER_ID);
        note.title = title.to_string();
        note
    }

    #[tokio::test]
    async fn test_save_note_broadcasts_to_others() {
        let (_dir, hub) = hub().await;
        let mut main = hub.open_main_window().await.into_window().unwrap();
        let mut float = hub
            .open_floating_window_for("n1")
            .await
            .unwrap()
            .into_window()
            .unwrap();

        hub.save_note(Some(main.id()), &titled("n1", "Hi")).await.unwrap();

        assert!(main.drain_events().is_empty());
        let events = float.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(float.display_copy("n1").unwrap().title, "Hi");
    }

    #[tokio::test]
    async fn test_save_notes_broadcasts_only_successes() {
        let (_dir, hub) = hub().await;
        let mut main = hub.open_main_window().await.into_window().unwrap();
        std::fs::create_dir(hub.store().note_path("bad")).unwrap();

        let notes = vec![titled("ok", "fine"), titled("bad", "nope")];
        let err = hub.save_notes(None, &notes).await.unwrap_err();
        assert_eq!(err.saved, vec!["ok"]);

        let changed: Vec<SyncEvent> = main.drain_events();
        assert_eq!(changed, vec![SyncEvent::NoteChanged(notes[0].clone())]);
    }

    #[tokio::test]
    async fn test_settings_broadcast_excludes_origin() {
        let (_dir, hub) = hub().await;
        let mut main = hub.open_main_window().await.into_window().unwrap();
        let mut float = hub
            .open_floating_window_for("n1")
            .await
            .unwrap()
            .into_window()
            .unwrap();

        let mut settings = Settings::default();
        settings.dark_mode = true;
        hub.save_settings(Some(float.id()), &settings).await.unwrap();

        assert!(float.drain_events().is_empty());
        main.drain_events();
        assert!(main.settings().dark_mode);
        assert_eq!(hub.load_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_open_floating_twice_refocuses() {
        let (_dir, hub) = hub().await;
        let first = hub.open_floating_window_for("n1").await.unwrap();
        let second = hub.open_floating_window_for("n1").await.unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.handle().id, second.handle().id);
    }

    #[tokio::test]
    async fn test_open_floating_rejects_bad_id() {
        let (_dir, hub) = hub().await;
        assert!(hub.open_floating_window_for("../etc").await.is_err());
        assert_eq!(hub.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn test_create_floating_note() {
        let (_dir, hub) = hub().await;
        let mut main = hub.open_main_window().await.into_window().unwrap();

        let opened = hub.create_floating_note().await.unwrap();
        let float = opened.into_window().unwrap();
        assert_eq!(float.handle().kind, WindowKind::Floating);

        let id = float.handle().bound_note_id.clone().unwrap();
        assert!(float.display_copy(&id).is_some());
        assert!(hub.load_note(&id).await.unwrap().is_blank());

        main.drain_events();
        assert!(main.display_copy(&id).is_some());
    }

    #[tokio::test]
    async fn test_load_all_notes_newest_first() {
        let (_dir, hub) = hub().await;
        let mut old = titled("old", "o");
        old.updated_at = 1;
        let mut new = titled("new", "n");
        new.updated_at = 2;
        hub.save_note(None, &old).await.unwrap();
        hub.save_note(None, &new).await.unwrap();

        let ids: Vec<String> = hub
            .load_all_notes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
