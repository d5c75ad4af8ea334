//! Window startup: bring the data directory up to date and build the initial
//! in-memory state for a new window.
//!
//! Nothing here fails the window. Errors are logged and the window starts
//! with whatever could be loaded (or defaults).

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::hub::NoteHub;
use crate::registry::WindowId;
use crate::store::{sort_newest_first, FileStore, MigrationOutcome};
use crate::types::{Folder, Note, Settings, CATCH_ALL_FOLDER_ID};

/// Which kind of window is starting up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRole {
    Main,
    /// Floating window bound to a note id; that note is never cleaned up and
    /// is always present in the result.
    Floating(String),
}

/// Background deletions of blank notes. Dropping this does not cancel them.
#[derive(Debug, Default)]
pub struct BlankCleanup {
    handles: Vec<JoinHandle<()>>,
}

impl BlankCleanup {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every deletion has been attempted.
    pub async fn finished(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("blank note cleanup task failed: {}", e);
            }
        }
    }
}

#[derive(Debug)]
pub struct Startup {
    pub notes: Vec<Note>,
    pub folders: Vec<Folder>,
    pub settings: Settings,
    pub removed_blank: Vec<String>,
    pub migration: Option<MigrationOutcome>,
    pub cleanup: BlankCleanup,
}

/// `held_elsewhere` lists notes other live windows are showing or editing;
/// they are kept even when blank. Blank notes that are removed are deleted
/// through the hub, so every other window hears about it, with `origin` as
/// the sender.
pub async fn run(
    hub: &NoteHub,
    origin: Option<WindowId>,
    role: &StartupRole,
    held_elsewhere: &[String],
) -> Startup {
    let store = hub.store();
    if let Err(e) = store.bootstrap().await {
        warn!("could not create data directories: {}", e);
    }

    let migration = match store.migrate_legacy_aggregate().await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("legacy notes migration failed, keeping legacy file: {}", e);
            None
        }
    };

    let loaded = store.load_all_notes().await.unwrap_or_else(|e| {
        warn!("could not load notes: {}", e);
        Vec::new()
    });

    let bound_id = match role {
        StartupRole::Main => None,
        StartupRole::Floating(id) => Some(id.as_str()),
    };

    let (blank, mut notes): (Vec<Note>, Vec<Note>) = loaded
        .into_iter()
        .partition(|n| {
            n.is_blank() && Some(n.id.as_str()) != bound_id && !held_elsewhere.contains(&n.id)
        });

    let removed_blank: Vec<String> = blank.into_iter().map(|n| n.id).collect();
    let cleanup = spawn_blank_cleanup(hub, origin, &removed_blank);

    if let Some(id) = bound_id {
        if !notes.iter().any(|n| n.id == id) {
            notes.push(load_bound_note(store, id).await);
        }
    }

    if notes.is_empty() && *role == StartupRole::Main {
        notes.push(Note::welcome());
    }
    sort_newest_first(&mut notes);

    let folders = store.load_folders().await.unwrap_or_else(|e| {
        warn!("could not load folders: {}", e);
        Vec::new()
    });
    let settings = store.load_settings().await.unwrap_or_else(|e| {
        warn!("could not load settings, using defaults: {}", e);
        Settings::default()
    });

    info!(
        "startup ({:?}): {} notes, {} blank removed, {} folders",
        role,
        notes.len(),
        removed_blank.len(),
        folders.len()
    );

    Startup {
        notes,
        folders,
        settings,
        removed_blank,
        migration,
        cleanup,
    }
}

fn spawn_blank_cleanup(hub: &NoteHub, origin: Option<WindowId>, ids: &[String]) -> BlankCleanup {
    let handles = ids
        .iter()
        .map(|id| {
            let hub = hub.clone();
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = hub.delete_note(origin, &id).await {
                    warn!("could not delete blank note {}: {}", id, e);
                }
            })
        })
        .collect();
    BlankCleanup { handles }
}

// The bound note of a floating window, from disk or freshly made
async fn load_bound_note(store: &FileStore, id: &str) -> Note {
    match store.load_note(id).await {
        Ok(note) => note,
        Err(e) => {
            if !e.is_not_found() {
                warn!("could not load note {} for floating window: {}", id, e);
            }
            Note::new(id, CATCH_ALL_FOLDER_ID)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SyncEvent;
    use crate::types::WELCOME_NOTE_ID;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.bootstrap().await.unwrap();
        (dir, store)
    }

    async fn start(store: &FileStore, role: &StartupRole, held_elsewhere: &[String]) -> Startup {
        run(&NoteHub::new(store.clone()), None, role, held_elsewhere).await
    }

    fn titled(id: &str, title: &str) -> Note {
        let mut note = Note::new(id, CATCH_ALL_FOLDER_ID);
        note.title = title.to_string();
        note
    }

    #[tokio::test]
    async fn test_blank_notes_removed() {
        let (_dir, store) = store().await;
        store.save_note(&Note::new("a1", CATCH_ALL_FOLDER_ID)).await.unwrap();
        store.save_note(&titled("keep", "Keep me")).await.unwrap();

        let startup = start(&store, &StartupRole::Main, &[]).await;
        assert_eq!(startup.removed_blank, vec!["a1"]);
        assert!(startup.notes.iter().all(|n| !n.is_blank()));
        startup.cleanup.finished().await;

        let ids: Vec<String> = store
            .load_all_notes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["keep"]);
    }

    #[tokio::test]
    async fn test_welcome_seeded_for_empty_main_only() {
        let (_dir, store) = store().await;
        let startup = start(&store, &StartupRole::Main, &[]).await;
        assert_eq!(startup.notes.len(), 1);
        assert_eq!(startup.notes[0].id, WELCOME_NOTE_ID);
        // Not persisted
        assert!(store.load_all_notes().await.unwrap().is_empty());

        let floating = start(&store, &StartupRole::Floating("n9".into()), &[]).await;
        assert!(floating.notes.iter().all(|n| n.id != WELCOME_NOTE_ID));
    }

    #[tokio::test]
    async fn test_floating_bound_note_exempt_from_cleanup() {
        let (_dir, store) = store().await;
        store.save_note(&Note::new("tray", CATCH_ALL_FOLDER_ID)).await.unwrap();
        store.save_note(&Note::new("other", CATCH_ALL_FOLDER_ID)).await.unwrap();

        let startup = start(&store, &StartupRole::Floating("tray".into()), &[]).await;
        assert_eq!(startup.removed_blank, vec!["other"]);
        assert_eq!(startup.notes.len(), 1);
        assert_eq!(startup.notes[0].id, "tray");
        startup.cleanup.finished().await;
        assert!(store.load_note("tray").await.is_ok());
    }

    #[tokio::test]
    async fn test_notes_open_elsewhere_survive() {
        let (_dir, store) = store().await;
        store.save_note(&Note::new("tray", CATCH_ALL_FOLDER_ID)).await.unwrap();

        let startup = start(&store, &StartupRole::Main, &["tray".to_string()]).await;
        assert!(startup.removed_blank.is_empty());
        assert!(startup.notes.iter().any(|n| n.id == "tray"));
    }

    #[tokio::test]
    async fn test_blank_cleanup_is_announced() {
        let (_dir, store) = store().await;
        store.save_note(&Note::new("a1", CATCH_ALL_FOLDER_ID)).await.unwrap();
        let hub = NoteHub::new(store.clone());
        let (_main, mut events) = hub.registry().open_main().into_created().unwrap();
        let (float, _frx) = hub.registry().open_floating("n1").into_created().unwrap();

        let startup = run(&hub, Some(float.id), &StartupRole::Floating("n1".into()), &[]).await;
        assert_eq!(startup.removed_blank, vec!["a1"]);
        startup.cleanup.finished().await;

        assert!(matches!(events.try_recv(), Ok(SyncEvent::NoteDeleted(id)) if id == "a1"));
        assert!(store.load_note("a1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_floating_missing_note_materialised() {
        let (_dir, store) = store().await;
        store.save_note(&titled("x", "X")).await.unwrap();

        let startup = start(&store, &StartupRole::Floating("ghost".into()), &[]).await;
        let ghost = startup.notes.iter().find(|n| n.id == "ghost").unwrap();
        assert!(ghost.is_blank());
        assert!(store.load_note("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_bad_settings_fall_back_to_defaults() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("settings.json"), "not json").unwrap();
        let startup = start(&store, &StartupRole::Main, &[]).await;
        assert_eq!(startup.settings, Settings::default());
    }

    #[tokio::test]
    async fn test_migration_runs_before_load() {
        let (dir, store) = store().await;
        std::fs::write(
            dir.path().join("notes.json"),
            r#"[{"id":"legacy","title":"From before","content":"","tags":[]},
                {"id":"empty","title":"","content":"","tags":[]}]"#,
        )
        .unwrap();

        let startup = start(&store, &StartupRole::Main, &[]).await;
        assert_eq!(
            startup.migration,
            Some(MigrationOutcome::Migrated { notes: 2, skipped: 0 })
        );
        let ids: Vec<&str> = startup.notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["legacy"]);
        assert_eq!(startup.removed_blank, vec!["empty"]);
    }
}
