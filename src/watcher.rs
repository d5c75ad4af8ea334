//! Picks up note files changed by other processes (a second app instance, a
//! sync client, a text editor) and feeds them into the Broadcast Bus.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::bus::{BroadcastBus, SyncEvent};
use crate::codec;
use crate::hub::NoteHub;
use crate::store::FileStore;

// Debounce map entries older than this are dropped
const DEBOUNCE_RETENTION: Duration = Duration::from_secs(5);

// What was last published for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Present { updated_at: i64 },
    Gone,
}

type DebounceMap = Mutex<HashMap<PathBuf, (Instant, Seen)>>;

/// Keeps the OS watch alive; dropping it stops the events.
pub struct NotesWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for NotesWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotesWatcher").finish_non_exhaustive()
    }
}

impl NotesWatcher {
    /// Watch the hub's notes directory. Events are published with no origin,
    /// so every live window receives them.
    pub fn start(hub: &NoteHub, debounce: Duration) -> Result<Self> {
        let store = hub.store().clone();
        let bus = hub.bus().clone();
        let notes_dir = store.notes_dir().to_path_buf();
        let debounce_map: Arc<DebounceMap> = Arc::new(Mutex::new(HashMap::new()));

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, notify::EventKind::Access(_)) {
                        return;
                    }
                    for path in &event.paths {
                        handle_path(&store, &bus, &debounce_map, debounce, path, Instant::now());
                    }
                }
                Err(e) => warn!("notes watcher error: {}", e),
            },
            Config::default(),
        )
        .context("failed to create notes watcher")?;

        watcher
            .watch(&notes_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", notes_dir.display()))?;
        debug!("watching {}", notes_dir.display());

        Ok(Self { _watcher: watcher })
    }
}

// Publish what the file at `path` now holds, unless the same state was
// already published for it within the debounce window.
fn handle_path(
    store: &FileStore,
    bus: &BroadcastBus,
    debounce_map: &DebounceMap,
    debounce: Duration,
    path: &Path,
    now: Instant,
) -> Option<SyncEvent> {
    let id = store.note_id_for_path(path)?;

    let (event, seen) = match std::fs::read_to_string(path) {
        Ok(raw) => match codec::decode(&raw) {
            Ok(note) if note.id == id => {
                let seen = Seen::Present {
                    updated_at: note.updated_at,
                };
                (SyncEvent::NoteChanged(note), seen)
            }
            Ok(_) => {
                debug!("ignoring {}: record id does not match file name", path.display());
                return None;
            }
            // Usually a write caught halfway by a non-atomic writer
            Err(e) => {
                debug!("ignoring unreadable change to {}: {}", path.display(), e);
                return None;
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (SyncEvent::NoteDeleted(id.clone()), Seen::Gone)
        }
        Err(e) => {
            warn!("could not read changed note {}: {}", path.display(), e);
            return None;
        }
    };

    {
        let mut map = debounce_map.lock().expect("debounce map mutex");

        // Clean up old entries periodically
        if map.len() > 100 {
            map.retain(|_, (last, _)| now.duration_since(*last) < DEBOUNCE_RETENTION);
        }

        if let Some((last, last_seen)) = map.get(path) {
            if *last_seen == seen && now.duration_since(*last) < debounce {
                return None;
            }
        }
        map.insert(path.to_path_buf(), (now, seen));
    }

    bus.publish(None, event.clone());
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WindowRegistry;
    use crate::types::{Note, CATCH_ALL_FOLDER_ID};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: FileStore,
        bus: BroadcastBus,
        map: DebounceMap,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.bootstrap().await.unwrap();
        Fixture {
            _dir: dir,
            store,
            bus: BroadcastBus::new(WindowRegistry::new()),
            map: Mutex::new(HashMap::new()),
        }
    }

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_changed_file_becomes_note_changed() {
        let f = fixture().await;
        let mut note = Note::new("n1", CATCH_ALL_FOLDER_ID);
        note.title = "from disk".to_string();
        f.store.save_note(&note).await.unwrap();

        let event = handle_path(&f.store, &f.bus, &f.map, WINDOW, &f.store.note_path("n1"), Instant::now());
        assert_eq!(event, Some(SyncEvent::NoteChanged(note)));
    }

    #[tokio::test]
    async fn test_missing_file_becomes_note_deleted() {
        let f = fixture().await;
        let event = handle_path(&f.store, &f.bus, &f.map, WINDOW, &f.store.note_path("gone"), Instant::now());
        assert_eq!(event, Some(SyncEvent::NoteDeleted("gone".into())));
    }

    #[tokio::test]
    async fn test_repeat_of_same_state_is_debounced() {
        let f = fixture().await;
        let mut note = Note::new("n1", CATCH_ALL_FOLDER_ID);
        note.title = "v1".to_string();
        f.store.save_note(&note).await.unwrap();
        let path = f.store.note_path("n1");
        let start = Instant::now();

        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &path, start).is_some());
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &path, start + Duration::from_millis(100)).is_none());

        // A newer version inside the window still goes out
        note.title = "v2".to_string();
        note.updated_at += 1;
        f.store.save_note(&note).await.unwrap();
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &path, start + Duration::from_millis(200)).is_some());

        // Same state again once the window has passed
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &path, start + Duration::from_secs(2)).is_some());
    }

    #[tokio::test]
    async fn test_non_note_paths_ignored() {
        let f = fixture().await;
        let tmp = f.store.notes_dir().join("n1.json.7.0.tmp");
        std::fs::write(&tmp, "partial").unwrap();
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &tmp, Instant::now()).is_none());

        let elsewhere = f.store.data_dir().join("settings.json");
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &elsewhere, Instant::now()).is_none());

        std::fs::write(f.store.note_path("junk"), "{").unwrap();
        assert!(handle_path(&f.store, &f.bus, &f.map, WINDOW, &f.store.note_path("junk"), Instant::now()).is_none());
    }
}
