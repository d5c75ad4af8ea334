//! Multi-window note sync and file-backed persistence for DevNote.
//!
//! A [`NoteHub`] owns the on-disk store, the table of open windows and the
//! bus that carries changes between them. Each open [`Window`] keeps its own
//! editing session: unsaved edits stay local until saved, and changes saved
//! elsewhere arrive as [`SyncEvent`]s.

pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;
pub mod watcher;
pub mod window;

pub use bus::{BroadcastBus, SyncEvent, SyncListener};
pub use config::AppConfig;
pub use error::{BulkSaveError, SessionError, StoreError};
pub use hub::{NoteHub, WindowOpen};
pub use registry::{CloseOutcome, WindowHandle, WindowId, WindowKind, WindowRegistry, WindowState};
pub use session::EditingSession;
pub use store::{FileStore, MigrationOutcome};
pub use types::{Folder, Language, Note, NotePatch, Settings};
pub use watcher::NotesWatcher;
pub use window::Window;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Run the engine headless: open the main window, watch the notes directory
/// and log every change until Ctrl-C.
pub async fn run(config: AppConfig) -> Result<()> {
    let hub = NoteHub::open(&config)
        .await
        .context("failed to open data directory")?;

    let mut main = hub
        .open_main_window()
        .await
        .into_window()
        .context("main window already open")?;

    let _watcher = match NotesWatcher::start(&hub, config.watch_debounce) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("changes from other processes will not be picked up: {:#}", e);
            None
        }
    };

    info!(
        "ready: {} notes, {} folders",
        main.notes().len(),
        main.all_folders().len()
    );

    loop {
        tokio::select! {
            event = main.next_event() => match event {
                Some(SyncEvent::NoteChanged(note)) => info!("note {} changed", note.id),
                Some(SyncEvent::NoteDeleted(id)) => info!("note {} deleted", id),
                Some(event) => info!("{}", event.kind()),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    hub.begin_quit();
    main.request_close();
    main.wait_for_cleanup().await;
    info!("shut down");
    Ok(())
}
