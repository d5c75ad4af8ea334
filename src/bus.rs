//! Fire-and-forget change propagation between windows.
//!
//! Each live window owns an unbounded inbox. Publishing pushes the event into
//! every inbox except the originator's; an inbox whose window is gone simply
//! drops it. Windows that miss an event catch up on their next reload.

use tokio::sync::mpsc;
use tracing::debug;

use crate::registry::{WindowId, WindowRegistry};
use crate::types::{Folder, Note, Settings};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    NoteChanged(Note),
    NoteDeleted(String),
    FoldersChanged(Vec<Folder>),
    SettingsChanged(Settings),
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::NoteChanged(_) => "note-changed",
            SyncEvent::NoteDeleted(_) => "note-deleted",
            SyncEvent::FoldersChanged(_) => "folders-changed",
            SyncEvent::SettingsChanged(_) => "settings-changed",
        }
    }

    /// Hand the event to the matching listener callback.
    pub fn dispatch<L: SyncListener + ?Sized>(self, listener: &mut L) {
        match self {
            SyncEvent::NoteChanged(note) => listener.on_note_changed(note),
            SyncEvent::NoteDeleted(id) => listener.on_note_deleted(id),
            SyncEvent::FoldersChanged(folders) => listener.on_folders_changed(folders),
            SyncEvent::SettingsChanged(settings) => listener.on_settings_changed(settings),
        }
    }
}

/// Callbacks a window (or its view layer) implements to react to changes made
/// elsewhere. Every method defaults to ignoring the event.
pub trait SyncListener {
    fn on_note_changed(&mut self, _note: Note) {}
    fn on_note_deleted(&mut self, _id: String) {}
    fn on_folders_changed(&mut self, _folders: Vec<Folder>) {}
    fn on_settings_changed(&mut self, _settings: Settings) {}
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

pub(crate) fn inbox() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub struct BroadcastBus {
    registry: WindowRegistry,
}

impl BroadcastBus {
    pub fn new(registry: WindowRegistry) -> Self {
        Self { registry }
    }

    /// Push `event` to every live window other than `origin`. Returns how many
    /// inboxes accepted it.
    pub fn publish(&self, origin: Option<WindowId>, event: SyncEvent) -> usize {
        let kind = event.kind();
        let delivered = self.registry.deliver(origin, &event);
        debug!("published {} from {:?} to {} window(s)", kind, origin, delivered);
        delivered
    }
}
