//! Authoritative table of open windows.
//!
//! All window-opening paths go through here so the one-floating-window-per-note
//! rule is checked in exactly one place, under one lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::bus::{inbox, EventReceiver, EventSender, SyncEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Main,
    Floating,
}

// Created -> Visible <-> Hidden -> Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Created,
    Visible,
    Hidden,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    pub id: WindowId,
    pub kind: WindowKind,
    pub bound_note_id: Option<String>,
}

/// Result of asking for a window. Asking twice for the same floating note is
/// not an error: the existing window is shown and focused instead.
#[derive(Debug)]
pub enum OpenOutcome {
    Created {
        handle: WindowHandle,
        events: EventReceiver,
    },
    Refocused(WindowHandle),
}

impl OpenOutcome {
    pub fn handle(&self) -> &WindowHandle {
        match self {
            OpenOutcome::Created { handle, .. } => handle,
            OpenOutcome::Refocused(handle) => handle,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, OpenOutcome::Created { .. })
    }

    pub fn into_created(self) -> Option<(WindowHandle, EventReceiver)> {
        match self {
            OpenOutcome::Created { handle, events } => Some((handle, events)),
            OpenOutcome::Refocused(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Hidden,
    Destroyed,
    Unknown,
}

#[derive(Debug)]
struct WindowEntry {
    handle: WindowHandle,
    state: WindowState,
    sender: EventSender,
    unsaved: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    windows: HashMap<WindowId, WindowEntry>,
    floating_by_note: HashMap<String, WindowId>,
    main: Option<WindowId>,
    focused: Option<WindowId>,
    next_id: u64,
    quitting: bool,
}

impl RegistryInner {
    fn register(&mut self, kind: WindowKind, bound_note_id: Option<String>) -> OpenOutcome {
        let id = WindowId(self.next_id);
        self.next_id += 1;

        let handle = WindowHandle {
            id,
            kind,
            bound_note_id,
        };
        let (sender, events) = inbox();
        self.windows.insert(
            id,
            WindowEntry {
                handle: handle.clone(),
                state: WindowState::Created,
                sender,
                unsaved: Vec::new(),
            },
        );
        if let Some(note_id) = &handle.bound_note_id {
            self.floating_by_note.insert(note_id.clone(), id);
        }
        if kind == WindowKind::Main {
            self.main = Some(id);
        }
        self.focused = Some(id);
        info!("opened {:?} {} (note {:?})", kind, id, handle.bound_note_id);
        OpenOutcome::Created { handle, events }
    }

    // Show + focus an existing window
    fn raise(&mut self, id: WindowId) -> Option<WindowHandle> {
        let entry = self.windows.get_mut(&id)?;
        entry.state = WindowState::Visible;
        self.focused = Some(id);
        Some(entry.handle.clone())
    }

    fn destroy(&mut self, id: WindowId) -> bool {
        let Some(entry) = self.windows.remove(&id) else {
            return false;
        };
        if let Some(note_id) = &entry.handle.bound_note_id {
            if self.floating_by_note.get(note_id) == Some(&id) {
                self.floating_by_note.remove(note_id);
            }
        }
        if self.main == Some(id) {
            self.main = None;
        }
        if self.focused == Some(id) {
            self.focused = None;
        }
        info!("destroyed {}", id);
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse the live main window if there is one, otherwise create it.
    pub fn open_main(&self) -> OpenOutcome {
        let mut inner = self.inner.lock().expect("window registry mutex");
        if let Some(id) = inner.main {
            if let Some(handle) = inner.raise(id) {
                return OpenOutcome::Refocused(handle);
            }
        }
        inner.register(WindowKind::Main, None)
    }

    /// At most one floating window per note: an existing one is raised.
    pub fn open_floating(&self, note_id: &str) -> OpenOutcome {
        let mut inner = self.inner.lock().expect("window registry mutex");
        if let Some(&id) = inner.floating_by_note.get(note_id) {
            if let Some(handle) = inner.raise(id) {
                debug!("floating window for note {} already open, refocusing {}", note_id, id);
                return OpenOutcome::Refocused(handle);
            }
        }
        inner.register(WindowKind::Floating, Some(note_id.to_string()))
    }

    /// Window finished loading (the "ready to show" moment).
    pub fn mark_ready(&self, id: WindowId) -> bool {
        let mut inner = self.inner.lock().expect("window registry mutex");
        match inner.windows.get_mut(&id) {
            Some(entry) if entry.state == WindowState::Created => {
                entry.state = WindowState::Visible;
                true
            }
            _ => false,
        }
    }

    pub fn focus(&self, id: WindowId) -> bool {
        let mut inner = self.inner.lock().expect("window registry mutex");
        inner.raise(id).is_some()
    }

    pub fn hide(&self, id: WindowId) -> bool {
        let mut inner = self.inner.lock().expect("window registry mutex");
        let Some(entry) = inner.windows.get_mut(&id) else {
            return false;
        };
        entry.state = WindowState::Hidden;
        if inner.focused == Some(id) {
            inner.focused = None;
        }
        true
    }

    /// The main window, and the last window of any kind, are hidden rather
    /// than destroyed so the process keeps running in the background. Once
    /// quitting, every close is destructive.
    pub fn close_requested(&self, id: WindowId) -> CloseOutcome {
        let mut inner = self.inner.lock().expect("window registry mutex");
        let Some(entry) = inner.windows.get(&id) else {
            return CloseOutcome::Unknown;
        };
        let keep_alive = entry.handle.kind == WindowKind::Main || inner.windows.len() == 1;

        if keep_alive && !inner.quitting {
            if let Some(entry) = inner.windows.get_mut(&id) {
                entry.state = WindowState::Hidden;
            }
            if inner.focused == Some(id) {
                inner.focused = None;
            }
            debug!("close of {} turned into hide", id);
            CloseOutcome::Hidden
        } else {
            inner.destroy(id);
            CloseOutcome::Destroyed
        }
    }

    pub fn destroy(&self, id: WindowId) -> bool {
        let mut inner = self.inner.lock().expect("window registry mutex");
        inner.destroy(id)
    }

    pub fn begin_quit(&self) {
        let mut inner = self.inner.lock().expect("window registry mutex");
        inner.quitting = true;
    }

    pub fn is_quitting(&self) -> bool {
        self.inner.lock().expect("window registry mutex").quitting
    }

    /// Every live window, in creation order.
    pub fn broadcast_targets(&self) -> Vec<WindowHandle> {
        let inner = self.inner.lock().expect("window registry mutex");
        let mut handles: Vec<WindowHandle> =
            inner.windows.values().map(|e| e.handle.clone()).collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    pub fn state(&self, id: WindowId) -> Option<WindowState> {
        let inner = self.inner.lock().expect("window registry mutex");
        match inner.windows.get(&id) {
            Some(entry) => Some(entry.state),
            // Ids are never reused, so a past id that is gone was destroyed
            None if id.0 < inner.next_id => Some(WindowState::Destroyed),
            None => None,
        }
    }

    pub fn floating_for(&self, note_id: &str) -> Option<WindowHandle> {
        let inner = self.inner.lock().expect("window registry mutex");
        inner
            .floating_by_note
            .get(note_id)
            .and_then(|id| inner.windows.get(id))
            .map(|e| e.handle.clone())
    }

    pub fn main_window(&self) -> Option<WindowHandle> {
        let inner = self.inner.lock().expect("window registry mutex");
        inner
            .main
            .and_then(|id| inner.windows.get(&id))
            .map(|e| e.handle.clone())
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.inner.lock().expect("window registry mutex").focused
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().expect("window registry mutex").windows.len()
    }

    /// Replace the list of notes window `id` holds unsaved edits for.
    pub fn record_unsaved(&self, id: WindowId, note_ids: Vec<String>) {
        let mut inner = self.inner.lock().expect("window registry mutex");
        if let Some(entry) = inner.windows.get_mut(&id) {
            entry.unsaved = note_ids;
        }
    }

    /// Notes some live window other than `id` is showing or editing: the
    /// notes bound to floating windows plus every unsaved note. Sorted, no
    /// duplicates.
    pub fn held_elsewhere(&self, id: WindowId) -> Vec<String> {
        let inner = self.inner.lock().expect("window registry mutex");
        let mut held: Vec<String> = inner
            .windows
            .values()
            .filter(|e| e.handle.id != id)
            .flat_map(|e| e.handle.bound_note_id.iter().chain(e.unsaved.iter()))
            .cloned()
            .collect();
        held.sort();
        held.dedup();
        held
    }

    // Sends under the lock so one origin's events keep their order everywhere
    pub(crate) fn deliver(&self, origin: Option<WindowId>, event: &SyncEvent) -> usize {
        let inner = self.inner.lock().expect("window registry mutex");
        let mut delivered = 0;
        for entry in inner.windows.values() {
            if Some(entry.handle.id) == origin {
                continue;
            }
            match entry.sender.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!("dropping {} for unreachable {}", event.kind(), entry.handle.id),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_main_is_reused() {
        let registry = WindowRegistry::new();
        let first = registry.open_main();
        assert!(first.is_created());
        let second = registry.open_main();
        assert!(!second.is_created());
        assert_eq!(first.handle(), second.handle());
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_floating_singleton_per_note() {
        let registry = WindowRegistry::new();
        let a = registry.open_floating("n1");
        let b = registry.open_floating("n1");
        let other = registry.open_floating("n2");

        assert!(a.is_created());
        assert!(!b.is_created());
        assert!(other.is_created());
        assert_eq!(a.handle(), b.handle());

        let bound: Vec<_> = registry
            .broadcast_targets()
            .into_iter()
            .filter(|h| h.bound_note_id.as_deref() == Some("n1"))
            .collect();
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn test_refocus_shows_hidden_window() {
        let registry = WindowRegistry::new();
        let (main, _rx) = registry.open_main().into_created().unwrap();
        let (float, _frx) = registry.open_floating("n1").into_created().unwrap();
        registry.hide(float.id);
        registry.focus(main.id);
        assert_eq!(registry.state(float.id), Some(WindowState::Hidden));

        let again = registry.open_floating("n1");
        assert_eq!(again.handle().id, float.id);
        assert_eq!(registry.state(float.id), Some(WindowState::Visible));
        assert_eq!(registry.focused(), Some(float.id));
    }

    #[test]
    fn test_lifecycle_states() {
        let registry = WindowRegistry::new();
        let (main, _rx) = registry.open_main().into_created().unwrap();
        assert_eq!(registry.state(main.id), Some(WindowState::Created));
        assert!(registry.mark_ready(main.id));
        assert!(!registry.mark_ready(main.id));
        assert_eq!(registry.state(main.id), Some(WindowState::Visible));
        registry.hide(main.id);
        assert_eq!(registry.state(main.id), Some(WindowState::Hidden));
        registry.focus(main.id);
        assert_eq!(registry.state(main.id), Some(WindowState::Visible));
    }

    #[test]
    fn test_close_main_hides_unless_quitting() {
        let registry = WindowRegistry::new();
        let (main, _rx) = registry.open_main().into_created().unwrap();
        let (_float, _frx) = registry.open_floating("n1").into_created().unwrap();

        assert_eq!(registry.close_requested(main.id), CloseOutcome::Hidden);
        assert_eq!(registry.state(main.id), Some(WindowState::Hidden));

        registry.begin_quit();
        assert_eq!(registry.close_requested(main.id), CloseOutcome::Destroyed);
        assert_eq!(registry.state(main.id), Some(WindowState::Destroyed));
        assert!(registry.main_window().is_none());
    }

    #[test]
    fn test_close_floating_destroys_and_frees_slot() {
        let registry = WindowRegistry::new();
        let (_main, _rx) = registry.open_main().into_created().unwrap();
        let (float, _frx) = registry.open_floating("n1").into_created().unwrap();

        assert_eq!(registry.close_requested(float.id), CloseOutcome::Destroyed);
        assert!(registry.floating_for("n1").is_none());

        let reopened = registry.open_floating("n1");
        assert!(reopened.is_created());
        assert_ne!(reopened.handle().id, float.id);
    }

    #[test]
    fn test_last_floating_window_is_hidden() {
        let registry = WindowRegistry::new();
        let (float, _frx) = registry.open_floating("n1").into_created().unwrap();
        assert_eq!(registry.close_requested(float.id), CloseOutcome::Hidden);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.close_requested(WindowId(99)), CloseOutcome::Unknown);
    }

    #[test]
    fn test_destroyed_receiver_sees_end_of_stream() {
        let registry = WindowRegistry::new();
        let (main, _rx) = registry.open_main().into_created().unwrap();
        let (float, mut frx) = registry.open_floating("n1").into_created().unwrap();
        registry.destroy(float.id);
        assert_eq!(registry.broadcast_targets(), vec![main]);
        // Sender dropped with the entry
        assert!(matches!(
            frx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_held_elsewhere_covers_bound_and_unsaved_notes() {
        let registry = WindowRegistry::new();
        let (main, _rx) = registry.open_main().into_created().unwrap();
        let (float, _frx) = registry.open_floating("n1").into_created().unwrap();
        registry.record_unsaved(main.id, vec!["n2".to_string(), "n1".to_string()]);

        assert_eq!(registry.held_elsewhere(float.id), vec!["n1", "n2"]);
        assert_eq!(registry.held_elsewhere(main.id), vec!["n1"]);

        registry.destroy(main.id);
        assert!(registry.held_elsewhere(float.id).is_empty());
    }
}
