use serde::{Deserialize, Serialize};

// Catch-all folder every orphaned note falls back to
pub const CATCH_ALL_FOLDER_ID: &str = "all";
pub const ARCHIVE_FOLDER_ID: &str = "archive";

/// Folders that always exist implicitly. They are never written to disk.
pub const BUILTIN_FOLDERS: &[(&str, &str)] = &[
    ("all", "All Notes"),
    ("todo", "To-Do"),
    ("code", "Code Snippets"),
    ("debug", "Debug Logs"),
    ("meeting", "Meeting Notes"),
    ("archive", "Archive"),
];

pub const WELCOME_NOTE_ID: &str = "welcome";

pub fn is_builtin_folder(id: &str) -> bool {
    BUILTIN_FOLDERS.iter().any(|(builtin, _)| *builtin == id)
}

// Milliseconds since the unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    Cpp,
    Html,
    Css,
    Markdown,
    #[default]
    #[serde(other)]
    Text,
}

// Full note as stored on disk and shared between windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_folder_id")]
    pub folder_id: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_pinned: bool,
}

fn default_folder_id() -> String {
    CATCH_ALL_FOLDER_ID.to_string()
}

impl Note {
    /// A fresh, empty note in `folder_id`.
    pub fn new(id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: String::new(),
            content: String::new(),
            tags: Vec::new(),
            folder_id: folder_id.into(),
            language: Language::Text,
            created_at: now,
            updated_at: now,
            is_archived: false,
            is_pinned: false,
        }
    }

    pub fn with_generated_id(folder_id: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), folder_id)
    }

    /// The note shown on first launch when nothing is stored yet.
    pub fn welcome() -> Self {
        let mut note = Self::new(WELCOME_NOTE_ID, CATCH_ALL_FOLDER_ID);
        note.title = "Welcome to DevNote".to_string();
        note.content = "# One file per note\n\n\
            - **Independent storage**: every note is saved as its own JSON file.\n\
            - **Images**: paste images straight into the editor.\n\
            - **Floating windows**: drag a tab down to detach it into its own window."
            .to_string();
        note.tags = vec!["release-notes".to_string()];
        note.language = Language::Markdown;
        note.is_pinned = true;
        note
    }

    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty() && self.tags.is_empty()
    }

    /// Adds `tag` unless already present. Returns whether the tag list changed.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    // Collapse duplicate tags, keeping the first occurrence
    pub fn dedup_tags(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.tags.retain(|t| seen.insert(t.clone()));
    }
}

/// Partial update merged into an editing overlay. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub folder_id: Option<String>,
    pub language: Option<Language>,
    pub is_archived: Option<bool>,
    pub is_pinned: Option<bool>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn folder(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: Some(folder_id.into()),
            ..Self::default()
        }
    }

    pub fn apply_to(self, note: &mut Note) {
        if let Some(title) = self.title {
            note.title = title;
        }
        if let Some(content) = self.content {
            note.content = content;
        }
        if let Some(tags) = self.tags {
            note.tags = tags;
            note.dedup_tags();
        }
        if let Some(folder_id) = self.folder_id {
            note.folder_id = folder_id;
        }
        if let Some(language) = self.language {
            note.language = language;
        }
        if let Some(is_archived) = self.is_archived {
            note.is_archived = is_archived;
        }
        if let Some(is_pinned) = self.is_pinned {
            note.is_pinned = is_pinned;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            icon: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatingPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for FloatingPosition {
    fn default() -> Self {
        Self {
            x: 100.0,
            y: 100.0,
            width: 700.0,
            height: 500.0,
        }
    }
}

// App settings shared by every window. Missing fields fall back to defaults
// so older settings files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub dark_mode: bool,
    pub accent_color: String,
    pub font_size: u32,
    pub transparency: u8, // 0-100
    pub floating_position: FloatingPosition,
    pub always_on_top: bool,
    pub minimize_to_tray: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            accent_color: "#3b82f6".to_string(),
            font_size: 14,
            transparency: 100,
            floating_position: FloatingPosition::default(),
            always_on_top: false,
            minimize_to_tray: true,
        }
    }
}
