//! File-backed persistence: one JSON file per note plus singleton files for
//! folders and settings.
//!
//! Every write replaces the whole target file through a temp-file-and-rename,
//! so a concurrent reader in another window sees either the old record or the
//! new one, never half of each.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{BulkSaveError, StoreError};
use crate::types::{is_builtin_folder, now_millis, Folder, Note, Settings};

const NOTE_EXTENSION: &str = "json";
const NOTES_DIR: &str = "Notes";
const IMAGES_DIR: &str = "Images";
const FOLDERS_FILE: &str = "folders.json";
const SETTINGS_FILE: &str = "settings.json";
const LEGACY_NOTES_FILE: &str = "notes.json";
const BACKUP_SUFFIX: &str = ".bak";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What `migrate_legacy_aggregate` found on this boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NoLegacyFile,
    NotesDirNotEmpty,
    Migrated { notes: usize, skipped: usize },
}

#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
    notes_dir: PathBuf,
    images_dir: PathBuf,
}

// Ids become file names, so they must stay a single path component
pub fn validate_note_id(id: &str) -> Result<(), StoreError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.chars().any(|c| c.is_control());
    if invalid {
        Err(StoreError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

/// Newest first, the order every note list is displayed in.
pub fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

// Utility: keep ASCII alphanumerics and dots, replace everything else
fn sanitize_image_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9.]").expect("static image name regex"));
    let sanitized = re.replace_all(name, "_").into_owned();
    if sanitized.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        sanitized
    }
}

fn file_url(path: &Path) -> String {
    match url::Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", path.to_string_lossy().replace('\\', "/")),
    }
}

// Write `contents` to a unique sibling temp file, then rename it over `path`
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        "{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(&temp_path, e));
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            notes_dir: data_dir.join(NOTES_DIR),
            images_dir: data_dir.join(IMAGES_DIR),
            data_dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn note_path(&self, id: &str) -> PathBuf {
        self.notes_dir.join(format!("{}.{}", id, NOTE_EXTENSION))
    }

    fn folders_path(&self) -> PathBuf {
        self.data_dir.join(FOLDERS_FILE)
    }

    fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn legacy_notes_path(&self) -> PathBuf {
        self.data_dir.join(LEGACY_NOTES_FILE)
    }

    /// Note id for a path inside the notes directory, if it names a note file.
    pub fn note_id_for_path(&self, path: &Path) -> Option<String> {
        if path.parent() != Some(self.notes_dir.as_path()) {
            return None;
        }
        if path.extension().map_or(true, |ext| ext != NOTE_EXTENSION) {
            return None;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
    }

    /// Create the data, notes and images directories if missing.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        for dir in [&self.data_dir, &self.notes_dir, &self.images_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }

    // ---- Notes ----

    /// Read every note file. Unreadable or corrupt entries are logged and
    /// skipped; the result has no particular order.
    pub async fn load_all_notes(&self) -> Result<Vec<Note>, StoreError> {
        let mut entries = match fs::read_dir(&self.notes_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.notes_dir, e)),
        };

        let mut notes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.notes_dir, e))?
        {
            let path = entry.path();
            let Some(stem) = self.note_id_for_path(&path) else {
                continue;
            };

            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                // Deleted by another window between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("skipping unreadable note file {}: {}", path.display(), e);
                    continue;
                }
            };

            match codec::decode(&raw) {
                Ok(note) if note.id == stem => notes.push(note),
                Ok(note) => warn!(
                    "skipping note file {}: record id '{}' does not match file name",
                    path.display(),
                    note.id
                ),
                Err(e) => warn!("skipping corrupt note file {}: {}", path.display(), e),
            }
        }

        Ok(notes)
    }

    pub async fn load_note(&self, id: &str) -> Result<Note, StoreError> {
        validate_note_id(id)?;
        let path = self.note_path(id);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        codec::decode(&raw).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.reason,
        })
    }

    /// Replace the note's file with its encoded form.
    pub async fn save_note(&self, note: &Note) -> Result<(), StoreError> {
        validate_note_id(&note.id)?;
        let encoded = codec::encode(note)?;
        write_atomic(&self.note_path(&note.id), encoded.as_bytes()).await
    }

    /// Save each note independently. One failing id never stops the others;
    /// on partial failure the error lists both halves.
    pub async fn save_notes(&self, notes: &[Note]) -> Result<Vec<String>, BulkSaveError> {
        let mut saved = Vec::with_capacity(notes.len());
        let mut failed = Vec::new();

        for note in notes {
            match self.save_note(note).await {
                Ok(()) => saved.push(note.id.clone()),
                Err(e) => {
                    warn!("bulk save: note {} failed: {}", note.id, e);
                    failed.push((note.id.clone(), e));
                }
            }
        }

        if failed.is_empty() {
            Ok(saved)
        } else {
            Err(BulkSaveError { saved, failed })
        }
    }

    /// Remove the note's file. A missing file is not an error.
    pub async fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        validate_note_id(id)?;
        let path = self.note_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    // ---- Folders & settings ----

    /// User-created folders. Built-in ids are filtered out even if present.
    pub async fn load_folders(&self) -> Result<Vec<Folder>, StoreError> {
        let path = self.folders_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let folders: Vec<Folder> = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.to_string(),
        })?;
        Ok(folders
            .into_iter()
            .filter(|f| !is_builtin_folder(&f.id))
            .collect())
    }

    pub async fn save_folders(&self, folders: &[Folder]) -> Result<(), StoreError> {
        let persisted: Vec<&Folder> = folders
            .iter()
            .filter(|f| !is_builtin_folder(&f.id))
            .collect();
        let json = serde_json::to_string_pretty(&persisted)?;
        write_atomic(&self.folders_path(), json.as_bytes()).await
    }

    /// Stored settings, with defaults for anything the file does not mention.
    pub async fn load_settings(&self) -> Result<Settings, StoreError> {
        let path = self.settings_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(settings)?;
        write_atomic(&self.settings_path(), json.as_bytes()).await
    }

    // ---- Migration ----

    async fn notes_dir_has_notes(&self) -> Result<bool, StoreError> {
        let mut entries = match fs::read_dir(&self.notes_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io(&self.notes_dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.notes_dir, e))?
        {
            if self.note_id_for_path(&entry.path()).is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Split the old single-file `notes.json` into per-note files, then rename
    /// it to `notes.json.bak`. Does nothing once the legacy file is gone or
    /// when the notes directory already holds notes.
    pub async fn migrate_legacy_aggregate(&self) -> Result<MigrationOutcome, StoreError> {
        let legacy = self.legacy_notes_path();
        if !fs::try_exists(&legacy)
            .await
            .map_err(|e| StoreError::io(&legacy, e))?
        {
            return Ok(MigrationOutcome::NoLegacyFile);
        }
        if self.notes_dir_has_notes().await? {
            debug!("legacy notes file present but notes directory is populated, skipping migration");
            return Ok(MigrationOutcome::NotesDirNotEmpty);
        }

        let raw = fs::read_to_string(&legacy)
            .await
            .map_err(|e| StoreError::io(&legacy, e))?;
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                path: legacy.clone(),
                reason: e.to_string(),
            })?;

        let mut notes = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in entries {
            match codec::decode_value(entry) {
                Ok(note) if validate_note_id(&note.id).is_ok() => notes.push(note),
                Ok(note) => {
                    warn!("legacy migration: skipping note with invalid id '{}'", note.id);
                    skipped += 1;
                }
                Err(e) => {
                    warn!("legacy migration: skipping corrupt entry: {}", e);
                    skipped += 1;
                }
            }
        }

        if let Err(e) = self.save_notes(&notes).await {
            // Leave the legacy file in place; nothing is renamed on failure
            return Err(e.failed.into_iter().next().map(|(_, err)| err).unwrap_or_else(|| {
                StoreError::Corrupt {
                    path: legacy.clone(),
                    reason: "bulk save failed".to_string(),
                }
            }));
        }

        let mut backup = legacy.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        fs::rename(&legacy, &backup)
            .await
            .map_err(|e| StoreError::io(&legacy, e))?;

        info!("migrated {} notes from legacy notes file ({} skipped)", notes.len(), skipped);
        Ok(MigrationOutcome::Migrated {
            notes: notes.len(),
            skipped,
        })
    }

    // ---- Attachments ----

    /// Store a pasted image under a unique name and return a `file://` link to it.
    pub async fn save_image(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|e| StoreError::io(&self.images_dir, e))?;

        let base = format!("{}_{}", now_millis(), sanitize_image_name(name));
        let mut path = self.images_dir.join(&base);
        let mut counter = 1;
        while fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?
        {
            path = self.images_dir.join(format!("{}-{}", counter, base));
            counter += 1;
        }

        write_atomic(&path, bytes).await?;
        Ok(file_url(&path))
    }
}
