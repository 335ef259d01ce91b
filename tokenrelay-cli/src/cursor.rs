//! Persisted resume progress: the text received so far for one stream.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use directories::BaseDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::models::char_len;
use thiserror::Error;

/// Bumped when the stored layout changes; older cursors are then ignored.
pub const CURSOR_VERSION: u32 = 1;

/// Storage key for a session's cursor.
#[must_use]
pub fn cursor_key(session_key: &str) -> String {
    format!("stream-{CURSOR_VERSION}:{session_key}")
}

/// Text received for one session, as last saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Session the text belongs to.
    pub session_key: String,
    /// Everything received so far, without the end-of-text marker.
    pub text: String,
    /// When the cursor was written.
    pub updated_at: DateTime<Utc>,
}

impl Cursor {
    /// A cursor stamped with the current time.
    #[must_use]
    pub fn new(session_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            text: text.into(),
            updated_at: Utc::now(),
        }
    }

    /// Offset to resume from.
    #[must_use]
    pub fn offset(&self) -> usize {
        char_len(&self.text)
    }
}

/// Cursor storage failures.
#[derive(Debug, Error)]
pub enum CursorError {
    /// Reading or writing the cursor file failed.
    #[error("cursor I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A stored cursor could not be parsed or serialized.
    #[error("cursor is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The platform reports no per-user configuration directory.
    #[error("no configuration directory available for cursors")]
    NoConfigDir,
}

/// Where cursors live between runs.
pub trait CursorStore: Send + Sync {
    /// Cursor for `session_key`, if one was saved.
    ///
    /// # Errors
    /// Storage failures; a missing cursor is `Ok(None)`.
    fn load(&self, session_key: &str) -> Result<Option<Cursor>, CursorError>;

    /// Saves `cursor`, replacing the previous one for its session.
    ///
    /// # Errors
    /// Storage failures.
    fn save(&self, cursor: &Cursor) -> Result<(), CursorError>;

    /// Removing a cursor that does not exist succeeds.
    ///
    /// # Errors
    /// Storage failures.
    fn remove(&self, session_key: &str) -> Result<(), CursorError>;
}

/// One JSON file per cursor.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    /// A store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config dir>/tokenrelay/cursors` for the current user.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join("tokenrelay").join("cursors"))
    }

    /// A store under [`FileCursorStore::default_dir`].
    ///
    /// # Errors
    /// Fails when the platform has no configuration directory.
    pub fn in_default_dir() -> Result<Self, CursorError> {
        Self::default_dir()
            .map(Self::new)
            .ok_or(CursorError::NoConfigDir)
    }

    /// Directory holding the cursor files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_key: &str) -> PathBuf {
        let mut name: String =
            url::form_urlencoded::byte_serialize(cursor_key(session_key).as_bytes()).collect();
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, session_key: &str) -> Result<Option<Cursor>, CursorError> {
        let contents = match fs::read_to_string(self.path_for(session_key)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let cursor: Cursor = serde_json::from_str(&contents)?;
        Ok((cursor.session_key == session_key).then_some(cursor))
    }

    fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&cursor.session_key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(cursor)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, session_key: &str) -> Result<(), CursorError> {
        match fs::remove_file(self.path_for(session_key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCursorStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved cursor for `session_key`, if any.
    #[must_use]
    pub fn get(&self, session_key: &str) -> Option<Cursor> {
        self.cursors.lock().get(&cursor_key(session_key)).cloned()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, session_key: &str) -> Result<Option<Cursor>, CursorError> {
        Ok(self.get(session_key))
    }

    fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        self.cursors
            .lock()
            .insert(cursor_key(&cursor.session_key), cursor.clone());
        Ok(())
    }

    fn remove(&self, session_key: &str) -> Result<(), CursorError> {
        self.cursors.lock().remove(&cursor_key(session_key));
        Ok(())
    }
}

impl<T: CursorStore + ?Sized> CursorStore for std::sync::Arc<T> {
    fn load(&self, session_key: &str) -> Result<Option<Cursor>, CursorError> {
        (**self).load(session_key)
    }

    fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        (**self).save(cursor)
    }

    fn remove(&self, session_key: &str) -> Result<(), CursorError> {
        (**self).remove(session_key)
    }
}
