//! Snapshot persistence for the story state.
//!
//! The snapshot is one JSON document:
//!
//! ```json
//! {"storystate": {...}, "storybotid": "asst_...", "activesess": "thread_..."}
//! ```
//!
//! Writes go to a temporary sibling file that is then renamed over the
//! snapshot, so a crash mid-write leaves the previous snapshot intact.

use crate::story::StoryState;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save path: {0}")]
    InvalidPath(PathBuf),
}

/// Everything needed to resume: the story state, the assistant id and the
/// active session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    pub storystate: StoryState,
    #[serde(default)]
    pub storybotid: Option<String>,
    #[serde(default)]
    pub activesess: Option<String>,
}

impl SaveFile {
    /// Load a snapshot. A missing file means there is nothing to resume.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, PersistError> {
        let content = match fs::read_to_string(path.as_ref()).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write the snapshot atomically.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        write_snapshot(
            path,
            &self.storystate,
            self.storybotid.as_deref(),
            self.activesess.as_deref(),
        )
        .await
    }
}

/// Borrowed form of [`SaveFile`], so saving never copies the state.
#[derive(Serialize)]
struct Snapshot<'a> {
    storystate: &'a StoryState,
    storybotid: Option<&'a str>,
    activesess: Option<&'a str>,
}

/// Atomically write a snapshot of the given state.
pub async fn write_snapshot(
    path: impl AsRef<Path>,
    storystate: &StoryState,
    storybotid: Option<&str>,
    activesess: Option<&str>,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(&Snapshot {
        storystate,
        storybotid,
        activesess,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_path(path)?;
    let mut tmp_file = fs::File::create(&tmp_path).await?;
    tmp_file.write_all(content.as_bytes()).await?;
    tmp_file.sync_all().await?;
    drop(tmp_file);

    fs::rename(&tmp_path, path).await?;
    tracing::debug!(path = %path.display(), "saved story snapshot");
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf, PersistError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| PersistError::InvalidPath(path.to_path_buf()))?;
    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Entity, Session};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_first_run() {
        let dir = TempDir::new().unwrap();
        let loaded = SaveFile::load(dir.path().join("save.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("save.json");

        let mut session = Session::new("thread_1");
        session.theme = Some("space opera".to_string());
        session
            .entities
            .add(Entity::new("ship", "Calliope", "A battered freighter"));

        let mut save = SaveFile {
            storybotid: Some("asst_1".to_string()),
            activesess: Some("thread_1".to_string()),
            ..SaveFile::default()
        };
        save.storystate.sessions.add(session);
        save.save(&path).await.unwrap();

        let loaded = SaveFile::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, save);
        assert!(!temp_path(&path).unwrap().exists());
    }

    #[tokio::test]
    async fn test_document_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("save.json");
        SaveFile::default().save(&path).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("storystate").is_some());
        assert!(raw["storybotid"].is_null());
        assert!(raw["activesess"].is_null());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("save.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SaveFile::load(&path).await,
            Err(PersistError::Json(_))
        ));
    }
}
