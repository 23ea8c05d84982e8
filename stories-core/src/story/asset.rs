//! Binary artifacts (images, narration audio) attached to messages.

use crate::collection::Keyed;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A binary artifact keyed by `(message_id, name, format)`.
///
/// The identity fields are fixed at construction, so the collection key can
/// never drift from the record. Content is cached: it starts absent unless
/// supplied, is read from `base` on first access, and only changes through
/// [`Asset::replace_content`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    message_id: String,
    name: String,
    #[serde(rename = "type")]
    format: String,
    base: PathBuf,
    #[serde(skip)]
    data: Option<Vec<u8>>,
}

impl Asset {
    pub fn new(
        message_id: impl Into<String>,
        name: impl Into<String>,
        format: impl Into<String>,
        base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            name: name.into(),
            format: format.into(),
            base: base.into(),
            data: None,
        }
    }

    /// Attach content that is already in memory.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Storage file name for an asset identity.
    pub fn filename(message_id: &str, name: &str, format: &str) -> String {
        format!("{message_id}-{name}.{format}")
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn file_name(&self) -> String {
        Self::filename(&self.message_id, &self.name, &self.format)
    }

    pub fn path(&self) -> PathBuf {
        self.base.join(self.file_name())
    }

    /// Content if it is already cached.
    pub fn cached(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Content, read from storage on first access and cached afterwards.
    pub async fn content(&mut self) -> io::Result<&[u8]> {
        if self.data.is_none() {
            self.data = Some(fs::read(self.path()).await?);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Overwrite the cached content. Call [`Asset::save`] to persist it.
    pub fn replace_content(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    /// Write the cached content to storage.
    pub async fn save(&self) -> io::Result<()> {
        let data = self.data.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("asset {} has no content to save", self.file_name()),
            )
        })?;
        fs::create_dir_all(&self.base).await?;
        fs::write(self.path(), data).await
    }
}

impl Keyed for Asset {
    fn key(&self) -> String {
        self.file_name()
    }
}

/// Assets compare by identity and location, not by cached content.
impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
            && self.name == other.name
            && self.format == other.format
            && self.base == other.base
    }
}

impl Eq for Asset {}
