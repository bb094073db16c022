use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::PromptProvider;

/// Prompt store backed by a directory of `<name>.md` files.
///
/// Files are read on every lookup, so prompts can be edited while the
/// process runs.
pub struct FilePromptStore {
    dir: PathBuf,
}

impl FilePromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(MagnatError::PromptNotFound(format!("invalid prompt name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.md", name)))
    }

    /// Names from `wanted` that have no prompt file.
    pub fn missing<'a>(&self, wanted: &[&'a str]) -> Vec<&'a str> {
        wanted
            .iter()
            .copied()
            .filter(|name| self.path_for(name).map(|p| !p.is_file()).unwrap_or(true))
            .collect()
    }
}

impl PromptProvider for FilePromptStore {
    fn prompt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let path = self.path_for(name)?;
            debug!(prompt = name, path = %path.display(), "Loading prompt");
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(text.trim_end().to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(MagnatError::PromptNotFound(path.display().to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}
