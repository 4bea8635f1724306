use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;
use crate::models::OutputFile;

/// Writes output files below a fixed root.
///
/// Each file is written to a temporary file in its destination directory and
/// then renamed into place, so a reader never observes a partial file.
#[derive(Debug, Clone)]
pub struct FileWriter {
    root: PathBuf,
    overwrite: bool,
}

impl FileWriter {
    pub fn new(root: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            root: root.into(),
            overwrite,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes one file and returns its absolute path.
    pub fn write(&self, file: &OutputFile) -> Result<PathBuf, AppError> {
        let destination = self.destination(&file.relative_path)?;

        if !self.overwrite && destination.exists() {
            return Err(AppError::FileExists(destination.display().to_string()));
        }

        let parent = destination
            .parent()
            .ok_or_else(|| AppError::IoError(format!("{}: no parent directory", destination.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::IoError(format!("{}: {e}", parent.display())))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| AppError::IoError(format!("{}: {e}", parent.display())))?;
        tmp.write_all(file.render().as_bytes())
            .and_then(|()| tmp.flush())
            .map_err(|e| AppError::IoError(format!("{}: {e}", destination.display())))?;

        let persisted = if self.overwrite {
            tmp.persist(&destination)
        } else {
            tmp.persist_noclobber(&destination)
        };

        match persisted {
            Ok(_) => {
                tracing::debug!(path = %destination.display(), "Wrote file");
                Ok(destination)
            }
            Err(e) if e.error.kind() == IoErrorKind::AlreadyExists => {
                Err(AppError::FileExists(destination.display().to_string()))
            }
            Err(e) => Err(AppError::IoError(format!(
                "{}: {}",
                destination.display(),
                e.error
            ))),
        }
    }

    /// Joins a relative output path onto the root, refusing anything that
    /// could land outside it.
    fn destination(&self, relative: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(relative);
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));

        if escapes {
            return Err(AppError::IoError(format!(
                "refusing to write outside output root: {}",
                relative.display()
            )));
        }

        Ok(self.root.join(relative))
    }
}
