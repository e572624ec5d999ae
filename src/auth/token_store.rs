//! Token persistence between runs

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{AuthError, Token};

/// Stores the OAuth token as a JSON file
///
/// Token values are never logged.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored token; a missing file means no token
    pub fn load(&self) -> Result<Option<Token>, AuthError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.error(e))
    }

    /// Writes the token, replacing any previous one
    pub fn save(&self, token: &Token) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        let json = serde_json::to_string_pretty(token).map_err(|e| self.error(e))?;

        let staged = self.path.with_extension("tmp");
        write_private(&staged, json.as_bytes()).map_err(|e| self.error(e))?;
        fs::rename(&staged, &self.path).map_err(|e| self.error(e))?;

        debug!(path = %self.path.display(), "token saved");
        Ok(())
    }

    /// Deletes the stored token, if any
    pub fn remove(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }

    fn error(&self, e: impl std::fmt::Display) -> AuthError {
        AuthError::Store(format!("{}: {}", self.path.display(), e))
    }
}

/// Writes `contents` to a fresh file readable only by the owner on unix
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    // The mode only applies on creation, so never reuse a leftover file.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
