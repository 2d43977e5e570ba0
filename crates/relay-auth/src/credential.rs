use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::ConfigError;

pub const DEFAULT_RELAY_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: RelayMode,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Replaces the built-in legacy allow-list when present.
    #[serde(default)]
    pub allowed_paths: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_RELAY_PORT
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RelayMode::Server,
            port: DEFAULT_RELAY_PORT,
            allowed_paths: None,
        }
    }
}

/// Everything persisted in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub relay: RelaySettings,
}

impl CredentialRecord {
    pub fn has_credential(&self) -> bool {
        self.github_token
            .as_deref()
            .map(|token| !token.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Owner of the config file and its in-memory copy.
///
/// Reads happen once at startup; every mutation rewrites the whole file.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    record: RwLock<CredentialRecord>,
}

impl CredentialStore {
    /// Load the config file, writing a default one if it does not exist.
    ///
    /// A file that exists but does not parse is an error; the store never
    /// replaces state it cannot read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();

        let record = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<CredentialRecord>(&content).map_err(|source| {
                ConfigError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?
        } else {
            tracing::info!("No config at {}, writing defaults", path.display());
            let record = CredentialRecord::default();
            write_record(&path, &record)?;
            record
        };

        Ok(Self {
            path,
            record: RwLock::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the config, used to keep it out of bundles.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn has_credential(&self) -> bool {
        self.record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .has_credential()
    }

    pub fn github_token(&self) -> Option<String> {
        let record = self
            .record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        record
            .github_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    pub fn set_github_token(&self, token: impl Into<String>) {
        self.update(|record| record.github_token = Some(token.into()));
    }

    pub fn clear_github_token(&self) {
        self.update(|record| record.github_token = None);
    }

    /// Clear the credential only if it is still `expected`, so a token stored
    /// by a concurrent device flow is never thrown away. Returns whether it
    /// was cleared.
    pub fn clear_github_token_if(&self, expected: &str) -> bool {
        let mut record = self.write_guard();
        if record.github_token.as_deref().map(str::trim) != Some(expected) {
            return false;
        }
        record.github_token = None;
        self.persist(&record);
        true
    }

    /// Persist the current record. Failures are logged, never raised.
    pub fn save(&self) {
        let record = self.write_guard();
        self.persist(&record);
    }

    // The write lock is held across mutation and file write so saves land in
    // the order their mutations happened.
    fn update(&self, mutate: impl FnOnce(&mut CredentialRecord)) {
        let mut record = self.write_guard();
        mutate(&mut record);
        self.persist(&record);
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, CredentialRecord> {
        self.record
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, record: &CredentialRecord) {
        if let Err(e) = write_record(&self.path, record) {
            tracing::error!("Failed to save config: {}", e);
        }
    }
}

/// Write through a uniquely named temp file in the same directory, then
/// rename it over the config. Temp files are created with mode 0600 on unix.
fn write_record(path: &Path, record: &CredentialRecord) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(io_error)?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    let serialized = serde_json::to_string_pretty(record)?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(io_error)?;
    tmp.write_all(serialized.as_bytes()).map_err(io_error)?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}
