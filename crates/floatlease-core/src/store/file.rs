// # File Location Store
//
// File-based implementation of ServerLocationStore with crash recovery.
//
// ## Layout
//
// One record per scope, each in its own directory:
//
// - user:   `<config dir>/floatlease/<product>/server.json`
// - system: `/etc/floatlease/<product>/server.json` (ProgramData on Windows)
//
// ## Crash Recovery
//
// - Atomic writes: write to `.tmp`, then rename over the record
// - Backup: the previous record is kept as `.backup`
// - Recovery: a corrupted record is restored from its backup
// - Symlinks at the record, backup or temp path are never written through
//
// ## System Scope
//
// Only an elevated process creates the system record. It leaves the
// directory at 0o755 and opens the record and its backup to all users, so
// unprivileged processes later overwrite them in place.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "location": { "host": "lease.example.com", "port": 13 }
// }
// ```
//
// A record with `"location": null` is provisioned but empty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::lease::{Scope, ServerLocation};
use crate::traits::{ServerLocationStore, process_is_elevated};

/// Record file format version
const RECORD_FILE_VERSION: &str = "1.0";

/// Record file name inside each scope directory
const RECORD_FILE_NAME: &str = "server.json";

/// Serializable record file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordFile {
    version: String,
    location: Option<StoredLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLocation {
    host: String,
    port: u16,
}

impl RecordFile {
    fn new(location: Option<&ServerLocation>) -> Self {
        Self {
            version: RECORD_FILE_VERSION.to_string(),
            location: location.map(|l| StoredLocation {
                host: l.host.clone(),
                port: l.port,
            }),
        }
    }
}

/// File-based server location store
///
/// Records are re-read on every load so that a location saved by another
/// process (an installer, for example) is picked up without a restart.
#[derive(Debug)]
pub struct FileLocationStore {
    user_dir: PathBuf,
    system_dir: PathBuf,
    elevated: bool,
    write_lock: Mutex<()>,
}

impl FileLocationStore {
    /// Create a store over explicit scope directories
    ///
    /// The privilege level is taken from the running process.
    pub fn new<U: AsRef<Path>, S: AsRef<Path>>(user_dir: U, system_dir: S) -> Self {
        Self {
            user_dir: user_dir.as_ref().to_path_buf(),
            system_dir: system_dir.as_ref().to_path_buf(),
            elevated: process_is_elevated(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store in the standard directories for a product
    pub fn for_product(product_guid: &str) -> Result<Self, Error> {
        let user_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine the user config directory"))?
            .join("floatlease")
            .join(product_guid);

        Ok(Self::new(user_dir, system_base_dir().join(product_guid)))
    }

    /// Override the privilege level used for the system scope rule
    pub fn with_elevation(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// Path of the record for `scope`
    pub fn record_path(&self, scope: Scope) -> PathBuf {
        let dir = match scope {
            Scope::User => &self.user_dir,
            Scope::System => &self.system_dir,
        };
        dir.join(RECORD_FILE_NAME)
    }

    /// Load a record, falling back to its backup if it is corrupted
    ///
    /// Returns `None` when no record exists.
    async fn read_record(&self, scope: Scope) -> Result<Option<RecordFile>, Error> {
        let path = self.record_path(scope);

        match Self::parse_record(&path).await {
            Ok(record) => Ok(record),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Location record {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup = backup_path(&path);
                match Self::parse_record(&backup).await {
                    Ok(Some(record)) => {
                        if let Err(restore_err) = restore_backup(&backup, &path).await {
                            tracing::error!(
                                "Failed to restore location record from backup: {}",
                                restore_err
                            );
                        } else {
                            tracing::info!("Restored location record from backup");
                        }
                        Ok(Some(record))
                    }
                    Ok(None) => {
                        tracing::warn!("No backup found. Treating location as unset.");
                        Ok(None)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Treating location as unset.",
                            backup_err
                        );
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn parse_record(path: &Path) -> Result<Option<RecordFile>, Error> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e, "read", path)),
        };

        let record: RecordFile = serde_json::from_str(&content)?;
        if record.version != RECORD_FILE_VERSION {
            tracing::warn!(
                "Location record version mismatch: expected {}, got {}. Attempting to load anyway.",
                RECORD_FILE_VERSION,
                record.version
            );
        }
        Ok(Some(record))
    }

    /// Write a record, enforcing the system scope privilege rule
    ///
    /// Atomic except for unprivileged system writes, which rewrite in place.
    async fn write_record(&self, scope: Scope, record: &RecordFile) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(scope);
        let backup = backup_path(&path);
        let temp = temp_path(&path);
        refuse_symlinks(&[&path, &backup, &temp]).await?;

        let exists = fs::try_exists(&path)
            .await
            .map_err(|e| io_error(e, "inspect", &path))?;
        if scope == Scope::System && !self.elevated && !exists {
            tracing::debug!(
                "Refusing first write of {} without elevation",
                path.display()
            );
            return Err(Error::Permission);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(e, "create directory", parent))?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::state_store(format!("Failed to serialize location: {}", e)))?;

        if scope == Scope::System && !self.elevated {
            // The directory is not ours to create files in
            if let Err(e) = fs::copy(&path, &backup).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
            let file = fs::OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&path)
                .await
                .map_err(|e| io_error(e, "open", &path))?;
            write_json(file, &json, &path).await?;
            tracing::trace!("Location record rewritten in place at {}", path.display());
            return Ok(());
        }

        let file = fs::File::create(&temp)
            .await
            .map_err(|e| io_error(e, "create", &temp))?;
        write_json(file, &json, &temp).await?;

        if exists {
            if let Err(e) = fs::copy(&path, &backup).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp, &path)
            .await
            .map_err(|e| io_error(e, "rename into", &path))?;

        if scope == Scope::System {
            if !exists {
                if let Err(e) = fs::copy(&path, &backup).await {
                    tracing::warn!("Failed to create backup: {}", e);
                }
            }
            open_for_all_users(&path, &backup).await;
        }

        tracing::trace!("Location record written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl ServerLocationStore for FileLocationStore {
    async fn load(&self, scope: Scope) -> Result<Option<ServerLocation>, Error> {
        let record = self.read_record(scope).await?;
        Ok(record
            .and_then(|r| r.location)
            .map(|l| ServerLocation::new(l.host, l.port, scope)))
    }

    async fn save(&self, location: &ServerLocation) -> Result<(), Error> {
        self.write_record(location.scope, &RecordFile::new(Some(location)))
            .await
    }

    async fn provision(&self, scope: Scope) -> Result<(), Error> {
        if self.read_record(scope).await?.is_some() {
            return Ok(());
        }
        self.write_record(scope, &RecordFile::new(None)).await
    }

    async fn clear(&self, scope: Scope) -> Result<(), Error> {
        if self.read_record(scope).await?.is_none() {
            return Ok(());
        }
        self.write_record(scope, &RecordFile::new(None)).await
    }

    fn store_name(&self) -> &'static str {
        "file"
    }
}

fn io_error(err: std::io::Error, action: &str, path: &Path) -> Error {
    if err.kind() == ErrorKind::PermissionDenied {
        tracing::debug!("Permission denied to {} {}", action, path.display());
        return Error::Permission;
    }
    Error::state_store(format!("Failed to {} {}: {}", action, path.display(), err))
}

async fn write_json(mut file: fs::File, json: &str, path: &Path) -> Result<(), Error> {
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| io_error(e, "write", path))?;
    file.flush().await.map_err(|e| io_error(e, "flush", path))
}

/// Fail if any of `paths` is a symbolic link
async fn refuse_symlinks(paths: &[&Path]) -> Result<(), Error> {
    for path in paths {
        match fs::symlink_metadata(path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::state_store(format!(
                    "Refusing to write through symlink {}",
                    path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(e, "inspect", path)),
        }
    }
    Ok(())
}

async fn restore_backup(backup: &Path, path: &Path) -> Result<(), Error> {
    refuse_symlinks(&[backup, path]).await?;
    fs::copy(backup, path)
        .await
        .map_err(|e| io_error(e, "restore", path))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    temp.set_extension("tmp");
    temp
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.to_path_buf();
    backup.set_extension("backup");
    backup
}

#[cfg(windows)]
fn system_base_dir() -> PathBuf {
    std::env::var_os("PROGRAMDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("floatlease")
}

#[cfg(not(windows))]
fn system_base_dir() -> PathBuf {
    PathBuf::from("/etc/floatlease")
}

/// Let unprivileged processes overwrite a record an elevated process created
///
/// The directory itself stays writable by its owner only.
#[cfg(unix)]
async fn open_for_all_users(path: &Path, backup: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755)).await {
            tracing::warn!("Failed to set permissions on {}: {}", parent.display(), e);
        }
    }
    for file in [path, backup] {
        if let Err(e) = fs::set_permissions(file, std::fs::Permissions::from_mode(0o666)).await {
            tracing::warn!("Failed to open {} to all users: {}", file.display(), e);
        }
    }
}

#[cfg(not(unix))]
async fn open_for_all_users(_path: &Path, _backup: &Path) {}
