use crate::layout::StoreLayout;
use crate::registry::{PoolRecord, Registry};
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static OP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A single rollback step that undoes one side effect of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Remove a file the operation created (e.g. a new pool config).
    RemoveFile(PathBuf),
    /// Put back the previous contents of a file the operation replaced.
    RestoreFile { path: PathBuf, contents: String },
    /// Remove the pool row the operation inserted. A row for the same user
    /// with a different `created_at` belongs to another operation and is kept.
    RemovePool { username: String, created_at: String },
    /// Write back the pool row as it was before the operation.
    RestorePool(Box<PoolRecord>),
}

/// The type of mutating operation being tracked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalOpKind {
    CreatePool,
    ReconfigurePool,
}

impl std::fmt::Display for WalOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalOpKind::CreatePool => write!(f, "create"),
            WalOpKind::ReconfigurePool => write!(f, "reconfigure"),
        }
    }
}

/// A journal entry representing an in-flight operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: WalOpKind,
    pub username: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead journal for crash recovery.
///
/// Pool mutations open an entry before their first side effect, append a
/// rollback step before each further side effect, and remove the entry once the
/// operation is committed. Entries still present at start-up belong to a
/// process that died mid-operation and are rolled back in reverse order.
pub struct WriteAheadLog {
    layout: StoreLayout,
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            wal_dir: layout.wal_dir(),
            layout: layout.clone(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new entry for an operation on `username`. Returns the op_id.
    pub fn begin(&self, kind: WalOpKind, username: &str) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let seq = OP_SEQ.fetch_add(1, Ordering::Relaxed);
        let nonce = format!("{username}:{}:{}:{seq}", std::process::id(), now.to_rfc3339());
        let op_id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(nonce.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            kind,
            username: username.to_owned(),
            timestamp: now.to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {kind} for {username} (op_id={op_id})");
        Ok(op_id)
    }

    /// Append a rollback step to an open entry.
    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Remove an entry after the operation committed or was unwound in-process.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str::<WalEntry>(&content) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!("corrupt journal entry {}: {e}", path.display());
                            let _ = fs::remove_file(&path);
                        }
                    },
                    Err(e) => {
                        warn!("unreadable journal entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Roll back all incomplete entries. Returns the number rolled back.
    ///
    /// The caller must hold the store lock exclusively.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in &entries {
            info!(
                "journal recovery: rolling back {} of {} (op_id={})",
                entry.kind, entry.username, entry.op_id
            );
            self.rollback_entry(entry);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("journal recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn rollback_entry(&self, entry: &WalEntry) {
        let registry = Registry::new(self.layout.clone());
        for step in entry.rollback_steps.iter().rev() {
            match step {
                RollbackStep::RemoveFile(path) => {
                    if path.exists() {
                        if let Err(e) = fs::remove_file(path) {
                            warn!("rollback: failed to remove {}: {e}", path.display());
                        } else {
                            debug!("rollback: removed {}", path.display());
                        }
                    }
                }
                RollbackStep::RestoreFile { path, contents } => {
                    if let Err(e) = crate::write_atomic(path, contents.as_bytes(), 0o644) {
                        warn!("rollback: failed to restore {}: {e}", path.display());
                    } else {
                        debug!("rollback: restored {}", path.display());
                    }
                }
                RollbackStep::RemovePool {
                    username,
                    created_at,
                } => match registry.get_pool(username) {
                    Ok(Some(row)) if row.created_at == *created_at => {
                        match registry.delete_pool(username) {
                            Ok(()) | Err(StoreError::NoRowsAffected { .. }) => {
                                debug!("rollback: removed pool row {username}");
                            }
                            Err(e) => warn!("rollback: failed to remove pool row {username}: {e}"),
                        }
                    }
                    Ok(Some(_)) => {
                        debug!("rollback: pool row {username} belongs to another operation, keeping it");
                    }
                    Ok(None) => {}
                    Err(e) => warn!("rollback: cannot read pool row {username}: {e}"),
                },
                RollbackStep::RestorePool(record) => {
                    if let Err(e) = registry.restore_pool(record) {
                        warn!(
                            "rollback: failed to restore pool row {}: {e}",
                            record.username
                        );
                    } else {
                        debug!("rollback: restored pool row {}", record.username);
                    }
                }
            }
        }
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        crate::write_atomic(&self.entry_path(&entry.op_id), content.as_bytes(), 0o600)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}
