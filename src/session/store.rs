//! Durable per-session storage: credentials and the status ledger.
//!
//! Layout on disk:
//!
//! ```text
//! sessions_dir/
//! ├── david.session        credentials, opaque bytes
//! └── .erin.pairing        staged credentials while pairing is in flight
//! history_dir/
//! └── david.json           status ledger, newest last
//! ```
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so a crash mid-write leaves the previous durable state intact.

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::SessionIdentity;
use crate::error::RelayError;
use crate::Result;

/// File extension of committed credential files; discovery keys on it.
pub const CREDENTIALS_EXT: &str = "session";

/// File extension of ledger files.
pub const LEDGER_EXT: &str = "json";

const PENDING_EXT: &str = "pairing";

/// How long a posted status stays in the ledger.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Number of characters of the status text kept for listings.
pub const SNIPPET_CHARS: usize = 20;

/// Opaque authentication state handed to the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Never print credential bytes.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({} bytes)", self.0.len())
    }
}

/// One posted status broadcast, kept so it can be listed and revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Transport-assigned message id, stored verbatim.
    pub remote_id: String,
    /// Listing text: the first characters of the status plus `...`.
    pub snippet: String,
    pub posted_at: DateTime<Utc>,
}

impl StatusEntry {
    /// Build an entry for freshly posted status `text`.
    pub fn new(remote_id: impl Into<String>, text: &str, posted_at: DateTime<Utc>) -> Self {
        Self {
            remote_id: remote_id.into(),
            snippet: snippet_of(text),
            posted_at,
        }
    }

    /// Whether the entry is still inside the retention window at `now`.
    ///
    /// Entries dated in the future are kept.
    pub fn is_live(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match now.signed_duration_since(self.posted_at).to_std() {
            Ok(age) => age <= retention,
            Err(_) => true,
        }
    }
}

/// Listing snippet for a status text. Counts characters, not bytes.
pub fn snippet_of(text: &str) -> String {
    let head: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{head}...")
}

/// Drop expired entries, preserving the order of the survivors.
///
/// Returns the surviving entries and how many were removed.
pub fn purge_expired(
    entries: Vec<StatusEntry>,
    now: DateTime<Utc>,
    retention: Duration,
) -> (Vec<StatusEntry>, usize) {
    let before = entries.len();
    let kept: Vec<StatusEntry> = entries
        .into_iter()
        .filter(|e| e.is_live(now, retention))
        .collect();
    let purged = before - kept.len();
    (kept, purged)
}

/// Write `bytes` to a temp sibling and rename it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let ext = path
        .extension()
        .map(|e| format!("{}.tmp", e.to_string_lossy()))
        .unwrap_or_else(|| "tmp".to_string());
    let tmp = path.with_extension(ext);

    let written = match write_synced(&tmp, bytes).await {
        Ok(()) => fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

/// Remove `path`, reporting whether it existed.
async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// The enumerable set of sessions backed by two directories.
///
/// Cloning is cheap; clones share the set of identities retired by
/// [`SessionDirectory::delete`] in this process.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    sessions_dir: PathBuf,
    history_dir: PathBuf,
    retention: Duration,
    retired: Arc<Mutex<HashSet<SessionIdentity>>>,
}

impl SessionDirectory {
    /// Open the directory pair, creating both directories if needed.
    pub async fn init(
        sessions_dir: impl Into<PathBuf>,
        history_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let sessions_dir = sessions_dir.into();
        let history_dir = history_dir.into();
        fs::create_dir_all(&sessions_dir).await?;
        fs::create_dir_all(&history_dir).await?;

        Ok(Self {
            sessions_dir,
            history_dir,
            retention: DEFAULT_RETENTION,
            retired: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Override the ledger retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    fn credentials_path(&self, id: &SessionIdentity) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.{}", id.as_str(), CREDENTIALS_EXT))
    }

    fn pending_path(&self, id: &SessionIdentity) -> PathBuf {
        self.sessions_dir
            .join(format!(".{}.{}", id.as_str(), PENDING_EXT))
    }

    fn ledger_path(&self, id: &SessionIdentity) -> PathBuf {
        self.history_dir.join(format!("{}.{}", id.as_str(), LEDGER_EXT))
    }

    fn is_retired(&self, id: &SessionIdentity) -> Result<bool> {
        let retired = self.retired.lock().map_err(|_| RelayError::LockPoisoned)?;
        Ok(retired.contains(id))
    }

    /// Reserve a new identity for pairing.
    ///
    /// Fails with `SessionExists` if credentials are present or another
    /// pairing for the same name is in flight. The reservation is invisible
    /// to [`list`](Self::list) until [`PendingSession::commit`].
    pub async fn create(&self, id: &SessionIdentity) -> Result<PendingSession> {
        if self.is_retired(id)? {
            return Err(RelayError::SessionRetired(id.to_string()));
        }
        if fs::try_exists(self.credentials_path(id)).await? {
            return Err(RelayError::SessionExists(id.to_string()));
        }

        let path = self.pending_path(id);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RelayError::SessionExists(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(PendingSession {
            directory: self.clone(),
            identity: id.clone(),
            path,
            finished: false,
        })
    }

    /// Open an existing session's store.
    pub async fn open(&self, id: &SessionIdentity) -> Result<StoreHandle> {
        if !self.exists(id).await {
            return Err(RelayError::SessionNotFound(id.to_string()));
        }
        Ok(self.handle(id))
    }

    fn handle(&self, id: &SessionIdentity) -> StoreHandle {
        StoreHandle {
            identity: id.clone(),
            credentials_path: self.credentials_path(id),
            ledger_path: self.ledger_path(id),
            retention: self.retention,
        }
    }

    /// Whether committed credentials exist for `id`.
    pub async fn exists(&self, id: &SessionIdentity) -> bool {
        is_file(&self.credentials_path(id)).await
    }

    /// Enumerate identities with committed credentials, sorted by name.
    ///
    /// Files that do not carry a valid identity stem are skipped.
    pub async fn list(&self) -> Result<Vec<SessionIdentity>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CREDENTIALS_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = SessionIdentity::new(stem) else {
                continue;
            };
            if is_file(&path).await {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Permanently remove credentials and ledger for `id`.
    ///
    /// The identity is retired for the rest of this process.
    pub async fn delete(&self, id: &SessionIdentity) -> Result<()> {
        let removed_credentials = remove_if_present(&self.credentials_path(id)).await?;
        let removed_ledger = remove_if_present(&self.ledger_path(id)).await?;

        if !removed_credentials && !removed_ledger {
            return Err(RelayError::SessionNotFound(id.to_string()));
        }

        self.retired
            .lock()
            .map_err(|_| RelayError::LockPoisoned)?
            .insert(id.clone());
        tracing::info!(session = %id, "session store deleted");
        Ok(())
    }
}

/// An identity reserved by [`SessionDirectory::create`] but not yet linked.
///
/// Dropping it without calling [`commit`](Self::commit) removes the staged
/// file, so a failed or aborted pairing never leaves credentials behind.
#[derive(Debug)]
pub struct PendingSession {
    directory: SessionDirectory,
    identity: SessionIdentity,
    path: PathBuf,
    finished: bool,
}

impl PendingSession {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Persist the linked credentials and make the identity discoverable.
    pub async fn commit(mut self, credentials: &Credentials) -> Result<StoreHandle> {
        write_atomic(&self.path, credentials.as_bytes()).await?;
        fs::rename(&self.path, self.directory.credentials_path(&self.identity)).await?;
        self.finished = true;
        Ok(self.directory.handle(&self.identity))
    }

    /// Discard the reservation.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        remove_if_present(&self.path).await.map(|_| ())
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        // Drop cannot await.
        if !self.finished {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Access to one session's credentials and ledger.
///
/// Each handle is used by a single worker; there is no cross-session
/// locking because no two identities share files.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    identity: SessionIdentity,
    credentials_path: PathBuf,
    ledger_path: PathBuf,
    retention: Duration,
}

impl StoreHandle {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Whether the credentials are still on disk.
    pub async fn is_present(&self) -> bool {
        is_file(&self.credentials_path).await
    }

    /// Fail with `SessionNotFound` once the store entry has been removed.
    pub async fn ensure_present(&self) -> Result<()> {
        if self.is_present().await {
            Ok(())
        } else {
            Err(RelayError::SessionNotFound(self.identity.to_string()))
        }
    }

    /// Read the stored credentials.
    pub async fn credentials(&self) -> Result<Credentials> {
        match fs::read(&self.credentials_path).await {
            Ok(bytes) => Ok(Credentials::new(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RelayError::SessionNotFound(self.identity.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored credentials (e.g. after a key refresh).
    pub async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.ensure_present().await?;
        write_atomic(&self.credentials_path, credentials.as_bytes()).await
    }

    /// Load the ledger, purging expired entries.
    ///
    /// If anything was purged the shortened ledger is written back before
    /// returning.
    pub async fn load_ledger(&self) -> Result<Vec<StatusEntry>> {
        self.load_ledger_at(Utc::now()).await
    }

    /// [`load_ledger`](Self::load_ledger) against an explicit clock.
    pub async fn load_ledger_at(&self, now: DateTime<Utc>) -> Result<Vec<StatusEntry>> {
        let raw = match fs::read(&self.ledger_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let entries: Vec<StatusEntry> = serde_json::from_slice(&raw)?;
        let (kept, purged) = purge_expired(entries, now, self.retention);
        if purged > 0 {
            tracing::debug!(session = %self.identity, purged, "purged expired statuses");
            self.save_ledger(&kept).await?;
        }
        Ok(kept)
    }

    /// Append an entry and persist the full ledger.
    ///
    /// Returns the ledger length after the append.
    pub async fn append_entry(&self, entry: StatusEntry) -> Result<usize> {
        let mut entries = self.load_ledger().await?;
        entries.push(entry);
        self.save_ledger(&entries).await?;
        Ok(entries.len())
    }

    /// Remove the entry at 1-based `position` and persist.
    ///
    /// Leaves the ledger untouched and fails with `OutOfRange` if
    /// `position` is not in `1..=len`.
    pub async fn remove_entry_at(&self, position: usize) -> Result<StatusEntry> {
        let mut entries = self.load_ledger().await?;
        if position == 0 || position > entries.len() {
            return Err(RelayError::OutOfRange {
                position,
                len: entries.len(),
            });
        }
        let removed = entries.remove(position - 1);
        self.save_ledger(&entries).await?;
        Ok(removed)
    }

    // A deleted session must not get its ledger back from a late write.
    async fn save_ledger(&self, entries: &[StatusEntry]) -> Result<()> {
        self.ensure_present().await?;
        let bytes = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.ledger_path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::TimeDelta;
    use tempfile::TempDir;

    async fn directory() -> (TempDir, SessionDirectory) {
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::init(tmp.path().join("sessions"), tmp.path().join("history"))
            .await
            .unwrap();
        (tmp, dir)
    }

    fn id(name: &str) -> SessionIdentity {
        SessionIdentity::new(name).unwrap()
    }

    async fn paired(dir: &SessionDirectory, name: &str) -> StoreHandle {
        dir.create(&id(name))
            .await
            .unwrap()
            .commit(&Credentials::new(b"creds".to_vec()))
            .await
            .unwrap()
    }

    fn entry(remote_id: &str, age_hours: i64) -> StatusEntry {
        StatusEntry::new(
            remote_id,
            remote_id,
            Utc::now() - TimeDelta::hours(age_hours),
        )
    }

    async fn remote_ids(store: &StoreHandle) -> Vec<String> {
        store
            .load_ledger()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.remote_id)
            .collect()
    }

    #[test]
    fn test_snippet_counts_chars() {
        assert_eq!(snippet_of("Hello"), "Hello...");
        assert_eq!(snippet_of(&"a".repeat(30)), format!("{}...", "a".repeat(20)));
        // Multi-byte characters must not be split
        let emoji = "🌙".repeat(25);
        assert_eq!(snippet_of(&emoji), format!("{}...", "🌙".repeat(20)));
    }

    #[tokio::test]
    async fn test_create_then_commit_makes_visible() {
        let (_tmp, dir) = directory().await;
        let pending = dir.create(&id("david")).await.unwrap();

        // Reserved but not discoverable yet
        assert!(dir.list().await.unwrap().is_empty());
        assert!(!dir.exists(&id("david")).await);

        let handle = pending
            .commit(&Credentials::new(b"secret".to_vec()))
            .await
            .unwrap();
        assert_eq!(dir.list().await.unwrap(), vec![id("david")]);
        assert_eq!(handle.credentials().await.unwrap().as_bytes(), b"secret");
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let (_tmp, dir) = directory().await;
        paired(&dir, "david").await;

        let err = dir.create(&id("david")).await.unwrap_err();
        assert!(matches!(err, RelayError::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_create_while_pairing_fails() {
        let (_tmp, dir) = directory().await;
        let _pending = dir.create(&id("erin")).await.unwrap();

        let err = dir.create(&id("erin")).await.unwrap_err();
        assert!(matches!(err, RelayError::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_dropped_pending_leaves_nothing() {
        let (_tmp, dir) = directory().await;
        {
            let _pending = dir.create(&id("erin")).await.unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.sessions_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
        // Name can be reserved again
        dir.create(&id("erin"))
            .await
            .unwrap()
            .rollback()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_missing() {
        let (_tmp, dir) = directory().await;
        let err = dir.open(&id("ghost")).await.unwrap_err();
        assert!(err.is_removal());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let (_tmp, dir) = directory().await;
        paired(&dir, "bob").await;
        paired(&dir, "alice").await;
        std::fs::write(dir.sessions_dir().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.sessions_dir().join("bad name.session"), b"x").unwrap();
        std::fs::create_dir(dir.sessions_dir().join("carol.session")).unwrap();

        assert_eq!(dir.list().await.unwrap(), vec![id("alice"), id("bob")]);
    }

    #[tokio::test]
    async fn test_append_then_load_in_order() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;

        assert_eq!(store.append_entry(entry("m1", 0)).await.unwrap(), 1);
        assert_eq!(store.append_entry(entry("m2", 0)).await.unwrap(), 2);

        assert_eq!(remote_ids(&store).await, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_ledger_writes_yield_to_other_tasks() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;

        // Single-threaded runtime: the ticker only advances while the
        // ledger writes are suspended on I/O.
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        for n in 0..5 {
            store.append_entry(entry(&format!("m{n}"), 0)).await.unwrap();
        }
        assert!(ticks.load(Ordering::SeqCst) > 0);
        ticker.abort();
        assert_eq!(remote_ids(&store).await.len(), 5);
    }

    #[tokio::test]
    async fn test_load_purges_and_rewrites() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        store.append_entry(entry("old", 30)).await.unwrap();
        store.append_entry(entry("fresh", 1)).await.unwrap();

        let ledger = store.load_ledger().await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].remote_id, "fresh");

        // Rewritten on disk, not just filtered in memory
        let raw = std::fs::read_to_string(dir.history_dir().join("david.json")).unwrap();
        assert!(!raw.contains("old"));
    }

    #[test]
    fn test_purge_boundary_keeps_exact_window() {
        let now = Utc::now();
        let at_edge = StatusEntry::new("edge", "edge", now - TimeDelta::hours(24));
        let past_edge = StatusEntry::new("past", "past", now - TimeDelta::hours(24) - TimeDelta::seconds(1));
        let future = StatusEntry::new("future", "future", now + TimeDelta::minutes(5));

        let (kept, purged) =
            purge_expired(vec![at_edge, past_edge, future], now, DEFAULT_RETENTION);
        assert_eq!(purged, 1);
        let ids: Vec<_> = kept.iter().map(|e| e.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["edge", "future"]);
    }

    #[tokio::test]
    async fn test_remove_entry_at() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        for id in ["a", "b", "c"] {
            store.append_entry(entry(id, 0)).await.unwrap();
        }

        let removed = store.remove_entry_at(2).await.unwrap();
        assert_eq!(removed.remote_id, "b");
        assert_eq!(remote_ids(&store).await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_remove_out_of_range_leaves_ledger() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        store.append_entry(entry("a", 0)).await.unwrap();

        for position in [0, 2, 99] {
            let err = store.remove_entry_at(position).await.unwrap_err();
            assert!(matches!(err, RelayError::OutOfRange { len: 1, .. }));
        }
        assert_eq!(store.load_ledger().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_on_empty_ledger() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        let err = store.remove_entry_at(1).await.unwrap_err();
        assert!(matches!(err, RelayError::OutOfRange { position: 1, len: 0 }));
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_an_error_and_untouched() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        let path = dir.history_dir().join("david.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(store.load_ledger().await.unwrap_err().is_store());
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_retires() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        store.append_entry(entry("a", 0)).await.unwrap();

        dir.delete(&id("david")).await.unwrap();
        assert!(!store.is_present().await);
        assert!(store.credentials().await.unwrap_err().is_removal());
        assert!(!dir.history_dir().join("david.json").exists());

        let err = dir.create(&id("david")).await.unwrap_err();
        assert!(matches!(err, RelayError::SessionRetired(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let (_tmp, dir) = directory().await;
        assert!(dir.delete(&id("ghost")).await.unwrap_err().is_removal());
    }

    #[tokio::test]
    async fn test_save_credentials_after_delete_fails() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        dir.delete(&id("david")).await.unwrap();

        let err = store
            .save_credentials(&Credentials::new(b"new".to_vec()))
            .await
            .unwrap_err();
        assert!(err.is_removal());
        // Must not resurrect the entry
        assert!(!dir.exists(&id("david")).await);
    }

    #[tokio::test]
    async fn test_ledger_writes_after_delete_leave_no_orphan() {
        let (_tmp, dir) = directory().await;
        let store = paired(&dir, "david").await;
        store.append_entry(entry("a", 0)).await.unwrap();
        let ledger = dir.history_dir().join("david.json");

        // A command still in flight when the operator removes the session
        dir.delete(&id("david")).await.unwrap();
        assert!(store.append_entry(entry("b", 0)).await.unwrap_err().is_removal());
        assert!(!ledger.exists());

        assert!(store.remove_entry_at(1).await.is_err());
        assert!(!ledger.exists());
    }

    #[test]
    fn test_credentials_debug_hides_bytes() {
        let creds = Credentials::new(b"top-secret".to_vec());
        let shown = format!("{creds:?}");
        assert!(!shown.contains("top-secret"));
        assert!(shown.contains("10 bytes"));
    }
}
