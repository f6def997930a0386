use crate::{
    cipher::SealedSecret, conversation::StateRecord, errors::VaultError, paths::WardenPaths,
    wallet::Wallet,
};
use chrono::{DateTime, Utc};
use eyre::Context as _;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};

/// The per-user document. One per chat identity; mutated only through
/// read-modify-write with an optimistic version check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub wallets: Vec<Wallet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<StateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,

    /// Legacy mirror of the active wallet's address. Older documents carried
    /// only these two fields; they are rewritten on every active-wallet
    /// change and read only by the back-compat path in the vault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<SealedSecret>,

    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            wallets: Vec::new(),
            conversation: None,
            payout_address: None,
            pin_hash: None,
            address: None,
            encrypted_secret: None,
            created_at: Utc::now(),
        }
    }
}

/// Persistence contract. `save` is compare-and-set on the version returned
/// by `load`; a mismatch yields `VaultError::Conflict` and writes nothing.
pub trait UserStore: Send + Sync {
    fn load(&self, user_id: &str) -> eyre::Result<Option<(UserRecord, u64)>>;
    fn save(&self, record: &UserRecord, expected_version: u64) -> eyre::Result<u64>;
    fn create(&self, record: &UserRecord) -> eyre::Result<u64>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    version: u64,
    #[serde(flatten)]
    record: UserRecord,
}

/// One JSON document per user under `data_dir/users/`, written atomically
/// under an exclusive lock so concurrent saves serialize.
#[derive(Debug, Clone)]
pub struct FileUserStore {
    users_dir: PathBuf,
    lock_path: PathBuf,
}

impl FileUserStore {
    pub fn new(paths: &WardenPaths) -> Self {
        Self {
            users_dir: paths.users_dir(),
            lock_path: paths.lock_path(),
        }
    }

    fn doc_path(&self, user_id: &str) -> PathBuf {
        // User ids come from the transport; hex keeps them filesystem-safe.
        self.users_dir
            .join(format!("{}.json", hex::encode(user_id.as_bytes())))
    }

    fn acquire_lock(&self) -> eyre::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .context("open lock file")?;
        f.lock_exclusive().context("lock exclusive")?;
        Ok(f)
    }

    fn read_doc(&self, user_id: &str) -> eyre::Result<Option<UserDoc>> {
        let p = self.doc_path(user_id);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let doc: UserDoc = serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        Ok(Some(doc))
    }

    fn write_doc(&self, doc: &UserDoc) -> eyre::Result<()> {
        let p = self.doc_path(&doc.record.user_id);
        let s = serde_json::to_string_pretty(doc).context("serialize user doc")?;
        crate::fsutil::write_string_atomic_restrictive(&p, &s, crate::fsutil::MODE_FILE_PRIVATE)
    }

    pub fn count_users(&self) -> eyre::Result<usize> {
        if !self.users_dir.exists() {
            return Ok(0);
        }
        let mut n = 0_usize;
        for entry in fs::read_dir(&self.users_dir).context("read users dir")? {
            let entry = entry.context("read users dir entry")?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                n += 1;
            }
        }
        Ok(n)
    }
}

impl UserStore for FileUserStore {
    fn load(&self, user_id: &str) -> eyre::Result<Option<(UserRecord, u64)>> {
        Ok(self.read_doc(user_id)?.map(|d| (d.record, d.version)))
    }

    fn save(&self, record: &UserRecord, expected_version: u64) -> eyre::Result<u64> {
        let lock = self.acquire_lock()?;
        let current = self.read_doc(&record.user_id)?.map(|d| d.version);
        if current != Some(expected_version) {
            drop(FileExt::unlock(&lock));
            return Err(VaultError::Conflict.into());
        }
        let doc = UserDoc {
            version: expected_version + 1,
            record: record.clone(),
        };
        let res = self.write_doc(&doc);
        FileExt::unlock(&lock).context("unlock")?;
        res?;
        Ok(doc.version)
    }

    fn create(&self, record: &UserRecord) -> eyre::Result<u64> {
        let lock = self.acquire_lock()?;
        if self.read_doc(&record.user_id)?.is_some() {
            drop(FileExt::unlock(&lock));
            return Err(VaultError::Conflict.into());
        }
        let doc = UserDoc {
            version: 1,
            record: record.clone(),
        };
        let res = self.write_doc(&doc);
        FileExt::unlock(&lock).context("unlock")?;
        res?;
        Ok(1)
    }
}

/// In-memory store with the same CAS semantics; used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, (UserRecord, u64)>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn load(&self, user_id: &str) -> eyre::Result<Option<(UserRecord, u64)>> {
        let users = self
            .users
            .lock()
            .map_err(|_| eyre::eyre!("user store poisoned"))?;
        Ok(users.get(user_id).cloned())
    }

    fn save(&self, record: &UserRecord, expected_version: u64) -> eyre::Result<u64> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| eyre::eyre!("user store poisoned"))?;
        let current = users.get(&record.user_id).map(|(_, v)| *v);
        if current != Some(expected_version) {
            return Err(VaultError::Conflict.into());
        }
        let next = expected_version + 1;
        users.insert(record.user_id.clone(), (record.clone(), next));
        Ok(next)
    }

    fn create(&self, record: &UserRecord) -> eyre::Result<u64> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| eyre::eyre!("user store poisoned"))?;
        if users.contains_key(&record.user_id) {
            return Err(VaultError::Conflict.into());
        }
        users.insert(record.user_id.clone(), (record.clone(), 1));
        Ok(1)
    }
}
