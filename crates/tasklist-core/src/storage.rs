use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::task::User;

/// Key under which the logged-in user is persisted.
pub const USER_STORAGE_KEY: &str = "user";

/// Small persistent key/value store standing in for browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened session store");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save {key}"))
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(file = %path.display(), "removed stored entry");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Reads the persisted user. A corrupt entry is dropped and reported as
/// logged out.
#[tracing::instrument(skip(store))]
pub fn load_user<S: KeyValueStore + ?Sized>(store: &S) -> anyhow::Result<Option<User>> {
    let Some(raw) = store.get(USER_STORAGE_KEY)? else {
        return Ok(None);
    };

    match serde_json::from_str::<User>(&raw) {
        Ok(user) => {
            debug!(user_id = user.id, "restored persisted user");
            Ok(Some(user))
        }
        Err(error) => {
            warn!(%error, "failed parsing persisted user; clearing it");
            store.remove(USER_STORAGE_KEY)?;
            Ok(None)
        }
    }
}

#[tracing::instrument(skip(store, user), fields(user_id = user.id))]
pub fn save_user<S: KeyValueStore + ?Sized>(store: &S, user: &User) -> anyhow::Result<()> {
    let serialized = serde_json::to_string(user)?;
    store.set(USER_STORAGE_KEY, &serialized)
}

pub fn clear_user<S: KeyValueStore + ?Sized>(store: &S) -> anyhow::Result<()> {
    store.remove(USER_STORAGE_KEY)
}

#[tracing::instrument(skip(path, contents))]
pub(crate) fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "writing file atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
