//! Durable client-side state.
//!
//! The session is spread over several keys (access token, refresh token,
//! user). Every backend applies a batch of writes or removals as one unit, so
//! a crash or error never leaves an access token behind without its user.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::error::ClientError;
use super::session::{Session, User};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";
pub const SETTINGS_KEY: &str = "settings";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// A string key-value store that applies batches atomically.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError>;

    /// Read all keys from one consistent snapshot.
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ClientError>;

    /// Write all entries or none.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), ClientError>;

    /// Remove all keys or none.
    fn remove_many(&self, keys: &[&str]) -> Result<(), ClientError>;

    /// Remove every key.
    fn clear_all(&self) -> Result<(), ClientError>;

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.remove_many(&[key])
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ClientError> {
    mutex
        .lock()
        .map_err(|_| ClientError::Storage("storage lock poisoned".into()))
}

/// In-memory storage, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ClientError> {
        let map = lock(&self.entries)?;
        Ok(keys.iter().map(|key| map.get(*key).cloned()).collect())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), ClientError> {
        let mut map = lock(&self.entries)?;
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), ClientError> {
        let mut map = lock(&self.entries)?;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), ClientError> {
        lock(&self.entries)?.clear();
        Ok(())
    }
}

/// All keys in one JSON file, replaced via write-to-temp and rename.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<HashMap<String, String>, ClientError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ClientError::Storage(format!("corrupt state file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ClientError::Storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec(map).map_err(|e| ClientError::Storage(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                ClientError::Storage(format!("failed to write {}: {}", self.path.display(), e))
            })
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), ClientError> {
        let _guard = lock(&self.write_lock)?;
        let mut map = self.read_map()?;
        f(&mut map);
        self.write_map(&map)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.read_map()?.remove(key))
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ClientError> {
        let mut map = self.read_map()?;
        Ok(keys.iter().map(|key| map.remove(*key)).collect())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), ClientError> {
        self.update(|map| {
            for (key, value) in entries {
                map.insert((*key).to_string(), (*value).to_string());
            }
        })
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), ClientError> {
        self.update(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }

    fn clear_all(&self) -> Result<(), ClientError> {
        self.update(HashMap::clear)
    }
}

/// UI colour scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// UI settings persisted alongside the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme: Theme,
}

/// Typed view over a [`Storage`] backend.
#[derive(Clone)]
pub struct LocalState {
    storage: Arc<dyn Storage>,
}

impl LocalState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The persisted session, if all of its parts are present.
    /// A partial or unreadable session counts as none.
    pub fn load_session(&self) -> Result<Option<Session>, ClientError> {
        let parts = self.storage.get_many(&SESSION_KEYS)?;

        let [Some(access_token), Some(refresh_token), Some(user)]: [Option<String>; 3] =
            parts.try_into().unwrap_or_default()
        else {
            return Ok(None);
        };

        match serde_json::from_str::<User>(&user) {
            Ok(user) => Ok(Some(Session {
                access_token,
                refresh_token,
                user,
            })),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable stored user");
                Ok(None)
            }
        }
    }

    pub fn save_session(&self, session: &Session) -> Result<(), ClientError> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        self.storage.set_many(&[
            (ACCESS_TOKEN_KEY, &session.access_token),
            (REFRESH_TOKEN_KEY, &session.refresh_token),
            (USER_KEY, &user),
        ])
    }

    /// Remove the session keys, keeping settings.
    pub fn clear_session(&self) -> Result<(), ClientError> {
        self.storage.remove_many(&SESSION_KEYS)
    }

    /// Remove everything, settings included.
    pub fn clear_all(&self) -> Result<(), ClientError> {
        self.storage.clear_all()
    }

    /// Stored settings. Missing or invalid values fall back to defaults.
    pub fn settings(&self) -> Settings {
        self.storage
            .get(SETTINGS_KEY)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), ClientError> {
        let raw =
            serde_json::to_string(settings).map_err(|e| ClientError::Storage(e.to_string()))?;
        self.storage.set(SETTINGS_KEY, &raw)
    }
}
