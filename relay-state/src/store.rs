//! Versioned, mtime-cached, atomically-written JSON documents (spec.md
//! §4.10), grounded on
//! `original_source/src/takopi/telegram/state_store.py`'s `JsonStateStore`.
//! Rust's stdlib gives us real file renames and `SystemTime`, so the mtime
//! cache compares `SystemTime` directly instead of the original's raw
//! `st_mtime_ns` integer.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

/// Implemented by every state document kind so [`JsonStateStore`] can check
/// the on-disk version without knowing the document's shape, matching the
/// original's `_VersionedState` protocol.
pub trait VersionedState: Serialize + DeserializeOwned + Default + Send {
    const VERSION: u32;
    fn version(&self) -> u32;
}

struct Loaded<T> {
    state: T,
    mtime: Option<SystemTime>,
    loaded: bool,
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(OsString::from(".tmp"));
    path.with_file_name(name)
}

/// One JSON file, reparsed whenever its mtime changes and written via a
/// tmp-file-then-rename so readers never observe a half-written document
/// (spec.md §4.10). If the on-disk version doesn't match `T::VERSION`, the
/// store treats the file as empty rather than failing.
pub struct JsonStateStore<T: VersionedState> {
    path: PathBuf,
    inner: Mutex<Loaded<T>>,
}

impl<T: VersionedState> JsonStateStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Loaded {
                state: T::default(),
                mtime: None,
                loaded: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stat_mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn reload_if_needed(&self, loaded: &mut Loaded<T>) {
        let current = self.stat_mtime();
        if loaded.loaded && current == loaded.mtime {
            return;
        }
        loaded.loaded = true;
        loaded.mtime = current;

        if current.is_none() {
            loaded.state = T::default();
            return;
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "state.load_failed");
                loaded.state = T::default();
                return;
            }
        };
        let parsed: T = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "state.parse_failed");
                loaded.state = T::default();
                return;
            }
        };
        if parsed.version() != T::VERSION {
            warn!(
                path = %self.path.display(),
                version = parsed.version(),
                expected = T::VERSION,
                "state.version_mismatch"
            );
            loaded.state = T::default();
            return;
        }
        loaded.state = parsed;
    }

    fn save(&self, loaded: &mut Loaded<T>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_vec_pretty(&loaded.state).expect("state document serializes");
        body.push(b'\n');
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &body)?;
        fs::rename(&tmp_path, &self.path)?;
        loaded.mtime = self.stat_mtime();
        Ok(())
    }

    /// Reads the current state, reloading first if the file changed on
    /// disk. Nothing is written back.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut loaded = self.inner.lock().await;
        self.reload_if_needed(&mut loaded);
        f(&loaded.state)
    }

    /// Reloads, runs `f` against the state, then persists whatever `f`
    /// left behind.
    pub async fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> std::io::Result<R> {
        let mut loaded = self.inner.lock().await;
        self.reload_if_needed(&mut loaded);
        let result = f(&mut loaded.state);
        self.save(&mut loaded)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        value: String,
    }

    impl Default for Doc {
        fn default() -> Self {
            Self { version: Self::VERSION, value: String::new() }
        }
    }

    impl VersionedState for Doc {
        const VERSION: u32 = 1;
        fn version(&self) -> u32 {
            self.version
        }
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store = JsonStateStore::<Doc>::new(&path);

        store.write(|doc| doc.value = "hello".to_string()).await.unwrap();
        assert!(path.exists());

        let reopened = JsonStateStore::<Doc>::new(&path);
        let value = reopened.read(|doc| doc.value.clone()).await;
        assert_eq!(value, "hello");
    }

    #[tokio::test]
    async fn missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let store = JsonStateStore::<Doc>::new(&path);
        let value = store.read(|doc| doc.value.clone()).await;
        assert_eq!(value, "");
    }

    #[tokio::test]
    async fn version_mismatch_resets_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, br#"{"version": 99, "value": "stale"}"#).unwrap();

        let store = JsonStateStore::<Doc>::new(&path);
        let value = store.read(|doc| doc.value.clone()).await;
        assert_eq!(value, "");
    }

    #[tokio::test]
    async fn external_edit_is_picked_up_on_next_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store = JsonStateStore::<Doc>::new(&path);
        store.write(|doc| doc.value = "first".to_string()).await.unwrap();

        // Simulate another process rewriting the file with a later mtime.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        fs::write(&path, br#"{"version": 1, "value": "second"}"#).unwrap();

        let value = store.read(|doc| doc.value.clone()).await;
        assert_eq!(value, "second");
    }
}
