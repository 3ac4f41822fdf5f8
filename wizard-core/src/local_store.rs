//! Namespaced key/value persistence for wizard state.
//!
//! Each wizard owns one namespace. The file-backed store keeps a namespace
//! in a single JSON document that is replaced atomically on every write, so a
//! crash mid-save leaves the previous document intact.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LocalStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    /// Every key currently stored for `namespace`.
    fn entries(&self, namespace: &str) -> Result<Map<String, Value>>;
    fn clear(&self, namespace: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<String, Map<String, Value>>) -> R) -> R {
        let mut guard = match self.namespaces.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.with(|ns| ns.get(namespace).and_then(|m| m.get(key).cloned())))
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.with(|ns| {
            ns.entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
        });
        Ok(())
    }

    fn entries(&self, namespace: &str) -> Result<Map<String, Value>> {
        Ok(self.with(|ns| ns.get(namespace).cloned().unwrap_or_default()))
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.with(|ns| ns.remove(namespace));
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn namespace_path(&self, namespace: &str) -> Result<PathBuf> {
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("invalid store namespace {:?}", namespace);
        }
        Ok(self.dir.join(format!("user-pref-{}.json", namespace)))
    }

    /// The namespace document, or `None` before its first write.
    fn read(&self, namespace: &str) -> Result<Option<Map<String, Value>>> {
        let path = self.namespace_path(namespace)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Cannot read namespace {} from {}", namespace, path.display())
                })
            }
        };
        let doc = serde_json::from_str(&text).with_context(|| {
            format!("Namespace {} in {} is not a JSON object", namespace, path.display())
        })?;
        Ok(Some(doc))
    }

    /// Replaces the namespace document through a sibling `.tmp` file and a rename.
    fn write(&self, namespace: &str, doc: &Map<String, Value>) -> Result<()> {
        let path = self.namespace_path(namespace)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create state dir {}", self.dir.display()))?;

        let staged = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(doc)
            .with_context(|| format!("Cannot encode namespace {}", namespace))?;
        {
            let mut file = File::create(&staged)
                .with_context(|| format!("Cannot stage namespace {} at {}", namespace, staged.display()))?;
            file.write_all(&body)
                .and_then(|_| file.sync_all())
                .with_context(|| format!("Cannot write namespace {} to {}", namespace, staged.display()))?;
        }
        fs::rename(&staged, &path)
            .with_context(|| format!("Cannot commit namespace {} to {}", namespace, path.display()))?;

        // Persist the rename itself.
        if let Ok(dir) = File::open(&self.dir) {
            dir.sync_all().ok();
        }
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.read(namespace)?.and_then(|mut doc| doc.remove(key)))
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut doc = self.read(namespace)?.unwrap_or_default();
        doc.insert(key.to_string(), value);
        self.write(namespace, &doc)
            .with_context(|| format!("Cannot store {}.{}", namespace, key))
    }

    fn entries(&self, namespace: &str) -> Result<Map<String, Value>> {
        Ok(self.read(namespace)?.unwrap_or_default())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let path = self.namespace_path(namespace)?;
        match fs::remove_file(&path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err)
                .with_context(|| format!("Cannot clear namespace {} at {}", namespace, path.display())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .set("reassignMasterController", "currentStep", json!(4))
            .unwrap();
        store
            .set("reassignMasterController", "hosts", json!(["h1", "h2"]))
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(
            reopened.get("reassignMasterController", "currentStep").unwrap(),
            Some(json!(4))
        );
        assert_eq!(reopened.entries("reassignMasterController").unwrap().len(), 2);
        assert!(dir
            .path()
            .join("user-pref-reassignMasterController.json")
            .exists());
    }

    #[test]
    fn clearing_one_namespace_keeps_the_others() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set("a", "k", json!("v")).unwrap();
        store.set("b", "k", json!("w")).unwrap();
        store.clear("a").unwrap();
        assert_eq!(store.get("a", "k").unwrap(), None);
        assert_eq!(store.get("b", "k").unwrap(), Some(json!("w")));
    }

    #[test]
    fn namespace_with_path_separator_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "k", json!(1)).is_err());
    }

    #[test]
    fn memory_store_clear_resets_namespace() {
        let store = MemoryStore::new();
        store.set("ns", "k", json!({"x": 1})).unwrap();
        assert_eq!(store.get("ns", "k").unwrap(), Some(json!({"x": 1})));
        store.clear("ns").unwrap();
        assert!(store.entries("ns").unwrap().is_empty());
    }

    #[test]
    fn no_temp_file_is_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state"));
        store.set("x", "k", json!(true)).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path().join("state"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["user-pref-x.json".to_string()]);
    }

    #[test]
    fn corrupt_namespace_error_names_the_namespace() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user-pref-haWizard.json"), "not json").unwrap();
        let store = FileStore::new(dir.path());
        let err = store.get("haWizard", "currentStep").unwrap_err();
        assert!(format!("{:#}", err).contains("Namespace haWizard"));
    }
}
