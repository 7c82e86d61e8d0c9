// NetSleuth - app/template_mgr.rs
//
// Directory-backed and layered template stores.
//
// A user template directory holds `<platform>_<command>.textfsm` files
// (spaces and dashes in the command become underscores). The layered store
// consults the user directory first and falls back to the built-in set, so
// a user file overrides the built-in template for the same key.

use crate::core::model::TemplateKey;
use crate::core::profile::PlatformProfile;
use crate::core::store::{source_checksum, BuiltinTemplateStore, TemplateSource, TemplateStore};
use crate::platform::fs::read_limited;
use crate::util::constants;
use crate::util::error::StoreError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// =============================================================================
// Directory store
// =============================================================================

/// Template store reading `.textfsm` files from one directory.
///
/// Files are read on every lookup, so edits take effect on the next parse
/// (the template cache recompiles when the checksum changes).
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    dir: PathBuf,
    /// Keys the store advertises in `keys()`; lookups are not limited to
    /// them.
    candidates: Vec<TemplateKey>,
}

impl DirTemplateStore {
    /// A store over `dir`. `candidates` are the keys worth listing
    /// (typically every template platform x known command of the loaded
    /// profiles), since file stems cannot be split back into keys.
    pub fn new(dir: impl Into<PathBuf>, candidates: Vec<TemplateKey>) -> Self {
        Self {
            dir: dir.into(),
            candidates,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &TemplateKey) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            key.file_stem(),
            constants::TEMPLATE_FILE_EXTENSION
        ))
    }

    fn read(&self, key: &TemplateKey) -> Result<(PathBuf, String), StoreError> {
        let path = self.path_for(key);
        match read_limited(&path, constants::MAX_TEMPLATE_FILE_SIZE) {
            Ok(Ok(text)) => Ok((path, text)),
            Ok(Err(size)) => Err(StoreError::FileTooLarge {
                path,
                size,
                max_size: constants::MAX_TEMPLATE_FILE_SIZE,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                platform: key.platform.clone(),
                command: key.command.clone(),
            }),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }
}

impl TemplateStore for DirTemplateStore {
    fn load(&self, key: &TemplateKey) -> Result<TemplateSource, StoreError> {
        let (path, text) = self.read(key)?;
        Ok(TemplateSource::new(
            key.clone(),
            path.display().to_string(),
            text,
        ))
    }

    fn checksum(&self, key: &TemplateKey) -> Result<String, StoreError> {
        let (_, text) = self.read(key)?;
        Ok(source_checksum(&text))
    }

    fn keys(&self) -> Vec<TemplateKey> {
        let mut keys: Vec<TemplateKey> = self
            .candidates
            .iter()
            .filter(|k| self.path_for(k).is_file())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

// =============================================================================
// Layered store
// =============================================================================

/// Consults each layer in order; the first layer that has the key serves it.
pub struct LayeredTemplateStore {
    layers: Vec<Box<dyn TemplateStore>>,
}

impl std::fmt::Debug for LayeredTemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredTemplateStore")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl LayeredTemplateStore {
    /// Highest-priority layer first.
    pub fn new(layers: Vec<Box<dyn TemplateStore>>) -> Self {
        Self { layers }
    }

    fn first_found<T>(
        &self,
        key: &TemplateKey,
        op: impl Fn(&dyn TemplateStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        for layer in &self.layers {
            match op(layer.as_ref()) {
                Err(StoreError::NotFound { .. }) => continue,
                other => return other,
            }
        }
        Err(StoreError::NotFound {
            platform: key.platform.clone(),
            command: key.command.clone(),
        })
    }
}

impl TemplateStore for LayeredTemplateStore {
    fn load(&self, key: &TemplateKey) -> Result<TemplateSource, StoreError> {
        self.first_found(key, |layer| layer.load(key))
    }

    fn checksum(&self, key: &TemplateKey) -> Result<String, StoreError> {
        self.first_found(key, |layer| layer.checksum(key))
    }

    fn keys(&self) -> Vec<TemplateKey> {
        self.layers
            .iter()
            .flat_map(|layer| layer.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Every (template platform, known command) pair of `profiles`.
pub fn profile_template_keys(profiles: &[PlatformProfile]) -> Vec<TemplateKey> {
    profiles
        .iter()
        .flat_map(|p| {
            p.commands
                .iter()
                .map(move |c| TemplateKey::new(p.template_platform.clone(), c.clone()))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The store used by the CLI: the user directory (when it exists) layered
/// over the built-in templates.
pub fn build_template_store(
    user_template_dir: Option<&Path>,
    profiles: &[PlatformProfile],
) -> LayeredTemplateStore {
    let mut layers: Vec<Box<dyn TemplateStore>> = Vec::new();

    if let Some(dir) = user_template_dir {
        if dir.is_dir() {
            let store = DirTemplateStore::new(dir, profile_template_keys(profiles));
            let found = store.keys().len();
            if found > constants::MAX_USER_TEMPLATES {
                tracing::warn!(
                    dir = %dir.display(),
                    count = found,
                    max = constants::MAX_USER_TEMPLATES,
                    "User template directory exceeds the template limit; ignoring it"
                );
            } else {
                tracing::info!(dir = %dir.display(), templates = found, "Using user templates");
                layers.push(Box::new(store));
            }
        } else {
            tracing::debug!(
                dir = %dir.display(),
                "User template directory does not exist (skipping)"
            );
        }
    }

    layers.push(Box::new(BuiltinTemplateStore::new()));
    LayeredTemplateStore::new(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryTemplateStore;
    use std::fs;

    const USER_VERSION: &str =
        "Value Required Version (\\S+)\n\nStart\n  ^Custom ${Version} -> Record\n";

    fn key() -> TemplateKey {
        TemplateKey::new("cisco_ios", "show version")
    }

    #[test]
    fn test_dir_store_reads_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("huawei_vrp_display_cpu_usage.textfsm"), USER_VERSION).unwrap();
        let key = TemplateKey::new("huawei_vrp", "display cpu-usage");
        let store = DirTemplateStore::new(dir.path(), vec![key.clone(), self::key()]);

        let source = store.load(&key).unwrap();
        assert_eq!(source.text, USER_VERSION);
        assert_eq!(store.checksum(&key).unwrap(), source.checksum);
        assert_eq!(store.keys(), vec![key]);
        assert!(matches!(store.load(&self::key()), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_dir_store_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let big = "#".repeat(constants::MAX_TEMPLATE_FILE_SIZE as usize + 1);
        fs::write(dir.path().join("cisco_ios_show_version.textfsm"), big).unwrap();
        let store = DirTemplateStore::new(dir.path(), Vec::new());
        assert!(matches!(store.load(&key()), Err(StoreError::FileTooLarge { .. })));
    }

    #[test]
    fn test_user_template_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cisco_ios_show_version.textfsm"), USER_VERSION).unwrap();
        let store = build_template_store(Some(dir.path()), &[]);

        let source = store.load(&key()).unwrap();
        assert_eq!(source.text, USER_VERSION);

        // Keys the user layer lacks still come from the built-in layer.
        let inventory = TemplateKey::new("cisco_ios", "show inventory");
        assert!(store.load(&inventory).unwrap().origin.starts_with("<builtin>"));
    }

    #[test]
    fn test_layered_keys_are_union() {
        let a = MemoryTemplateStore::new();
        a.insert(TemplateKey::new("x", "show a"), USER_VERSION);
        let b = MemoryTemplateStore::new();
        b.insert(TemplateKey::new("x", "show a"), USER_VERSION);
        b.insert(TemplateKey::new("x", "show b"), USER_VERSION);
        let store = LayeredTemplateStore::new(vec![Box::new(a), Box::new(b)]);
        assert_eq!(store.keys().len(), 2);
        assert!(matches!(
            store.checksum(&TemplateKey::new("x", "show c")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_missing_user_dir_falls_back_to_builtin() {
        let store = build_template_store(Some(Path::new("/nonexistent/netsleuth")), &[]);
        assert!(store.contains(&key()));
    }
}
