// NetSleuth - core/store.rs
//
// Template store abstraction and the in-process stores.
// Core layer: the built-in store embeds its sources at compile time and the
// memory store holds caller-supplied text; directory-backed stores live in
// app::template_mgr.

use crate::core::model::TemplateKey;
use crate::util::error::StoreError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Template source text as handed out by a store.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub key: TemplateKey,

    /// Where the text came from (`<builtin>/...`, a file path, `<memory>`).
    pub origin: String,

    pub text: String,

    /// SHA-256 hex digest of `text`.
    pub checksum: String,
}

impl TemplateSource {
    pub fn new(key: TemplateKey, origin: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let checksum = source_checksum(&text);
        Self {
            key,
            origin: origin.into(),
            text,
            checksum,
        }
    }
}

/// SHA-256 hex digest of a template source, used as its version token.
pub fn source_checksum(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// An addressable source of template definitions.
///
/// `checksum` must be cheap relative to `load` + compile: the template cache
/// calls it on every lookup to decide whether a cached compile is stale.
pub trait TemplateStore: Send + Sync {
    /// Fetch the source text for `key`.
    fn load(&self, key: &TemplateKey) -> Result<TemplateSource, StoreError>;

    /// Current version token of the source for `key`.
    fn checksum(&self, key: &TemplateKey) -> Result<String, StoreError>;

    /// Every key the store can serve, sorted.
    fn keys(&self) -> Vec<TemplateKey>;

    fn contains(&self, key: &TemplateKey) -> bool {
        self.checksum(key).is_ok()
    }
}

fn not_found(key: &TemplateKey) -> StoreError {
    StoreError::NotFound {
        platform: key.platform.clone(),
        command: key.command.clone(),
    }
}

// =============================================================================
// Built-in templates (embedded at compile time)
// =============================================================================

/// Embedded template sources. Each tuple is (platform, command, text).
pub fn builtin_template_sources() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        (
            "cisco_ios",
            "show version",
            include_str!("../../templates/cisco_ios_show_version.textfsm"),
        ),
        (
            "cisco_ios",
            "show inventory",
            include_str!("../../templates/cisco_ios_show_inventory.textfsm"),
        ),
        (
            "cisco_ios",
            "show interfaces",
            include_str!("../../templates/cisco_ios_show_interfaces.textfsm"),
        ),
        (
            "cisco_ios",
            "show processes memory sorted",
            include_str!("../../templates/cisco_ios_show_processes_memory_sorted.textfsm"),
        ),
        (
            "cisco_ios",
            "show processes cpu",
            include_str!("../../templates/cisco_ios_show_processes_cpu.textfsm"),
        ),
        (
            "cisco_ios",
            "show processes cpu history",
            include_str!("../../templates/cisco_ios_show_processes_cpu_history.textfsm"),
        ),
        (
            "cisco_nxos",
            "show version",
            include_str!("../../templates/cisco_nxos_show_version.textfsm"),
        ),
        (
            "cisco_nxos",
            "show inventory",
            include_str!("../../templates/cisco_nxos_show_inventory.textfsm"),
        ),
        (
            "cisco_nxos",
            "show interface",
            include_str!("../../templates/cisco_nxos_show_interface.textfsm"),
        ),
        (
            "cisco_nxos",
            "show system resources",
            include_str!("../../templates/cisco_nxos_show_system_resources.textfsm"),
        ),
        (
            "aruba_aoscx",
            "show system",
            include_str!("../../templates/aruba_aoscx_show_system.textfsm"),
        ),
        (
            "aruba_aoscx",
            "show inventory",
            include_str!("../../templates/aruba_aoscx_show_inventory.textfsm"),
        ),
        (
            "aruba_aoscx",
            "show interface",
            include_str!("../../templates/aruba_aoscx_show_interface.textfsm"),
        ),
        (
            "huawei_vrp",
            "display version",
            include_str!("../../templates/huawei_vrp_display_version.textfsm"),
        ),
        (
            "huawei_vrp",
            "display interface",
            include_str!("../../templates/huawei_vrp_display_interface.textfsm"),
        ),
        (
            "huawei_vrp",
            "display cpu-usage",
            include_str!("../../templates/huawei_vrp_display_cpu_usage.textfsm"),
        ),
        (
            "huawei_vrp",
            "display memory usage",
            include_str!("../../templates/huawei_vrp_display_memory_usage.textfsm"),
        ),
        (
            "huawei_vrp",
            "display device",
            include_str!("../../templates/huawei_vrp_display_device.textfsm"),
        ),
    ]
}

/// Store serving the templates compiled into the binary.
#[derive(Debug)]
pub struct BuiltinTemplateStore {
    entries: HashMap<TemplateKey, (&'static str, String)>,
}

impl BuiltinTemplateStore {
    pub fn new() -> Self {
        let entries = builtin_template_sources()
            .into_iter()
            .map(|(platform, command, text)| {
                (
                    TemplateKey::new(platform, command),
                    (text, source_checksum(text)),
                )
            })
            .collect();
        Self { entries }
    }
}

impl Default for BuiltinTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore for BuiltinTemplateStore {
    fn load(&self, key: &TemplateKey) -> Result<TemplateSource, StoreError> {
        let (text, checksum) = self.entries.get(key).ok_or_else(|| not_found(key))?;
        Ok(TemplateSource {
            key: key.clone(),
            origin: format!("<builtin>/{}.textfsm", key.file_stem()),
            text: (*text).to_string(),
            checksum: checksum.clone(),
        })
    }

    fn checksum(&self, key: &TemplateKey) -> Result<String, StoreError> {
        self.entries
            .get(key)
            .map(|(_, checksum)| checksum.clone())
            .ok_or_else(|| not_found(key))
    }

    fn keys(&self) -> Vec<TemplateKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Store holding caller-supplied template text. Entries can be replaced at
/// any time; the changed checksum invalidates cached compiles.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    entries: RwLock<HashMap<TemplateKey, TemplateSource>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the template for `key`.
    pub fn insert(&self, key: TemplateKey, text: impl Into<String>) {
        let source = TemplateSource::new(key.clone(), "<memory>", text);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, source);
    }

    pub fn remove(&self, key: &TemplateKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, key: &TemplateKey) -> Result<TemplateSource, StoreError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    fn checksum(&self, key: &TemplateKey) -> Result<String, StoreError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|s| s.checksum.clone())
            .ok_or_else(|| not_found(key))
    }

    fn keys(&self) -> Vec<TemplateKey> {
        let mut keys: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

// =============================================================================
// Tests
// =============================================================================
