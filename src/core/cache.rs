// NetSleuth - core/cache.rs
//
// Compiled-template cache, owned by the Parser facade.
//
// Entries are keyed by template key and carry the checksum of the source
// they were compiled from. Every lookup asks the store for the current
// checksum; a mismatch recompiles and replaces the entry.

use crate::core::model::TemplateKey;
use crate::core::store::TemplateStore;
use crate::core::template::Template;
use crate::util::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
struct CachedTemplate {
    checksum: String,
    template: Arc<Template>,
}

/// Read-mostly cache of compiled templates.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<TemplateKey, CachedTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled template for `key`, compiling it on a miss or when the
    /// store's checksum no longer matches the cached one.
    pub fn get_or_compile(
        &self,
        store: &dyn TemplateStore,
        key: &TemplateKey,
    ) -> Result<Arc<Template>> {
        let checksum = store.checksum(key)?;

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(key) {
                if hit.checksum == checksum {
                    return Ok(Arc::clone(&hit.template));
                }
            }
        }

        let source = store.load(key)?;
        let template = Arc::new(Template::from_source(&source)?);
        tracing::debug!(
            template = %key,
            origin = %source.origin,
            checksum = %source.checksum,
            states = template.states().len(),
            "Compiled template"
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have compiled the same source meanwhile; keep
        // the first so callers share one Arc.
        if let Some(existing) = entries.get(key) {
            if existing.checksum == source.checksum {
                return Ok(Arc::clone(&existing.template));
            }
        }
        entries.insert(
            key.clone(),
            CachedTemplate {
                checksum: source.checksum.clone(),
                template: Arc::clone(&template),
            },
        );
        Ok(template)
    }

    /// Drop the entry for `key`.
    pub fn invalidate(&self, key: &TemplateKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
