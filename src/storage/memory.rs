use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;

use crate::directory::{dn_storage_id, Entry};
use crate::ldap::protocol::{SearchRequest, SearchScope};
use crate::storage::{EntryStream, StorageBackend};
use crate::{Error, Result};

/// An in-process backend keyed by normalized DN identifiers. Used by the
/// test suite and available for development setups; it mirrors `olcAccess`
/// values into a rule table the same way the document-store adaptor does.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
    access: DashMap<String, Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn find_entry(&self, dn: &str) -> Result<Option<Entry>> {
        let id = dn_storage_id(dn)?;
        Ok(self.entries.get(&id).map(|item| item.value().clone()))
    }

    async fn find_entries(&self, request: &SearchRequest) -> Result<EntryStream> {
        if request.filter.contains_unsupported() {
            return Err(Error::UnavailableCriticalExtension(
                "approx and extensible filters are not supported".to_string(),
            ));
        }
        let base_id = dn_storage_id(&request.base)?;

        let mut results = Vec::new();
        for item in self.entries.iter() {
            let id = item.key();
            let in_scope = match request.scope {
                SearchScope::Base => *id == base_id,
                SearchScope::One => is_direct_child(id, &base_id),
                SearchScope::Sub => *id == base_id || is_descendant(id, &base_id),
            };
            if in_scope && request.filter.matches(item.value())? {
                results.push(Ok(item.value().clone()));
            }
        }
        // DashMap iteration order is arbitrary; a stable order keeps the
        // stream deterministic for callers.
        results.sort_by(|a, b| {
            let a = a.as_ref().map(|e| e.dn.clone()).unwrap_or_default();
            let b = b.as_ref().map(|e| e.dn.clone()).unwrap_or_default();
            a.cmp(&b)
        });
        if request.size_limit > 0 {
            results.truncate(request.size_limit as usize);
        }
        Ok(Box::pin(stream::iter(results)))
    }

    async fn save_entry(&self, entry: &Entry, insert: bool) -> Result<()> {
        let id = dn_storage_id(&entry.dn)?;
        if insert && self.entries.contains_key(&id) {
            return Err(Error::AlreadyExists(entry.dn.clone()));
        }
        if let Some(rules) = entry.attr_values("olcAccess") {
            self.access.insert(id.clone(), rules.clone());
        }
        self.entries.insert(id, entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, dn: &str) -> Result<()> {
        let base_id = dn_storage_id(dn)?;
        let doomed: Vec<String> = self
            .entries
            .iter()
            .map(|item| item.key().clone())
            .filter(|id| *id == base_id || is_descendant(id, &base_id))
            .collect();
        for id in doomed {
            self.entries.remove(&id);
            self.access.remove(&id);
        }
        Ok(())
    }

    async fn access_rules(&self) -> Result<Vec<String>> {
        let mut by_entry: Vec<(String, Vec<String>)> = self
            .access
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();
        by_entry.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(by_entry.into_iter().flat_map(|(_, rules)| rules).collect())
    }
}

fn is_direct_child(child_id: &str, parent_id: &str) -> bool {
    child_id
        .strip_prefix(parent_id)
        .and_then(|rest| rest.strip_prefix(','))
        .is_some_and(|rdn| !rdn.is_empty() && !rdn.contains(','))
}

fn is_descendant(child_id: &str, parent_id: &str) -> bool {
    child_id
        .strip_prefix(parent_id)
        .and_then(|rest| rest.strip_prefix(','))
        .is_some_and(|rest| !rest.is_empty())
}
