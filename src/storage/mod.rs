pub mod memory;
pub mod mongo;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::directory::Entry;
use crate::ldap::protocol::SearchRequest;
use crate::Result;

/// A lazy, finite, non-restartable sequence of entries from a backend query.
pub type EntryStream = Pin<Box<dyn Stream<Item = Result<Entry>> + Send>>;

/// The document-store adaptor consumed by the protocol engine. Each session
/// holds its own cloned handle; implementations translate filters to their
/// native query form.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Looks up a single entry by DN.
    async fn find_entry(&self, dn: &str) -> Result<Option<Entry>>;

    /// Runs a search and streams the matching entries.
    async fn find_entries(&self, request: &SearchRequest) -> Result<EntryStream>;

    /// Persists an entry. With `insert` the DN must not already exist;
    /// otherwise the entry replaces whatever is stored under its DN.
    async fn save_entry(&self, entry: &Entry, insert: bool) -> Result<()>;

    /// Removes the subtree rooted at `dn`.
    async fn delete_entry(&self, dn: &str) -> Result<()>;

    /// Returns the textual access rules, in their stored order.
    async fn access_rules(&self) -> Result<Vec<String>>;
}
