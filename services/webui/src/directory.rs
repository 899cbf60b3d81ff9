//! Bidirectional adapter-overlay-name <-> real-host-name directory.
//!
//! The WebUI fans out by real host name; the overlay only routes adapter
//! names. This registry decouples the two. It fills lazily from adapter
//! `/status` responses and self-heals: a failed peer-map call evicts the
//! adapter so stale entries cannot pin a graph node.

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AdapterDirectory {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// adapter -> host
    adapters: HashMap<String, String>,
    /// host -> adapter
    hosts: HashMap<String, String>,
}

impl AdapterDirectory {
    /// Record that `host` is served by `adapter`. Both directions are
    /// written under one critical section, and any prior counterpart of
    /// either side is removed so the inverse mapping never goes stale.
    pub async fn store(&self, host: &str, adapter: &str) {
        let mut inner = self.inner.write().await;
        if let Some(old_adapter) = inner.hosts.insert(host.to_owned(), adapter.to_owned()) {
            if old_adapter != adapter {
                inner.adapters.remove(&old_adapter);
            }
        }
        if let Some(old_host) = inner.adapters.insert(adapter.to_owned(), host.to_owned()) {
            if old_host != host {
                inner.hosts.remove(&old_host);
            }
        }
    }

    pub async fn adapter_for(&self, host: &str) -> Option<String> {
        self.inner.read().await.hosts.get(host).cloned()
    }

    pub async fn host_for(&self, adapter: &str) -> Option<String> {
        self.inner.read().await.adapters.get(adapter).cloned()
    }

    pub async fn adapters(&self) -> Vec<String> {
        self.inner.read().await.adapters.keys().cloned().collect()
    }

    pub async fn hosts(&self) -> Vec<String> {
        self.inner.read().await.hosts.keys().cloned().collect()
    }

    /// Remove by host name; both directions go together.
    pub async fn delete_host(&self, host: &str) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().await;
        let Some(adapter) = inner.hosts.remove(host) else {
            return Err(DirectoryError::NotFound);
        };
        inner.adapters.remove(&adapter);
        Ok(())
    }

    /// Remove by adapter name; both directions go together.
    pub async fn delete_adapter(&self, adapter: &str) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().await;
        let Some(host) = inner.adapters.remove(adapter) else {
            return Err(DirectoryError::NotFound);
        };
        inner.hosts.remove(&host);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DirectoryError {
    NotFound,
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::NotFound => write!(f, "could not find adapter to delete"),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_delete_keep_both_directions_consistent() {
        let dir = AdapterDirectory::default();
        dir.store("host-a", "adapter-1").await;
        dir.store("host-b", "adapter-2").await;

        assert_eq!(dir.adapter_for("host-a").await, Some("adapter-1".to_owned()));
        assert_eq!(dir.host_for("adapter-1").await, Some("host-a".to_owned()));

        dir.delete_host("host-a").await.expect("delete host-a");
        assert_eq!(dir.adapter_for("host-a").await, None);
        assert_eq!(dir.host_for("adapter-1").await, None);

        dir.delete_adapter("adapter-2").await.expect("delete adapter-2");
        assert_eq!(dir.adapter_for("host-b").await, None);
        assert_eq!(dir.host_for("adapter-2").await, None);

        assert_eq!(dir.delete_host("host-a").await, Err(DirectoryError::NotFound));
        assert_eq!(
            dir.delete_adapter("adapter-2").await,
            Err(DirectoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn overwrite_evicts_the_stale_reverse_entry() {
        let dir = AdapterDirectory::default();
        dir.store("host-a", "adapter-1").await;
        // The adapter restarted under a new overlay name.
        dir.store("host-a", "adapter-9").await;

        assert_eq!(dir.adapter_for("host-a").await, Some("adapter-9".to_owned()));
        assert_eq!(dir.host_for("adapter-9").await, Some("host-a".to_owned()));
        // The retired adapter name must not keep pointing at the host.
        assert_eq!(dir.host_for("adapter-1").await, None);
        assert_eq!(dir.adapters().await, vec!["adapter-9".to_owned()]);
    }

    #[tokio::test]
    async fn overwrite_evicts_the_stale_forward_entry_too() {
        let dir = AdapterDirectory::default();
        dir.store("host-a", "adapter-1").await;
        // The same adapter came back attached to a different host.
        dir.store("host-b", "adapter-1").await;

        assert_eq!(dir.host_for("adapter-1").await, Some("host-b".to_owned()));
        assert_eq!(dir.adapter_for("host-b").await, Some("adapter-1".to_owned()));
        assert_eq!(dir.adapter_for("host-a").await, None);
        assert_eq!(dir.hosts().await, vec!["host-b".to_owned()]);
    }
}
