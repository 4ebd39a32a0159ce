//! `lk-registry` — the List Registry: an in-memory, concurrency-safe
//! mirror of remote moderation-list memberships.

use dashmap::DashMap;
use lk_domain::{Did, ListDescriptor, ListKey, Result};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// A single membership entry mirroring the remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub did: Did,
    pub rkey: String,
}

/// Mutable per-list state, guarded independently so mutations to
/// different lists never contend with one another.
pub struct ListState {
    pub descriptor: ListDescriptor,
    pub entries: Vec<Entry>,
    pub exceptions: HashSet<Did>,
}

/// Abstraction over the Remote API operations the registry needs to
/// perform membership writes. Implemented by `lk-api`'s client; kept
/// as a trait here so `lk-registry` has no dependency on `lk-api`.
#[async_trait::async_trait]
pub trait MembershipApi: Send + Sync {
    async fn create_member(&self, list_uri: &str, did: &Did) -> Result<String>;
    async fn delete_member(&self, rkey: &str) -> Result<()>;
}

pub struct ListRegistry {
    lists: DashMap<ListKey, Mutex<ListState>>,
}

impl ListRegistry {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
        }
    }

    /// Register a list at bootstrap with its initial descriptor,
    /// authoritative remote entries, and loaded exceptions.
    pub fn register(&self, descriptor: ListDescriptor, entries: Vec<Entry>, exceptions: HashSet<Did>) {
        let key = descriptor.key.clone();
        self.lists.insert(
            key,
            Mutex::new(ListState {
                descriptor,
                entries,
                exceptions,
            }),
        );
    }

    pub fn keys(&self) -> Vec<ListKey> {
        self.lists.iter().map(|e| e.key().clone()).collect()
    }

    /// Lock-free-ish snapshot: whether `did` is currently present in `list`.
    /// (Takes the per-list lock briefly; reads never block on a remote call.)
    pub async fn present(&self, did: &Did, list: &ListKey) -> bool {
        match self.lists.get(list) {
            Some(entry) => entry.lock().await.entries.iter().any(|e| &e.did == did),
            None => false,
        }
    }

    pub async fn is_exception(&self, did: &Did, list: &ListKey) -> bool {
        match self.lists.get(list) {
            Some(entry) => entry.lock().await.exceptions.contains(did),
            None => false,
        }
    }

    pub async fn descriptor(&self, list: &ListKey) -> Option<ListDescriptor> {
        match self.lists.get(list) {
            Some(entry) => Some(entry.lock().await.descriptor.clone()),
            None => None,
        }
    }

    /// Ensure `did` is present in `list`, creating the remote
    /// membership and appending the entry if it was absent.
    /// Idempotent: a no-op if already present.
    pub async fn add(&self, did: &Did, list: &ListKey, api: &dyn MembershipApi) -> Result<()> {
        let Some(entry) = self.lists.get(list) else {
            return Ok(());
        };
        let mut state = entry.lock().await;
        if state.entries.iter().any(|e| &e.did == did) {
            return Ok(());
        }
        let uri = state
            .descriptor
            .uri
            .clone()
            .ok_or_else(|| lk_domain::Error::DataIntegrity(format!("list {list} has no uri")))?;
        let rkey = api.create_member(&uri, did).await?;
        tracing::info!(did = %did, list = %list, "registry: added membership");
        state.entries.push(Entry {
            did: did.clone(),
            rkey,
        });
        Ok(())
    }

    /// Ensure `did` is absent from `list`, deleting the remote
    /// membership and dropping the entry if it was present.
    /// Idempotent: a no-op if already absent.
    pub async fn remove(&self, did: &Did, list: &ListKey, api: &dyn MembershipApi) -> Result<()> {
        let Some(entry) = self.lists.get(list) else {
            return Ok(());
        };
        let mut state = entry.lock().await;
        let Some(pos) = state.entries.iter().position(|e| &e.did == did) else {
            return Ok(());
        };
        let rkey = state.entries[pos].rkey.clone();
        api.delete_member(&rkey).await?;
        state.entries.remove(pos);
        tracing::info!(did = %did, list = %list, "registry: removed membership");
        Ok(())
    }

    /// Remove `did` from every list it currently appears in.
    pub async fn remove_from_all(&self, did: &Did, api: &dyn MembershipApi) -> Result<()> {
        for key in self.keys() {
            self.remove(did, &key, api).await?;
        }
        Ok(())
    }
}

impl Default for ListRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        next_rkey: AtomicUsize,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                next_rkey: AtomicUsize::new(1),
            }
        }
    }

    #[async_trait::async_trait]
    impl MembershipApi for FakeApi {
        async fn create_member(&self, _list_uri: &str, _did: &Did) -> Result<String> {
            let n = self.next_rkey.fetch_add(1, Ordering::SeqCst);
            Ok(format!("rkey-{n}"))
        }

        async fn delete_member(&self, _rkey: &str) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with_list(key: &str, uri: &str) -> ListRegistry {
        let reg = ListRegistry::new();
        reg.register(
            ListDescriptor {
                key: ListKey(key.into()),
                name: key.into(),
                description: String::new(),
                uri: Some(uri.into()),
                follows_threshold: Some(5000),
                followers_threshold: None,
                require_unverified_follow_count: false,
                word_list_path: None,
                exceptions_path: None,
            },
            Vec::new(),
            HashSet::new(),
        );
        reg
    }

    #[tokio::test]
    async fn add_then_present_is_true() {
        let reg = registry_with_list("over5k", "at://plc/list/1");
        let api = FakeApi::new();
        let did: Did = "did:plc:a".into();
        let key = ListKey("over5k".into());
        reg.add(&did, &key, &api).await.unwrap();
        assert!(reg.present(&did, &key).await);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let reg = registry_with_list("over5k", "at://plc/list/1");
        let api = FakeApi::new();
        let did: Did = "did:plc:a".into();
        let key = ListKey("over5k".into());
        reg.add(&did, &key, &api).await.unwrap();
        reg.add(&did, &key, &api).await.unwrap();
        let entry = reg.lists.get(&key).unwrap();
        assert_eq!(entry.lock().await.entries.len(), 1);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let reg = registry_with_list("over5k", "at://plc/list/1");
        let api = FakeApi::new();
        let did: Did = "did:plc:a".into();
        let key = ListKey("over5k".into());
        reg.add(&did, &key, &api).await.unwrap();
        reg.remove(&did, &key, &api).await.unwrap();
        assert!(!reg.present(&did, &key).await);
    }

    #[tokio::test]
    async fn remove_absent_is_a_no_op() {
        let reg = registry_with_list("over5k", "at://plc/list/1");
        let api = FakeApi::new();
        let did: Did = "did:plc:ghost".into();
        let key = ListKey("over5k".into());
        assert!(reg.remove(&did, &key, &api).await.is_ok());
    }

    #[tokio::test]
    async fn remove_from_all_clears_every_list() {
        let reg = ListRegistry::new();
        for key in ["over5k", "over10k"] {
            reg.register(
                ListDescriptor {
                    key: ListKey(key.into()),
                    name: key.into(),
                    description: String::new(),
                    uri: Some(format!("at://plc/list/{key}")),
                    follows_threshold: Some(5000),
                    followers_threshold: None,
                    require_unverified_follow_count: false,
                    word_list_path: None,
                    exceptions_path: None,
                },
                Vec::new(),
                HashSet::new(),
            );
        }
        let api = FakeApi::new();
        let did: Did = "did:plc:a".into();
        reg.add(&did, &ListKey("over5k".into()), &api).await.unwrap();
        reg.add(&did, &ListKey("over10k".into()), &api).await.unwrap();
        reg.remove_from_all(&did, &api).await.unwrap();
        assert!(!reg.present(&did, &ListKey("over5k".into())).await);
        assert!(!reg.present(&did, &ListKey("over10k".into())).await);
    }
}
