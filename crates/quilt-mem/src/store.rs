use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// One stored object, keyed by its digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Entry {
    /// Raw file content.
    Bytes {
        name: String,
        original_path: String,
        data: Vec<u8>,
    },
    /// Directory manifest: child name mapped to child digest.
    Dir {
        original_path: String,
        children: BTreeMap<String, String>,
    },
}

/// The flat digest-keyed object map shared by a filesystem and its adders.
///
/// All references between entries are by digest string, so no pointer cycles
/// can arise; traversal is always a map lookup. Mutations and lookups both go
/// through the store-level lock, and directory child maps are cloned out
/// rather than exposed.
pub(crate) struct HashStore {
    name: &'static str,
    entries: RwLock<HashMap<String, Entry>>,
    // peer stores probed on a local miss, simulating multi-node lookup
    peers: RwLock<Vec<Arc<HashStore>>>,
}

impl HashStore {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            peers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn store_path(&self, digest: &str) -> String {
        format!("/{}/{}", self.name, digest)
    }

    /// Hash and insert raw file bytes, returning the digest.
    pub(crate) fn insert_bytes(&self, name: String, original_path: String, data: Vec<u8>) -> String {
        let digest = quilt_hash::hash_bytes(&data);
        self.entries
            .write()
            .expect("lock poisoned")
            .entry(digest.clone())
            .or_insert(Entry::Bytes {
                name,
                original_path,
                data,
            });
        digest
    }

    /// Insert a directory entry under a pre-computed manifest digest.
    pub(crate) fn insert_dir(
        &self,
        original_path: String,
        children: BTreeMap<String, String>,
        digest: String,
    ) {
        self.entries
            .write()
            .expect("lock poisoned")
            .entry(digest)
            .or_insert(Entry::Dir {
                original_path,
                children,
            });
    }

    /// Look up a digest locally, then in each linked peer in order.
    pub(crate) fn lookup(&self, digest: &str) -> Option<Entry> {
        if let Some(entry) = self.entries.read().expect("lock poisoned").get(digest) {
            return Some(entry.clone());
        }
        for peer in self.peers.read().expect("lock poisoned").iter() {
            if let Some(entry) = peer.entries.read().expect("lock poisoned").get(digest) {
                return Some(entry.clone());
            }
        }
        None
    }

    pub(crate) fn remove(&self, digest: &str) {
        self.entries.write().expect("lock poisoned").remove(digest);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Link a peer store for read-fallback.
    pub(crate) fn add_peer(&self, peer: Arc<HashStore>) {
        self.peers.write().expect("lock poisoned").push(peer);
    }
}

impl std::fmt::Debug for HashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashStore")
            .field("name", &self.name)
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let store = HashStore::new("mem");
        let d1 = store.insert_bytes("a.txt".into(), "/a.txt".into(), b"same".to_vec());
        let d2 = store.insert_bytes("a.txt".into(), "/a.txt".into(), b"same".to_vec());
        assert_eq!(d1, d2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookup_falls_back_to_peers_in_order() {
        let local = HashStore::new("mem");
        let peer = Arc::new(HashStore::new("mem"));
        let digest = peer.insert_bytes("p.txt".into(), "/p.txt".into(), b"peer data".to_vec());

        assert!(local.lookup(&digest).is_none());
        local.add_peer(Arc::clone(&peer));
        let entry = local.lookup(&digest).expect("found via peer");
        assert!(matches!(entry, Entry::Bytes { ref data, .. } if data == b"peer data"));
        // the local store did not copy the entry
        assert_eq!(local.len(), 0);
    }

    #[test]
    fn remove_absent_is_a_noop() {
        let store = HashStore::new("mem");
        store.remove("missing-digest");
        assert_eq!(store.len(), 0);
    }
}
