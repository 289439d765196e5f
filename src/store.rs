//! Durable request store backed by sled.
//!
//! Two trees: `requests` maps request id -> CBOR record, `hash_index` maps
//! sealed hash -> request id so verification can look a document up by its
//! content hash. Updates go through a compare-and-swap on the encoded record
//! keyed by the embedded version counter; that CAS is what makes the
//! "last signer runs finalization at most once" guarantee hold even if two
//! processes share the database.

use std::sync::Arc;

use sled::Db;

use super::error::StoreError;
use super::request::Request;

const REQUESTS_TREE: &str = "requests";
const HASH_INDEX_TREE: &str = "hash_index";

#[derive(Clone)]
pub struct RequestStore {
    requests: sled::Tree,
    hash_index: sled::Tree,
}

fn encode(request: &Request) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(request).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Request, StoreError> {
    minicbor::decode(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

impl RequestStore {
    pub fn new(db: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            requests: db.open_tree(REQUESTS_TREE)?,
            hash_index: db.open_tree(HASH_INDEX_TREE)?,
        })
    }

    /// Persist a freshly built request.
    pub fn create(&self, request: &Request) -> Result<(), StoreError> {
        let encoded = encode(request)?;
        self.requests.insert(request.id.as_bytes(), encoded)?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Request, StoreError> {
        match self.requests.get(id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound),
        }
    }

    /// Look a request up by its sealed content hash. `Ok(None)` means no
    /// sealed document with that hash exists anywhere in the store.
    pub fn find_by_hash(&self, hash: &str) -> Result<Option<Request>, StoreError> {
        let Some(id) = self.hash_index.get(hash.as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id).to_string();

        match self.requests.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Conditional update. Succeeds only if the stored record still carries
    /// the version the caller read; on success the version is bumped in
    /// place. A lost race surfaces as [`StoreError::VersionConflict`].
    pub fn update(&self, request: &mut Request) -> Result<(), StoreError> {
        let key = request.id.as_bytes();
        let current = self.requests.get(key)?.ok_or(StoreError::NotFound)?;
        let stored = decode(&current)?;

        if stored.version != request.version {
            return Err(StoreError::VersionConflict);
        }

        request.version += 1;
        let next = encode(request)?;

        let swap = self
            .requests
            .compare_and_swap(key, Some(current), Some(next))?;
        if swap.is_err() {
            request.version -= 1;
            return Err(StoreError::VersionConflict);
        }

        // maintain the hash index once the request has been sealed
        if let Some(hash) = &request.sealed_hash {
            self.hash_index.insert(hash.as_bytes(), key)?;
        }

        Ok(())
    }

    /// All requests, newest first.
    pub fn list_all(&self) -> Result<Vec<Request>, StoreError> {
        let mut requests = Vec::new();
        for entry in self.requests.iter() {
            let (_, bytes) = entry?;
            requests.push(decode(&bytes)?);
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// Requests the given identity initiated or is an approver on, newest
    /// first.
    pub fn list_for_user(&self, email: &str) -> Result<Vec<Request>, StoreError> {
        let mut requests = self.list_all()?;
        requests.retain(|r| r.involves(email));
        Ok(requests)
    }
}
