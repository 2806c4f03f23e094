//! Password-based key derivation (OpenSSL `EVP_BytesToKey` with MD5)

use std::sync::Arc;

use dashmap::DashMap;
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use tracing::debug;

/// Derived key and IV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key: Box<[u8]>,
    pub iv: Box<[u8]>,
}

type CacheKey = (String, usize, usize);

static KEY_CACHE: Lazy<DashMap<CacheKey, Arc<KeyMaterial>>> = Lazy::new(DashMap::new);

/// Hash `password`, then `digest ++ password`, until `key_len + iv_len`
/// bytes are available.
pub fn bytes_to_key(password: &[u8], key_len: usize, iv_len: usize) -> KeyMaterial {
    let mut material: Vec<u8> = Vec::with_capacity(key_len + iv_len + 16);
    let mut previous: Option<[u8; 16]> = None;

    while material.len() < key_len + iv_len {
        let mut context = Md5::new();
        if let Some(digest) = previous {
            context.update(digest);
        }
        context.update(password);
        let digest: [u8; 16] = context.finalize().into();
        material.extend_from_slice(&digest);
        previous = Some(digest);
    }

    KeyMaterial {
        key: material[..key_len].into(),
        iv: material[key_len..key_len + iv_len].into(),
    }
}

/// Process-wide cached [`bytes_to_key`]
pub fn derive_cached(password: &str, key_len: usize, iv_len: usize) -> Arc<KeyMaterial> {
    let cache_key = (password.to_owned(), key_len, iv_len);
    if let Some(material) = KEY_CACHE.get(&cache_key) {
        return material.clone();
    }
    KEY_CACHE
        .entry(cache_key)
        .or_insert_with(|| {
            debug!(key_len, iv_len, "Deriving cipher key");
            Arc::new(bytes_to_key(password.as_bytes(), key_len, iv_len))
        })
        .clone()
}
