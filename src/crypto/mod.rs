//! Stream cipher layer for the tunnel
//!
//! A password is stretched into key and IV with `EVP_BytesToKey` (MD5),
//! and each direction of a connection runs its own AES keystream. The
//! sender's IV travels in clear as the first `iv_len` bytes.

mod cipher;
mod kdf;
mod method;
mod stream;

use std::io;
use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;

pub use cipher::{Decryptor, Encryptor};
pub use kdf::{bytes_to_key, derive_cached, KeyMaterial};
pub use method::CipherMethod;
pub use stream::CryptoStream;

use crate::error::SocksError;

/// Where the outbound IV comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvMode {
    /// Fresh random bytes per connection
    #[default]
    Random,
    /// The IV half of the password derivation (legacy peers)
    Derived,
}

/// Method, derived key material and IV policy shared by every connection
#[derive(Debug, Clone)]
pub struct CipherContext {
    method: CipherMethod,
    material: Arc<KeyMaterial>,
    iv_mode: IvMode,
}

impl CipherContext {
    pub fn new(method: CipherMethod, password: &str) -> Self {
        Self {
            method,
            material: derive_cached(password, method.key_len(), method.iv_len()),
            iv_mode: IvMode::default(),
        }
    }

    pub fn with_iv_mode(mut self, iv_mode: IvMode) -> Self {
        self.iv_mode = iv_mode;
        self
    }

    pub fn method(&self) -> CipherMethod {
        self.method
    }

    pub fn iv_mode(&self) -> IvMode {
        self.iv_mode
    }

    pub fn encryptor(&self) -> Result<Encryptor, SocksError> {
        let iv = match self.iv_mode {
            IvMode::Random => random_iv(self.method.iv_len())?,
            IvMode::Derived => self.material.iv.to_vec(),
        };
        Encryptor::new(self.method, &self.material.key, iv)
    }

    pub fn decryptor(&self) -> Decryptor {
        Decryptor::new(self.method, self.material.clone())
    }
}

fn random_iv(len: usize) -> Result<Vec<u8>, SocksError> {
    let mut iv = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "system random source unavailable"))?;
    Ok(iv)
}
