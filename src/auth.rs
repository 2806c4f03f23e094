//! Username/password authentication (RFC 1929)

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::AuthConfig;

/// Decides whether a SOCKS5 client may proceed past the auth phase
///
/// The accepted socket is passed along so implementations can take the
/// peer address into account.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, username: &str, password: &str, socket: &TcpStream) -> bool;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&str, &str, &TcpStream) -> bool + Send + Sync + 'static,
{
    async fn authenticate(&self, username: &str, password: &str, socket: &TcpStream) -> bool {
        self(username, password, socket)
    }
}

/// Fixed credential table
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, String>,
}

impl StaticUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// `None` when no users are configured
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        if config.users.is_empty() {
            return None;
        }
        let users = config
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();
        Some(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map_or(false, |expected| expected == password)
    }
}

#[async_trait]
impl Authenticator for StaticUsers {
    async fn authenticate(&self, username: &str, password: &str, _socket: &TcpStream) -> bool {
        self.verify(username, password)
    }
}
