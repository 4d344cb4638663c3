//! Client for the external directory service.
//!
//! The directory maps a stable username to the peer's current transient
//! address and tracks online status. It is an external collaborator reached
//! over request/response calls; this module defines the consumed contract
//! plus two implementations: [`HttpDirectory`] for the real REST service and
//! [`MemoryDirectory`] for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use parley_shared::{Address, LocalIdentity};

/// Errors from directory calls.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The directory reports no live address for the username.
    #[error("peer {0:?} is offline")]
    PeerOffline(String),

    /// The username is not registered with the directory at all.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// The directory service could not be reached or answered abnormally.
    #[error("directory service unavailable: {0}")]
    Unavailable(String),
}

/// A username the directory reports as reachable, with its current address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerLocation {
    pub username: String,
    pub address: Address,
}

/// The consumed directory contract.
pub trait Directory: Send + Sync + 'static {
    /// Publish our current transient address, marking us online.
    /// Called once after the transport assigns the address.
    fn register_address(
        &self,
        identity: &LocalIdentity,
    ) -> impl std::future::Future<Output = Result<(), DirectoryError>> + Send;

    /// Resolve a username to its current address.
    fn lookup(
        &self,
        username: &str,
    ) -> impl std::future::Future<Output = Result<PeerLocation, DirectoryError>> + Send;

    /// Mark us offline. Called on shutdown.
    fn report_offline(
        &self,
    ) -> impl std::future::Future<Output = Result<(), DirectoryError>> + Send;

    /// Everyone the directory currently reports as online (excluding us).
    fn online_peers(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PeerLocation>, DirectoryError>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Directory client for the REST service.
///
/// Authentication is a bearer token the external identity service issued;
/// this layer only forwards it.
pub struct HttpDirectory {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    username: String,
    peer_id: Option<String>,
    online_status: bool,
}

#[derive(Serialize)]
struct UpdatePeerIdRequest<'a> {
    peer_id: &'a str,
}

#[derive(Deserialize)]
struct OnlineUser {
    username: String,
    current_peer_id: Option<String>,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Directory for HttpDirectory {
    async fn register_address(&self, identity: &LocalIdentity) -> Result<(), DirectoryError> {
        self.client
            .post(self.url("/api/users/update-peer-id"))
            .bearer_auth(&self.token)
            .json(&UpdatePeerIdRequest {
                peer_id: identity.address.as_str(),
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        tracing::info!(address = %identity.address, "address registered with directory");
        Ok(())
    }

    async fn lookup(&self, username: &str) -> Result<PeerLocation, DirectoryError> {
        let response = self
            .client
            .post(self.url("/api/users/lookup"))
            .bearer_auth(&self.token)
            .json(&LookupRequest { username })
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::UnknownUser(username.to_string()));
        }

        let body: LookupResponse = response
            .error_for_status()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        match (body.online_status, body.peer_id) {
            (true, Some(peer_id)) => Ok(PeerLocation {
                username: body.username,
                address: Address::new(peer_id),
            }),
            _ => Err(DirectoryError::PeerOffline(username.to_string())),
        }
    }

    async fn report_offline(&self) -> Result<(), DirectoryError> {
        self.client
            .post(self.url("/api/users/set-offline"))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn online_peers(&self) -> Result<Vec<PeerLocation>, DirectoryError> {
        let users: Vec<OnlineUser> = self
            .client
            .get(self.url("/api/users/online"))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        Ok(users
            .into_iter()
            .filter_map(|u| {
                u.current_peer_id.map(|peer_id| PeerLocation {
                    username: u.username,
                    address: Address::new(peer_id),
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, local development)
// ---------------------------------------------------------------------------

/// Shared in-memory directory; clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    /// username -> current address (`None` = registered but offline).
    users: Arc<Mutex<HashMap<String, Option<Address>>>>,
    /// The username this handle registered, so `report_offline` knows who
    /// to mark.
    local: Arc<Mutex<Option<String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the directory with another client under a fresh handle.
    pub fn shared(&self) -> Self {
        Self {
            users: self.users.clone(),
            local: Arc::new(Mutex::new(None)),
        }
    }

    /// Seed a registered-but-offline user (tests).
    pub fn seed_offline(&self, username: impl Into<String>) {
        self.users
            .lock()
            .expect("directory lock poisoned")
            .insert(username.into(), None);
    }
}

impl Directory for MemoryDirectory {
    async fn register_address(&self, identity: &LocalIdentity) -> Result<(), DirectoryError> {
        self.users
            .lock()
            .expect("directory lock poisoned")
            .insert(identity.username.clone(), Some(identity.address.clone()));
        *self.local.lock().expect("directory lock poisoned") = Some(identity.username.clone());
        Ok(())
    }

    async fn lookup(&self, username: &str) -> Result<PeerLocation, DirectoryError> {
        let users = self.users.lock().expect("directory lock poisoned");
        match users.get(username) {
            Some(Some(address)) => Ok(PeerLocation {
                username: username.to_string(),
                address: address.clone(),
            }),
            Some(None) => Err(DirectoryError::PeerOffline(username.to_string())),
            None => Err(DirectoryError::UnknownUser(username.to_string())),
        }
    }

    async fn report_offline(&self) -> Result<(), DirectoryError> {
        let local = self.local.lock().expect("directory lock poisoned").clone();
        if let Some(username) = local {
            if let Some(entry) = self
                .users
                .lock()
                .expect("directory lock poisoned")
                .get_mut(&username)
            {
                *entry = None;
            }
        }
        Ok(())
    }

    async fn online_peers(&self) -> Result<Vec<PeerLocation>, DirectoryError> {
        let local = self.local.lock().expect("directory lock poisoned").clone();
        let users = self.users.lock().expect("directory lock poisoned");
        Ok(users
            .iter()
            .filter(|(username, _)| Some(username.as_str()) != local.as_deref())
            .filter_map(|(username, address)| {
                address.as_ref().map(|a| PeerLocation {
                    username: username.clone(),
                    address: a.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, addr: &str) -> LocalIdentity {
        LocalIdentity::new(name, Address::new(addr))
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let dir = MemoryDirectory::new();
        dir.register_address(&identity("bob", "addr-b")).await.unwrap();

        let other = dir.shared();
        let location = other.lookup("bob").await.unwrap();
        assert_eq!(location.address, Address::new("addr-b"));
    }

    #[tokio::test]
    async fn lookup_distinguishes_offline_from_unknown() {
        let dir = MemoryDirectory::new();
        dir.seed_offline("carol");

        assert!(matches!(
            dir.lookup("carol").await,
            Err(DirectoryError::PeerOffline(_))
        ));
        assert!(matches!(
            dir.lookup("nobody").await,
            Err(DirectoryError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn report_offline_removes_the_address() {
        let dir = MemoryDirectory::new();
        dir.register_address(&identity("bob", "addr-b")).await.unwrap();
        dir.report_offline().await.unwrap();

        assert!(matches!(
            dir.shared().lookup("bob").await,
            Err(DirectoryError::PeerOffline(_))
        ));
    }

    #[tokio::test]
    async fn online_peers_excludes_self() {
        let alice_dir = MemoryDirectory::new();
        alice_dir
            .register_address(&identity("alice", "addr-a"))
            .await
            .unwrap();

        let bob_dir = alice_dir.shared();
        bob_dir.register_address(&identity("bob", "addr-b")).await.unwrap();

        let seen_by_alice = alice_dir.online_peers().await.unwrap();
        assert_eq!(seen_by_alice.len(), 1);
        assert_eq!(seen_by_alice[0].username, "bob");
    }
}
