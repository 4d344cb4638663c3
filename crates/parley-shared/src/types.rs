use serde::{Deserialize, Serialize};

/// Transient address assigned by the transport to a running instance.
///
/// An address is only valid while its owner is online; the durable handle
/// for a peer is its username. Serializes as a plain string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// This process's identity: the stable username handed out by the identity
/// service, plus the transient address the transport assigned for this
/// session.
///
/// The username is immutable for the process lifetime; the address is
/// created at startup and invalidated at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalIdentity {
    pub username: String,
    pub address: Address,
}

impl LocalIdentity {
    pub fn new(username: impl Into<String>, address: Address) -> Self {
        Self {
            username: username.into(),
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_serializes_as_plain_string() {
        let addr = Address::new("peer-7f3a");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"peer-7f3a\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
