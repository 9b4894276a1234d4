//! Where the client finds a server to talk to.

use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchmakerError {
    #[error("could not resolve {0}")]
    Unresolved(String),

    #[error("no servers available")]
    NoServers,
}

/// Picks the server a session should connect to.
pub trait Matchmaker {
    fn find_server(&self) -> Result<SocketAddr, MatchmakerError>;
}

/// Always answers with one configured address.
#[derive(Debug, Clone)]
pub struct StaticMatchmaker {
    address: String,
}

impl StaticMatchmaker {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Matchmaker for StaticMatchmaker {
    fn find_server(&self) -> Result<SocketAddr, MatchmakerError> {
        self.address
            .to_socket_addrs()
            .map_err(|_| MatchmakerError::Unresolved(self.address.clone()))?
            .next()
            .ok_or(MatchmakerError::NoServers)
    }
}
