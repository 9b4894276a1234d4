//! Connection tracking for the lobby server
//!
//! This module owns one reliable [`Connection`] per remote address and hands
//! out the client ids rooms refer to. It handles:
//! - Client lifecycle (first datagram, handshake, disconnect, timeout)
//! - Routing inbound datagrams to the right connection
//! - Collecting every connection's outbound datagrams for the socket
//!
//! Nothing here knows about rooms; the game layer keys its state by the
//! client ids assigned here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info};
use shared::packet::{Direction, HelloBody};
use shared::transport::{Connection, TransportConfig, TransportError};

/// A remote peer and its transport state
#[derive(Debug)]
pub struct Client {
    /// Server-assigned id, used as the client id inside rooms
    pub id: i32,
    /// Address datagrams are sent back to
    pub addr: SocketAddr,
    pub connection: Connection,
    /// Code of the room this client is in, if any
    pub room: Option<i32>,
}

impl Client {
    pub fn new(id: i32, addr: SocketAddr, config: TransportConfig, now: Instant) -> Self {
        Self {
            id,
            addr,
            connection: Connection::new(Direction::Serverbound, config, now),
            room: None,
        }
    }

    /// The handshake the client sent, once it has sent one
    pub fn hello(&self) -> Option<&HelloBody> {
        self.connection.hello()
    }

    pub fn name(&self) -> &str {
        self.hello().map_or("", |h| h.username.as_str())
    }
}

/// Every client the server currently has a connection with
///
/// Ids start at 1 and are never reused while the server runs, so a stale id
/// in a room can't alias a newer client.
pub struct ClientManager {
    clients: HashMap<i32, Client>,
    by_addr: HashMap<SocketAddr, i32>,
    next_client_id: i32,
    config: TransportConfig,
}

impl ClientManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            clients: HashMap::new(),
            by_addr: HashMap::new(),
            next_client_id: 1,
            config,
        }
    }

    /// Finds the client at `addr`, creating a fresh connection for a new
    /// address
    pub fn get_or_insert(&mut self, addr: SocketAddr, now: Instant) -> &mut Client {
        let id = match self.by_addr.get(&addr) {
            Some(id) => *id,
            None => {
                let id = self.next_client_id;
                self.next_client_id = self.next_client_id.wrapping_add(1).max(1);
                debug!("new connection {} from {}", id, addr);
                self.by_addr.insert(addr, id);
                self.clients
                    .insert(id, Client::new(id, addr, self.config.clone(), now));
                id
            }
        };
        self.clients
            .entry(id)
            .or_insert_with(|| Client::new(id, addr, self.config.clone(), now))
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<i32> {
        self.by_addr.get(&addr).copied()
    }

    pub fn get(&self, client_id: i32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: i32) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    /// Ids of every tracked client, ascending
    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Forgets a client. Returns it so any final datagrams can be flushed
    pub fn remove_client(&mut self, client_id: i32) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        self.by_addr.remove(&client.addr);
        info!("Client {} ({}) removed", client_id, client.addr);
        Some(client)
    }

    /// Runs retransmission and keep-alive for every connection
    ///
    /// Returns the clients whose connection failed, with the reason. They
    /// stay registered so the caller can clean up their rooms first.
    pub fn poll(&mut self, now: Instant) -> Vec<(i32, TransportError)> {
        let mut failed = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if !client.connection.is_open() {
                continue;
            }
            if let Err(e) = client.connection.poll(now) {
                failed.push((*id, e));
            }
        }
        failed.sort_by_key(|(id, _)| *id);
        failed
    }

    /// Ids of clients whose connection has closed
    pub fn closed(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .clients
            .values()
            .filter(|c| !c.connection.is_open())
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Earliest retransmit deadline over all connections
    pub fn next_deadline(&self) -> Option<Instant> {
        self.clients
            .values()
            .filter_map(|c| c.connection.next_deadline())
            .min()
    }

    /// Drains every queued datagram, tagged with its destination
    pub fn drain_outgoing(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = Vec::new();
        for client in self.clients.values_mut() {
            let addr = client.addr;
            out.extend(
                client
                    .connection
                    .drain_outgoing()
                    .into_iter()
                    .map(|bytes| (addr, bytes)),
            );
        }
        out
    }

    /// Returns the number of tracked clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packet::Packet;
    use shared::transport::ConnectionState;
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn hello_bytes() -> Vec<u8> {
        Packet::Hello {
            nonce: 1,
            body: HelloBody::new("tester"),
        }
        .compose()
        .unwrap()
    }

    #[test]
    fn test_ids_per_address() {
        let now = Instant::now();
        let mut manager = ClientManager::new(TransportConfig::default());
        let first = manager.get_or_insert(test_addr(), now).id;
        let again = manager.get_or_insert(test_addr(), now).id;
        let second = manager.get_or_insert(test_addr2(), now).id;

        assert_eq!(first, 1);
        assert_eq!(again, 1);
        assert_eq!(second, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.find_client_by_addr(test_addr2()), Some(2));
    }

    #[test]
    fn test_remove_frees_address() {
        let now = Instant::now();
        let mut manager = ClientManager::new(TransportConfig::default());
        manager.get_or_insert(test_addr(), now);
        assert!(manager.remove_client(1).is_some());
        assert!(manager.remove_client(1).is_none());
        assert!(manager.is_empty());

        // A returning address is a new client
        assert_eq!(manager.get_or_insert(test_addr(), now).id, 2);
    }

    #[test]
    fn test_hello_is_acknowledged() {
        let now = Instant::now();
        let mut manager = ClientManager::new(TransportConfig::default());
        let client = manager.get_or_insert(test_addr(), now);
        client.connection.receive(&hello_bytes(), now).unwrap();
        assert_eq!(client.connection.state(), ConnectionState::Identified);
        assert_eq!(client.name(), "tester");

        let out = manager.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, test_addr());
        assert_eq!(out[0].1[..3], [10, 0, 1]);
    }

    #[test]
    fn test_poll_reports_timeouts() {
        let now = Instant::now();
        let config = TransportConfig {
            resend_interval_ms: 100,
            max_attempts: 1,
            ..TransportConfig::default()
        };
        let mut manager = ClientManager::new(config);
        let client = manager.get_or_insert(test_addr(), now);
        client.connection.receive(&hello_bytes(), now).unwrap();
        client.connection.accept();
        client.connection.send_reliable(Vec::new(), now).unwrap();

        assert!(manager.poll(now + Duration::from_millis(150)).is_empty());
        let failed = manager.poll(now + Duration::from_millis(300));
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0].1, TransportError::ConnectionTimeout { .. }));
        assert_eq!(manager.closed(), vec![1]);
    }
}
