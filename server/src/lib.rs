//! # Lobby Server Library
//!
//! This library implements the matchmaking and relay server for Hazel lobby
//! games. Clients connect over UDP, host or join rooms by code, and exchange
//! game data through the server, which forwards it to the other members of
//! their room.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Every remote address gets its own reliable Hazel connection:
//! - Hello handshake with a minimum client version check
//! - Acknowledgement, resend and timeout of reliable packets
//! - Refusal or redirect once the server is full
//!
//! ### Room Management
//! Rooms are created by HostGame and addressed by their code. The server
//! tracks membership and the host, and enforces host-only operations such as
//! starting the round, kicking players and changing privacy. When a round
//! ends, players drop back to the lobby and rejoin behind the host.
//!
//! ### Game Data Relay
//! GameData payloads are forwarded to every other room member, GameDataTo
//! payloads to their target only. The server also applies the traffic to its
//! own mirror of each room, which backs the public game list.
//!
//! ## Authority Modes
//!
//! By default the host client runs the round and the server only mirrors it.
//! With `authority = "server"` the server's mirror becomes the authority:
//! requests addressed to the host are consumed by the server, which assigns
//! roles and tasks, runs ship systems and decides when the round ends.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking keyed by address, client id assignment and
//! transport polling.
//!
//! ### Config Module (`config`)
//! TOML configuration with defaults for every field.
//!
//! ### Game Module (`game`)
//! The socket-free lobby state machine. Tests drive it directly with
//! in-memory connections.
//!
//! ### Network Module (`network`)
//! The tokio event loop that owns the socket, feeds datagrams into the game
//! module and flushes what it produces.

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
