//! # Lobby Client Library
//!
//! This library provides a headless client for Hazel lobby servers. It is
//! meant for bots, load tests and offline analysis rather than for playing:
//! there is no rendering and no input handling.
//!
//! ## Architecture Overview
//!
//! The client is split the same way as the server. A socket-free session
//! core owns the protocol state, and a thin async layer moves bytes between
//! it and a UDP socket. Keeping the core free of I/O lets tests and the
//! replay tool drive it directly.
//!
//! ### Session Core
//! One reliable connection plus the replicated room the client is in. The
//! session turns inbound payloads into [`game::SessionEvent`]s, forwards
//! local intents to the room, and lets callers wait for specific payloads.
//!
//! ### Capture and Replay
//! Every datagram can be recorded with a timestamp and direction. Replaying
//! a capture rebuilds the room the client saw, with the realtime tick off.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Session state, payload waiters and session events.
//!
//! ### Network Module (`network`)
//! The tokio loop: socket I/O, tick timer and the bot's goal (host, join
//! or list).
//!
//! ### Capture Module (`capture`)
//! bincode capture files and offline replay.
//!
//! ### Matchmaker Module (`matchmaker`)
//! Chooses the server address to connect to.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::matchmaker::StaticMatchmaker;
//! use client::network::{Client, ClientOptions, Goal};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let matchmaker = StaticMatchmaker::new("127.0.0.1:22023");
//! let options = ClientOptions::new("bot", Goal::List);
//! let mut client = Client::new(&matchmaker, options).await?;
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod game;
pub mod matchmaker;
pub mod network;
