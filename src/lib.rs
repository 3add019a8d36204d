//! Man-in-the-middle proxy for the Minecraft Java Edition protocol.
//!
//! Every packet travelling between a client and a server is decoded so that
//! handlers can inspect, log or rewrite it, then re-encoded and forwarded.
//!
//! # Proxying process
//! Each connection pair is driven by a [`session::Session`], a synchronous
//! transform from the bytes read on one socket to the bytes written to the
//! other. The session follows the connection through its phases:
//!
//! * The Handshake names a protocol version. Supported versions load a
//!   [`protocol::descriptor::ProtocolDescriptor`], whose packet catalogue is
//!   used for the rest of the connection; anything else turns the session
//!   into a transparent relay.
//! * During Login the session tracks compression and, given a
//!   [`proxy::Decryptor`], takes part in the key exchange so the encrypted
//!   stream can still be read.
//! * In Play, packets pass through the [`entity::EntityTracker`], which
//!   swaps raw entity ids for typed handles, and then through the
//!   [`handler::HandlerRegistry`].
//!
//! The [`server`] module provides a tokio TCP front end for sessions.

pub mod entity;
pub mod handler;
pub mod journal;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod session;
