//! # ember-network
//! The Ember gossip protocol: wire messages, the peer book, the node
//! context, inbound handlers, and the TCP server.

pub mod handlers;
pub mod node;
pub mod peers;
pub mod protocol;
pub mod server;

pub use node::{submit_tx, Node};
pub use peers::PeerBook;
pub use protocol::{InvKind, Message};
pub use server::{run, serve};
