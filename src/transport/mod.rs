//! Peer transport
//!
//! `MessageExchange` is the client side used by the cache and registry;
//! `CommandServer` answers the same line protocol for remote callers.
pub mod commands;
pub mod server;
pub mod tcp_exchange;
pub mod traits;

pub use commands::{Command, Request, Response};
pub use server::{dispatch, CommandServer};
pub use tcp_exchange::TcpExchange;
pub use traits::{MessageExchange, NoOpExchange, ResponseSender};
