//! A from-scratch RFC 6455 WebSocket server.
//!
//! Three tightly coupled subsystems make up the protocol core: the opening
//! handshake ([`handshake`]), the frame codec ([`frame`]), and the
//! connection state machine ([`connection`]). [`WsServer`] ties them
//! together behind a small callback-based API: install [`Callbacks`],
//! `listen`, and the rest — fragment reassembly, ping/pong, close
//! handshakes — happens without further intervention.
//!
//! ```no_run
//! use swss::{Callbacks, WsConfig, WsServer};
//!
//! let callbacks = Callbacks::builder()
//!     .on_open(|conn| println!("{:?} connected", conn))
//!     .on_message(|conn, is_text, bytes| {
//!         println!("{:?} sent {} bytes (text={})", conn, bytes.len(), is_text);
//!     })
//!     .on_close(|conn| println!("{:?} disconnected", conn))
//!     .build();
//!
//! let server = WsServer::new(WsConfig::default(), callbacks);
//! server.listen("8080").unwrap();
//! ```

mod base64;
mod callbacks;
mod config;
mod connection;
mod error;
mod frame;
mod handshake;
mod server;
mod sha1;

pub use callbacks::{Callbacks, CallbacksBuilder};
pub use config::WsConfig;
pub use error::WsError;
pub use frame::OpCode;
pub use server::{ConnId, WsServer};
