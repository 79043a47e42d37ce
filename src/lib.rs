//! POP3 client library
//!
//! Keeps one authenticated POP3 session against one server for one
//! user, and addresses messages by their UIDL identifiers rather than by
//! the message numbers that are only valid for a single connection.
//!
//! The connection is opened lazily, probed before reuse and re-opened
//! when it has died. Servers without UIDL still work, but their
//! identifiers are synthesized and only valid for one session; this is
//! reported through [`Identifiers::SessionScoped`] and such a session is
//! never silently resumed after the connection drops.
//!
//! ```no_run
//! use pop3_client::{Pop3Client, Pop3Config};
//!
//! # async fn run() -> pop3_client::Result<()> {
//! let config = Pop3Config::secure("pop.example.com", "alice", "secret");
//! let mut client = Pop3Client::new(config);
//!
//! for id in client.list_identifiers().await?.into_ids() {
//!     let message = client.fetch(&id).await?;
//!     println!("{id}: {} bytes", message.len());
//! }
//! client.delete_all_fetched();
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod codec;
mod config;
mod connection;
mod error;
mod manager;
mod session;

pub use auth::{AuthMethod, apop_digest, xoauth2_payload};
pub use client::{Identifiers, Pop3Client};
pub use config::{POP3_PORT, POP3S_PORT, Pop3Config, TlsOptions};
pub use error::{Error, Result};
pub use session::SessionInfo;
