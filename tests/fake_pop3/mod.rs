//! Fake POP3 server for integration testing
//!
//! This module provides an in-process POP3 server that speaks enough
//! of RFC 1939 to test `Pop3Client` end-to-end:
//!
//! TCP (optionally TLS) -> greeting -> login -> transaction -> QUIT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per POP3 command (STAT, UIDL, RETR, etc.)
//! - `maildrop` -- test data model (messages, builder)
//! - `io` -- shared write helpers

mod io;
mod server;

pub use maildrop::MaildropBuilder;
pub use server::{FakePop3Server, ServerOptions};
