//! POP3 mailbox client

use crate::codec::{self, Command};
use crate::config::Pop3Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::session::SessionInfo;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Message identifiers of the current session, in server order.
///
/// Which variant is returned tells whether the identifiers can be kept
/// across sessions. [`Identifiers::SessionScoped`] ids are synthesized
/// for servers without UIDL and must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifiers {
    /// UIDL identifiers, stable across sessions.
    Durable(Vec<String>),
    /// `host:port:n` stand-ins, valid for this session only.
    SessionScoped(Vec<String>),
}

impl Identifiers {
    #[must_use]
    pub fn ids(&self) -> &[String] {
        match self {
            Self::Durable(ids) | Self::SessionScoped(ids) => ids,
        }
    }

    #[must_use]
    pub fn into_ids(self) -> Vec<String> {
        match self {
            Self::Durable(ids) | Self::SessionScoped(ids) => ids,
        }
    }

    #[must_use]
    pub const fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }
}

/// POP3 client for one user's maildrop.
///
/// Messages are addressed by identifier; the per-connection message
/// numbers never leave this type. The connection is opened on first use
/// and re-opened transparently when it turns out to be dead. Deletions
/// are only sent to the server by [`Pop3Client::disconnect`].
pub struct Pop3Client {
    manager: ConnectionManager,
    pending: BTreeSet<String>,
}

impl Pop3Client {
    #[must_use]
    pub const fn new(config: Pop3Config) -> Self {
        Self {
            manager: ConnectionManager::new(config),
            pending: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Pop3Config {
        self.manager.config()
    }

    /// Location of the maildrop, without credentials.
    #[must_use]
    pub fn url(&self) -> String {
        self.manager.config().url()
    }

    /// Whether the server lacks UIDL, making identifiers session-scoped.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.manager.is_degraded()
    }

    /// Connect if needed and describe the session.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, logging in or synchronizing fails.
    pub async fn status(&mut self) -> Result<SessionInfo> {
        let (live, _) = self.manager.acquire().await?;
        Ok(live.session.info())
    }

    /// List the identifiers of all messages in the maildrop.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, logging in or synchronizing fails.
    pub async fn list_identifiers(&mut self) -> Result<Identifiers> {
        let (live, _) = self.manager.acquire().await?;
        let ids = live.session.index.ids().to_vec();
        if live.session.degraded {
            Ok(Identifiers::SessionScoped(ids))
        } else {
            Ok(Identifiers::Durable(ids))
        }
    }

    /// Size of a message in octets.
    ///
    /// Answered from the sizes listed when the session was set up; asks
    /// the server with `LIST n` only when that listing lacked the size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier, or an error
    /// if the connection or the LIST command fails.
    pub async fn fetch_size(&mut self, id: &str) -> Result<u64> {
        if self.manager.session().is_none() {
            self.manager.acquire().await?;
        }
        if let Some(index) = self.manager.session().map(|s| &s.index) {
            let n = index.ordinal(id).ok_or_else(|| not_found(id))?;
            if let Some(size) = index.size(n) {
                return Ok(size);
            }
        }

        let (n, line) = self
            .transact(id, async |conn: &mut Connection, n: u32| {
                conn.exchange_ok(Command::List(Some(n))).await
            })
            .await?;
        let parsed = codec::ok_text(&line)
            .and_then(|text| text.split_whitespace().nth(1)?.parse::<u64>().ok());
        let Some(size) = parsed else {
            return Err(Error::MalformedReply {
                addr: self.manager.config().addr(),
                command: Command::List(Some(n)).to_string(),
                line,
            });
        };
        if let Some(session) = self.manager.session_mut() {
            session.index.cache_size(n, size);
        }
        Ok(size)
    }

    /// Retrieve a whole message as CRLF-terminated bytes.
    ///
    /// One trailing empty line, which some servers append, is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier, or an error
    /// if the connection or the RETR command fails.
    pub async fn fetch(&mut self, id: &str) -> Result<Vec<u8>> {
        let (_, mut lines) = self
            .transact(id, async |conn: &mut Connection, n: u32| {
                conn.exchange_list(Command::Retr(n)).await
            })
            .await?;
        if lines
            .last()
            .is_some_and(|l| l.iter().all(|&b| b == b'\r' || b == b'\n'))
        {
            lines.pop();
        }

        if let Some(fetched) = self.manager.session_mut().and_then(|s| s.fetched.as_mut()) {
            fetched.insert(id.to_string());
        }
        debug!("Fetched {} ({} lines)", id, lines.len());
        Ok(codec::join_lines(&lines))
    }

    /// Retrieve the header of a message plus its first `body_lines`
    /// body lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier, or an error
    /// if the connection or the TOP command fails.
    pub async fn fetch_header(&mut self, id: &str, body_lines: u32) -> Result<Vec<u8>> {
        let (_, lines) = self
            .transact(id, async |conn: &mut Connection, n: u32| {
                conn.exchange_list(Command::Top(n, body_lines)).await
            })
            .await?;
        Ok(codec::join_lines(&lines))
    }

    /// Mark messages for deletion at [`Pop3Client::disconnect`].
    pub fn mark_deleted<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(ids.into_iter().map(Into::into));
    }

    /// Take messages off the deletion list.
    pub fn unmark_deleted<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.pending.remove(id.as_ref());
        }
    }

    /// Identifiers currently marked for deletion.
    #[must_use]
    pub const fn pending_deletions(&self) -> &BTreeSet<String> {
        &self.pending
    }

    /// Identifiers fully retrieved during the current session.
    ///
    /// `None` when the session is degraded: synthesized identifiers are
    /// not tracked.
    #[must_use]
    pub fn fetched(&self) -> Option<Vec<String>> {
        if self.manager.is_degraded() {
            return None;
        }
        Some(
            self.manager
                .session()
                .and_then(|s| s.fetched.as_ref())
                .map(|f| f.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Mark everything fetched in this session for deletion, returning
    /// how many identifiers that was.
    pub fn delete_all_fetched(&mut self) -> usize {
        let Some(fetched) = self.fetched() else {
            warn!("No fetched messages are tracked for a server without UIDL");
            return 0;
        };
        let count = fetched.len();
        self.mark_deleted(fetched);
        count
    }

    /// Delete marked messages, end the session and close the connection.
    ///
    /// The client returns to its unconnected state even when this
    /// fails; the pending deletions are consumed either way.
    ///
    /// # Errors
    ///
    /// Returns the first failure among reconnecting, DELE and QUIT.
    pub async fn disconnect(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            info!("Deleting {} messages", pending.len());
        }
        self.manager.disconnect(&pending).await
    }

    // -- private helpers --

    /// Run one exchange about message `id`, reconnecting at most once.
    ///
    /// An unknown identifier fails before anything is sent. A transport
    /// failure on a reused connection drops it and retries through a new
    /// one; a failure on a connection opened by this call is final.
    async fn transact<T>(
        &mut self,
        id: &str,
        exchange: impl AsyncFn(&mut Connection, u32) -> Result<T>,
    ) -> Result<(u32, T)> {
        if let Some(session) = self.manager.session() {
            session.index.ordinal(id).ok_or_else(|| not_found(id))?;
        }

        let mut retried = false;
        loop {
            let (live, fresh) = self.manager.acquire().await?;
            let n = live.session.index.ordinal(id).ok_or_else(|| not_found(id))?;
            match exchange(&mut live.conn, n).await {
                Ok(reply) => return Ok((n, reply)),
                Err(e) if e.is_transport() => {
                    self.manager.invalidate(&e);
                    if fresh || retried {
                        return Err(e);
                    }
                    debug!("Retrying {} on a new connection", id);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound { id: id.to_string() }
}
