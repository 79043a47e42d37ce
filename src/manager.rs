//! Connection ownership and lazy reconnect
//!
//! The manager hands out a live, authenticated connection together with
//! its session state. A cached connection is probed with NOOP first; if
//! the probe fails the connection is dropped and a new one is opened,
//! authenticated and synchronized, at most once per call.

use crate::auth;
use crate::codec::{self, Command};
use crate::config::Pop3Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::session::{self, Session};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// An authenticated connection and the state synchronized over it.
#[derive(Debug)]
pub struct Live {
    pub conn: Connection,
    pub session: Session,
}

#[derive(Debug)]
pub struct ConnectionManager {
    config: Pop3Config,
    live: Option<Live>,
    /// The connection of a degraded session was lost. Its identifiers
    /// can't be mapped onto a new session, so reconnecting is refused
    /// until [`ConnectionManager::disconnect`] resets the engine.
    lost_degraded: bool,
}

impl ConnectionManager {
    pub const fn new(config: Pop3Config) -> Self {
        Self {
            config,
            live: None,
            lost_degraded: false,
        }
    }

    pub const fn config(&self) -> &Pop3Config {
        &self.config
    }

    /// The current session, without touching the network.
    pub fn session(&self) -> Option<&Session> {
        self.live.as_ref().map(|live| &live.session)
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.live.as_mut().map(|live| &mut live.session)
    }

    pub fn is_degraded(&self) -> bool {
        self.lost_degraded || self.session().is_some_and(|s| s.degraded)
    }

    /// A live connection, and whether it was opened by this call.
    pub async fn acquire(&mut self) -> Result<(&mut Live, bool)> {
        if let Some(mut live) = self.live.take() {
            match live.conn.exchange(Command::Noop).await {
                Ok(_) => return Ok((self.live.insert(live), false)),
                Err(e) => self.lose(live, &e),
            }
        }
        let live = self.reconnect().await?;
        Ok((self.live.insert(live), true))
    }

    /// Drop the current connection after a transport failure.
    pub fn invalidate(&mut self, cause: &Error) {
        if let Some(live) = self.live.take() {
            self.lose(live, cause);
        }
    }

    fn lose(&mut self, live: Live, cause: &Error) {
        warn!("Lost connection to {}: {}", live.conn.addr(), cause);
        if live.session.degraded {
            self.lost_degraded = true;
        }
    }

    async fn reconnect(&mut self) -> Result<Live> {
        if self.lost_degraded {
            return Err(Error::DegradedResumeRefused {
                addr: self.config.addr(),
            });
        }
        self.connect().await
    }

    async fn connect(&self) -> Result<Live> {
        self.config.validate()?;

        let (mut conn, greeting) = Connection::open(&self.config).await?;
        if !codec::is_ok(&greeting) {
            let addr = conn.addr().to_string();
            conn.close().await;
            return Err(Error::ProtocolMismatch { addr, greeting });
        }

        let method = auth::authenticate(
            &mut conn,
            &greeting,
            self.config.auth,
            &self.config.username,
            &self.config.password,
        )
        .await?;

        let session =
            session::synchronize(&mut conn, &self.config.host, self.config.port, method).await?;
        info!(
            "Connected to POP3 server {} as {} ({} messages, {} octets)",
            conn.addr(),
            self.config.username,
            session.messages,
            session.size
        );
        Ok(Live { conn, session })
    }

    /// Apply `pending` deletions, say QUIT and close the socket.
    ///
    /// Pending deletions always go through [`ConnectionManager::acquire`]
    /// first, so identifiers marked while no connection was open are
    /// translated against a fresh session. The engine is back in its
    /// unconnected state afterwards whatever happens on the wire; the
    /// first failure, if any, is returned.
    pub async fn disconnect(&mut self, pending: &BTreeSet<String>) -> Result<()> {
        let mut outcome = Ok(());

        if !pending.is_empty()
            && let Err(e) = self.acquire().await
        {
            warn!("Can't apply {} pending deletions: {}", pending.len(), e);
            outcome = Err(e);
        }

        if let Some(mut live) = self.live.take() {
            let result = finish(&mut live, pending).await;
            live.conn.close().await;
            if outcome.is_ok() {
                outcome = result;
            }
            info!("Disconnected from {}", self.config.addr());
        }

        self.lost_degraded = false;
        outcome
    }
}

async fn finish(live: &mut Live, pending: &BTreeSet<String>) -> Result<()> {
    let mut ordinals: Vec<u32> = pending
        .iter()
        .filter_map(|id| {
            let n = live.session.index.ordinal(id);
            if n.is_none() {
                warn!("Not deleting {}: no longer in the maildrop", id);
            }
            n
        })
        .collect();
    ordinals.sort_unstable();

    let mut first_failure = None;
    for n in ordinals {
        match live.conn.exchange_ok(Command::Dele(n)).await {
            Ok(_) => debug!("Marked message {} for deletion", n),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                warn!("{}", e);
                first_failure.get_or_insert(e);
            }
        }
    }

    let quit = live.conn.exchange_ok(Command::Quit).await;
    match first_failure {
        Some(e) => Err(e),
        None => quit.map(|_| ()),
    }
}
