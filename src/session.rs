//! Per-connection mailbox state
//!
//! POP3 numbers messages 1..=count for the lifetime of one connection
//! only. After every (re)connect [`synchronize`] rebuilds the whole
//! ordinal/identifier mapping from STAT, UIDL and LIST; nothing from a
//! previous connection is carried over.

use crate::auth::AuthMethod;
use crate::codec::{self, Command};
use crate::connection::Connection;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Bijection between the ordinals of one session and message
/// identifiers, plus the message sizes known for that session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIndex {
    /// Identifier of ordinal `n` at position `n - 1`.
    ids: Vec<String>,
    ordinals: HashMap<String, u32>,
    sizes: Vec<Option<u64>>,
}

impl MessageIndex {
    /// Build from UIDL lines (`<ordinal> <identifier>`).
    ///
    /// The lines must name every ordinal in `1..=count` exactly once and
    /// never repeat an identifier; otherwise the offending line (or a
    /// description of the gap) is returned.
    pub fn from_uidl(lines: &[Vec<u8>], count: u32) -> std::result::Result<Self, String> {
        let mut slots = empty_slots(lines, count)?;
        for raw in lines {
            let line = String::from_utf8_lossy(raw);
            let (n, id) = split_pair(&line).ok_or_else(|| line.to_string())?;
            let slot = slot_for(&mut slots, n).ok_or_else(|| line.to_string())?;
            *slot = Some(id.to_string());
        }
        Self::from_slots(slots)
    }

    /// Build from LIST lines (`<ordinal> <size>`) for a server without
    /// UIDL, naming message `n` as `host:port:n`.
    ///
    /// These identifiers look durable but only hold for the current
    /// session.
    pub fn synthesized(
        lines: &[Vec<u8>],
        count: u32,
        host: &str,
        port: u16,
    ) -> std::result::Result<Self, String> {
        let mut slots = empty_slots(lines, count)?;
        for raw in lines {
            let line = String::from_utf8_lossy(raw);
            let (n, _) = split_pair(&line).ok_or_else(|| line.to_string())?;
            let slot = slot_for(&mut slots, n).ok_or_else(|| line.to_string())?;
            *slot = Some(format!("{host}:{port}:{n}"));
        }
        let mut index = Self::from_slots(slots)?;
        index.record_sizes(lines)?;
        Ok(index)
    }

    fn from_slots(slots: Vec<Option<String>>) -> std::result::Result<Self, String> {
        let mut ids = Vec::with_capacity(slots.len());
        let mut ordinals = HashMap::with_capacity(slots.len());
        for (n, slot) in (1u32..).zip(slots) {
            let id = slot.ok_or_else(|| format!("no entry for message {n}"))?;
            if ordinals.insert(id.clone(), n).is_some() {
                return Err(format!("{n} {id} (duplicate identifier)"));
            }
            ids.push(id);
        }
        let sizes = vec![None; ids.len()];
        Ok(Self {
            ids,
            ordinals,
            sizes,
        })
    }

    /// Take sizes from LIST lines. Every line must parse; ordinals must
    /// be in range.
    pub fn record_sizes(&mut self, lines: &[Vec<u8>]) -> std::result::Result<(), String> {
        for raw in lines {
            let line = String::from_utf8_lossy(raw);
            let entry = split_pair(&line).and_then(|(n, rest)| {
                let size = rest.split_whitespace().next()?.parse::<u64>().ok()?;
                Some((n, size))
            });
            let Some((n, size)) = entry else {
                return Err(line.into_owned());
            };
            if !self.cache_size(n, size) {
                return Err(line.into_owned());
            }
        }
        Ok(())
    }

    /// Remember the size of message `n`; false if `n` is out of range.
    pub fn cache_size(&mut self, n: u32, size: u64) -> bool {
        let Some(slot) = n
            .checked_sub(1)
            .and_then(|i| self.sizes.get_mut(i as usize))
        else {
            return false;
        };
        *slot = Some(size);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Identifiers in ordinal order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn ordinal(&self, id: &str) -> Option<u32> {
        self.ordinals.get(id).copied()
    }

    #[must_use]
    pub fn size(&self, ordinal: u32) -> Option<u64> {
        let i = ordinal.checked_sub(1)?;
        self.sizes.get(i as usize).copied().flatten()
    }
}

/// Parse `<ordinal> <rest>`.
fn split_pair(line: &str) -> Option<(u32, &str)> {
    let (n, rest) = line.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    Some((n.parse().ok()?, rest))
}

/// One empty slot per message. A listing must have exactly one line per
/// message, so `count` is checked against it before anything is sized
/// from the server's STAT reply.
fn empty_slots(
    lines: &[Vec<u8>],
    count: u32,
) -> std::result::Result<Vec<Option<String>>, String> {
    if usize::try_from(count).ok() != Some(lines.len()) {
        return Err(format!("{} entries listed for {count} messages", lines.len()));
    }
    Ok(vec![None; lines.len()])
}

/// The unfilled slot for ordinal `n`, if in range and not yet taken.
fn slot_for(slots: &mut [Option<String>], n: u32) -> Option<&mut Option<String>> {
    let slot = slots.get_mut(n.checked_sub(1)? as usize)?;
    slot.is_none().then_some(slot)
}

/// State of one authenticated connection.
#[derive(Debug)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub index: MessageIndex,
    pub messages: u32,
    /// Total maildrop size in octets, from STAT.
    pub size: u64,
    /// Set when the server has no UIDL and identifiers are synthesized.
    pub degraded: bool,
    pub method: AuthMethod,
    pub connected_at: DateTime<Utc>,
    /// Identifiers retrieved in full during this session. Not tracked
    /// for degraded sessions.
    pub fetched: Option<BTreeSet<String>>,
}

impl Session {
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            host: self.host.clone(),
            port: self.port,
            method: self.method,
            messages: self.messages,
            size: self.size,
            degraded: self.degraded,
            connected_at: self.connected_at,
        }
    }
}

/// Summary of the live session, as reported by
/// [`Pop3Client::status`](crate::Pop3Client::status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub host: String,
    pub port: u16,
    pub method: AuthMethod,
    pub messages: u32,
    pub size: u64,
    pub degraded: bool,
    pub connected_at: DateTime<Utc>,
}

/// Query STAT, UIDL and LIST on a freshly authenticated connection and
/// build the session state from scratch.
pub async fn synchronize(
    conn: &mut Connection,
    host: &str,
    port: u16,
    method: AuthMethod,
) -> Result<Session> {
    let (messages, size) = stat(conn).await?;
    let connected_at = Utc::now();

    if messages == 0 {
        debug!("Maildrop at {} is empty", conn.addr());
        return Ok(Session {
            host: host.to_string(),
            port,
            index: MessageIndex::default(),
            messages,
            size,
            degraded: false,
            method,
            connected_at,
            fetched: Some(BTreeSet::new()),
        });
    }

    let reply = conn.exchange(Command::Uidl).await?;
    if codec::is_ok(&reply) {
        let lines = conn.read_body(Command::Uidl).await?;
        let mut index = MessageIndex::from_uidl(&lines, messages)
            .map_err(|line| conn.malformed(Command::Uidl, line))?;

        match conn.exchange_list(Command::List(None)).await {
            Ok(lines) => {
                if let Err(line) = index.record_sizes(&lines) {
                    warn!("Ignoring malformed LIST line from {}: {:?}", conn.addr(), line);
                }
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!("Message sizes unavailable: {}", e),
        }

        debug!("Indexed {} messages by UIDL", index.len());
        return Ok(Session {
            host: host.to_string(),
            port,
            index,
            messages,
            size,
            degraded: false,
            method,
            connected_at,
            fetched: Some(BTreeSet::new()),
        });
    }

    warn!(
        "{} does not support UIDL ({}); message identifiers are only valid for this session",
        conn.addr(),
        reply
    );
    let lines = conn.exchange_list(Command::List(None)).await?;
    let index = MessageIndex::synthesized(&lines, messages, host, port)
        .map_err(|line| conn.malformed(Command::List(None), line))?;

    Ok(Session {
        host: host.to_string(),
        port,
        index,
        messages,
        size,
        degraded: true,
        method,
        connected_at,
        fetched: None,
    })
}

async fn stat(conn: &mut Connection) -> Result<(u32, u64)> {
    let reply = conn.exchange_ok(Command::Stat).await?;
    let parsed = codec::ok_text(&reply).and_then(|text| {
        let mut fields = text.split_whitespace();
        let messages = fields.next()?.parse::<u32>().ok()?;
        let size = fields.next()?.parse::<u64>().ok()?;
        Some((messages, size))
    });
    parsed.ok_or_else(|| conn.malformed(Command::Stat, reply))
}
