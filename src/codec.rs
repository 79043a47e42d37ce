//! POP3 wire framing
//!
//! Commands are single CRLF-terminated lines. Replies are a status line
//! (`+OK ...` or anything else) optionally followed, for multi-line
//! commands, by a body terminated with a line holding a single `.`.
//! Body lines that start with `.` were dot-stuffed by the server and have
//! exactly one leading `.` removed here.

use std::fmt;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Success indicator at the start of a positive status line.
pub const OK: &str = "+OK";

const TERMINATOR: &[u8] = b".";

/// Longest line accepted from the server, line ending included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A POP3 command as sent by this client.
///
/// `Display` renders the command for logs and error messages with any
/// secret replaced by `****`; [`Command::to_wire`] renders the real line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Stat,
    List(Option<u32>),
    Uidl,
    Retr(u32),
    Top(u32, u32),
    Dele(u32),
    Noop,
    User(&'a str),
    Pass(&'a str),
    Apop(&'a str, &'a str),
    /// `AUTH XOAUTH2`, with the initial response inline when present.
    AuthXOAuth2(Option<&'a str>),
    /// A bare SASL response line sent after a `+` continuation.
    SaslResponse(&'a str),
    Quit,
}

impl Command<'_> {
    /// The exact line written to the socket, CRLF included.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let line = match *self {
            Self::Stat => "STAT".to_string(),
            Self::List(None) => "LIST".to_string(),
            Self::List(Some(n)) => format!("LIST {n}"),
            Self::Uidl => "UIDL".to_string(),
            Self::Retr(n) => format!("RETR {n}"),
            Self::Top(n, lines) => format!("TOP {n} {lines}"),
            Self::Dele(n) => format!("DELE {n}"),
            Self::Noop => "NOOP".to_string(),
            Self::User(user) => format!("USER {user}"),
            Self::Pass(password) => format!("PASS {password}"),
            Self::Apop(user, digest) => format!("APOP {user} {digest}"),
            Self::AuthXOAuth2(None) => "AUTH XOAUTH2".to_string(),
            Self::AuthXOAuth2(Some(token)) => format!("AUTH XOAUTH2 {token}"),
            Self::SaslResponse(token) => token.to_string(),
            Self::Quit => "QUIT".to_string(),
        };
        format!("{line}\r\n")
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Pass(_) => f.write_str("PASS ****"),
            Self::Apop(user, _) => write!(f, "APOP {user} ****"),
            Self::AuthXOAuth2(Some(_)) => f.write_str("AUTH XOAUTH2 ****"),
            Self::SaslResponse(_) => f.write_str("****"),
            _ => f.write_str(self.to_wire().trim_end()),
        }
    }
}

/// Whether a status line is a positive reply.
#[must_use]
pub fn is_ok(line: &str) -> bool {
    line.starts_with(OK)
}

/// The text following `+OK`, trimmed. `None` for a negative reply.
#[must_use]
pub fn ok_text(line: &str) -> Option<&str> {
    line.strip_prefix(OK).map(str::trim)
}

/// Read one line, without its line ending.
///
/// EOF before any byte is reported as [`io::ErrorKind::UnexpectedEof`]:
/// a POP3 server never closes the stream while a reply is owed. A line
/// longer than [`MAX_LINE_LEN`] is [`io::ErrorKind::InvalidData`].
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let limit = MAX_LINE_LEN as u64;
    if (&mut *reader).take(limit).read_until(b'\n', &mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ));
    }
    if line.len() == MAX_LINE_LEN && !line.ends_with(b"\n") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_LEN} bytes"),
        ));
    }
    if line.ends_with(b"\n") {
        line.pop();
        if line.ends_with(b"\r") {
            line.pop();
        }
    }
    Ok(line)
}

/// Read a dot-terminated multi-line body following a positive status.
pub async fn read_body<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Vec<Vec<u8>>> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line == TERMINATOR {
            return Ok(lines);
        }
        lines.push(unstuff(line));
    }
}

/// Remove one leading `.` from a dot-stuffed body line.
#[must_use]
pub fn unstuff(mut line: Vec<u8>) -> Vec<u8> {
    if line.first() == Some(&b'.') {
        line.remove(0);
    }
    line
}

/// Join body lines back into CRLF-terminated message bytes.
#[must_use]
pub fn join_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
    for line in lines {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}
