//! POP3 authentication methods
//!
//! Every method runs against an already-open, unauthenticated
//! connection. Nothing here reconnects or retries; a rejected login is
//! final for that socket.

use crate::codec::{self, Command};
use crate::connection::Connection;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How to log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AuthMethod {
    /// APOP when the greeting carries a challenge, then USER/PASS.
    #[default]
    Auto,
    /// `APOP user md5(challenge password)`.
    Apop,
    /// `USER` followed by `PASS`.
    User,
    /// `AUTH XOAUTH2 <token>` in a single command.
    XOAuth2,
    /// `AUTH XOAUTH2`, wait for a `+` continuation, then send the token.
    XOAuth2Separated,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Apop => "APOP",
            Self::User => "USER",
            Self::XOAuth2 => "OAUTH2",
            Self::XOAuth2Separated => "OAUTH2_SEP",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "APOP" => Ok(Self::Apop),
            "USER" | "LOGIN" => Ok(Self::User),
            "OAUTH2" | "XOAUTH2" => Ok(Self::XOAuth2),
            "OAUTH2_SEP" | "XOAUTH2_SEP" => Ok(Self::XOAuth2Separated),
            other => Err(Error::Config(format!(
                "Unknown authentication method: {other}"
            ))),
        }
    }
}

/// Result of trying one concrete method.
enum Attempt {
    Accepted,
    Rejected(String),
    /// The method can't be used on this connection and was not tried.
    Inapplicable(&'static str),
}

/// Log in on `conn`, returning the method that succeeded.
///
/// `greeting` is the server's first line, where APOP finds its
/// challenge. For the XOAUTH2 methods `secret` is the access token.
pub async fn authenticate(
    conn: &mut Connection,
    greeting: &str,
    method: AuthMethod,
    username: &str,
    secret: &str,
) -> Result<AuthMethod> {
    let candidates: &[AuthMethod] = match method {
        AuthMethod::Auto => &[AuthMethod::Apop, AuthMethod::User],
        AuthMethod::Apop => &[AuthMethod::Apop],
        AuthMethod::User => &[AuthMethod::User],
        AuthMethod::XOAuth2 => &[AuthMethod::XOAuth2],
        AuthMethod::XOAuth2Separated => &[AuthMethod::XOAuth2Separated],
    };

    let mut failures = Vec::new();
    for &candidate in candidates {
        let attempt = match candidate {
            AuthMethod::Apop => try_apop(conn, greeting, username, secret).await?,
            AuthMethod::User => try_user(conn, username, secret).await?,
            AuthMethod::XOAuth2 => try_xoauth2(conn, username, secret).await?,
            AuthMethod::XOAuth2Separated => {
                try_xoauth2_separated(conn, username, secret).await?
            }
            AuthMethod::Auto => Attempt::Inapplicable("AUTO is not a concrete method"),
        };
        match attempt {
            Attempt::Accepted => {
                debug!("Authenticated {} using {}", username, candidate);
                return Ok(candidate);
            }
            Attempt::Rejected(reply) => {
                debug!("{} rejected by {}: {}", candidate, conn.addr(), reply);
                failures.push(format!("{candidate}: {reply}"));
            }
            Attempt::Inapplicable(why) => {
                debug!("Skipping {}: {}", candidate, why);
                if method != AuthMethod::Auto {
                    failures.push(format!("{candidate}: {why}"));
                }
            }
        }
    }

    let detail = if failures.is_empty() {
        "no applicable method".to_string()
    } else {
        failures.join("; ")
    };
    Err(Error::AuthFailure {
        addr: conn.addr().to_string(),
        username: username.to_string(),
        method: method.to_string(),
        detail,
    })
}

async fn try_apop(
    conn: &mut Connection,
    greeting: &str,
    username: &str,
    password: &str,
) -> Result<Attempt> {
    let Some(challenge) = apop_challenge(greeting) else {
        return Ok(Attempt::Inapplicable("greeting carries no APOP challenge"));
    };
    let digest = apop_digest(challenge, password);
    let reply = conn.exchange(Command::Apop(username, &digest)).await?;
    Ok(judge(reply))
}

async fn try_user(conn: &mut Connection, username: &str, password: &str) -> Result<Attempt> {
    let reply = conn.exchange(Command::User(username)).await?;
    if !codec::is_ok(&reply) {
        return Ok(Attempt::Rejected(reply));
    }
    let reply = conn.exchange(Command::Pass(password)).await?;
    Ok(judge(reply))
}

async fn try_xoauth2(conn: &mut Connection, username: &str, token: &str) -> Result<Attempt> {
    let payload = xoauth2_payload(username, token);
    let reply = conn.exchange(Command::AuthXOAuth2(Some(&payload))).await?;
    Ok(judge(reply))
}

async fn try_xoauth2_separated(
    conn: &mut Connection,
    username: &str,
    token: &str,
) -> Result<Attempt> {
    let reply = conn.exchange(Command::AuthXOAuth2(None)).await?;
    // Some providers answer with a bare "+" instead of "+OK".
    if !reply.starts_with('+') {
        return Ok(Attempt::Rejected(reply));
    }
    let payload = xoauth2_payload(username, token);
    let reply = conn.exchange(Command::SaslResponse(&payload)).await?;
    Ok(judge(reply))
}

fn judge(reply: String) -> Attempt {
    if codec::is_ok(&reply) {
        Attempt::Accepted
    } else {
        Attempt::Rejected(reply)
    }
}

/// The `<...>` challenge embedded in a `+OK` greeting, brackets included.
#[must_use]
pub fn apop_challenge(greeting: &str) -> Option<&str> {
    let rest = codec::ok_text(greeting)?;
    let start = rest.find('<')?;
    let len = rest[start..].find('>')?;
    let challenge = &rest[start..=start + len];
    (challenge.len() > 2).then_some(challenge)
}

/// APOP digest: lowercase hex MD5 of the challenge followed by the
/// password.
#[must_use]
pub fn apop_digest(challenge: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Base64 XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`
#[must_use]
pub fn xoauth2_payload(user: &str, token: &str) -> String {
    let auth_string = format!("user={user}\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
}
