//! POP3 connection configuration

use crate::auth::AuthMethod;
use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::time::Duration;

/// Default port for plain POP3.
pub const POP3_PORT: u16 = 110;

/// Default port for POP3 over implicit TLS.
pub const POP3S_PORT: u16 = 995;

/// Options handed to the TLS layer when [`Pop3Config::tls`] is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Skip certificate verification, for servers with self-signed
    /// certificates (local bridges, test servers).
    pub accept_invalid_certs: bool,
    /// Name to verify the certificate against, when it differs from
    /// the host connected to.
    pub server_name: Option<String>,
}

/// POP3 connection configuration
#[derive(Clone)]
pub struct Pop3Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// The password, or the `OAuth2` access token for the XOAUTH2 methods.
    pub password: String,
    pub auth: AuthMethod,
    pub tls: bool,
    pub tls_options: TlsOptions,
    /// Limit for connecting and for each read or write on the socket.
    pub timeout: Option<Duration>,
}

impl Pop3Config {
    /// Plain POP3 on port 110 with automatic authentication.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: POP3_PORT,
            username: username.into(),
            password: password.into(),
            auth: AuthMethod::Auto,
            tls: false,
            tls_options: TlsOptions::default(),
            timeout: None,
        }
    }

    /// POP3 over implicit TLS on port 995.
    #[must_use]
    pub fn secure(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            port: POP3S_PORT,
            tls: true,
            ..Self::new(host, username, password)
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_tls_options(mut self, options: TlsOptions) -> Self {
        self.tls = true;
        self.tls_options = options;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Load POP3 configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `POP3_USERNAME`
    /// - `POP3_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `POP3_HOST` (default: `127.0.0.1`)
    /// - `POP3_TLS` (default: `false`)
    /// - `POP3_PORT` (default: `110`, or `995` with TLS)
    /// - `POP3_AUTH` (default: `AUTO`)
    /// - `POP3_TLS_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `POP3_TIMEOUT_SECS` (default: none)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let tls = env_flag("POP3_TLS")?;
        let port = match env::var("POP3_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid POP3_PORT: {e}")))?,
            Err(_) if tls => POP3S_PORT,
            Err(_) => POP3_PORT,
        };
        let auth = match env::var("POP3_AUTH") {
            Ok(auth) => auth.parse()?,
            Err(_) => AuthMethod::Auto,
        };
        let timeout = env::var("POP3_TIMEOUT_SECS")
            .ok()
            .map(|secs| {
                secs.parse()
                    .map(Duration::from_secs)
                    .map_err(|e| Error::Config(format!("Invalid POP3_TIMEOUT_SECS: {e}")))
            })
            .transpose()?;

        Ok(Self {
            host: env::var("POP3_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            username: env::var("POP3_USERNAME")
                .map_err(|_| Error::Config("POP3_USERNAME not set".into()))?,
            password: env::var("POP3_PASSWORD")
                .map_err(|_| Error::Config("POP3_PASSWORD not set".into()))?,
            auth,
            tls,
            tls_options: TlsOptions {
                accept_invalid_certs: env_flag("POP3_TLS_ACCEPT_INVALID_CERTS")?,
                server_name: None,
            },
            timeout,
        })
    }

    /// Check that a login can be attempted at all.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("POP3 requires a host".into()));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::Config(
                "POP3 requires a username and password".into(),
            ));
        }
        let line_break = |s: &str| s.contains(['\r', '\n']);
        if line_break(&self.username) || line_break(&self.password) {
            return Err(Error::Config(
                "POP3 username and password can't contain line breaks".into(),
            ));
        }
        Ok(())
    }

    /// `host:port`, as used for connecting and in error messages.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Location of the maildrop, without the secret.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls { "pop3s" } else { "pop3" };
        format!("{scheme}://{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for Pop3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pop3Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .field("auth", &self.auth)
            .field("tls", &self.tls)
            .field("tls_options", &self.tls_options)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn env_flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(value) => parse_flag(&value)
            .ok_or_else(|| Error::Config(format!("Invalid {name}: {value:?}"))),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
