//! In-process fake POP3 server for integration testing
//!
//! # How POP3 works (educational overview)
//!
//! POP3 (Post Office Protocol version 3, RFC 1939) is a line-based
//! protocol for downloading mail from a maildrop. Unlike IMAP there are
//! no folders, flags or tags: one command, one reply.
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP (port 110, or 995 with implicit TLS)
//!       |
//!   Server sends greeting: "+OK POP3 ready <1.2@host>\r\n"
//!       |
//!   AUTHORIZATION: USER/PASS, APOP or AUTH
//!       |
//!   TRANSACTION: STAT, LIST, UIDL, RETR, TOP, DELE, NOOP
//!       |
//!   Client sends QUIT -> UPDATE: messages marked by DELE are removed
//! ```
//!
//! ## Replies
//!
//! Every reply starts with `+OK` or `-ERR`. Commands returning a
//! listing or a message follow the status line with data lines and
//! end with a line holding a single `.`; data lines starting with `.`
//! are dot-stuffed.
//!
//! ## Message numbers
//!
//! Messages are numbered from 1 per connection. The numbers shift when
//! deleted messages are removed, so clients track messages across
//! sessions by their UIDL unique ids instead.

use super::handlers::{
    handle_apop, handle_auth, handle_dele, handle_list, handle_noop, handle_pass, handle_quit,
    handle_retr, handle_stat, handle_top, handle_uidl, handle_user,
};
use super::io::write_line;
use super::maildrop::{Maildrop, Snapshot, TestMessage};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Knobs for server behaviour that differs between real POP3 servers.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub username: String,
    pub password: String,
    /// Bearer token accepted by AUTH XOAUTH2.
    pub token: String,
    /// APOP challenge appended to the greeting. APOP is refused without
    /// one.
    pub challenge: Option<String>,
    /// Replaces the whole greeting line.
    pub greeting: Option<String>,
    pub user_pass: bool,
    pub uidl: bool,
    pub xoauth2: bool,
    /// Line sent to ask for a separate XOAUTH2 payload.
    pub xoauth2_continuation: String,
    /// Send an extra empty line at the end of every RETR.
    pub trailing_blank_line: bool,
    /// Close the connection without replying when this command arrives.
    pub drop_on: Option<String>,
    /// Speak implicit TLS (POP3S).
    pub tls: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            username: "testuser".to_string(),
            password: "testpass".to_string(),
            token: "testtoken".to_string(),
            challenge: None,
            greeting: None,
            user_pass: true,
            uidl: true,
            xoauth2: true,
            xoauth2_continuation: "+ ".to_string(),
            trailing_blank_line: false,
            drop_on: None,
            tls: false,
        }
    }
}

/// State shared by all connections.
#[derive(Debug, Default)]
struct Shared {
    maildrop: Maildrop,
    /// Every command received, in order, across connections.
    commands: Vec<String>,
    #[allow(dead_code)]
    connections: usize,
    /// Bumped by [`FakePop3Server::sever`]; connections opened under an
    /// older epoch hang up on their next command.
    epoch: u64,
}

/// A fake POP3 server that runs on localhost with an OS-assigned port.
///
/// With [`ServerOptions::tls`] set it generates a self-signed
/// certificate at startup using `rcgen` and speaks implicit TLS.
pub struct FakePop3Server {
    port: u16,
    shared: Arc<Mutex<Shared>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakePop3Server {
    /// Start a plain-text server with default options.
    pub async fn start(maildrop: Maildrop) -> Self {
        Self::start_with(maildrop, ServerOptions::default()).await
    }

    /// Start a server holding `maildrop`.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate if TLS is enabled.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    POP3.
    pub async fn start_with(maildrop: Maildrop, options: ServerOptions) -> Self {
        // Multiple tests may race to install the provider, so the
        // error is ignored if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let acceptor = options.tls.then(tls_acceptor);
        let shared = Arc::new(Mutex::new(Shared {
            maildrop,
            ..Shared::default()
        }));
        let options = Arc::new(options);

        let state = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let shared = state.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let epoch = {
                        let mut shared = shared.lock().unwrap();
                        shared.connections += 1;
                        shared.epoch
                    };
                    match acceptor {
                        Some(acceptor) => {
                            let Ok(tls) = acceptor.accept(stream).await else {
                                return;
                            };
                            handle_session(tls, &shared, &options, epoch).await;
                        }
                        None => handle_session(stream, &shared, &options, epoch).await,
                    }
                });
            }
        });

        Self {
            port,
            shared,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far, secrets included.
    #[allow(dead_code)]
    pub fn commands(&self) -> Vec<String> {
        self.shared.lock().unwrap().commands.clone()
    }

    /// Number of connections accepted so far.
    #[allow(dead_code)]
    pub fn connections(&self) -> usize {
        self.shared.lock().unwrap().connections
    }

    /// Make every open connection hang up on its next command, the way
    /// an idle timeout or a network drop would.
    #[allow(dead_code)]
    pub fn sever(&self) {
        self.shared.lock().unwrap().epoch += 1;
    }

    /// Unique ids of the messages currently in the maildrop.
    pub fn uids(&self) -> Vec<String> {
        self.shared.lock().unwrap().maildrop.uids()
    }

    /// Remove a message behind the client's back, as another client
    /// would.
    #[allow(dead_code)]
    pub fn remove(&self, uid: &str) {
        self.shared
            .lock()
            .unwrap()
            .maildrop
            .messages
            .retain(|m| m.uid != uid);
    }

    /// Deliver a new message.
    #[allow(dead_code)]
    pub fn deliver(&self, uid: &str, raw: impl Into<Vec<u8>>) {
        self.shared
            .lock()
            .unwrap()
            .maildrop
            .messages
            .push(TestMessage {
                uid: uid.to_string(),
                raw: raw.into(),
            });
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
        .expect("generate self-signed cert");

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");

    TlsAcceptor::from(Arc::new(tls_config))
}

fn greeting(options: &ServerOptions) -> String {
    if let Some(greeting) = &options.greeting {
        return format!("{greeting}\r\n");
    }
    match &options.challenge {
        Some(challenge) => format!("+OK POP3 fake server ready {challenge}\r\n"),
        None => "+OK POP3 fake server ready\r\n".to_string(),
    }
}

/// Run one POP3 session: greeting, authorization, then the transaction
/// loop until QUIT or the client goes away.
///
/// The maildrop is snapshotted at login; DELE marks are applied to the
/// shared maildrop only when the session ends with QUIT.
#[allow(clippy::too_many_lines)]
async fn handle_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    shared: &Mutex<Shared>,
    options: &ServerOptions,
    epoch: u64,
) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, &greeting(options)).await.is_err() {
        return;
    }

    let mut user: Option<String> = None;
    let mut snapshot: Option<Snapshot> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        let (keyword, args) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let keyword = keyword.to_ascii_uppercase();
        let arg = (!args.is_empty()).then_some(args);

        {
            let mut shared = shared.lock().unwrap();
            shared.commands.push(trimmed.to_string());
            if shared.epoch != epoch {
                break;
            }
        }
        if options.drop_on.as_deref() == Some(keyword.as_str()) {
            break;
        }

        if snapshot.is_none() {
            let logged_in = match keyword.as_str() {
                "USER" => {
                    user = handle_user(args, options, &mut reader).await;
                    false
                }
                "PASS" => handle_pass(user.as_deref(), args, options, &mut reader).await,
                "APOP" => handle_apop(args, options, &mut reader).await,
                "AUTH" => handle_auth(args, options, &mut reader).await,
                "QUIT" => {
                    handle_quit(0, &mut reader).await;
                    break;
                }
                _ => {
                    let _ = write_line(&mut reader, "-ERR not authenticated\r\n").await;
                    false
                }
            };
            if logged_in {
                snapshot = Some(Snapshot::new(&shared.lock().unwrap().maildrop));
            }
            continue;
        }
        let Some(transaction) = snapshot.as_mut() else {
            continue;
        };

        match (keyword.as_str(), arg) {
            ("NOOP", _) => handle_noop(&mut reader).await,
            ("STAT", _) => handle_stat(transaction, &mut reader).await,
            ("LIST", arg) => handle_list(arg, transaction, &mut reader).await,
            ("UIDL", arg) if options.uidl => handle_uidl(arg, transaction, &mut reader).await,
            ("RETR", Some(arg)) => {
                handle_retr(arg, transaction, options.trailing_blank_line, &mut reader).await;
            }
            ("TOP", Some(args)) => handle_top(args, transaction, &mut reader).await,
            ("DELE", Some(arg)) => handle_dele(arg, transaction, &mut reader).await,
            ("QUIT", _) => {
                let deleted = transaction.deleted_uids();
                shared
                    .lock()
                    .unwrap()
                    .maildrop
                    .messages
                    .retain(|m| !deleted.contains(&m.uid));
                handle_quit(deleted.len(), &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("-ERR unknown command {keyword}\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
