//! UIDL command handler.
//!
//! RFC 1939 Section 7 (optional command). Lists `<n> <unique-id>`
//! pairs; the unique id stays the same across sessions.

use crate::fake_pop3::io::{write_line, write_multiline};
use crate::fake_pop3::maildrop::Snapshot;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UIDL command.
pub async fn handle_uidl<S: AsyncRead + AsyncWrite + Unpin>(
    arg: Option<&str>,
    snapshot: &Snapshot,
    stream: &mut BufReader<S>,
) {
    if let Some(arg) = arg {
        let resp = match snapshot.get(arg) {
            Some((n, m)) => format!("+OK {n} {}\r\n", m.uid),
            None => "-ERR no such message\r\n".to_string(),
        };
        let _ = write_line(stream, &resp).await;
        return;
    }

    let lines: Vec<Vec<u8>> = snapshot
        .live()
        .map(|(n, m)| format!("{n} {}", m.uid).into_bytes())
        .collect();
    let _ = write_multiline(stream, "+OK unique-id listing follows", &lines).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_pop3::maildrop::MaildropBuilder;
    use tokio::io::BufReader;

    async fn run(arg: Option<&str>, snapshot: &Snapshot) -> String {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        handle_uidl(arg, snapshot, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn lists_unique_ids() {
        let maildrop = MaildropBuilder::new()
            .message("abc", "x\r\n")
            .message("def", "y\r\n")
            .build();
        let output = run(None, &Snapshot::new(&maildrop)).await;
        assert_eq!(
            output,
            "+OK unique-id listing follows\r\n1 abc\r\n2 def\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn numbers_survive_deletion_marks() {
        let maildrop = MaildropBuilder::new()
            .message("abc", "x\r\n")
            .message("def", "y\r\n")
            .build();
        let mut snapshot = Snapshot::new(&maildrop);
        snapshot.delete(1);
        let output = run(None, &snapshot).await;
        assert!(output.contains("2 def"));
        assert!(!output.contains("abc"));
        assert_eq!(run(Some("2"), &snapshot).await, "+OK 2 def\r\n");
    }
}
