//! STAT command handler.
//!
//! RFC 1939 Section 5: `+OK <count> <octets>`, counting only messages
//! not marked as deleted.

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Snapshot;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the STAT command.
pub async fn handle_stat<S: AsyncRead + AsyncWrite + Unpin>(
    snapshot: &Snapshot,
    stream: &mut BufReader<S>,
) {
    let (count, size) = snapshot
        .live()
        .fold((0, 0), |(count, size), (_, m)| (count + 1, size + m.size()));
    let resp = format!("+OK {count} {size}\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_pop3::maildrop::MaildropBuilder;
    use tokio::io::BufReader;

    async fn run(snapshot: &Snapshot) -> String {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        handle_stat(snapshot, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn counts_messages_and_octets() {
        let maildrop = MaildropBuilder::new()
            .message("a", "abc\r\n")
            .message("b", "hello\r\n")
            .build();
        assert_eq!(run(&Snapshot::new(&maildrop)).await, "+OK 2 12\r\n");
    }

    #[tokio::test]
    async fn skips_deleted() {
        let maildrop = MaildropBuilder::new()
            .message("a", "abc\r\n")
            .message("b", "hello\r\n")
            .build();
        let mut snapshot = Snapshot::new(&maildrop);
        snapshot.delete(1);
        assert_eq!(run(&snapshot).await, "+OK 1 7\r\n");
    }
}
