//! Connection write loop.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tracing::warn;

use super::messages::ReplyReceiver;
use super::wire;

/// Serialises session replies onto the socket write half. Exits when the
/// session drops its sender or the socket rejects a write.
pub struct StreamWriter {
    writehalf: OwnedWriteHalf,
    replies: ReplyReceiver,
}

impl StreamWriter {
    pub fn spawn(writehalf: OwnedWriteHalf, replies: ReplyReceiver) -> JoinHandle<()> {
        tokio::spawn(Self { writehalf, replies }.run())
    }

    async fn run(mut self) {
        while let Some((tag, message)) = self.replies.recv().await {
            let frame = match wire::encode_message(tag, &message) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, tag, "unencodable reply");
                    break;
                }
            };
            if let Err(err) = self.writehalf.write_all(&frame).await {
                warn!(%err, "write failed, closing connection");
                break;
            }
        }
    }
}
