//! Connection read loop.

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::RequestSender;
use super::wire::{self, Tmessage, MAX_MSIZE};

/// Reads frames from the socket, parses them, and forwards requests to the
/// session task. Stops on end of stream, on a malformed frame, or when the
/// session has gone away.
pub struct ReadTask {
    readhalf: OwnedReadHalf,
    requests: RequestSender,
}

impl ReadTask {
    pub fn spawn(readhalf: OwnedReadHalf, requests: RequestSender) -> JoinHandle<()> {
        tokio::spawn(Self { readhalf, requests }.run())
    }

    async fn run(mut self) {
        loop {
            match self.read_frame().await {
                Ok(Some((tag, message))) => {
                    if self.requests.send(tag, message).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("client closed the connection");
                    break;
                }
                Err(err) => {
                    warn!(%err, "dropping connection");
                    break;
                }
            }
        }
    }

    /// Reads one `size[4] type[1] tag[2] ...` frame. `None` means the peer
    /// closed the stream between frames.
    async fn read_frame(&mut self) -> wire::Result<Option<(u16, Tmessage)>> {
        let mut size_buf = [0u8; 4];
        match self.readhalf.read_exact(&mut size_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(wire::Error::Io(err)),
        }
        let size = u32::from_le_bytes(size_buf);
        if size < 7 || size > MAX_MSIZE {
            return Err(wire::Error::BadFrameSize(size));
        }

        let mut body = vec![0u8; size as usize - 4];
        self.readhalf.read_exact(&mut body).await.map_err(wire::Error::Io)?;
        wire::parse_message(&body).map(Some)
    }
}
