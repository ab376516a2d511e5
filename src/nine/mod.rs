//! 9P2000 network adapter.
//!
//! Each accepted connection is split into three tasks joined by channels: a
//! [`read_task::ReadTask`] parsing frames off the socket, a
//! [`session::SessionTask`] holding the fid table and running VFS
//! operations, and a [`stream_writer::StreamWriter`] serialising replies.
//! Dropping any of the three tears the chain down and the connection with
//! it.

mod messages;
mod read_task;
mod session;
mod stream_writer;
pub mod wire;

use std::io;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::vfs::Vfs;

use read_task::ReadTask;
use session::SessionTask;
use stream_writer::StreamWriter;

/// Serves `vfs` to 9P2000 clients until the listener fails.
pub async fn serve(listener: TcpListener, vfs: Arc<dyn Vfs>) -> io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");
        socket.set_nodelay(true)?;
        process_socket(socket, Arc::clone(&vfs));
    }
}

fn process_socket(socket: TcpStream, vfs: Arc<dyn Vfs>) {
    let (readhalf, writehalf) = socket.into_split();

    let (request_send, request_recv) = messages::request_channel();
    let (reply_send, reply_recv) = messages::reply_channel();

    ReadTask::spawn(readhalf, request_send);
    SessionTask::spawn(vfs, request_recv, reply_send);
    StreamWriter::spawn(writehalf, reply_recv);
}
