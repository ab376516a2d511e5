//! Typed channel endpoints connecting the per-connection tasks.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

use super::wire::{Rmessage, Tmessage};

/// A parsed request together with its client-chosen tag.
pub type Request = (u16, Tmessage);

/// A reply together with the tag it answers.
pub type Reply = (u16, Rmessage);

/// Sender side of the request pipeline, read task to session.
pub struct RequestSender {
    sender: mpsc::UnboundedSender<Request>,
}

impl RequestSender {
    pub fn send(&self, tag: u16, message: Tmessage) -> Result<(), SendError<Request>> {
        self.sender.send((tag, message))
    }
}

/// Receiver side of the request pipeline.
pub struct RequestReceiver {
    recv: mpsc::UnboundedReceiver<Request>,
}

impl RequestReceiver {
    pub async fn recv(&mut self) -> Option<Request> {
        self.recv.recv().await
    }
}

/// Sender side of the reply pipeline, session to stream writer.
pub struct ReplySender {
    sender: mpsc::UnboundedSender<Reply>,
}

impl ReplySender {
    pub fn send(&self, tag: u16, message: Rmessage) -> Result<(), SendError<Reply>> {
        self.sender.send((tag, message))
    }

    pub fn send_error(&self, tag: u16, ename: &str) -> Result<(), SendError<Reply>> {
        self.send(tag, Rmessage::Error { ename: ename.to_owned() })
    }
}

/// Receiver side of the reply pipeline.
pub struct ReplyReceiver {
    recv: mpsc::UnboundedReceiver<Reply>,
}

impl ReplyReceiver {
    pub async fn recv(&mut self) -> Option<Reply> {
        self.recv.recv().await
    }
}

/// Creates the request pipeline for one connection.
pub fn request_channel() -> (RequestSender, RequestReceiver) {
    let (sender, recv) = mpsc::unbounded_channel();
    (RequestSender { sender }, RequestReceiver { recv })
}

/// Creates the reply pipeline for one connection.
pub fn reply_channel() -> (ReplySender, ReplyReceiver) {
    let (sender, recv) = mpsc::unbounded_channel();
    (ReplySender { sender }, ReplyReceiver { recv })
}
