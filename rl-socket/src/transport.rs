//! Socket transport.
//!
//! A [`Connector`] opens one [`Link`] per connection attempt. A link is the
//! whole socket resource: text frames go out through an unbounded sender,
//! inbound traffic arrives as [`Frame`]s, and any pump tasks backing it are
//! owned by the link and aborted when it is dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use rl_core::error::{RlError, RlResult};

/// How long a closing link waits for its writer to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Inbound traffic on a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame, passed on undecoded.
    Binary(Vec<u8>),
    /// The transport reported an error. The link stays up until `Closed`.
    Error(String),
    /// The socket closed, with the peer's reason if it gave one.
    Closed(Option<String>),
}

/// One live socket.
pub struct Link {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::Receiver<Frame>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Wrap the two channel ends of a socket.
    pub fn new(outbound: mpsc::UnboundedSender<String>, inbound: mpsc::Receiver<Frame>) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            writer: None,
            reader: None,
        }
    }

    /// An in-memory link and the peer end that drives it.
    pub fn pair(buffer: usize) -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            Link::new(out_tx, in_rx),
            LinkPeer {
                frames: in_tx,
                sent: out_rx,
            },
        )
    }

    /// Attach the task that drains outbound frames into the socket.
    ///
    /// On a graceful close it is given a short grace period to finish.
    pub fn with_writer(mut self, task: JoinHandle<()>) -> Self {
        self.writer = Some(task);
        self
    }

    /// Attach the task that feeds inbound frames. Aborted on close.
    pub fn with_reader(mut self, task: JoinHandle<()>) -> Self {
        self.reader = Some(task);
        self
    }

    /// A sender for outbound text frames.
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.outbound.clone()
    }

    /// Next inbound frame. `None` means the peer side is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Close the link, letting the writer flush first.
    ///
    /// Clones handed out by [`Link::sender`] must be dropped for the writer
    /// to see the end of the outbound stream.
    pub async fn close(mut self) {
        self.outbound.take();
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                debug!("link writer did not finish within grace period");
                writer.abort();
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// The far end of an in-memory [`Link`].
pub struct LinkPeer {
    frames: mpsc::Sender<Frame>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl LinkPeer {
    /// Deliver a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> RlResult<()> {
        self.push(Frame::Text(text.into())).await
    }

    /// Deliver a binary frame.
    pub async fn send_binary(&self, bytes: Vec<u8>) -> RlResult<()> {
        self.push(Frame::Binary(bytes)).await
    }

    /// Report a transport error.
    pub async fn send_error(&self, message: impl Into<String>) -> RlResult<()> {
        self.push(Frame::Error(message.into())).await
    }

    /// Close the link from the peer side.
    pub async fn close(&self, reason: Option<String>) -> RlResult<()> {
        self.push(Frame::Closed(reason)).await
    }

    /// Next frame the link sent, or `None` once the link is gone.
    pub async fn recv_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    async fn push(&self, frame: Frame) -> RlResult<()> {
        self.frames.send(frame).await.map_err(|_| RlError::SocketClosed)
    }
}

/// Opens links to a producer endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link to `url`.
    async fn connect(&self, url: &str) -> RlResult<Link>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    frame_buffer: usize,
}

impl WsConnector {
    /// Connector whose links buffer up to `frame_buffer` inbound frames.
    pub fn new(frame_buffer: usize) -> Self {
        Self {
            frame_buffer: frame_buffer.max(1),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(rl_core::constants::DEFAULT_FRAME_BUFFER)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> RlResult<Link> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RlError::Connect(format!("{url}: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::channel::<Frame>(self.frame_buffer);

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("websocket send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => Frame::Binary(bytes.to_vec()),
                    Ok(Message::Close(close)) => {
                        let reason = close
                            .map(|c| c.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(Frame::Closed(reason)).await;
                        return;
                    }
                    // Ping/pong is answered by tungstenite itself.
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Frame::Error(e.to_string())).await;
                        let _ = in_tx.send(Frame::Closed(None)).await;
                        return;
                    }
                };
                if in_tx.send(frame).await.is_err() {
                    return;
                }
            }
            let _ = in_tx.send(Frame::Closed(None)).await;
        });

        Ok(Link::new(out_tx, in_rx).with_writer(writer).with_reader(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_frames_both_ways() {
        let (mut link, mut peer) = Link::pair(8);

        peer.send_text("{\"a\":1}").await.unwrap();
        peer.send_error("boom").await.unwrap();
        peer.close(Some("bye".into())).await.unwrap();
        assert_eq!(link.recv().await, Some(Frame::Text("{\"a\":1}".into())));
        assert_eq!(link.recv().await, Some(Frame::Error("boom".into())));
        assert_eq!(link.recv().await, Some(Frame::Closed(Some("bye".into()))));

        link.sender().unwrap().send("out".into()).unwrap();
        assert_eq!(peer.recv_sent().await.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn test_dropping_link_ends_peer() {
        let (link, mut peer) = Link::pair(1);
        drop(link);
        assert!(peer.recv_sent().await.is_none());
        assert!(matches!(peer.send_text("x").await, Err(RlError::SocketClosed)));
    }

    #[tokio::test]
    async fn test_recv_none_when_peer_dropped() {
        let (mut link, peer) = Link::pair(1);
        drop(peer);
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_ws_connect_refused() {
        // Port 1 on loopback is essentially never listening.
        let result = WsConnector::default().connect("ws://127.0.0.1:1").await;
        assert!(matches!(result, Err(RlError::Connect(_))));
    }
}
