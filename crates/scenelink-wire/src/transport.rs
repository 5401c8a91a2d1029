//! Async TCP transport to the render server
//!
//! One connection, three tasks: a writer draining the outbound queue in
//! order, a reader pushing decoded server messages into a bounded queue,
//! and a dispatcher handing them to the registered [`InboundHandler`].

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::{decode_body, read_frame, write_frame, CodecError, Encoder};
use crate::messages::{ClientMessage, ServerMessage};

/// Default capacity of the inbound message queue
pub const DEFAULT_INBOUND_QUEUE: usize = 64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Connection to renderer was lost")]
    Disconnected,
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Receiver of messages pushed back by the render server
///
/// Called from the dispatcher task, one message at a time.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_message(&self, msg: ServerMessage);

    /// The receive path ended (server closed the connection or release)
    fn on_disconnect(&self) {}
}

/// Outbound side of a renderer connection
#[allow(async_fn_in_trait)]
pub trait MessageSink {
    /// Queue a message; delivery order matches call order
    fn send(&mut self, msg: ClientMessage) -> Result<(), TransportError>;

    /// Whether sent messages can still reach the renderer
    fn is_connected(&self) -> bool {
        true
    }

    /// Flush queued messages and close the connection
    async fn release(&mut self);
}

struct Link {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Single-connection transport
pub struct Transport {
    inbound_queue: usize,
    link: Option<Link>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::with_inbound_queue(DEFAULT_INBOUND_QUEUE)
    }

    pub fn with_inbound_queue(capacity: usize) -> Self {
        Self {
            inbound_queue: capacity.max(1),
            link: None,
        }
    }

    /// Connect to `address` (`host:port`), replacing any existing link
    ///
    /// On failure the transport stays disconnected and sends return
    /// [`TransportError::NotConnected`].
    pub async fn connect(
        &mut self,
        address: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError> {
        self.release().await;

        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream
            .peer_addr()
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(self.inbound_queue);

        let writer = tokio::spawn(write_loop(write_half, out_rx));
        let reader = tokio::spawn(read_loop(read_half, in_tx));
        let dispatcher = tokio::spawn(dispatch_loop(in_rx, handler));

        info!(%peer, "Connected to renderer");
        self.link = Some(Link {
            peer,
            outbound: out_tx,
            writer,
            reader,
            dispatcher,
        });
        Ok(())
    }

    /// Whether a link exists and its writer is still running
    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| !link.outbound.is_closed())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    /// Queue a message for the writer task
    pub fn send(&self, msg: ClientMessage) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outbound
            .send(msg)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Flush pending sends, close the socket and stop the receive path
    ///
    /// No handler calls happen after this returns. Safe to call repeatedly.
    pub async fn release(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let Link {
            peer,
            outbound,
            writer,
            reader,
            dispatcher,
        } = link;

        drop(outbound);
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
        reader.abort();
        match reader.await {
            Err(e) if !e.is_cancelled() => warn!(error = %e, "Reader task failed"),
            _ => {}
        }
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "Dispatcher task failed");
        }
        info!(%peer, "Released renderer connection");
    }
}

impl MessageSink for Transport {
    fn send(&mut self, msg: ClientMessage) -> Result<(), TransportError> {
        Transport::send(self, msg)
    }

    fn is_connected(&self) -> bool {
        Transport::is_connected(self)
    }

    async fn release(&mut self) {
        Transport::release(self).await
    }
}

async fn write_loop(mut socket: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<ClientMessage>) {
    let mut encoder = Encoder::new();
    while let Some(msg) = outbound.recv().await {
        let frame = match encoder.encode_client(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping message that failed to encode");
                continue;
            }
        };
        trace!(channel = ?msg.channel(), len = frame.len(), "Sending message");
        if let Err(e) = write_frame(&mut socket, &frame).await {
            warn!(error = %e, "Renderer connection lost while sending");
            return;
        }
    }

    if let Err(e) = socket.shutdown().await {
        debug!(error = %e, "Socket shutdown failed");
    }
}

async fn read_loop(mut socket: OwnedReadHalf, inbound: mpsc::Sender<ServerMessage>) {
    loop {
        let body = match read_frame(&mut socket).await {
            Ok(Some((header, body))) => {
                trace!(channel = ?header.channel, seq = header.seq, len = body.len(), "Received frame");
                body
            }
            Ok(None) => {
                debug!("Renderer closed the connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from renderer");
                return;
            }
        };

        let msg = match decode_body::<ServerMessage>(&body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable server message");
                continue;
            }
        };

        if inbound.send(msg).await.is_err() {
            return;
        }
    }
}

async fn dispatch_loop(mut inbound: mpsc::Receiver<ServerMessage>, handler: Arc<dyn InboundHandler>) {
    while let Some(msg) = inbound.recv().await {
        handler.on_message(msg);
    }
    handler.on_disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ImageMessage, RendererAction};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    struct Recorder {
        messages: mpsc::UnboundedSender<ServerMessage>,
        disconnected: AtomicBool,
    }

    impl InboundHandler for Recorder {
        fn on_message(&self, msg: ServerMessage) {
            let _ = self.messages.send(msg);
        }

        fn on_disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Recorder {
            messages: tx,
            disconnected: AtomicBool::new(false),
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let transport = Transport::new();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(RendererAction::Init.into()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handler, _rx) = recorder();
        let mut transport = Transport::new();
        let result = transport.connect(&addr.to_string(), handler).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert!(matches!(
            transport.send(RendererAction::Start.into()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_ordered_delivery_and_inbound_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            while let Some((_, body)) = read_frame(&mut socket).await.unwrap() {
                let msg: ClientMessage = decode_body(&body).unwrap();
                let start = msg == ClientMessage::Control(RendererAction::Start);
                received.push(msg);
                if start {
                    let mut encoder = Encoder::new();
                    let reply = encoder
                        .encode_server(&ServerMessage::FrameRendered(1.0))
                        .unwrap();
                    write_frame(&mut socket, &reply).await.unwrap();
                }
            }
            received
        });

        let (handler, mut rx) = recorder();
        let mut transport = Transport::new();
        transport.connect(&addr.to_string(), handler.clone()).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.peer(), Some(addr));

        let sent = vec![
            ClientMessage::Control(RendererAction::Init),
            ClientMessage::CreatePlugin {
                name: "Box".into(),
                kind: "GeomStaticMesh".into(),
            },
            ClientMessage::RemovePlugin { name: "Old".into() },
            ClientMessage::Control(RendererAction::Start),
        ];
        for msg in &sent {
            transport.send(msg.clone()).unwrap();
        }

        let reply = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(reply, Some(ServerMessage::FrameRendered(1.0)));

        transport.release().await;
        assert!(!transport.is_connected());
        assert!(handler.disconnected.load(Ordering::SeqCst));

        let received = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(received, sent);
    }

    struct SlowRecorder {
        messages: mpsc::UnboundedSender<ServerMessage>,
    }

    impl InboundHandler for SlowRecorder {
        fn on_message(&self, msg: ServerMessage) {
            std::thread::sleep(Duration::from_millis(5));
            let _ = self.messages.send(msg);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inbound_order_with_full_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let pushed = vec![
            ServerMessage::Progress(0.25),
            ServerMessage::Image(ImageMessage::rgba_real(1, 1, &[0.1, 0.2, 0.3, 1.0])),
            ServerMessage::FrameRendered(1.0),
            ServerMessage::Progress(0.5),
            ServerMessage::Image(ImageMessage::rgba_bucket(0, 0, 1, 1, &[1.0; 4])),
            ServerMessage::FrameRendered(2.0),
            ServerMessage::RenderFinished,
        ];
        let to_push = pushed.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut encoder = Encoder::new();
            for msg in &to_push {
                let frame = encoder.encode_server(msg).unwrap();
                write_frame(&mut socket, &frame).await.unwrap();
            }
            // Hold the connection open until the client releases it
            while read_frame(&mut socket).await.unwrap().is_some() {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(SlowRecorder { messages: tx });
        let mut transport = Transport::with_inbound_queue(1);
        transport.connect(&addr.to_string(), handler).await.unwrap();

        let mut received = Vec::new();
        while received.len() < pushed.len() {
            let msg = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
            received.push(msg.unwrap());
        }
        assert_eq!(received, pushed);

        transport.release().await;
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let mut transport = Transport::new();
        transport.release().await;
        transport.release().await;
        assert!(transport.peer().is_none());
    }
}
