//! WebSocket Channel
//!
//! Peer link over tokio-tungstenite. The socket is split into a reader and
//! a writer task; the session side talks to them through unbounded mpsc
//! queues so it can stay synchronous and poll once per frame.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, error, info};

use crate::network::protocol::{NetMessage, WireFormat};
use crate::network::transport::{MessageChannel, TransportError};

/// Raw inbound frame; decoding happens on the session side so protocol
/// errors surface where they can be handled.
type Frame = Result<(WireFormat, Vec<u8>), tungstenite::Error>;

#[derive(Debug)]
pub struct WsChannel {
    format: WireFormat,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<Frame>,
}

impl WsChannel {
    /// Connect to a hosting peer, e.g. `ws://127.0.0.1:9050`.
    pub async fn connect(url: &str, format: WireFormat) -> Result<Self, TransportError> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to {}", url);
        Ok(Self::spawn(ws_stream, format))
    }

    /// Wait for one peer on `listener` and complete the handshake.
    pub async fn accept(listener: &TcpListener, format: WireFormat) -> Result<(Self, SocketAddr), TransportError> {
        let (stream, addr) = listener.accept().await?;
        let ws_stream = accept_async(stream).await?;
        info!("Peer connected from {}", addr);
        Ok((Self::spawn(ws_stream, format), addr))
    }

    fn spawn<S>(ws_stream: WebSocketStream<S>, format: WireFormat) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        // Writer ends when the channel is dropped
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => Ok((WireFormat::Json, text.into_bytes())),
                    Ok(Message::Binary(data)) => Ok((WireFormat::Binary, data)),
                    Ok(Message::Close(_)) => {
                        debug!("Peer closed the connection");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = in_tx.send(Err(e));
                        break;
                    }
                };
                if in_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        Self {
            format,
            outgoing: out_tx,
            incoming: in_rx,
        }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<NetMessage, TransportError> {
        match self.incoming.recv().await {
            Some(frame) => decode(frame),
            None => Err(TransportError::Closed),
        }
    }
}

fn decode(frame: Frame) -> Result<NetMessage, TransportError> {
    let (format, data) = frame?;
    Ok(NetMessage::decode(&data, format)?)
}

impl MessageChannel for WsChannel {
    fn send(&mut self, message: &NetMessage) -> Result<(), TransportError> {
        let frame = match self.format {
            WireFormat::Json => Message::Text(message.to_json().map_err(|e| TransportError::Protocol(e.into()))?),
            WireFormat::Binary => Message::Binary(message.to_bytes().map_err(|e| TransportError::Protocol(e.into()))?),
        };
        self.outgoing.send(frame).map_err(|_| TransportError::Closed)
    }

    fn try_recv(&mut self) -> Result<Option<NetMessage>, TransportError> {
        match self.incoming.try_recv() {
            Ok(frame) => decode(frame).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}
