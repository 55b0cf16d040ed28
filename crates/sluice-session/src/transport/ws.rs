//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{Connector, FrameSink, FrameSource, Link, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket links with `connect_async`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (tx, rx) = ws.split();
        Ok((Box::new(WsSink { tx }), Box::new(WsSource { rx })))
    }
}

struct WsSink {
    tx: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.tx
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WsSource {
    rx: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> TransportEvent {
        loop {
            match self.rx.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Text(text),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server sent close frame");
                    return TransportEvent::Closed { clean: true };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    return TransportEvent::Closed { clean: false };
                }
                None => return TransportEvent::Closed { clean: false },
            }
        }
    }
}
