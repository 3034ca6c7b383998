//! Transport seam between the connection manager and a websocket library.

use std::{fmt::Debug, pin::Pin};

use futures_util::{
    future::{self, BoxFuture},
    stream::BoxStream,
    FutureExt, Sink, SinkExt, StreamExt,
};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::endpoint::{Endpoint, ParseEndpointError};

/// Error of the underlying transport
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum TransportError {
    /// endpoint can not be used to build a socket
    #[snafu(display("invalid endpoint: {source}"))]
    InvalidEndpoint {
        /// source error
        source: ParseEndpointError,
    },

    /// websocket handshake failed
    #[snafu(display("connect {url} failed: {source}"))]
    Connect {
        /// target url
        url: String,
        /// source error
        source: websocket::Error,
    },

    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },
}

/// Outgoing text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming text frames, ends when the peer closes
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An open socket
pub struct Socket {
    /// write half
    pub sink: FrameSink,
    /// read half
    pub stream: FrameStream,
}

impl Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// A socket whose handshake is in flight
pub type Opening = BoxFuture<'static, Result<Socket, TransportError>>;

/// Builds sockets to an endpoint.
///
/// `open` returning `Err` is a synchronous construction failure, like a
/// malformed endpoint. Failures while the handshake runs come out of the
/// returned future instead.
pub trait Transport: Send + Sync + 'static {
    /// start opening a socket to `endpoint`
    fn open(&self, endpoint: &str) -> Result<Opening, TransportError>;
}

/// Text websocket transport over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, endpoint: &str) -> Result<Opening, TransportError> {
        let endpoint: Endpoint = endpoint.parse().context(error::InvalidEndpoint)?;

        log::debug!("Connecting endpoint: {}", endpoint);

        Ok(connect(endpoint).boxed())
    }
}

async fn connect(endpoint: Endpoint) -> Result<Socket, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(endpoint.url())
        .await
        .with_context(|_| error::Connect {
            url: endpoint.to_string(),
        })?;

    let (sink, stream) = ws.split();

    let sink = sink
        .sink_map_err(|source| TransportError::Websocket { source })
        .with(|text: String| {
            future::ready(Ok::<_, TransportError>(websocket::Message::Text(text)))
        });

    let stream = stream.filter_map(|frame| {
        future::ready(match frame {
            Ok(websocket::Message::Text(text)) => Some(Ok(text)),
            Ok(websocket::Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => Some(Ok(text)),
                Err(_) => {
                    log::warn!("Received non-utf8 binary frame, ignored");
                    None
                }
            },
            Ok(websocket::Message::Close(frame)) => {
                log::debug!("Received close frame: {:?}", frame);
                None
            }
            // control frames are answered by tungstenite itself
            Ok(_) => None,
            Err(source) => Some(Err(TransportError::Websocket { source })),
        })
    });

    Ok(Socket {
        sink: Box::pin(sink),
        stream: stream.boxed(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_open_rejects_malformed_endpoint() {
        for endpoint in ["http://127.0.0.1:5001", "::"] {
            match TungsteniteTransport.open(endpoint) {
                Err(err) => assert!(matches!(err, TransportError::InvalidEndpoint { .. })),
                Ok(_) => panic!("{} should be rejected", endpoint),
            }
        }
    }
}
