//! In-memory transport standing in for the gesture service in tests.

use std::{collections::VecDeque, io, sync::Arc};

use futures_util::{future, sink, stream, FutureExt, StreamExt};
use parking_lot::Mutex;
use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite as websocket;

use crate::ws::{
    endpoint::Endpoint,
    transport::{self, Opening, Socket, Transport, TransportError},
};

/// How the next opened socket behaves
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// handshake succeeds immediately
    Accept,
    /// handshake fails immediately
    Refuse,
    /// handshake waits for [`MockTransport::release`]
    Hold,
}

type Inbound = mpsc::UnboundedSender<Result<String, TransportError>>;

/// Service side of one opened socket
#[derive(Debug, Clone, Default)]
pub(crate) struct MockPeer {
    inbound: Arc<Mutex<Option<Inbound>>>,
    written: Arc<Mutex<Vec<String>>>,
}

impl MockPeer {
    /// service sends a text frame
    pub fn push(&self, frame: &str) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    /// transport breaks
    pub fn fail(&self) {
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(Err(TransportError::Websocket {
                source: websocket::Error::ConnectionClosed,
            }));
        }
    }

    /// service closes the socket cleanly
    pub fn close(&self) {
        self.inbound.lock().take();
    }

    /// frames written by the client
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    fn socket(&self) -> Socket {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);

        let sink = sink::unfold(self.written.clone(), |written, frame: String| async move {
            written.lock().push(frame);
            Ok::<_, TransportError>(written)
        });
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Socket {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    script: VecDeque<Outcome>,
    fallback: Outcome,
    attempts: usize,
    peers: Vec<MockPeer>,
    held: Vec<Option<oneshot::Sender<bool>>>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// every attempt ends with `fallback` once `script` runs out
    pub fn new(script: &[Outcome], fallback: Outcome) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                script: script.iter().copied().collect(),
                fallback,
                attempts: 0,
                peers: Vec::new(),
                held: Vec::new(),
            })),
        }
    }

    /// number of sockets the manager asked for
    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    /// peer of the n-th socket that was accepted or held, refused ones are not counted
    pub fn peer(&self, n: usize) -> MockPeer {
        self.inner.lock().peers[n].clone()
    }

    /// finish the n-th handshake if it is held, same numbering as `peer`
    pub fn release(&self, n: usize, accept: bool) {
        if let Some(tx) = self.inner.lock().held[n].take() {
            let _ = tx.send(accept);
        }
    }
}

fn refused(endpoint: &str) -> TransportError {
    TransportError::Connect {
        url: endpoint.to_string(),
        source: websocket::Error::Io(io::ErrorKind::ConnectionRefused.into()),
    }
}

impl Transport for MockTransport {
    fn open(&self, endpoint: &str) -> Result<Opening, TransportError> {
        let _: Endpoint = endpoint
            .parse()
            .context(transport::error::InvalidEndpoint)?;

        let mut inner = self.inner.lock();
        inner.attempts += 1;
        let outcome = inner.script.pop_front().unwrap_or(inner.fallback);

        let endpoint = endpoint.to_string();
        let opening = match outcome {
            Outcome::Refuse => future::ready(Err(refused(&endpoint))).boxed(),
            Outcome::Accept => {
                let peer = MockPeer::default();
                inner.peers.push(peer.clone());
                inner.held.push(None);
                future::ready(Ok(peer.socket())).boxed()
            }
            Outcome::Hold => {
                let peer = MockPeer::default();
                inner.peers.push(peer.clone());
                let (tx, rx) = oneshot::channel();
                inner.held.push(Some(tx));
                async move {
                    match rx.await {
                        Ok(true) => Ok(peer.socket()),
                        _ => Err(refused(&endpoint)),
                    }
                }
                .boxed()
            }
        };

        Ok(opening)
    }
}
