// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text-frame links to the realtime broker and the dialers that open them.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::error::TransportError;

/// An open, bidirectional stream of text frames.
///
/// Dropping `outbound` closes the link. `inbound` yields `None` once the
/// remote end is gone.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// The far side of an in-process [`Link`].
pub struct LinkPeer {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl Link {
    /// Create a connected in-process link pair.
    pub fn pair() -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let link = Link { outbound: out_tx, inbound: in_rx };
        (link, LinkPeer { to_client: in_tx, from_client: out_rx })
    }
}

/// Opens links to the broker.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// Dials real WebSocket endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        crate::ensure_crypto_provider();
        let url = url.to_owned();
        Box::pin(async move {
            let (ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(dial_error)?;
            let (link, mut peer) = Link::pair();
            let (mut ws_tx, mut ws_rx) = ws.split();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        out = peer.from_client.recv() => {
                            let Some(text) = out else {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            };
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        msg = ws_rx.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if peer.to_client.send(text.to_string()).is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(e)) => {
                                    debug!(err = %e, "realtime socket error");
                                    break;
                                }
                                _ => {} // ping/pong/binary
                            }
                        }
                    }
                }
                debug!(url = %url, "realtime socket closed");
            });

            Ok(link)
        })
    }
}

fn dial_error(e: tungstenite::Error) -> TransportError {
    match &e {
        tungstenite::Error::Http(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
            TransportError::Unauthorized(format!("handshake rejected ({})", resp.status()))
        }
        _ => TransportError::Connect(e.to_string()),
    }
}
