use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};
use url::Url;

use crate::core::{RealtimeError, RealtimeResult, WsFrame};

pub mod tungstenite;

/// Boxed future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = RealtimeResult<(R, W)>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The actor owns state and policies; the transport only establishes a socket and hands back
/// its read and write halves. Tests swap in [`crate::testing::MockTransport`].
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = RealtimeResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = RealtimeError> + Send + Unpin + 'static;

    fn connect(&self, address: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}

/// Validates a push endpoint address before a transport is constructed for it.
pub fn parse_address(address: &str) -> RealtimeResult<Url> {
    let url = Url::parse(address).map_err(|err| RealtimeError::InvalidAddress {
        address: address.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(RealtimeError::InvalidAddress {
            address: address.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
