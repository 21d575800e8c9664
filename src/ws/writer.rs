use futures_util::SinkExt;
use kameo::prelude::ActorRef;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::actor::{RealtimeActor, RealtimeEvent};
use crate::core::{LivenessStrategy, ReconnectStrategy, WsFrame};
use crate::transport::WsTransport;

/// Spawns the writer task for one transport instance.
///
/// The task owns the transport's write half and drains the outbound queue in order. It ends
/// when every queue sender is dropped or after a close frame went out, closing the sink either
/// way. A failed write is reported to the actor tagged with `epoch`. The task is detached so a
/// queued close frame still goes out after the actor has moved on.
pub(crate) fn spawn_writer<T, R, L>(
    mut writer: T::Writer,
    mut outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    actor_ref: ActorRef<RealtimeActor<T, R, L>>,
    epoch: u64,
    connection: String,
)
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = frame.is_close();
            if let Err(error) = writer.send(frame).await {
                warn!(connection = %connection, epoch, error = %error, "websocket writer send failed");
                let _ = actor_ref
                    .tell(RealtimeEvent::TransportError { epoch, error })
                    .send()
                    .await;
                return;
            }
            if closing {
                debug!(connection = %connection, epoch, "close frame written");
                break;
            }
        }
        let _ = writer.close().await;
    });
}
