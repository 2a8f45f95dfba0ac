use super::fanout::WebSocketFanout;
use super::registry::ConnectionRegistry;
use crate::transport::runtime::sleep_with_shutdown;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Re-dispatches a connection's last saved message every `interval`.
///
/// The loop ends when `stop` fires or the connection leaves the registry. Ticks with no saved
/// message are skipped.
pub async fn poll_last_request(
    registry: Arc<ConnectionRegistry>,
    fanout: WebSocketFanout,
    connection_id: String,
    interval: Duration,
    stop: CancellationToken,
) {
    loop {
        if sleep_with_shutdown(interval, &stop).await {
            break;
        }
        if !registry.contains(&connection_id) {
            break;
        }
        let Some(request) = registry.last_request(&connection_id) else {
            continue;
        };
        tracing::debug!(
            target: "retransmit::websocket",
            event = "poll_redispatch",
            route = %request.route(),
            connection = %connection_id
        );
        fanout.dispatch(&request).await;
    }
}

pub fn spawn_poller(
    registry: Arc<ConnectionRegistry>,
    fanout: WebSocketFanout,
    connection_id: String,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(poll_last_request(
        registry,
        fanout,
        connection_id,
        interval,
        stop,
    ))
}
