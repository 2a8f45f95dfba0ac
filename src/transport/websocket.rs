use crate::app_state::WebSocketState;
use crate::websocket::{
    spawn_poller, ConnectDecision, ConnectionInfo, MessageDecision, OutboundFrame,
    WebSocketHooks, WebSocketRequest,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

enum Flow {
    Continue,
    /// The connection was refused by `on_connect`; services never saw it.
    Dropped,
}

enum Exit {
    Closed,
    Dropped,
}

/// Drives one client socket from upgrade to close.
pub async fn serve_connection(
    socket: WebSocket,
    state: WebSocketState,
    info: ConnectionInfo,
    shutdown: CancellationToken,
) {
    let Some(route) = state.fanout.config().websocket_route(&info.route) else {
        return;
    };
    let hooks = Arc::clone(state.hooks.for_route(&info.route));
    let postponed = hooks.intercepts_connect();

    let outbound = state
        .registry
        .register(info.clone(), !postponed, route.save_last_request);
    tracing::info!(
        target: "retransmit::websocket",
        event = "connection_opened",
        route = %info.route,
        connection = %info.id,
        remote_address = info.remote_address.as_deref().unwrap_or("-")
    );

    if !postponed {
        state
            .fanout
            .dispatch(&WebSocketRequest::connect(info.clone()))
            .await;
    }

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_frames(sink, outbound));
    let polling = shutdown.child_token();
    let poller = route.polling_interval.map(|interval| {
        spawn_poller(
            Arc::clone(&state.registry),
            state.fanout.clone(),
            info.id.clone(),
            interval,
            polling.clone(),
        )
    });

    let reader = async {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Exit::Closed,
                next = stream.next() => match next {
                    Some(Ok(Message::Text(text))) => {
                        if let Flow::Dropped = handle_text(&state, hooks.as_ref(), &info, text).await {
                            return Exit::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Exit::Closed,
                    Some(Ok(_)) => {}
                },
            }
        }
    };

    let exit = tokio::select! {
        exit = reader => exit,
        _ = &mut writer => Exit::Closed,
    };

    polling.cancel();
    if let Some(poller) = poller {
        poller.abort();
    }
    let removed = state.registry.remove(&info.id);
    match exit {
        Exit::Dropped => {
            let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await;
            writer.abort();
        }
        Exit::Closed => {
            writer.abort();
            let initialized = removed.is_some_and(|connection| connection.initialized);
            if initialized && hooks.on_disconnect(&info).await {
                state
                    .fanout
                    .dispatch(&WebSocketRequest::disconnect(info.clone()))
                    .await;
            }
        }
    }

    tracing::info!(
        target: "retransmit::websocket",
        event = "connection_closed",
        route = %info.route,
        connection = %info.id
    );
}

async fn handle_text(
    state: &WebSocketState,
    hooks: &dyn WebSocketHooks,
    info: &ConnectionInfo,
    text: String,
) -> Flow {
    let initialized = state
        .registry
        .get(&info.id)
        .is_some_and(|connection| connection.initialized);

    if !initialized {
        match hooks.on_connect(info, &text).await {
            ConnectDecision::Drop { message } => {
                if let Some(message) = message {
                    state.registry.send(&info.id, message);
                }
                state.registry.close(&info.id);
                return Flow::Dropped;
            }
            ConnectDecision::Accept => {
                if state.registry.mark_initialized(&info.id) {
                    state
                        .fanout
                        .dispatch(&WebSocketRequest::connect(info.clone()))
                        .await;
                }
                return Flow::Continue;
            }
        }
    }

    match hooks.on_request(info, text).await {
        MessageDecision::Handled(reply) => {
            if let Some(reply) = reply {
                state.registry.send(&info.id, reply.response);
            }
        }
        MessageDecision::Forward(message) => {
            let request = WebSocketRequest::message(info.clone(), message);
            state.registry.save_last_request(&info.id, &request);
            state.fanout.dispatch(&request).await;
        }
    }
    Flow::Continue
}

async fn write_frames(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
