use std::time::Duration;

use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    sync::mpsc,
    time::{Instant, timeout, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    AppState,
    registry::Connection,
    rooms::session::{ConnectionSession, Flow},
};

#[debug_handler]
pub(crate) async fn room_ws(
    Path(room): Path<String>,
    State(app): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, room, app))
}

async fn run(socket: WebSocket, room: String, app: AppState) {
    let (sink, mut stream) = socket.split();
    let (connection, outbound) = Connection::new(app.config.outbound_queue);

    let writer = tokio::spawn(write_outbound(
        sink,
        outbound,
        connection.close_signal(),
        app.config.send_timeout,
    ));

    let join_deadline = Instant::now() + app.config.join_timeout;
    let mut session = ConnectionSession::new(room, connection.clone(), app);

    loop {
        let deadline = (!session.is_active()).then_some(join_deadline);
        let message = tokio::select! {
            () = connection.closed() => break,
            message = next_message(&mut stream, deadline) => message,
        };

        let flow = match message {
            Some(Message::Text(text)) => session.on_frame(text.as_str().as_bytes()).await,
            Some(Message::Binary(data)) => session.on_frame(&data).await,
            Some(Message::Ping(_) | Message::Pong(_)) => Flow::Continue,
            Some(Message::Close(_)) | None => Flow::Close,
        };
        if flow == Flow::Close {
            break;
        }
    }

    session.close();
    if let Err(err) = writer.await {
        debug!(error = %err, "writer task failed");
    }
}

/// `None` on end of stream, transport error, or a missed join deadline.
async fn next_message(
    stream: &mut SplitStream<WebSocket>,
    deadline: Option<Instant>,
) -> Option<Message> {
    let next = match deadline {
        Some(deadline) => timeout_at(deadline, stream.next()).await.ok()?,
        None => stream.next().await,
    };
    next?.ok()
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    closed: CancellationToken,
    send_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match timeout(send_timeout, sink.send(Message::Text(frame.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "socket write failed");
                break;
            }
            Err(_) => {
                debug!("socket write timed out");
                break;
            }
        }
    }

    closed.cancel();
    let _ = sink.close().await;
}
