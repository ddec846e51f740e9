//! Per-connection read and write loops.
//!
//! A session owns nothing shared: all effects go through its hub's
//! channels. The read loop forwards text frames to the hub inbound channel
//! with a per-frame read deadline; the write loop drains the bounded
//! outbound queue and keeps the connection alive with periodic pings. The
//! ping period is shorter than the peer's read deadline, and any inbound
//! frame (pongs included) refreshes ours.
//!
//! Teardown is symmetric: whichever loop dies first takes the other with
//! it. The hub closing the outbound queue (eviction, shutdown) ends the
//! write loop, which closes the sink and unwinds the read loop; a read
//! failure unregisters the session, which makes the hub drop the queue
//! sender and end the write loop.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};

use crate::hub::{ClientHandle, HubHandle};

/// Timing and queueing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the per-client outbound queue.
    pub outbound_capacity: usize,
    /// How long to wait for any inbound frame before giving up on the peer.
    pub read_timeout: Duration,
    /// Per-message write deadline.
    pub write_timeout: Duration,
    /// Keepalive ping period. Must be shorter than the peer's read timeout.
    pub ping_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(54),
        }
    }
}

/// Drive one WebSocket connection until either side gives up.
///
/// Registers with the hub, runs the write loop as a task and the read loop
/// inline, then unregisters. Returns when the session is fully torn down.
pub async fn run_session(
    socket: WebSocket,
    client_id: String,
    hub: HubHandle,
    config: SessionConfig,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    if !hub
        .register(ClientHandle::new(client_id.clone(), outbound_tx))
        .await
    {
        log::warn!("session {client_id}: hub stopped before registration");
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, config.clone()));

    read_loop(stream, &client_id, &hub, config.read_timeout).await;

    // No-op if the hub already evicted us.
    hub.unregister(client_id.clone()).await;
    let _ = writer.await;
    log::debug!("session {client_id}: closed");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    client_id: &str,
    hub: &HubHandle,
    read_timeout: Duration,
) {
    loop {
        match timeout(read_timeout, stream.next()).await {
            Err(_) => {
                log::info!("session {client_id}: read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                log::debug!("session {client_id}: transport error: {e}");
                break;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Text(text) => {
                    // Blocking send: a full hub channel throttles this
                    // client without affecting the others.
                    if !hub.inbound(text.to_string()).await {
                        break;
                    }
                }
                // Any frame refreshes the deadline; pings are answered by
                // the transport layer.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => break,
                Message::Binary(_) => {
                    log::debug!("session {client_id}: ignoring binary frame");
                }
            },
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    config: SessionConfig,
) {
    let mut ticker = interval(config.ping_interval);
    loop {
        tokio::select! {
            maybe = outbound.recv() => match maybe {
                Some(frame) => {
                    match timeout(config.write_timeout, sink.send(Message::Text(frame.into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::debug!("write loop: send failed: {e}");
                            break;
                        }
                        Err(_) => {
                            log::debug!("write loop: write deadline exceeded");
                            break;
                        }
                    }
                }
                // Queue closed: evicted by the hub or session teardown.
                None => break,
            },
            _ = ticker.tick() => {
                let ping = sink.send(Message::Ping(Bytes::new()));
                match timeout(config.write_timeout, ping).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
    let _ = sink.close().await;
}
