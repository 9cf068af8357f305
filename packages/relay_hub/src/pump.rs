//! Connection pump: the reader and writer loops for one connection.
//!
//! The pump is transport-agnostic. Adapters convert their native messages
//! into [`Frame`]s and hand over a stream (inbound) and a sink (outbound).
//! The writer runs on its own task; the reader runs on the caller's task and
//! owns teardown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::connection::{ConnectionHandle, Outbox};
use crate::envelope::ControlMessage;
use crate::error::HubError;
use crate::hub::Hub;

/// Transport-neutral frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Why a connection's loops ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer sent a close frame or ended the stream
    PeerClosed,
    /// Nothing was read within the liveness window
    TimedOut,
    /// The transport reported a read error
    ReadError(String),
    /// The writer exited first (unregistered, evicted, or write failure)
    WriterClosed,
}

/// Strategy for inbound control messages. Each method runs on the reader
/// task, so a slow handler delays reads for that connection only.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_subscribe_group(
        &self,
        hub: &Hub,
        conn: &ConnectionHandle,
        group_id: &str,
    ) -> impl Future<Output = ()> + Send {
        async move {
            hub.subscribe_to_group(group_id, conn).await;
        }
    }

    /// `raw` is the frame exactly as received.
    fn on_direct(
        &self,
        hub: &Hub,
        conn: &ConnectionHandle,
        to: &str,
        text: &str,
        raw: &str,
    ) -> impl Future<Output = ()> + Send;

    fn on_group(
        &self,
        hub: &Hub,
        conn: &ConnectionHandle,
        to: &str,
        text: &str,
        raw: &str,
    ) -> impl Future<Output = ()> + Send;
}

/// Relays chat frames verbatim to the addressed user or group without
/// persisting anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardingHandler;

impl InboundHandler for ForwardingHandler {
    async fn on_direct(
        &self,
        hub: &Hub,
        _conn: &ConnectionHandle,
        to: &str,
        _text: &str,
        raw: &str,
    ) {
        hub.deliver_raw_to_user(to, Arc::from(raw)).await;
    }

    async fn on_group(
        &self,
        hub: &Hub,
        _conn: &ConnectionHandle,
        to: &str,
        _text: &str,
        raw: &str,
    ) {
        hub.deliver_raw_to_group(to, Arc::from(raw)).await;
    }
}

/// Drive one registered connection until it disconnects.
///
/// Spawns the writer, runs the reader inline, then unregisters the
/// connection from `hub` and waits for the writer to drain. The connection
/// is `Closed` when this returns.
pub async fn serve_connection<S, K, E, H>(
    hub: Arc<Hub>,
    conn: ConnectionHandle,
    outbox: Outbox,
    stream: S,
    sink: K,
    handler: Arc<H>,
) -> Disconnect
where
    S: Stream<Item = Result<Frame, E>> + Unpin + Send,
    E: Display,
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: Display,
    H: InboundHandler,
{
    let cancel = CancellationToken::new();
    let config = hub.config().clone();

    let writer = {
        let cancel = cancel.clone();
        let conn_id = conn.id();
        tokio::spawn(async move {
            let _guard = cancel.drop_guard();
            if let Err(e) = write_loop(sink, outbox, &config).await {
                debug!(conn_id = %conn_id, "Writer stopped: {}", e);
            }
        })
    };

    let reason = read_loop(&hub, &conn, stream, handler.as_ref(), &cancel).await;

    hub.unregister(conn.user_id(), &conn).await;
    if let Err(e) = writer.await {
        error!(conn_id = %conn.id(), "Writer task failed: {}", e);
    }
    conn.mark_closed();

    info!(conn_id = %conn.id(), user = %conn.user_id(), reason = ?reason, "Connection closed");
    reason
}

async fn send_frame<K>(sink: &mut K, frame: Frame, config: &HubConfig) -> Result<(), HubError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match timeout(config.write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HubError::Transport(e.to_string())),
        Err(_) => Err(HubError::WriteTimeout(config.write_wait)),
    }
}

async fn write_loop<K>(mut sink: K, mut outbox: Outbox, config: &HubConfig) -> Result<(), HubError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbox.recv() => match next {
                Some(first) => {
                    let batch = coalesce(&first, &mut outbox, config.max_coalesce);
                    send_frame(&mut sink, Frame::Text(batch), config).await?;
                }
                None => {
                    // Queue closed and drained: say goodbye. The peer may already be gone.
                    let _ = send_frame(&mut sink, Frame::Close, config).await;
                    let _ = timeout(config.write_wait, sink.close()).await;
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                send_frame(&mut sink, Frame::Ping(Vec::new()), config).await?;
            }
        }
    }
}

/// Fold payloads that are already queued into one newline-joined frame.
fn coalesce(first: &str, outbox: &mut Outbox, max: usize) -> String {
    let mut batch = String::from(first);
    let mut count = 1;
    while count < max {
        let Some(next) = outbox.try_recv() else {
            break;
        };
        batch.push('\n');
        batch.push_str(&next);
        count += 1;
    }
    batch
}

async fn read_loop<S, E, H>(
    hub: &Hub,
    conn: &ConnectionHandle,
    mut stream: S,
    handler: &H,
    cancel: &CancellationToken,
) -> Disconnect
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
    H: InboundHandler,
{
    let pong_wait = hub.config().pong_wait;
    let max_size = hub.config().max_message_size;
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Disconnect::WriterClosed,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!(conn_id = %conn.id(), "No traffic within {:?}, closing", pong_wait);
                return Disconnect::TimedOut;
            }
            Ok(None) => return Disconnect::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id(), "Read error: {}", e);
                return Disconnect::ReadError(e.to_string());
            }
            Ok(Some(Ok(frame))) => frame,
        };
        deadline = Instant::now() + pong_wait;

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(conn_id = %conn.id(), "Discarding non-UTF-8 binary frame");
                    continue;
                }
            },
            // Transports answer pings themselves; either way the peer is alive.
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close => return Disconnect::PeerClosed,
        };

        if text.len() > max_size {
            warn!(conn_id = %conn.id(), size = text.len(), limit = max_size, "Dropping oversized frame");
            continue;
        }

        dispatch(hub, conn, handler, &text).await;
    }
}

async fn dispatch<H: InboundHandler>(hub: &Hub, conn: &ConnectionHandle, handler: &H, raw: &str) {
    match ControlMessage::parse(raw) {
        Ok(ControlMessage::SubscribeGroup { to }) => {
            handler.on_subscribe_group(hub, conn, &to).await;
        }
        Ok(ControlMessage::Direct { to, text }) => {
            handler.on_direct(hub, conn, &to, &text, raw).await;
        }
        Ok(ControlMessage::Group { to, text }) => {
            handler.on_group(hub, conn, &to, &text, raw).await;
        }
        Err(e) => {
            debug!(conn_id = %conn.id(), "Discarding inbound frame: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    type Inbound = mpsc::UnboundedSender<Result<Frame, Infallible>>;

    struct Peer {
        inbound: Inbound,
        outbound: mpsc::UnboundedReceiver<Frame>,
        task: tokio::task::JoinHandle<Disconnect>,
    }

    async fn spawn_peer(hub: &Arc<Hub>, user: &str) -> (ConnectionHandle, Peer) {
        let (conn, outbox) = hub.connect(user, None);
        hub.register(user, &conn).await;
        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::unbounded();
        let task = tokio::spawn(serve_connection(
            Arc::clone(hub),
            conn.clone(),
            outbox,
            stream,
            sink,
            Arc::new(ForwardingHandler),
        ));
        (
            conn,
            Peer {
                inbound,
                outbound,
                task,
            },
        )
    }

    /// Transport that never becomes writable.
    struct StalledSink;

    impl Sink<Frame> for StalledSink {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Frame) -> Result<(), String> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }
    }

    /// Transport whose every write fails.
    struct BrokenSink;

    impl Sink<Frame> for BrokenSink {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _: Frame) -> Result<(), String> {
            Err("broken pipe".into())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Serve `user` over `sink`. The returned sender keeps the inbound stream open.
    async fn serve_over<K>(
        hub: &Arc<Hub>,
        user: &str,
        sink: K,
    ) -> (ConnectionHandle, Inbound, tokio::task::JoinHandle<Disconnect>)
    where
        K: Sink<Frame> + Unpin + Send + 'static,
        K::Error: Display,
    {
        let (conn, outbox) = hub.connect(user, None);
        hub.register(user, &conn).await;
        let (inbound, stream) = mpsc::unbounded();
        let task = tokio::spawn(serve_connection(
            Arc::clone(hub),
            conn.clone(),
            outbox,
            stream,
            sink,
            Arc::new(ForwardingHandler),
        ));
        (conn, inbound, task)
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_tears_down() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (conn, _inbound, task) = serve_over(&hub, "alice", StalledSink).await;
        let start = Instant::now();

        hub.deliver_raw_to_user("alice", Arc::from("hello")).await;

        assert_eq!(task.await.unwrap(), Disconnect::WriterClosed);
        let elapsed = start.elapsed();
        assert!(elapsed >= hub.config().write_wait);
        assert!(elapsed < hub.config().pong_wait);
        assert_eq!(conn.state(), crate::ConnectionState::Closed);
        assert!(!hub.registry().is_user_online("alice").await);
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test]
    async fn transport_error_tears_down() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (conn, _inbound, task) = serve_over(&hub, "alice", BrokenSink).await;

        hub.deliver_raw_to_user("alice", Arc::from("hello")).await;

        assert_eq!(task.await.unwrap(), Disconnect::WriterClosed);
        assert_eq!(conn.state(), crate::ConnectionState::Closed);
        assert!(!hub.registry().is_user_online("alice").await);
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test]
    async fn coalesces_queued_payloads() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (conn, outbox) = hub.connect("bob", None);
        hub.register("bob", &conn).await;
        for p in ["a", "b", "c"] {
            conn.try_enqueue(Arc::from(p)).unwrap();
        }

        let (inbound, stream) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (sink, mut outbound) = mpsc::unbounded();
        let task = tokio::spawn(serve_connection(
            Arc::clone(&hub),
            conn.clone(),
            outbox,
            stream,
            sink,
            Arc::new(ForwardingHandler),
        ));

        assert_eq!(outbound.next().await, Some(Frame::Text("a\nb\nc".into())));
        inbound.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Disconnect::PeerClosed);
    }

    #[test]
    fn coalesce_respects_limit() {
        let (conn, mut outbox) = ConnectionHandle::new("bob", None, 8);
        for p in ["b", "c", "d"] {
            conn.try_enqueue(Arc::from(p)).unwrap();
        }
        assert_eq!(coalesce("a", &mut outbox, 2), "a\nb");
        assert_eq!(outbox.len(), 2);
        assert_eq!(coalesce("x", &mut outbox, 1), "x");
    }

    #[tokio::test]
    async fn forwards_direct_frame_verbatim() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (_alice, alice) = spawn_peer(&hub, "alice").await;
        let (_bob, mut bob) = spawn_peer(&hub, "bob").await;

        let raw = r#"{"type":"direct","to":"bob","text":"hi"}"#;
        alice
            .inbound
            .unbounded_send(Ok(Frame::Text(raw.into())))
            .unwrap();

        assert_eq!(bob.outbound.next().await, Some(Frame::Text(raw.into())));
        drop(alice);
        bob.inbound.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(bob.task.await.unwrap(), Disconnect::PeerClosed);
    }

    #[tokio::test]
    async fn close_frame_unregisters_and_closes() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (conn, mut peer) = spawn_peer(&hub, "alice").await;

        peer.inbound.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(peer.task.await.unwrap(), Disconnect::PeerClosed);
        assert_eq!(conn.state(), crate::ConnectionState::Closed);
        assert!(hub.registry().is_empty().await);
        assert_eq!(peer.outbound.next().await, Some(Frame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_before_deadline() {
        let hub = Arc::new(Hub::new(HubConfig::with_pong_wait(Duration::from_secs(10))));
        let (_conn, mut peer) = spawn_peer(&hub, "alice").await;

        assert_eq!(peer.outbound.next().await, Some(Frame::Ping(Vec::new())));
        peer.inbound
            .unbounded_send(Ok(Frame::Pong(Vec::new())))
            .unwrap();
        peer.inbound.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(peer.task.await.unwrap(), Disconnect::PeerClosed);
    }

    #[tokio::test]
    async fn unregister_ends_both_loops() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (conn, peer) = spawn_peer(&hub, "alice").await;

        hub.unregister("alice", &conn).await;
        assert_eq!(peer.task.await.unwrap(), Disconnect::WriterClosed);
        assert_eq!(conn.state(), crate::ConnectionState::Closed);
    }
}
