//! Integration tests for the full connection flow.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{broadcast, mpsc};

use btremote::bluetooth::loopback::{DeviceEnd, LoopbackPlatform};
use btremote::bluetooth::{
    parse_address, BoxedStream, Endpoint, LinkError, LinkStream, PairedDevice, Platform,
};
use btremote::{ConnectionState, Session, SessionConfig, SessionError, SessionEvent};

const DEVICE: &str = "98:D3:31:F5:2A:0C";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
const WAIT: Duration = Duration::from_secs(30);

fn config() -> SessionConfig {
    SessionConfig {
        history_limit: 10,
        ..SessionConfig::default()
    }
}

fn session() -> (Session, Arc<LoopbackPlatform>, mpsc::UnboundedReceiver<DeviceEnd>) {
    let (platform, device_rx) = LoopbackPlatform::new();
    platform.add_device(DEVICE, Some("HC-05")).unwrap();
    let platform = Arc::new(platform);
    (Session::new(platform.clone(), config()), platform, device_rx)
}

async fn connected() -> (Session, DuplexStream, broadcast::Receiver<SessionEvent>) {
    let (session, _platform, mut device_rx) = session();
    session.connect(DEVICE).await.unwrap();
    let device = device_rx.recv().await.unwrap().stream;
    let events = session.subscribe_events();
    (session, device, events)
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn unconfirmed(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::UnconfirmedCommand { command } => Some(command.clone()),
            _ => None,
        })
        .collect()
}

async fn read_command(device: &mut DuplexStream) -> u8 {
    let mut buf = [0u8; 1];
    device.read_exact(&mut buf).await.unwrap();
    buf[0]
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let (session, platform, mut device_rx) = session();
    let mut events = session.subscribe_events();

    session.connect("98:d3:31:f5:2a:0c").await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.address().as_deref(), Some(DEVICE));
    assert_eq!(platform.discovery_cancels(), 1);
    assert!(device_rx.recv().await.is_some());

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::StateChanged(ConnectionState::Connecting),
            SessionEvent::StateChanged(ConnectionState::Connected),
        ]
    );
}

#[tokio::test]
async fn test_failed_connect_ends_in_error() {
    let (session, _platform, _device_rx) = session();
    let mut events = session.subscribe_events();

    let err = session.connect("not-a-real-address").await.unwrap_err();
    assert!(matches!(err, SessionError::Link(LinkError::AddressInvalid(_))));

    let events = drain(&mut events);
    assert_eq!(events[0], SessionEvent::StateChanged(ConnectionState::Connecting));
    assert!(matches!(
        &events[1],
        SessionEvent::StateChanged(ConnectionState::Error(message))
            if message.starts_with("Invalid address")
    ));
    assert!(!events
        .iter()
        .any(|e| *e == SessionEvent::StateChanged(ConnectionState::Connected)));

    // A retry from Error is allowed.
    session.connect(DEVICE).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_errors_are_classified() {
    let (session, platform, _device_rx) = session();
    platform.add_refusing_device("00:11:22:33:44:55", None).unwrap();

    session.connect("00:11:22:33:44:55").await.unwrap_err();
    let message = session.state().error_message().unwrap().to_string();
    assert!(message.starts_with("Connection error"), "{}", message);

    platform.set_powered(false);
    session.connect(DEVICE).await.unwrap_err();
    let message = session.state().error_message().unwrap().to_string();
    assert!(message.starts_with("Bluetooth unavailable"), "{}", message);

    platform.set_authorized(false);
    let err = session.connect(DEVICE).await.unwrap_err();
    assert!(matches!(&err, SessionError::Link(e) if e.is_retryable()));
    let message = session.state().error_message().unwrap().to_string();
    assert!(message.starts_with("Insufficient permissions"), "{}", message);
}

#[tokio::test]
async fn test_connect_while_connected_is_rejected() {
    let (session, _device, mut events) = connected().await;

    let err = session.connect(DEVICE).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::AlreadyActive(ConnectionState::Connected)
    ));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_send_while_disconnected_writes_nothing() {
    let (session, _platform, _device_rx) = session();
    let mut events = session.subscribe_events();

    for code in ["A", "B", "C", "D", "anything"] {
        let err = session.send_command(code).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert!(session.pending_command().is_none());
    }

    let events = drain(&mut events);
    assert_eq!(events.len(), 5);
    assert!(events
        .iter()
        .all(|e| matches!(e, SessionEvent::NotConnected { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_command_does_not_time_out() {
    let (session, mut device, mut events) = connected().await;

    session.send_command("A").await.unwrap();
    assert_eq!(read_command(&mut device).await, b'A');
    assert_eq!(session.pending_command().unwrap().command, "A");

    device.write_all(b"LED ON\n").await.unwrap();
    let ack = wait_for(&mut events, |e| matches!(e, SessionEvent::Acknowledged { .. })).await;
    assert_eq!(
        ack,
        SessionEvent::Acknowledged {
            token: "LED ON".to_string(),
            command: "A".to_string(),
            confirmed: true,
        }
    );
    assert!(session.pending_command().is_none());

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    assert!(unconfirmed(&drain(&mut events)).is_empty());
    assert_eq!(session.last_message(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_command_times_out_once() {
    let (session, mut device, mut events) = connected().await;

    session.send_command("A").await.unwrap();
    assert_eq!(read_command(&mut device).await, b'A');

    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::UnconfirmedCommand { .. })
    })
    .await;
    assert_eq!(
        event.notification().as_deref(),
        Some("Error: LED on was not confirmed")
    );
    assert!(session.pending_command().is_none());
    assert_eq!(session.state(), ConnectionState::Connected);

    tokio::time::sleep(COMMAND_TIMEOUT * 3).await;
    assert!(unconfirmed(&drain(&mut events)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_ack_does_not_confirm_newer_command() {
    let (session, mut device, mut events) = connected().await;

    session.send_command("A").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.send_command("B").await.unwrap();
    assert_eq!(read_command(&mut device).await, b'A');
    assert_eq!(read_command(&mut device).await, b'B');

    device.write_all(b"LED ON\n").await.unwrap();
    let ack = wait_for(&mut events, |e| matches!(e, SessionEvent::Acknowledged { .. })).await;
    assert!(matches!(ack, SessionEvent::Acknowledged { confirmed: false, .. }));
    assert_eq!(session.pending_command().unwrap().command, "B");

    tokio::time::sleep(COMMAND_TIMEOUT + Duration::from_millis(10)).await;
    let missed = unconfirmed(&drain(&mut events));
    assert_eq!(missed, vec!["B".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_no_stale_timeout_after_newer_command_confirmed() {
    let (session, mut device, mut events) = connected().await;

    session.send_command("A").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    session.send_command("A").await.unwrap();
    read_command(&mut device).await;
    read_command(&mut device).await;

    device.write_all(b"LED ON\n").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Acknowledged { confirmed: true, .. })
    })
    .await;

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    assert!(unconfirmed(&drain(&mut events)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lines_keep_arrival_order() {
    let (session, mut device, mut events) = connected().await;
    let messages = session.subscribe_messages();

    session.send_command("A").await.unwrap();
    read_command(&mut device).await;
    device.write_all(b"12.5\nLED ON\n\n13.0\n").await.unwrap();

    wait_for(&mut events, |e| {
        *e == SessionEvent::MessageReceived("13.0".to_string())
    })
    .await;

    assert_eq!(*messages.borrow(), Some("13.0".to_string()));
    assert_eq!(session.last_message().as_deref(), Some("13.0"));
    let history: Vec<String> = session.history().into_iter().map(|e| e.text).collect();
    assert_eq!(history, vec!["12.5", "13.0"]);

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    assert!(unconfirmed(&drain(&mut events)).is_empty());
}

#[tokio::test]
async fn test_line_events_in_order() {
    let (session, mut device, mut events) = connected().await;

    session.send_command("A").await.unwrap();
    read_command(&mut device).await;
    device.write_all(b"12.5\nLED ON\n13.0\n").await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = wait_for(&mut events, |e| {
            matches!(
                e,
                SessionEvent::MessageReceived(_) | SessionEvent::Acknowledged { .. }
            )
        })
        .await;
        seen.push(event);
    }

    assert_eq!(
        seen,
        vec![
            SessionEvent::MessageReceived("12.5".to_string()),
            SessionEvent::Acknowledged {
                token: "LED ON".to_string(),
                command: "A".to_string(),
                confirmed: true,
            },
            SessionEvent::MessageReceived("13.0".to_string()),
        ]
    );
    drop(session);
}

#[tokio::test]
async fn test_spurious_ack_is_ignored() {
    let (session, mut device, mut events) = connected().await;

    device.write_all(b"LED OFF\n").await.unwrap();
    let ack = wait_for(&mut events, |e| matches!(e, SessionEvent::Acknowledged { .. })).await;
    assert_eq!(
        ack,
        SessionEvent::Acknowledged {
            token: "LED OFF".to_string(),
            command: "B".to_string(),
            confirmed: false,
        }
    );
    assert_eq!(session.last_message(), None);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_twice_is_safe() {
    let (session, mut device, mut events) = connected().await;

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.address().is_none());

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::StateChanged(ConnectionState::Disconnected)]
    );

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(WAIT, device.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    let err = session.send_command("A").await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test]
async fn test_disconnect_when_never_connected() {
    let (session, _platform, _device_rx) = session();
    let mut events = session.subscribe_events();

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_timeout() {
    let (session, _device, mut events) = connected().await;

    session.send_command("B").await.unwrap();
    session.disconnect().await;
    assert!(session.pending_command().is_none());

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    assert!(unconfirmed(&drain(&mut events)).is_empty());
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (session, _platform, mut device_rx) = session();
    session.connect(DEVICE).await.unwrap();
    let _first = device_rx.recv().await.unwrap();
    session.disconnect().await;

    session.connect(DEVICE).await.unwrap();
    let mut second = device_rx.recv().await.unwrap().stream;
    let mut events = session.subscribe_events();

    second.write_all(b"21.0\n").await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::MessageReceived(_))).await;
    assert_eq!(session.last_message().as_deref(), Some("21.0"));
}

#[tokio::test]
async fn test_peer_close_disconnects() {
    let (session, _platform, mut device_rx) = session();
    session.connect(DEVICE).await.unwrap();
    let device = device_rx.recv().await.unwrap().stream;
    let mut events = session.subscribe_events();

    drop(device);
    wait_for(&mut events, |e| *e == SessionEvent::LinkClosed).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.address().is_none());

    session.connect(DEVICE).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_request_returns_reply() {
    let (session, mut device, _events) = connected().await;

    let requester = session.clone();
    let request = tokio::spawn(async move { requester.request("C", None).await });

    assert_eq!(read_command(&mut device).await, b'C');
    device.write_all(b"24.1\n").await.unwrap();

    let reply = request.await.unwrap().unwrap();
    assert_eq!(reply, "24.1");
    assert_eq!(session.last_message().as_deref(), Some("24.1"));
}

#[tokio::test(start_paused = true)]
async fn test_request_without_reply_times_out() {
    let (session, mut device, _events) = connected().await;

    let err = session
        .request("D", Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoReply(window) if window == Duration::from_millis(500)));
    assert_eq!(read_command(&mut device).await, b'D');
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_dropping_session_releases_link() {
    let (session, mut device, _events) = connected().await;

    drop(session);

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(WAIT, device.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_paired_devices_descriptors() {
    let (session, _platform, _device_rx) = session();

    let devices = session.paired_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].to_string(), "HC-05 - 98:D3:31:F5:2A:0C");
    assert_eq!(PairedDevice::parse(&devices[0].to_string()), Some(devices[0].clone()));
}

/// Stream whose reads never complete and whose writes always fail.
struct BrokenWrites;

impl AsyncRead for BrokenWrites {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "radio lost")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Duplex host end that reports a reset instead of end of stream.
struct ResetOnClose(DuplexStream);

impl AsyncRead for ResetOnClose {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.0).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => Poll::Ready(Err(
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"),
            )),
            other => other,
        }
    }
}

impl AsyncWrite for ResetOnClose {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Platform that hands out one prepared stream and cannot cancel discovery.
struct FaultyPlatform {
    stream: parking_lot::Mutex<Option<BoxedStream>>,
}

impl FaultyPlatform {
    fn new(stream: impl LinkStream + 'static) -> Arc<Self> {
        let stream: BoxedStream = Box::new(stream);
        Arc::new(Self {
            stream: parking_lot::Mutex::new(Some(stream)),
        })
    }
}

impl Platform for FaultyPlatform {
    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Endpoint, LinkError>> {
        async move {
            Ok(Endpoint {
                address: address.to_string(),
                bytes: parse_address(address)?,
                name: None,
            })
        }
        .boxed()
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        async { Err(LinkError::TransportUnavailable("discovery stuck".to_string())) }.boxed()
    }

    fn open_stream<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        _service: uuid::Uuid,
    ) -> BoxFuture<'a, Result<BoxedStream, LinkError>> {
        let stream = self.stream.lock().take();
        async move { stream.ok_or_else(|| LinkError::ConnectFailed("stream already used".to_string())) }
            .boxed()
    }

    fn paired_devices(&self) -> BoxFuture<'_, Result<Vec<PairedDevice>, LinkError>> {
        async { Ok(Vec::new()) }.boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_moves_to_error() {
    let session = Session::new(FaultyPlatform::new(BrokenWrites), SessionConfig::default());

    // A discovery that cannot be cancelled does not block the handshake.
    session.connect(DEVICE).await.unwrap();
    let mut events = session.subscribe_events();

    let err = session.send_command("A").await.unwrap_err();
    assert!(matches!(err, SessionError::Link(LinkError::Io(_))));
    assert!(session.pending_command().is_none());

    let state = session.state();
    let message = state.error_message().unwrap();
    assert!(message.starts_with("Communication error"), "{}", message);
    assert!(session.address().is_none());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::LinkError(_))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::CommandSent { .. })));

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_moves_to_error() {
    let (host, mut device) = tokio::io::duplex(256);
    let session = Session::new(FaultyPlatform::new(ResetOnClose(host)), config());
    session.connect(DEVICE).await.unwrap();
    let mut events = session.subscribe_events();

    session.send_command("A").await.unwrap();
    assert_eq!(read_command(&mut device).await, b'A');
    assert!(session.pending_command().is_some());

    drop(device);
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::LinkError(_))).await;
    let SessionEvent::LinkError(message) = event else {
        unreachable!();
    };
    assert!(message.starts_with("Communication error"), "{}", message);
    assert_eq!(session.state(), ConnectionState::Error(message));
    assert!(session.address().is_none());
    assert!(session.pending_command().is_none());

    tokio::time::sleep(COMMAND_TIMEOUT * 2).await;
    let events = drain(&mut events);
    assert!(unconfirmed(&events).is_empty());
    assert!(!events.contains(&SessionEvent::LinkClosed));

    let err = session.send_command("A").await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_newer_request_supersedes_older() {
    let (session, mut device, mut events) = connected().await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.request("C", None).await }
    });
    wait_for(&mut events, |e| matches!(e, SessionEvent::CommandSent { .. })).await;

    let second = tokio::spawn({
        let session = session.clone();
        async move { session.request("D", None).await }
    });
    wait_for(&mut events, |e| matches!(e, SessionEvent::CommandSent { .. })).await;

    assert!(matches!(first.await.unwrap(), Err(SessionError::Superseded)));
    assert_eq!(read_command(&mut device).await, b'C');
    assert_eq!(read_command(&mut device).await, b'D');

    device.write_all(b"24.1\n").await.unwrap();
    assert_eq!(second.await.unwrap().unwrap(), "24.1");
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_line_before_request_is_not_its_reply() {
    let (session, mut device, mut events) = connected().await;

    device.write_all(b"12.5\n").await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::MessageReceived(_))).await;

    let err = session
        .request("C", Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoReply(_)));
    assert_eq!(session.last_message().as_deref(), Some("12.5"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_open_one_link() {
    let (session, platform, mut device_rx) = session();
    platform.set_open_delay(Duration::from_secs(2));
    let mut events = session.subscribe_events();

    let (a, b) = tokio::join!(session.connect(DEVICE), session.connect(DEVICE));
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SessionError::AlreadyActive(ConnectionState::Connecting))
    )));
    assert_eq!(session.state(), ConnectionState::Connected);

    assert!(device_rx.recv().await.is_some());
    assert!(device_rx.try_recv().is_err());
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::StateChanged(ConnectionState::Connecting),
            SessionEvent::StateChanged(ConnectionState::Connected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_waits_for_handshake() {
    let (session, platform, _device_rx) = session();
    platform.set_open_delay(Duration::from_secs(2));
    let mut events = session.subscribe_events();

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect(DEVICE).await }
    });
    wait_for(&mut events, |e| {
        *e == SessionEvent::StateChanged(ConnectionState::Connecting)
    })
    .await;

    session.disconnect().await;
    connecting.await.unwrap().unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.address().is_none());
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::StateChanged(ConnectionState::Connected),
            SessionEvent::StateChanged(ConnectionState::Disconnected),
        ]
    );
}
