//! Accept loop and idle supervision.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use codesocket_controllers::ExecutionContext;
use codesocket_protocol::constants::{DEFAULT_PORT, DEFAULT_SERVER_TIMEOUT, DEFAULT_SOCKET_TIMEOUT};
use codesocket_protocol::{Event, EventSink};
use codesocket_timer::Timer;
use codesocket_transport::{TcpTransport, TransportKind, WsTransport};

use crate::BindError;
use crate::connection::{Connection, ConnectionOutcome};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// TCP port to bind on all interfaces (0 = OS-assigned).
    pub port: u16,
    pub transport: TransportKind,
    /// Idle time with no open connections before `server_timeout(0)`.
    pub server_timeout: Duration,
    /// Time a connection may take to deliver its message.
    pub socket_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

/// Open-connection count and the idle timer it drives.
///
/// The count and the timer are only touched together, under `state`.
struct Idle {
    state: Mutex<IdleState>,
    timer: Timer,
}

struct IdleState {
    open: usize,
    closed: bool,
}

impl Idle {
    fn lock(&self) -> MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        let state = self.lock();
        if state.open == 0 && !state.closed {
            self.timer.start();
        }
    }

    fn opened(self: &Arc<Self>) -> OpenGuard {
        let mut state = self.lock();
        state.open += 1;
        self.timer.stop();
        OpenGuard(Arc::clone(self))
    }

    fn shut(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.timer.stop();
    }
}

/// Decrements the open count when a connection task ends.
struct OpenGuard(Arc<Idle>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.open = state.open.saturating_sub(1);
        if state.open == 0 && !state.closed {
            self.0.timer.start();
        }
    }
}

/// A bound server socket accepting one-shot connections.
pub struct Listener {
    local_addr: SocketAddr,
    transport: TransportKind,
    idle: Arc<Idle>,
    events: EventSink,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Binds the port and starts accepting.
    pub async fn start(
        config: ListenerConfig,
        ctx: ExecutionContext,
        events: EventSink,
    ) -> Result<Arc<Self>, BindError> {
        let port = config.port;
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BindError { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError { port, source })?;

        let tick_events = events.clone();
        let idle = Arc::new(Idle {
            state: Mutex::new(IdleState {
                open: 0,
                closed: false,
            }),
            timer: Timer::with_ticks(
                "server",
                config.server_timeout,
                Box::new(move |remaining| {
                    tick_events.emit(Event::ServerTimeout(remaining));
                    if remaining == 0 {
                        tick_events.state_changed("server idle timeout");
                    }
                }),
            ),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            AcceptContext {
                transport: config.transport,
                socket_timeout: config.socket_timeout,
                ctx,
                events: events.clone(),
                idle: Arc::clone(&idle),
            },
            cancel.clone(),
        ));

        idle.begin();
        tracing::info!(%local_addr, kind = %config.transport, "listener started");
        events.state_changed(format!("listening on port {}", local_addr.port()));

        Ok(Arc::new(Self {
            local_addr,
            transport: config.transport,
            idle,
            events,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn is_listening(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Connections currently being served.
    pub fn open_connections(&self) -> usize {
        self.idle.lock().open
    }

    /// Stops accepting and releases the port.
    ///
    /// Connections already accepted finish on their own.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.idle.shut();

        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!("accept loop failed: {e}");
        }
        tracing::info!(port = self.port(), "listener stopped");
        self.events.state_changed("stopped");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.idle.shut();
    }
}

/// Everything a connection task needs from the listener.
#[derive(Clone)]
struct AcceptContext {
    transport: TransportKind,
    socket_timeout: Duration,
    ctx: ExecutionContext,
    events: EventSink,
    idle: Arc<Idle>,
}

async fn accept_loop(listener: TcpListener, accept: AcceptContext, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("accept loop shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let guard = accept.idle.opened();
                        let accept = accept.clone();
                        tracing::info!(%peer_addr, "connection accepted");
                        accept.events.state_changed(format!("client connected: {peer_addr}"));

                        tokio::spawn(async move {
                            let _guard = guard;
                            let outcome = serve(stream, peer_addr, &accept).await;
                            tracing::debug!(%peer_addr, ?outcome, "connection finished");
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                    }
                }
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    peer_addr: SocketAddr,
    accept: &AcceptContext,
) -> ConnectionOutcome {
    let ctx = accept.ctx.clone();
    let events = accept.events.clone();

    match accept.transport {
        TransportKind::Tcp => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer_addr, "set_nodelay failed: {e}");
            }
            let transport = TcpTransport::new(stream, peer_addr);
            Connection::new(transport, ctx, events, accept.socket_timeout)
                .run()
                .await
        }
        TransportKind::WebSocket => {
            let handshake = WsTransport::accept(stream, peer_addr);
            let result = if accept.socket_timeout.is_zero() {
                handshake.await
            } else {
                match tokio::time::timeout(accept.socket_timeout, handshake).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(%peer_addr, "WebSocket handshake timed out");
                        events.state_changed(format!("timeout: no handshake from {peer_addr}"));
                        return ConnectionOutcome::TimedOut;
                    }
                }
            };

            match result {
                Ok(transport) => {
                    Connection::new(transport, ctx, events, accept.socket_timeout)
                        .run()
                        .await
                }
                Err(e) => {
                    tracing::warn!(%peer_addr, "WebSocket handshake failed: {e}");
                    events.state_changed(format!("error: {e}"));
                    ConnectionOutcome::TransportError
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use codesocket_controllers::ExecutionError;
    use codesocket_transport::{Incoming, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    use super::*;

    fn context<F>(f: F) -> (ExecutionContext, tempfile::TempDir)
    where
        F: Fn(&str) -> Result<String, ExecutionError> + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(Arc::new(f), dir.path().join("transfer.nk"));
        (ctx, dir)
    }

    fn config(transport: TransportKind) -> ListenerConfig {
        ListenerConfig {
            port: 0,
            transport,
            server_timeout: Duration::from_secs(60),
            socket_timeout: Duration::from_secs(5),
        }
    }

    async fn tcp_request(port: u16, payload: &[u8]) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    /// Receives events until `pred` matches or two seconds pass.
    async fn wait_for(rx: &mut mpsc::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = rx.recv().await {
                if pred(&event) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let (ctx, _dir) = context(|code| Ok(format!("ran: {code}")));
        let (events, mut rx) = EventSink::channel();
        let listener = Listener::start(config(TransportKind::Tcp), ctx, events)
            .await
            .unwrap();

        let response = tcp_request(
            listener.port(),
            br#"{"text": "print('HELLO')", "file": "x.py"}"#,
        )
        .await;
        assert_eq!(response, "ran: print('HELLO')");
        assert!(wait_for(&mut rx, |e| matches!(e, Event::OutputProduced(_))).await);

        listener.close().await;
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let (ctx, _dir) = context(|code| Ok(code.chars().rev().collect()));
        let listener = Listener::start(config(TransportKind::WebSocket), ctx, EventSink::disabled())
            .await
            .unwrap();

        let mut client = WsTransport::connect("127.0.0.1", listener.port())
            .await
            .unwrap();
        client.send(br#"{"text": "abc"}"#).await.unwrap();

        assert_eq!(
            client.recv().await.unwrap(),
            Incoming::Message(b"cba".to_vec())
        );
        assert_eq!(client.recv().await.unwrap(), Incoming::Closed);

        listener.close().await;
    }

    #[tokio::test]
    async fn concurrent_connections_are_served() {
        let (ctx, _dir) = context(|code| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(code.to_string())
        });
        let listener = Listener::start(config(TransportKind::Tcp), ctx, EventSink::disabled())
            .await
            .unwrap();
        let port = listener.port();

        let requests = (0..4).map(|n| {
            tokio::spawn(async move {
                let payload = format!(r#"{{"text": "job {n}"}}"#);
                (n, tcp_request(port, payload.as_bytes()).await)
            })
        });
        for request in requests.collect::<Vec<_>>() {
            let (n, response) = request.await.unwrap();
            assert_eq!(response, format!("job {n}"));
        }

        listener.close().await;
    }

    #[tokio::test]
    async fn invalid_data_gets_no_response() {
        let (ctx, _dir) = context(|_| Ok("unreachable".into()));
        let listener = Listener::start(config(TransportKind::Tcp), ctx, EventSink::disabled())
            .await
            .unwrap();

        assert_eq!(tcp_request(listener.port(), br#"{"text": ""}"#).await, "");
        assert_eq!(tcp_request(listener.port(), b"{broken").await, "");

        listener.close().await;
    }

    #[tokio::test]
    async fn idle_timeout_is_reported() {
        let (ctx, _dir) = context(|_| Ok(String::new()));
        let (events, mut rx) = EventSink::channel();
        let listener = Listener::start(
            ListenerConfig {
                server_timeout: Duration::from_millis(100),
                ..config(TransportKind::Tcp)
            },
            ctx,
            events,
        )
        .await
        .unwrap();

        assert!(wait_for(&mut rx, |e| *e == Event::ServerTimeout(0)).await);
        listener.close().await;
    }

    #[tokio::test]
    async fn idle_timer_paused_while_connection_open() {
        let (ctx, _dir) = context(|_| Ok(String::new()));
        let (events, mut rx) = EventSink::channel();
        let listener = Listener::start(
            ListenerConfig {
                server_timeout: Duration::from_millis(300),
                socket_timeout: Duration::ZERO,
                ..config(TransportKind::Tcp)
            },
            ctx,
            events,
        )
        .await
        .unwrap();

        let held = TcpStream::connect(("127.0.0.1", listener.port())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(listener.open_connections(), 1);

        let mut fired = false;
        while let Ok(event) = rx.try_recv() {
            fired |= event == Event::ServerTimeout(0);
        }
        assert!(!fired, "idle timer must not fire with an open connection");

        drop(held);
        assert!(wait_for(&mut rx, |e| *e == Event::ServerTimeout(0)).await);
        assert_eq!(listener.open_connections(), 0);

        listener.close().await;
    }

    #[tokio::test]
    async fn dropped_listener_never_reports_idle() {
        let (ctx, _dir) = context(|_| Ok(String::new()));
        let (events, mut rx) = EventSink::channel();
        let listener = Listener::start(
            ListenerConfig {
                server_timeout: Duration::from_millis(200),
                socket_timeout: Duration::from_millis(100),
                ..config(TransportKind::Tcp)
            },
            ctx,
            events,
        )
        .await
        .unwrap();

        let _held = TcpStream::connect(("127.0.0.1", listener.port())).await.unwrap();
        let connected =
            |e: &Event| matches!(e, Event::StateChanged(s) if s.starts_with("client connected"));
        assert!(wait_for(&mut rx, connected).await);
        drop(listener);

        // The connection times out, then the idle timeout passes.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut fired = false;
        while let Ok(event) = rx.try_recv() {
            fired |= event == Event::ServerTimeout(0);
        }
        assert!(!fired, "idle timer must stay stopped after the listener is dropped");
    }

    #[tokio::test]
    async fn bind_error_on_used_port() {
        let (ctx, _dir) = context(|_| Ok(String::new()));
        let first = Listener::start(config(TransportKind::Tcp), ctx.clone(), EventSink::disabled())
            .await
            .unwrap();

        let err = Listener::start(
            ListenerConfig {
                port: first.port(),
                ..config(TransportKind::Tcp)
            },
            ctx,
            EventSink::disabled(),
        )
        .await
        .err()
        .expect("second bind should fail");
        assert_eq!(err.port, first.port());
        assert!(!err.reason().is_empty());

        first.close().await;
    }

    #[tokio::test]
    async fn close_releases_port() {
        let (ctx, _dir) = context(|_| Ok(String::new()));
        let listener =
            Listener::start(config(TransportKind::Tcp), ctx.clone(), EventSink::disabled())
                .await
                .unwrap();
        let port = listener.port();
        assert!(listener.is_listening());

        listener.close().await;
        assert!(!listener.is_listening());

        let again = Listener::start(
            ListenerConfig {
                port,
                ..config(TransportKind::WebSocket)
            },
            ctx,
            EventSink::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(again.port(), port);
        assert_eq!(again.transport(), TransportKind::WebSocket);
        again.close().await;
    }
}
