//! A single logical IRC connection with failover and automatic retries.
//!
//! [`Connection::connect`] walks the configured server list round-robin until
//! one of them accepts, waiting between attempts as told by the injected
//! [`BackoffPolicy`]. Once connected, every received line is handed to the
//! [`ConnectionDelegate`] in arrival order, and [`Connection::write`] queues
//! lines for a dedicated writer task so concurrent writers never interleave.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::backoff::BackoffPolicy;
use crate::config::Server;

/// How long a single TCP connect may take before it counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest line accepted from the server: 8191 bytes of tags plus the
/// 512-byte message itself. Longer lines are dropped.
pub const MAX_LINE_LENGTH: usize = 8191 + 512;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("the connection is not established")]
    NotConnected,
    #[error("no servers have been configured")]
    NoServers,
    #[error("line contains a line break: {0:?}")]
    LineBreak(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Receives lifecycle notifications and incoming lines from a [`Connection`].
pub trait ConnectionDelegate: Send + Sync {
    fn on_connection_established(&self);
    fn on_connection_failed(&self);
    /// Called once per non-empty received line, in arrival order.
    fn on_connection_message(&self, line: &str);
    fn on_connection_closed(&self);
}

/// Anything that can send a raw protocol line.
pub trait LineWriter: Send + Sync {
    fn write(&self, line: &str) -> Result<(), ConnectionError>;
}

/// A bidirectional byte stream a connection can run on.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Opens streams to servers. [`TcpDialer`] is the production implementation.
pub trait Dialer: Send + Sync {
    fn dial(&self, server: &Server) -> BoxFuture<'static, io::Result<BoxedStream>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, server: &Server) -> BoxFuture<'static, io::Result<BoxedStream>> {
        let addr = (server.ip.clone(), server.port);
        Box::pin(async move {
            let tcp = tokio::net::TcpStream::connect(addr).await?;
            tcp.set_nodelay(true)?;
            Ok(Box::new(tcp) as BoxedStream)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    state: ConnectionState,
    /// Token of the in-flight `connect()` call, if any.
    attempt: Option<u64>,
    /// Bumped whenever a socket is attached or torn down, so that tasks
    /// belonging to an older socket can tell they are stale.
    session: u64,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

pub struct Connection {
    id: u64,
    servers: Vec<Server>,
    backoff: Mutex<Box<dyn BackoffPolicy>>,
    dialer: Arc<dyn Dialer>,
    delegate: Arc<dyn ConnectionDelegate>,
    next_token: AtomicU64,
    inner: Mutex<Inner>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect to the first server that accepts, retrying forever.
    ///
    /// Resolves once a socket is established, or silently when the attempt
    /// is cancelled through [`Connection::disconnect`].
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.servers.is_empty() {
            return Err(ConnectionError::NoServers);
        }

        let token = {
            let mut inner = self.inner.lock();
            if inner.attempt.is_some() {
                return Err(ConnectionError::AlreadyConnecting);
            }
            let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
            inner.attempt = Some(token);
            inner.state = ConnectionState::Connecting;
            token
        };

        let mut delay = self.backoff.lock().time_to_next_request();
        let mut attempt = 0usize;

        loop {
            if !delay.is_zero() {
                tracing::debug!(connection = self.id, delay_ms = delay.as_millis() as u64, "Waiting before connecting");
            }
            tokio::time::sleep(delay).await;
            if !self.is_current_attempt(token) {
                return Ok(());
            }

            let server = &self.servers[attempt % self.servers.len()];
            tracing::info!(connection = self.id, server = %server, attempt, "Connecting");

            let result = tokio::time::timeout(CONNECT_TIMEOUT, self.dialer.dial(server)).await;
            if !self.is_current_attempt(token) {
                if let Ok(Ok(stream)) = result {
                    tracing::debug!(connection = self.id, "Connected after cancellation, closing");
                    drop(stream);
                }
                return Ok(());
            }

            let error = match result {
                Ok(Ok(stream)) => {
                    self.backoff.lock().mark_request_successful();
                    let (reader, shutdown, session) = self.attach(stream);
                    tracing::info!(connection = self.id, server = %server, "Connected");

                    self.delegate.on_connection_established();
                    tokio::spawn(Arc::clone(self).read_loop(reader, shutdown, session));
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
            };

            tracing::warn!(connection = self.id, server = %server, error = %error, "Connection failed");
            self.backoff.lock().mark_request_failed();
            self.delegate.on_connection_failed();

            delay = self.backoff.lock().time_to_next_request();
            attempt += 1;
        }
    }

    /// Queue `line` for sending. Trailing whitespace is replaced by CRLF.
    ///
    /// A line break anywhere else would smuggle a second command onto the
    /// wire, so such lines are refused.
    pub fn write(&self, line: &str) -> Result<(), ConnectionError> {
        let line = line.trim_end();
        if line.contains(['\r', '\n']) {
            return Err(ConnectionError::LineBreak(line.to_string()));
        }

        let inner = self.inner.lock();
        let outgoing = match (&inner.state, &inner.outgoing) {
            (ConnectionState::Connected, Some(outgoing)) => outgoing,
            _ => return Err(ConnectionError::NotConnected),
        };
        outgoing
            .send(format!("{line}\r\n"))
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Close the socket and cancel any in-flight `connect()`. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.attempt = None;
        if inner.state == ConnectionState::Disconnected {
            return;
        }

        inner.state = ConnectionState::Disconnected;
        inner.session += 1;
        // Dropping the sender lets the writer flush what is queued, then close.
        inner.outgoing = None;
        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(());
        }
        tracing::info!(connection = self.id, "Disconnected");
    }

    fn is_current_attempt(&self, token: u64) -> bool {
        self.inner.lock().attempt == Some(token)
    }

    fn attach(
        &self,
        stream: BoxedStream,
    ) -> (BufReader<tokio::io::ReadHalf<BoxedStream>>, oneshot::Receiver<()>, u64) {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = {
            let mut inner = self.inner.lock();
            inner.attempt = None;
            inner.state = ConnectionState::Connected;
            inner.session += 1;
            inner.outgoing = Some(outgoing_tx);
            inner.shutdown = Some(shutdown_tx);
            inner.session
        };

        tokio::spawn(write_loop(self.id, writer, outgoing_rx));
        (BufReader::new(reader), shutdown_rx, session)
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: BufReader<R>, mut shutdown: oneshot::Receiver<()>, session: u64)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        // Set while skipping the remainder of an overlong line.
        let mut discarding = false;
        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_LENGTH as u64);
            tokio::select! {
                result = limited.read_until(b'\n', &mut buf) => match result {
                    Ok(0) => {
                        tracing::info!(connection = self.id, "Server closed the connection");
                        break;
                    }
                    Ok(_) => {
                        let complete = buf.ends_with(b"\n");
                        if discarding || (!complete && buf.len() >= MAX_LINE_LENGTH) {
                            if !discarding {
                                tracing::warn!(connection = self.id, limit = MAX_LINE_LENGTH, "Dropping overlong line");
                            }
                            discarding = !complete;
                            continue;
                        }
                        for line in split_lines(&buf) {
                            tracing::trace!(connection = self.id, ">> {line}");
                            self.delegate.on_connection_message(&line);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(connection = self.id, error = %e, "Socket error");
                        break;
                    }
                },
                _ = &mut shutdown => return,
            }
        }
        self.handle_closed(session);
    }

    fn handle_closed(&self, session: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.session != session || inner.state != ConnectionState::Connected {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.outgoing = None;
            inner.shutdown = None;
        }
        self.delegate.on_connection_closed();
    }
}

impl LineWriter for Connection {
    fn write(&self, line: &str) -> Result<(), ConnectionError> {
        Connection::write(self, line)
    }
}

async fn write_loop<W>(id: u64, mut writer: W, mut outgoing: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outgoing.recv().await {
        tracing::trace!(connection = id, "<< {}", line.trim_end());
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(connection = id, error = %e, "Write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Decode `data` as UTF-8 and split it into its non-empty lines.
fn split_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hands out connections with process-unique ids.
#[derive(Debug, Default)]
pub struct ConnectionFactory {
    next_id: AtomicU64,
}

impl ConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        servers: Vec<Server>,
        backoff: Box<dyn BackoffPolicy>,
        dialer: Arc<dyn Dialer>,
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(Connection {
            id,
            servers,
            backoff: Mutex::new(backoff),
            dialer,
            delegate,
            next_token: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                attempt: None,
                session: 0,
                outgoing: None,
                shutdown: None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_optional_carriage_return() {
        let lines = split_lines(b"PING :a\r\nNOTICE * :b\n\r\n\nlast");
        assert_eq!(lines, vec!["PING :a", "NOTICE * :b", "last"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lines = split_lines(b"PRIVMSG #echo :caf\xe9\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("PRIVMSG #echo :caf"));
    }

    #[test]
    fn factory_ids_are_unique() {
        struct Nothing;
        impl ConnectionDelegate for Nothing {
            fn on_connection_established(&self) {}
            fn on_connection_failed(&self) {}
            fn on_connection_message(&self, _line: &str) {}
            fn on_connection_closed(&self) {}
        }

        let factory = ConnectionFactory::new();
        let a = factory.create(vec![], Box::new(crate::backoff::ExponentialBackoff::default()), Arc::new(TcpDialer), Arc::new(Nothing));
        let b = factory.create(vec![], Box::new(crate::backoff::ExponentialBackoff::default()), Arc::new(TcpDialer), Arc::new(Nothing));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), ConnectionState::Disconnected);
        assert!(matches!(a.write("PING"), Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_without_servers_fails() {
        struct Nothing;
        impl ConnectionDelegate for Nothing {
            fn on_connection_established(&self) {}
            fn on_connection_failed(&self) {}
            fn on_connection_message(&self, _line: &str) {}
            fn on_connection_closed(&self) {}
        }

        let connection = ConnectionFactory::new().create(
            vec![],
            Box::new(crate::backoff::ExponentialBackoff::default()),
            Arc::new(TcpDialer),
            Arc::new(Nothing),
        );
        assert!(matches!(connection.connect().await, Err(ConnectionError::NoServers)));
    }
}
