use crate::config::ClusterConfig;
use crate::models::{Spot, SpotSource};
use crate::services::shutdown::Shutdown;
use crate::services::spot_parser::SpotParse;
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Unterminated input beyond this is discarded
const MAX_LINE_BYTES: usize = 4096;

/// Floor for reconnect delays, so a zero setting cannot hammer the cluster
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Floor for the idle read timeout
const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Prompt fragments (lowercase) that ask for our callsign
const LOGIN_PROMPTS: &[&str] = &["login:", "call:", "callsign"];

/// A cluster host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection lifecycle of a cluster session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
    Failed,
    Stopped,
}

/// Published view of the session, for the status interface
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub endpoint: Endpoint,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn connected(&self) -> bool {
        self.state == SessionState::Streaming
    }
}

/// Byte stream to a cluster
pub trait ClusterStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClusterStream for T {}

/// Opens connections to cluster endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn ClusterStream>>;
}

/// Plain TCP, the way every cluster node speaks
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn ClusterStream>> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_BACKOFF);
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay to wait now; doubles the following one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// How one connection attempt ended
enum Outcome {
    /// Never reached streaming; try the other endpoint
    ConnectFailed(String),
    /// Was streaming, then lost the connection
    StreamEnded(String),
    Stopped,
}

/// Keeps a connection to the cluster alive and feeds parsed spots out
pub struct ClusterSession {
    config: ClusterConfig,
    connector: Arc<dyn Connector>,
    parser: Arc<dyn SpotParse>,
    spots: mpsc::Sender<Spot>,
    status: watch::Sender<SessionStatus>,
    shutdown: Shutdown,
    current: Endpoint,
    backoff: Backoff,
}

impl ClusterSession {
    pub fn new(
        config: ClusterConfig,
        connector: Arc<dyn Connector>,
        parser: Arc<dyn SpotParse>,
        spots: mpsc::Sender<Spot>,
        shutdown: Shutdown,
    ) -> Self {
        let current = config.primary.clone();
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Disconnected,
            endpoint: current.clone(),
            last_error: None,
        });
        let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        Self {
            config,
            connector,
            parser,
            spots,
            status,
            shutdown,
            current,
            backoff,
        }
    }

    /// Watch the session state
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Connect, stream and reconnect until shutdown
    pub async fn run(mut self) {
        while !self.shutdown.is_triggered() {
            match self.attempt().await {
                Outcome::Stopped => break,
                Outcome::ConnectFailed(error) => {
                    self.record_failure(error);
                    self.switch_endpoint();
                }
                Outcome::StreamEnded(error) => self.record_failure(error),
            }

            let delay = self.backoff.next_delay();
            info!("Reconnecting to {} in {:?}", self.current, delay);
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SessionState::Stopped);
        info!("Cluster session stopped");
    }

    async fn attempt(&mut self) -> Outcome {
        let endpoint = self.current.clone();
        self.set_state(SessionState::Connecting);
        info!("Connecting to {}...", endpoint);

        let connect = timeout(self.config.connect_timeout, self.connector.connect(&endpoint));
        let mut stream = tokio::select! {
            _ = self.shutdown.wait() => return Outcome::Stopped,
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Outcome::ConnectFailed(format!("Connection to {} failed: {}", endpoint, e))
                }
                Err(_) => {
                    return Outcome::ConnectFailed(format!("Connection to {} timed out", endpoint))
                }
            },
        };

        self.set_state(SessionState::Authenticating);
        let mut pending = Vec::new();
        let login = authenticate(&self.config, &mut stream, &mut pending);
        tokio::select! {
            _ = self.shutdown.wait() => return Outcome::Stopped,
            result = login => {
                if let Err(e) = result {
                    return Outcome::ConnectFailed(format!("Login to {} failed: {}", endpoint, e));
                }
            }
        }

        self.backoff.reset();
        self.status.send_modify(|status| {
            status.state = SessionState::Streaming;
            status.endpoint = endpoint.clone();
            status.last_error = None;
        });
        info!("Logged in to {} as {}", endpoint, self.config.identity);

        self.stream(stream, pending).await
    }

    async fn stream(&mut self, mut stream: Box<dyn ClusterStream>, mut pending: Vec<u8>) -> Outcome {
        let mut byte_buf = [0u8; 4096];
        if !self.dispatch_lines(&mut pending).await {
            return Outcome::Stopped;
        }

        loop {
            let idle = self.config.idle_timeout.max(MIN_IDLE_TIMEOUT);
            let read = tokio::select! {
                _ = self.shutdown.wait() => return Outcome::Stopped,
                read = timeout(idle, stream.read(&mut byte_buf)) => read,
            };

            match read {
                Err(_) => {
                    // Quiet clusters are normal
                    debug!("No data from {} for {:?}", self.current, idle);
                    if let Some(command) = &self.config.keepalive_command {
                        if let Err(e) = send_line(&mut stream, command, self.config.connect_timeout).await {
                            return Outcome::StreamEnded(format!("Keepalive to {} failed: {}", self.current, e));
                        }
                    }
                }
                Ok(Ok(0)) => {
                    return Outcome::StreamEnded(format!("Connection closed by {}", self.current));
                }
                Ok(Ok(n)) => {
                    pending.extend_from_slice(&byte_buf[..n]);
                    if !self.dispatch_lines(&mut pending).await {
                        return Outcome::Stopped;
                    }
                }
                Ok(Err(e)) => {
                    return Outcome::StreamEnded(format!("Read error from {}: {}", self.current, e));
                }
            }
        }
    }

    /// Parse every complete line in `pending`. False once nobody listens.
    async fn dispatch_lines(&self, pending: &mut Vec<u8>) -> bool {
        while let Some(newline_pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            trace!("<< {}", line);

            match self.parser.parse(line, SpotSource::Cluster) {
                Ok(spot) => {
                    if self.spots.send(spot).await.is_err() {
                        return false;
                    }
                }
                Err(failure) => trace!("Ignored line ({}): {}", failure, line),
            }
        }

        if pending.len() > MAX_LINE_BYTES {
            debug!("Dropping {} bytes without a line end", pending.len());
            pending.clear();
        }
        true
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|status| {
            status.state = state;
            status.endpoint = self.current.clone();
        });
    }

    fn record_failure(&self, error: String) {
        warn!("{}", error);
        self.status.send_modify(|status| {
            status.state = SessionState::Failed;
            status.last_error = Some(error);
        });
    }

    /// Alternate between primary and backup after a failed attempt
    fn switch_endpoint(&mut self) {
        let Some(backup) = &self.config.backup else {
            return;
        };
        self.current = if self.current == self.config.primary {
            backup.clone()
        } else {
            self.config.primary.clone()
        };
    }
}

/// Wait briefly for a login prompt, then send identity and login commands.
///
/// Servers that never prompt still get the identity once the wait expires.
async fn authenticate(
    config: &ClusterConfig,
    stream: &mut Box<dyn ClusterStream>,
    pending: &mut Vec<u8>,
) -> io::Result<()> {
    match timeout(config.login_prompt_timeout, wait_for_prompt(stream, pending)).await {
        Ok(Ok(())) => {
            debug!("Login prompt received");
            // The prompt has no line end; keep it out of the spot stream
            pending.clear();
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => debug!("No login prompt, sending identity anyway"),
    }

    send_line(stream, &config.identity, config.connect_timeout).await?;
    for command in &config.login_commands {
        send_line(stream, command, config.connect_timeout).await?;
    }
    Ok(())
}

async fn wait_for_prompt(stream: &mut Box<dyn ClusterStream>, pending: &mut Vec<u8>) -> io::Result<()> {
    let mut byte_buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut byte_buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before login",
            ));
        }
        pending.extend_from_slice(&byte_buf[..n]);

        let text = String::from_utf8_lossy(pending).to_lowercase();
        if LOGIN_PROMPTS.iter().any(|prompt| text.contains(prompt)) {
            return Ok(());
        }
    }
}

async fn send_line(stream: &mut Box<dyn ClusterStream>, line: &str, limit: Duration) -> io::Result<()> {
    let data = format!("{}\r\n", line);
    debug!(">> {}", line);
    let write = async {
        stream.write_all(data.as_bytes()).await?;
        stream.flush().await
    };
    timeout(limit, write)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
}
