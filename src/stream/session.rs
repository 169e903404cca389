use std::{io, process::Stdio, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::{OnceCell, mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use super::{
    error::StreamError,
    keepalive::{KeepAlive, KeepAlivePolicy, KeepAliveStatus, spawn_keep_alive},
};
use crate::{common::types::SessionId, configs::Config, sources::niconico::NegotiatedGrant};

/// How long a subprocess that closed stdout gets to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(2);
/// How long teardown waits for the stderr pipe to close.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Byte chunks as delivered to the HTTP body.
pub type ChunkStream = ReceiverStream<io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    EndOfStream,
    ClientDisconnected,
    KeepAliveLost,
    SubprocessFailure { code: Option<i32> },
    ReadFailed(String),
    Shutdown,
}

impl CloseReason {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::KeepAliveLost | Self::SubprocessFailure { .. } | Self::ReadFailed(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub keep_alive_interval: Duration,
    pub max_keep_alive_failures: u32,
    pub channel_capacity: usize,
    pub chunk_size: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep_alive_interval: config.session.keep_alive_interval(),
            max_keep_alive_failures: config.session.max_keep_alive_failures,
            channel_capacity: config.session.channel_capacity,
            chunk_size: config.transcoder.chunk_size,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Resources {
    child: Child,
    keep_alive: JoinHandle<()>,
    stderr: JoinHandle<Option<String>>,
}

/// One transcoder subprocess plus its keep-alive, owned until teardown.
pub struct StreamingSession {
    id: SessionId,
    video_id: String,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    keep_alive: Arc<KeepAliveStatus>,
    resources: Mutex<Option<Resources>>,
    outcome: OnceCell<CloseReason>,
    span: tracing::Span,
}

impl StreamingSession {
    /// Spawns `command`, starts the keep-alive and the stdout pump.
    ///
    /// Nothing is left running when this returns an error.
    pub fn start(
        id: SessionId,
        video_id: impl Into<String>,
        mut command: Command,
        keeper: Arc<dyn KeepAlive>,
        grant: NegotiatedGrant,
        options: SessionOptions,
    ) -> Result<(Arc<Self>, ChunkStream), StreamError> {
        let video_id = video_id.into();
        let span = tracing::info_span!("session", id = %id, video = %video_id);
        let (state, _) = watch::channel(SessionState::Starting);

        let spawned = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                state.send_replace(SessionState::Failed);
                span.in_scope(|| warn!("transcoder spawn failed: {}", e));
                return Err(StreamError::SubprocessSpawnFailed(e));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            state.send_replace(SessionState::Failed);
            return Err(StreamError::SubprocessSpawnFailed(io::Error::other(
                "transcoder pipes unavailable",
            )));
        };

        let cancel = CancellationToken::new();
        let status = Arc::new(KeepAliveStatus::default());
        let policy = KeepAlivePolicy {
            interval: options.keep_alive_interval,
            max_failures: options.max_keep_alive_failures,
        };

        let keep_alive = span.in_scope(|| {
            spawn_keep_alive(keeper, grant, policy, status.clone(), cancel.clone())
        });
        let stderr = tokio::spawn(drain_stderr(stderr).instrument(span.clone()));

        let session = Arc::new(Self {
            id,
            video_id,
            state,
            cancel,
            keep_alive: status,
            resources: Mutex::new(Some(Resources { child, keep_alive, stderr })),
            outcome: OnceCell::new(),
            span: span.clone(),
        });

        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        session.state.send_replace(SessionState::Streaming);
        span.in_scope(|| info!("streaming started (pid {:?})", session.pid()));

        tokio::spawn(
            session
                .clone()
                .pump(stdout, tx, options.chunk_size.max(1))
                .instrument(span),
        );

        Ok((session, ReceiverStream::new(rx)))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Transcoder pid while the subprocess is owned by the session.
    pub fn pid(&self) -> Option<u32> {
        self.resources.lock().as_ref().and_then(|r| r.child.id())
    }

    pub fn keep_alives_sent(&self) -> u64 {
        self.keep_alive.sent()
    }

    pub fn outcome(&self) -> Option<CloseReason> {
        self.outcome.get().cloned()
    }

    /// Resolves once teardown has finished.
    pub async fn closed(&self) -> Option<CloseReason> {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.outcome()
    }

    /// Tears the session down. Only the first call does the work; every caller
    /// gets the same outcome.
    pub async fn close(&self, reason: CloseReason) -> CloseReason {
        self.outcome
            .get_or_init(|| self.teardown(reason).instrument(self.span.clone()))
            .await
            .clone()
    }

    async fn teardown(&self, requested: CloseReason) -> CloseReason {
        self.state.send_replace(SessionState::Draining);
        self.cancel.cancel();

        let mut reason = requested;
        let resources = self.resources.lock().take();

        if let Some(Resources { mut child, keep_alive, stderr }) = resources {
            if reason == CloseReason::EndOfStream {
                if let Ok(Ok(status)) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    if !status.success() {
                        reason = CloseReason::SubprocessFailure { code: status.code() };
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => debug!("transcoder exited: {}", status),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!("failed to kill transcoder: {}", e);
                    } else {
                        debug!("transcoder killed");
                    }
                }
            }

            if let Err(e) = keep_alive.await {
                warn!("keep-alive task ended abnormally: {}", e);
            }

            let stderr_abort = stderr.abort_handle();
            match tokio::time::timeout(STDERR_GRACE, stderr).await {
                Ok(Ok(Some(last))) if reason.is_failure() => {
                    warn!("transcoder stderr: {}", last);
                }
                Ok(_) => {}
                Err(_) => stderr_abort.abort(),
            }
        }

        let terminal = if reason.is_failure() {
            SessionState::Failed
        } else {
            SessionState::Closed
        };
        info!("session closed: {:?}", reason);
        self.state.send_replace(terminal);
        reason
    }

    fn cancelled_reason(&self) -> CloseReason {
        if self.keep_alive.is_lost() {
            CloseReason::KeepAliveLost
        } else {
            CloseReason::Shutdown
        }
    }

    async fn pump(
        self: Arc<Self>,
        stdout: ChildStdout,
        tx: mpsc::Sender<io::Result<Bytes>>,
        chunk_size: usize,
    ) {
        let reason = forward_chunks(stdout, &tx, &self.cancel, chunk_size)
            .await
            .unwrap_or_else(|| self.cancelled_reason());

        drop(tx);
        self.close(reason).await;
    }
}

/// Copies `reader` into `tx` in chunks of at most `chunk_size` bytes.
///
/// Returns `None` when `cancel` fired first. A read error is delivered to the
/// consumer as an `Err` item before returning.
async fn forward_chunks<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: &mpsc::Sender<io::Result<Bytes>>,
    cancel: &CancellationToken,
    chunk_size: usize,
) -> Option<CloseReason> {
    let mut buf = BytesMut::zeroed(chunk_size);

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tx.closed() => return Some(CloseReason::ClientDisconnected),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Some(CloseReason::EndOfStream),
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => Err(e),
            },
        };

        let failure = item.as_ref().err().map(|e| e.to_string());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return Some(CloseReason::ClientDisconnected);
                }
            }
        }

        if let Some(message) = failure {
            return Some(CloseReason::ReadFailed(message));
        }
    }
}

/// Logs the transcoder's stderr and keeps its last line.
async fn drain_stderr(stderr: ChildStderr) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("transcoder: {}", line);
        last = Some(line);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    struct CountingKeeper {
        calls: AtomicUsize,
        healthy: AtomicBool,
    }

    impl CountingKeeper {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                healthy: AtomicBool::new(healthy),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeepAlive for CountingKeeper {
        async fn send_keep_alive(&self, _grant: &NegotiatedGrant) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn grant() -> NegotiatedGrant {
        NegotiatedGrant {
            content_url: "https://cdn.test/master.m3u8".into(),
            watch_id: "sm9".into(),
            track_id: "t".into(),
            outputs: vec![vec!["audio-aac-64kbps".into()]],
            subject_id: Some("1.2".into()),
        }
    }

    fn options(interval_ms: u64) -> SessionOptions {
        SessionOptions {
            keep_alive_interval: Duration::from_millis(interval_ms),
            max_keep_alive_failures: 1,
            channel_capacity: 2,
            chunk_size: 16,
        }
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    fn start(
        script: &str,
        keeper: Arc<CountingKeeper>,
        interval_ms: u64,
    ) -> (Arc<StreamingSession>, ChunkStream) {
        StreamingSession::start(
            SessionId::generate(),
            "sm9",
            shell(script),
            keeper,
            grant(),
            options(interval_ms),
        )
        .unwrap()
    }

    async fn collect(mut stream: ChunkStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_end_of_stream_delivers_everything() {
        let keeper = CountingKeeper::new(true);
        let (session, stream) = start("printf 'adts-frame-bytes-0123456789abcdef'", keeper.clone(), 1_000);

        let body = collect(stream).await;
        assert_eq!(body, b"adts-frame-bytes-0123456789abcdef");

        assert_eq!(session.closed().await, Some(CloseReason::EndOfStream));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(keeper.calls() >= 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_subprocess_failure() {
        let keeper = CountingKeeper::new(true);
        let (session, stream) = start("printf partial; echo broken >&2; exit 3", keeper, 1_000);

        assert_eq!(collect(stream).await, b"partial");
        assert_eq!(
            session.closed().await,
            Some(CloseReason::SubprocessFailure { code: Some(3) })
        );
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_keep_alive_runs_without_consumption() {
        let keeper = CountingKeeper::new(true);
        let (session, stream) = start("exec yes", keeper.clone(), 50);

        tokio::time::sleep(Duration::from_millis(125)).await;
        assert!(keeper.calls() >= 2, "only {} keep-alives", keeper.calls());
        assert_eq!(session.state(), SessionState::Streaming);

        assert_eq!(session.close(CloseReason::Shutdown).await, CloseReason::Shutdown);
        drop(stream);
    }

    #[tokio::test]
    async fn test_client_disconnect_kills_subprocess_and_stops_keep_alive() {
        let keeper = CountingKeeper::new(true);
        let (session, mut stream) = start("exec yes", keeper.clone(), 20);
        let pid = session.pid().expect("transcoder pid");

        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);

        let reason = tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert_eq!(reason, Some(CloseReason::ClientDisconnected));
        assert_eq!(session.state(), SessionState::Closed);

        let calls = keeper.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(keeper.calls(), calls);

        assert_eq!(session.pid(), None);
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "transcoder {} still running", pid);
    }

    #[tokio::test]
    async fn test_disconnect_while_subprocess_is_silent() {
        let keeper = CountingKeeper::new(true);
        let (session, stream) = start("exec sleep 30", keeper, 1_000);

        drop(stream);
        let reason = tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert_eq!(reason, Some(CloseReason::ClientDisconnected));
    }

    #[tokio::test]
    async fn test_keep_alive_loss_fails_the_session() {
        let keeper = CountingKeeper::new(false);
        let (session, stream) = start("exec sleep 30", keeper.clone(), 20);

        let reason = tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert_eq!(reason, Some(CloseReason::KeepAliveLost));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(keeper.calls(), 1);
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_close_tears_down_once() {
        let keeper = CountingKeeper::new(true);
        let (session, _stream) = start("exec sleep 30", keeper, 1_000);

        let (a, b) = tokio::join!(
            session.close(CloseReason::Shutdown),
            session.close(CloseReason::ClientDisconnected)
        );
        assert_eq!(a, b);
        assert_eq!(session.outcome(), Some(a.clone()));
        assert_eq!(session.close(CloseReason::EndOfStream).await, a);
        assert!(session.resources.lock().is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_keeps_signalling() {
        let keeper = CountingKeeper::new(true);
        let mut opts = options(0);
        opts.keep_alive_interval = Duration::ZERO;
        let (session, _stream) = StreamingSession::start(
            SessionId::generate(),
            "sm9",
            shell("exec sleep 30"),
            keeper.clone(),
            grant(),
            opts,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(keeper.calls() >= 2, "only {} keep-alives", keeper.calls());
        assert_eq!(session.state(), SessionState::Streaming);
        session.close(CloseReason::Shutdown).await;
    }

    struct PanickingKeeper;

    #[async_trait]
    impl KeepAlive for PanickingKeeper {
        async fn send_keep_alive(&self, _grant: &NegotiatedGrant) -> bool {
            panic!("keep-alive transport blew up");
        }
    }

    #[tokio::test]
    async fn test_dead_keep_alive_task_fails_the_session() {
        let (session, _stream) = StreamingSession::start(
            SessionId::generate(),
            "sm9",
            shell("exec sleep 30"),
            Arc::new(PanickingKeeper),
            grant(),
            options(20),
        )
        .unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert_eq!(reason, Some(CloseReason::KeepAliveLost));
        assert_eq!(session.state(), SessionState::Failed);
    }

    /// Yields one chunk, then fails every read.
    struct BrokenPipe {
        served: bool,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            if self.served {
                return std::task::Poll::Ready(Err(io::Error::other("pipe broke")));
            }
            self.served = true;
            buf.put_slice(b"abc");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_reaches_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let forward = tokio::spawn(async move {
            forward_chunks(BrokenPipe { served: false }, &tx, &cancel, 16).await
        });

        // The first chunk fills the channel before the error is read.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(&rx.recv().await.unwrap().unwrap()[..], b"abc");
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "pipe broke");
        assert!(rx.recv().await.is_none());

        assert_eq!(
            forward.await.unwrap(),
            Some(CloseReason::ReadFailed("pipe broke".into()))
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_starts_nothing() {
        let keeper = CountingKeeper::new(true);
        let result = StreamingSession::start(
            SessionId::generate(),
            "sm9",
            Command::new("/nonexistent/transcoder-binary"),
            keeper.clone(),
            grant(),
            options(10),
        );

        assert!(matches!(result, Err(StreamError::SubprocessSpawnFailed(_))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(keeper.calls(), 0);
    }
}
