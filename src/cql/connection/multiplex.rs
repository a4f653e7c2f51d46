// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    pending::{
        PendingResponse,
        STATE_PENDING,
    },
    stream::{
        Completion,
        Handler,
        StreamTable,
    },
    ConnectionError,
    ConnectionOptions,
};
use crate::cql::frame::{
    opcode,
    EventFrame,
    FrameError,
    FromPayload,
    Header,
    OptionsFrame,
    ProtocolVersion,
    RequestBody,
    RequestFrame,
    ResponseBody,
    ResponseFrame,
};
use log::*;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            AtomicU8,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
    time::Duration,
};
use tokio::{
    io::{
        AsyncRead,
        AsyncReadExt,
        AsyncWrite,
        AsyncWriteExt,
    },
    sync::{
        mpsc,
        oneshot,
        watch,
        Notify,
    },
    task::JoinHandle,
    time::Instant,
};

/// The stream carrying server pushed events.
pub const EVENT_STREAM: i16 = -1;
/// Largest body the protocol allows.
const MAX_BODY_LEN: u32 = 256 * 1024 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct Inner {
    id: u64,
    address: SocketAddr,
    version: ProtocolVersion,
    table: Mutex<StreamTable>,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    defunct: AtomicBool,
    reason: watch::Sender<Option<ConnectionError>>,
    next_request_id: AtomicU64,
    created: Instant,
    /// Milliseconds since `created`.
    last_read: AtomicU64,
    last_used: AtomicU64,
    orphan_limit: usize,
    events: Option<mpsc::UnboundedSender<EventFrame>>,
    released: Option<Arc<Notify>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, StreamTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn elapsed_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    fn since(&self, stamp: &AtomicU64) -> Duration {
        Duration::from_millis(self.elapsed_ms().saturating_sub(stamp.load(Ordering::Relaxed)))
    }

    fn notify_released(&self) {
        if let Some(released) = self.released.as_ref() {
            released.notify_waiters();
        }
    }

    fn send(self: &Arc<Self>, mut frame: RequestFrame, timeout: Option<Duration>) -> Result<PendingResponse, ConnectionError> {
        if let Some(reason) = self.reason.borrow().clone() {
            return Err(reason);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(STATE_PENDING));
        let (tx, rx) = oneshot::channel();
        let stream = self.table().allocate(Handler {
            request_id,
            state: state.clone(),
            tx,
        })?;
        frame.set_stream(stream);
        trace!(
            "connection {} sending {} on stream {}",
            self.id,
            opcode::name(frame.opcode()),
            stream
        );
        let pending = PendingResponse {
            stream,
            request_id,
            rx,
            state,
            deadline: timeout.map(|t| Instant::now() + t),
            connection: Arc::downgrade(self),
        };
        if self.writer.send(frame.encode()).is_err() {
            self.defunct(ConnectionError::Closed);
            return Err(ConnectionError::Closed);
        }
        Ok(pending)
    }

    pub(crate) fn orphan(&self, stream: i16, request_id: u64) {
        let orphans = self.table().orphan(stream, request_id);
        if let Some(orphans) = orphans {
            debug!("connection {} orphaned stream {}", self.id, stream);
            if orphans > self.orphan_limit {
                self.defunct(ConnectionError::TooManyOrphans(orphans));
            }
        }
    }

    fn dispatch(&self, header: Header, body: Vec<u8>) {
        self.last_read.store(self.elapsed_ms(), Ordering::Relaxed);
        let stream = header.stream();
        if stream < 0 {
            if stream == EVENT_STREAM {
                self.forward_event(header, &body);
            } else {
                warn!("connection {} ignoring frame on stream {}", self.id, stream);
            }
            return;
        }
        let completion = self.table().complete(stream);
        match completion {
            Completion::Handler(handler) => {
                let res = ResponseFrame::decode_body(header, &body).map_err(ConnectionError::from);
                if let Ok(frame) = res.as_ref() {
                    for warning in frame.warnings() {
                        warn!("{} warned on stream {}: {}", self.address, stream, warning);
                    }
                }
                if !handler.finish(res) {
                    debug!("connection {} dropped answer to a cancelled request", self.id);
                }
                self.notify_released();
            }
            Completion::Orphan => {
                debug!(
                    "connection {} dropped late frame on orphaned stream {}",
                    self.id, stream
                );
                self.notify_released();
            }
            Completion::Unknown => warn!("connection {} got a frame for idle stream {}", self.id, stream),
        }
    }

    fn forward_event(&self, header: Header, body: &[u8]) {
        match ResponseFrame::decode_body(header, body).map(ResponseFrame::into_body) {
            Ok(ResponseBody::Event(event)) => {
                if let Some(events) = self.events.as_ref() {
                    events.send(event).ok();
                }
            }
            Ok(other) => warn!("connection {} got {} on the event stream", self.id, opcode::name(other.opcode())),
            Err(e) => warn!("connection {} failed to decode event: {}", self.id, e),
        }
    }

    /// Mark the connection defunct. Every request still in flight fails with
    /// [`ConnectionError::Closed`] and the stream ids are never handed out again.
    pub(crate) fn defunct(&self, reason: ConnectionError) {
        if self.defunct.swap(true, Ordering::AcqRel) {
            return;
        }
        match reason {
            ConnectionError::Closed => debug!("connection {} to {} closed", self.id, self.address),
            ref reason => warn!("connection {} to {} is defunct: {}", self.id, self.address, reason),
        }
        let handlers = self.table().close();
        let failed = handlers
            .into_iter()
            .fold(0, |n, h| n + h.finish(Err(ConnectionError::Closed)) as usize);
        if failed > 0 {
            debug!("connection {} failed {} pending requests", self.id, failed);
        }
        self.reason.send_replace(Some(reason));
        self.notify_released();
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

/// A connection multiplexing concurrent requests over stream ids.
///
/// Frames are written by a writer task fed through a channel, so [`Connection::send`] never
/// blocks. A single reader task routes every answer to its stream's [`PendingResponse`].
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap an established transport. Must be called within a tokio runtime.
    pub fn new<S>(address: SocketAddr, io: S, options: &ConnectionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (reason, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            address,
            version: options.version,
            table: Mutex::new(StreamTable::new(options.version.max_streams())),
            writer: writer_tx,
            defunct: AtomicBool::new(false),
            reason,
            next_request_id: AtomicU64::new(0),
            created: Instant::now(),
            last_read: AtomicU64::new(0),
            last_used: AtomicU64::new(0),
            orphan_limit: options.orphan_limit,
            events: options.events.clone(),
            released: options.released.clone(),
            tasks: Mutex::new(Vec::new()),
        });
        let mut tasks = vec![
            tokio::spawn(read_loop(Arc::downgrade(&inner), reader)),
            tokio::spawn(write_loop(Arc::downgrade(&inner), writer, writer_rx)),
        ];
        if let Some(interval) = options.heartbeat_interval {
            tasks.push(tokio::spawn(heartbeat_loop(
                Arc::downgrade(&inner),
                interval,
                options.heartbeat_timeout,
            )));
        }
        inner.tasks.lock().unwrap_or_else(|e| e.into_inner()).extend(tasks);
        debug!("connection {} to {} opened", inner.id, address);
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// Send a frame on a free stream id. Fails fast with [`ConnectionError::StreamsExhausted`]
    /// when every stream is in use.
    pub fn send(&self, frame: RequestFrame, timeout: Option<Duration>) -> Result<PendingResponse, ConnectionError> {
        let pending = self.inner.send(frame, timeout)?;
        self.inner.last_used.store(self.inner.elapsed_ms(), Ordering::Relaxed);
        Ok(pending)
    }

    /// Send a request body framed for this connection's protocol version.
    pub fn request<B: Into<RequestBody>>(&self, body: B, timeout: Option<Duration>) -> Result<PendingResponse, ConnectionError> {
        self.send(RequestFrame::new(self.inner.version, body), timeout)
    }

    /// Streams currently reserved, including orphaned ones.
    pub fn in_flight(&self) -> usize {
        self.inner.table().in_flight()
    }

    pub fn available_streams(&self) -> usize {
        let table = self.inner.table();
        table.capacity() - table.in_flight()
    }

    pub fn orphans(&self) -> usize {
        self.inner.table().orphans()
    }

    pub fn is_defunct(&self) -> bool {
        self.inner.defunct.load(Ordering::Acquire) || self.inner.table().is_closed()
    }

    pub fn defunct_reason(&self) -> Option<ConnectionError> {
        self.inner.reason.borrow().clone()
    }

    /// Resolves once the connection is closed or defunct, with the reason.
    pub async fn closed(&self) -> ConnectionError {
        let mut rx = self.inner.reason.subscribe();
        loop {
            let current = rx.borrow().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ConnectionError::Closed;
            }
        }
    }

    /// How long since a caller last sent a request. Heartbeats do not count.
    pub fn idle_for(&self) -> Duration {
        self.inner.since(&self.inner.last_used)
    }

    pub fn close(&self) {
        self.inner.defunct(ConnectionError::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("version", &self.inner.version)
            .field("defunct", &self.inner.defunct.load(Ordering::Relaxed))
            .finish()
    }
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    version: ProtocolVersion,
) -> Result<(Header, Vec<u8>), ConnectionError> {
    let mut buf = vec![0; version.header_len()];
    reader.read_exact(&mut buf).await?;
    let header = Header::from_payload(&mut 0, &buf).map_err(FrameError::InvalidFrame)?;
    if header.body_len() > MAX_BODY_LEN {
        return Err(FrameError::InvalidFrame(anyhow::anyhow!("Frame body of {} bytes", header.body_len())).into());
    }
    let mut body = vec![0; header.body_len() as usize];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn read_loop<R: AsyncRead + Unpin>(inner: Weak<Inner>, mut reader: R) {
    let version = match inner.upgrade() {
        Some(inner) => inner.version,
        None => return,
    };
    let reason = loop {
        match read_frame(&mut reader, version).await {
            Ok((header, body)) => match inner.upgrade() {
                Some(inner) => inner.dispatch(header, body),
                None => return,
            },
            Err(e) => break e,
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.defunct(reason);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(inner: Weak<Inner>, mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(payload) = rx.recv().await {
        let res = match writer.write_all(&payload).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            if let Some(inner) = inner.upgrade() {
                inner.defunct(e.into());
            }
            return;
        }
    }
}

async fn heartbeat_loop(inner: Weak<Inner>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let pending = {
            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            if inner.since(&inner.last_read) < interval {
                continue;
            }
            match inner.send(RequestFrame::new(inner.version, OptionsFrame), Some(timeout)) {
                Ok(pending) => pending,
                // Saturated connections are evidently alive
                Err(ConnectionError::StreamsExhausted) => continue,
                Err(_) => return,
            }
        };
        if let Err(e) = pending.wait().await {
            if let Some(inner) = inner.upgrade() {
                debug!("heartbeat on connection {} failed: {}", inner.id, e);
                inner.defunct(ConnectionError::HeartbeatFailed);
            }
            return;
        }
        trace!("heartbeat answered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cql::{
        connection::ResponseState,
        frame::{
            opcode,
            ToPayload,
        },
    };
    use tokio::io::DuplexStream;

    fn address() -> SocketAddr {
        "127.0.0.1:9042".parse().unwrap()
    }

    fn connect(options: &ConnectionOptions) -> (Connection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (Connection::new(address(), client, options), server)
    }

    async fn read_request(server: &mut DuplexStream) -> RequestFrame {
        let (header, body) = read_frame(server, ProtocolVersion::V4).await.unwrap();
        let mut payload = Vec::new();
        header.to_payload(&mut payload);
        payload.extend(body);
        RequestFrame::decode(&payload).unwrap()
    }

    async fn write_ready(server: &mut DuplexStream, stream: i16) {
        let mut header = Header::response(ProtocolVersion::V4, opcode::READY);
        header.set_stream(stream);
        let mut payload = Vec::new();
        header.to_payload(&mut payload);
        server.write_all(&payload).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_requests_complete_independently() {
        let (connection, mut server) = connect(&ConnectionOptions::default());
        let first = connection.request(OptionsFrame, None).unwrap();
        let second = connection.request(OptionsFrame, None).unwrap();
        assert_ne!(first.stream(), second.stream());
        let a = read_request(&mut server).await.stream();
        let b = read_request(&mut server).await.stream();
        // Answer out of order
        write_ready(&mut server, b).await;
        let second_state = second.state.clone();
        let res = second.wait().await.unwrap();
        assert_eq!(res.stream(), b);
        assert_eq!(first.state(), ResponseState::Pending);
        assert_eq!(ResponseState::from(second_state.load(Ordering::Acquire)), ResponseState::Completed);
        write_ready(&mut server, a).await;
        assert_eq!(first.wait().await.unwrap().stream(), a);
        assert_eq!(connection.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_closes_every_pending_request_once() {
        let (connection, server) = connect(&ConnectionOptions::default());
        let pending = (0..3)
            .map(|_| connection.request(OptionsFrame, None).unwrap())
            .collect::<Vec<_>>();
        drop(server);
        for p in pending {
            assert!(matches!(p.wait().await, Err(ConnectionError::Closed)));
        }
        assert!(connection.is_defunct());
        assert!(connection.closed().await.to_string().len() > 0);
        assert!(matches!(
            connection.request(OptionsFrame, None),
            Err(ConnectionError::Io(_)) | Err(ConnectionError::Closed)
        ));
        assert_eq!(connection.available_streams(), 0);
    }

    #[tokio::test]
    async fn late_frames_for_cancelled_requests_are_dropped() {
        let (connection, mut server) = connect(&ConnectionOptions {
            version: ProtocolVersion::V4,
            ..Default::default()
        });
        let pending = connection.request(OptionsFrame, None).unwrap();
        let stream = read_request(&mut server).await.stream();
        assert!(pending.cancel());
        assert_eq!(pending.state(), ResponseState::Cancelled);
        drop(pending);
        // The id stays reserved until the server answers
        assert_eq!(connection.orphans(), 1);
        let next = connection.request(OptionsFrame, None).unwrap();
        assert_ne!(next.stream(), stream);
        let next_stream = read_request(&mut server).await.stream();
        write_ready(&mut server, stream).await;
        write_ready(&mut server, next_stream).await;
        assert_eq!(next.wait().await.unwrap().stream(), next_stream);
        assert_eq!(connection.orphans(), 0);
        assert_eq!(connection.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_stream_is_reused_only_after_its_late_frame() {
        let (connection, mut server) = connect(&ConnectionOptions::default());
        let cancelled = connection.request(OptionsFrame, None).unwrap();
        let stream = cancelled.stream();
        read_request(&mut server).await;
        assert!(cancelled.cancel());
        assert!(matches!(cancelled.wait().await, Err(ConnectionError::Closed)));

        // While the id is held the next request gets another one
        let next = connection.request(OptionsFrame, None).unwrap();
        assert_ne!(next.stream(), stream);
        let next_stream = read_request(&mut server).await.stream();

        // The late frame frees the id without completing anything else
        write_ready(&mut server, stream).await;
        while connection.orphans() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(next.state(), ResponseState::Pending);
        let reused = connection.request(OptionsFrame, None).unwrap();
        assert_eq!(reused.stream(), stream);
        read_request(&mut server).await;

        write_ready(&mut server, next_stream).await;
        assert_eq!(next.wait().await.unwrap().stream(), next_stream);
    }

    #[tokio::test]
    async fn heartbeats_do_not_reset_idle_time() {
        let (connection, mut server) = connect(&ConnectionOptions {
            heartbeat_interval: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let started = Instant::now();
        for _ in 0..3 {
            let heartbeat = read_request(&mut server).await;
            assert_eq!(heartbeat.opcode(), opcode::OPTIONS);
            write_ready(&mut server, heartbeat.stream()).await;
        }
        assert!(connection.idle_for() + Duration::from_millis(5) >= started.elapsed());
        assert!(!connection.is_defunct());

        connection.request(OptionsFrame, None).unwrap();
        assert!(connection.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn timed_out_requests_become_orphans() {
        let (connection, mut server) = connect(&ConnectionOptions::default());
        let pending = connection
            .request(OptionsFrame, Some(Duration::from_millis(20)))
            .unwrap();
        read_request(&mut server).await;
        assert!(matches!(pending.wait().await, Err(ConnectionError::TimedOut)));
        assert_eq!(connection.orphans(), 1);
    }

    #[tokio::test]
    async fn too_many_orphans_defunct_the_connection() {
        let (connection, _server) = connect(&ConnectionOptions {
            orphan_limit: 1,
            ..Default::default()
        });
        for _ in 0..2 {
            connection.request(OptionsFrame, None).unwrap().cancel();
        }
        assert!(matches!(connection.closed().await, ConnectionError::TooManyOrphans(2)));
    }

    #[tokio::test]
    async fn v2_connections_have_128_streams() {
        let (connection, _server) = connect(&ConnectionOptions {
            version: ProtocolVersion::V2,
            ..Default::default()
        });
        assert_eq!(connection.available_streams(), 128);
        let pending = (0..128)
            .map(|_| connection.request(OptionsFrame, None).unwrap())
            .collect::<Vec<_>>();
        assert!(matches!(
            connection.request(OptionsFrame, None),
            Err(ConnectionError::StreamsExhausted)
        ));
        drop(pending);
    }
}
