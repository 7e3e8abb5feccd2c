//! Module `connection`
//!
//! Wraps one accepted stream: a bounded line reader for inbound text and an
//! outbound sink drained by a dedicated writer task that owns the write half.

use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::error::DeliveryError;
use crate::error::handlers::is_disconnect;
use crate::protocol::{ConnectionId, Message};

/// Result of reading one inbound line
#[derive(Debug, PartialEq, Eq)]
pub enum ReadLine {
    /// A complete line with its terminator (`\n` or `\r\n`) removed
    Line(String),
    /// A line longer than the limit; its content was discarded. Holds its length.
    TooLong(usize),
    /// The peer closed its side of the stream
    Eof,
}

/// Reads newline-terminated lines without buffering more than `max_len` bytes.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Read the next line.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. An unterminated final
    /// line is returned before `Eof`.
    pub async fn next_line(&mut self) -> io::Result<ReadLine> {
        self.buf.clear();
        let mut total = 0usize;
        let mut overflow = false;

        loop {
            let (used, terminated) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    if total == 0 {
                        return Ok(ReadLine::Eof);
                    }
                    break;
                }

                let (chunk, terminated) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (&available[..i], true),
                    None => (available, false),
                };

                total += chunk.len();
                if !overflow {
                    if self.buf.len() + chunk.len() > self.max_len + 1 {
                        // One extra byte allowed for a trailing '\r'
                        overflow = true;
                        self.buf.clear();
                    } else {
                        self.buf.extend_from_slice(chunk);
                    }
                }

                (chunk.len() + usize::from(terminated), terminated)
            };

            self.reader.consume(used);
            if terminated {
                break;
            }
        }

        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
            total -= 1;
        }

        if overflow || total > self.max_len {
            return Ok(ReadLine::TooLong(total));
        }

        let line = String::from_utf8_lossy(&self.buf).into_owned();
        Ok(ReadLine::Line(line))
    }
}

/// Outcome of a non-blocking delivery attempt
pub enum Offer {
    Queued,
    /// The queue is full; the message is handed back for a bounded retry
    Full(Arc<Message>),
    Closed,
}

/// Writable, cloneable handle to one connection's outbound queue.
///
/// Holders can only enqueue; the stream itself is owned by the writer task.
#[derive(Debug, Clone)]
pub struct ClientSink {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<Message>>,
}

impl ClientSink {
    /// Create a sink and the receiving end its writer drains
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer behind this sink has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the writer behind this sink has stopped
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Try to enqueue without waiting
    pub fn offer(&self, message: Arc<Message>) -> Offer {
        match self.tx.try_send(message) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(message)) => Offer::Full(message),
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Enqueue, waiting at most `wait` for queue space
    pub async fn deliver(
        &self,
        message: Arc<Message>,
        wait: Duration,
    ) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(message, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed(self.id)),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut(self.id)),
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Handle to a connection's writer task; aborts the task when dropped.
struct WriterTask(JoinHandle<()>);

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One accepted connection, exclusively owned by its supervisor.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    reader: LineReader<BoxedReader>,
    sink: ClientSink,
    writer: WriterTask,
    alive: Arc<AtomicBool>,
}

impl Connection {
    /// Wrap an accepted TCP stream
    pub fn open(id: ConnectionId, stream: TcpStream, config: &ServerConfig) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(id, peer, read_half, write_half, config)
    }

    /// Wrap an arbitrary reader/writer pair
    pub fn from_parts<R, W>(
        id: ConnectionId,
        peer: String,
        reader: R,
        writer: W,
        config: &ServerConfig,
    ) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, rx) = ClientSink::channel(id, config.outbound_queue_capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(write_loop(
            id,
            writer,
            rx,
            config.write_timeout(),
            Arc::clone(&alive),
        ));

        let reader = Box::new(reader) as BoxedReader;
        Self {
            id,
            peer,
            reader: LineReader::new(reader, config.max_line_length),
            sink,
            writer: WriterTask(writer),
            alive,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, for logging
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn sink(&self) -> &ClientSink {
        &self.sink
    }

    /// False once a write to this connection has failed
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Borrow the reader and the sink together
    pub fn io_mut(&mut self) -> (&mut LineReader<BoxedReader>, &ClientSink) {
        (&mut self.reader, &self.sink)
    }

    /// Stop reading, let the writer drain what is queued, and release the stream.
    ///
    /// The writer is aborted if it has not finished within `grace`. Dropping a
    /// `Connection` without closing it aborts the writer straight away.
    pub async fn close(self, grace: Duration) {
        let Connection {
            id,
            reader,
            sink,
            mut writer,
            ..
        } = self;
        drop(reader);
        drop(sink);

        if timeout(grace, &mut writer.0).await.is_err() {
            warn!("Writer for {} did not finish in {:?}, aborting", id, grace);
        } else {
            debug!("Connection {} released", id);
        }
    }
}

/// Drains the outbound queue into the stream until every sink is dropped
/// or a write fails.
async fn write_loop<W>(
    id: ConnectionId,
    writer: W,
    mut rx: mpsc::Receiver<Arc<Message>>,
    write_timeout: Duration,
    alive: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    let result: io::Result<()> = async {
        while let Some(message) = rx.recv().await {
            write_line(&mut writer, &message, write_timeout).await?;
            // Batch whatever else is already queued before flushing
            while let Ok(message) = rx.try_recv() {
                write_line(&mut writer, &message, write_timeout).await?;
            }
            bounded(writer.flush(), write_timeout).await?;
        }
        bounded(writer.shutdown(), write_timeout).await
    }
    .await;

    alive.store(false, Ordering::Release);
    match result {
        Ok(()) => debug!("Writer for {} finished", id),
        Err(e) if is_disconnect(&e) => debug!("Writer for {} stopped: peer went away", id),
        Err(e) => warn!("Writer for {} failed: {}", id, e),
    }
}

async fn write_line<W>(writer: &mut W, message: &Message, limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.to_line();
    bounded(writer.write_all(line.as_bytes()), limit).await
}

async fn bounded<F>(op: F, limit: Duration) -> io::Result<()>
where
    F: std::future::Future<Output = io::Result<()>>,
{
    match timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write did not complete within {:?}", limit),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn reader(input: &'static [u8], max_len: usize) -> LineReader<&'static [u8]> {
        LineReader::new(input, max_len)
    }

    async fn next(lines: &mut LineReader<&'static [u8]>) -> ReadLine {
        lines.next_line().await.unwrap()
    }

    fn notice(text: &str) -> Arc<Message> {
        Arc::new(Message::from_server(text))
    }

    #[tokio::test]
    async fn reads_lf_and_crlf_lines() {
        let mut lines = reader(b"hello\r\nworld\n", 64);
        assert_eq!(next(&mut lines).await, ReadLine::Line("hello".into()));
        assert_eq!(next(&mut lines).await, ReadLine::Line("world".into()));
        assert_eq!(next(&mut lines).await, ReadLine::Eof);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_returned() {
        let mut lines = reader(b"last words", 64);
        assert_eq!(next(&mut lines).await, ReadLine::Line("last words".into()));
        assert_eq!(next(&mut lines).await, ReadLine::Eof);
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_whole() {
        let mut lines = reader(b"0123456789\nok\n", 5);
        assert_eq!(next(&mut lines).await, ReadLine::TooLong(10));
        assert_eq!(next(&mut lines).await, ReadLine::Line("ok".into()));
    }

    #[tokio::test]
    async fn line_at_the_limit_with_crlf_is_accepted() {
        let mut lines = reader(b"12345\r\n", 5);
        assert_eq!(next(&mut lines).await, ReadLine::Line("12345".into()));
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mut lines = reader(b"caf\xff\n", 64);
        assert_eq!(next(&mut lines).await, ReadLine::Line("caf\u{fffd}".into()));
    }

    #[tokio::test]
    async fn oversized_line_spanning_buffer_refills() {
        let mut input = vec![b'x'; 20_000];
        input.push(b'\n');
        input.extend_from_slice(b"after\n");
        let input: &'static [u8] = Box::leak(input.into_boxed_slice());

        let mut lines = reader(input, 100);
        assert_eq!(next(&mut lines).await, ReadLine::TooLong(20_000));
        assert_eq!(next(&mut lines).await, ReadLine::Line("after".into()));
    }

    #[tokio::test]
    async fn sink_reports_closed_writer() {
        let id = ConnectionId::from_raw(42);
        let (sink, rx) = ClientSink::channel(id, 1);
        drop(rx);

        assert!(sink.is_closed());
        let wait = Duration::from_millis(10);
        let err = sink.deliver(notice("x"), wait).await.unwrap_err();
        assert_eq!(err, DeliveryError::Closed(id));
        assert!(matches!(sink.offer(notice("y")), Offer::Closed));
    }

    #[tokio::test]
    async fn sink_times_out_on_full_queue() {
        let id = ConnectionId::from_raw(43);
        let (sink, _rx) = ClientSink::channel(id, 1);
        assert!(matches!(sink.offer(notice("a")), Offer::Queued));
        assert!(matches!(sink.offer(notice("b")), Offer::Full(_)));

        let wait = Duration::from_millis(20);
        let err = sink.deliver(notice("c"), wait).await.unwrap_err();
        assert_eq!(err, DeliveryError::TimedOut(id));
    }

    #[tokio::test]
    async fn writer_encodes_lines_and_closes_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let config = ServerConfig::default();
        let id = ConnectionId::from_raw(5);

        let connection =
            Connection::from_parts(id, "test".into(), server_read, server_write, &config);
        let message = Arc::new(Message::from_client(id, "hi"));
        let wait = config.delivery_timeout();
        connection.sink().deliver(message, wait).await.unwrap();
        connection.close(Duration::from_secs(1)).await;

        let mut client = client;
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "client-5: hi\n");
    }

    #[tokio::test]
    async fn failed_write_marks_connection_dead() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, server_write) = tokio::io::split(server);
        drop(client);

        let config = ServerConfig::default();
        let id = ConnectionId::from_raw(6);
        let connection =
            Connection::from_parts(id, "test".into(), server_read, server_write, &config);
        let wait = config.delivery_timeout();
        let message = notice("into the void");
        let _ = connection.sink().deliver(message, wait).await;

        timeout(Duration::from_secs(1), connection.sink().closed())
            .await
            .expect("writer should stop after a failed write");
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn dropping_a_connection_aborts_a_stuck_writer() {
        // Room for 8 bytes only, and the client never reads
        let (mut client, server) = tokio::io::duplex(8);
        let (server_read, server_write) = tokio::io::split(server);
        let config = ServerConfig {
            write_timeout_ms: 60_000,
            ..ServerConfig::default()
        };
        let id = ConnectionId::from_raw(7);
        let connection =
            Connection::from_parts(id, "test".into(), server_read, server_write, &config);
        let wait = config.delivery_timeout();
        let message = notice("far more than eight bytes");
        connection.sink().deliver(message, wait).await.unwrap();
        tokio::task::yield_now().await;

        drop(connection);

        let mut received = Vec::new();
        timeout(Duration::from_secs(1), client.read_to_end(&mut received))
            .await
            .expect("writer should be aborted with its connection")
            .unwrap();
        assert!(received.len() <= 8);
    }
}
