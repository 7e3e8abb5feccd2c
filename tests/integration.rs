use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use chat_relay_server::relay::SelfDelivery;
use chat_relay_server::{Server, ServerConfig, ShutdownHandle};

const WAIT: Duration = Duration::from_secs(5);

// Helper to start a server on an ephemeral port
async fn start_test_server(config: ServerConfig) -> (SocketAddr, ShutdownHandle, JoinHandle<()>) {
    let server = Server::bind(ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ..config
    })
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(async move {
        server.run().await.unwrap();
    });
    (addr, shutdown, handle)
}

// Read one line, failing the test if nothing arrives in time
async fn read_line<R>(lines: &mut Lines<R>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    timeout(WAIT, lines.next_line()).await.unwrap().unwrap()
}

struct TestClient {
    label: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    // Connect and consume the welcome line, which carries our label
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let welcome = read_line(&mut lines).await.unwrap();
        let label = welcome
            .strip_prefix("SERVER: You are connected as ")
            .unwrap_or_else(|| panic!("unexpected welcome: {welcome}"))
            .to_string();

        Self {
            label,
            lines,
            writer,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer
            .write_all(format!("{text}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed")
    }

    // Read until `line` arrives, returning everything skipped
    async fn recv_until(&mut self, line: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let next = self.recv().await;
            if next == line {
                return skipped;
            }
            skipped.push(next);
        }
    }

    async fn expect_closed(&mut self) {
        loop {
            match timeout(WAIT, self.lines.next_line()).await.unwrap() {
                Ok(None) | Err(_) => return,
                Ok(Some(_)) => continue,
            }
        }
    }
}

fn joined(label: &str) -> String {
    format!("SERVER: {label} has joined the chat.")
}

fn left(label: &str) -> String {
    format!("SERVER: {label} has left the chat.")
}

#[tokio::test]
async fn test_hello_then_leave_then_ping() {
    let (addr, shutdown, server) = start_test_server(ServerConfig::default()).await;

    let mut a = TestClient::connect(addr).await;
    assert_eq!(a.recv().await, joined(&a.label));

    let mut b = TestClient::connect(addr).await;
    assert_eq!(b.recv().await, joined(&b.label));
    assert_eq!(a.recv().await, joined(&b.label));

    a.send("hello").await;
    assert_eq!(b.recv().await, format!("{}: hello", a.label));
    // Default policy echoes to the sender too
    assert_eq!(a.recv().await, format!("{}: hello", a.label));

    let b_label = b.label.clone();
    drop(b);
    assert_eq!(a.recv().await, left(&b_label));

    a.send("ping").await;
    assert_eq!(a.recv().await, format!("{}: ping", a.label));

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_suppressed_self_delivery() {
    let config = ServerConfig {
        self_delivery: SelfDelivery::Suppress,
        ..ServerConfig::default()
    };
    let (addr, shutdown, server) = start_test_server(config).await;

    let mut a = TestClient::connect(addr).await;
    a.recv().await;
    let mut b = TestClient::connect(addr).await;
    b.recv().await;
    a.recv().await;

    a.send("one").await;
    b.send("two").await;
    assert_eq!(b.recv().await, format!("{}: one", a.label));
    // a never sees "one"; the next line it gets is b's
    assert_eq!(a.recv().await, format!("{}: two", b.label));

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_per_sender_order_across_clients() {
    const CLIENTS: usize = 10;
    const MESSAGES: usize = 20;

    let config = ServerConfig {
        announce_presence: false,
        ..ServerConfig::default()
    };
    let (addr, shutdown, server) = start_test_server(config).await;

    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        clients.push(TestClient::connect(addr).await);
    }
    let labels: Vec<String> = clients.iter().map(|c| c.label.clone()).collect();

    let mut tasks = Vec::new();
    for mut client in clients {
        tasks.push(tokio::spawn(async move {
            for i in 0..MESSAGES {
                client.send(&format!("msg {i}")).await;
            }
            let mut received = Vec::new();
            while received.len() < CLIENTS * MESSAGES {
                received.push(client.recv().await);
            }
            received
        }));
    }

    for task in tasks {
        let received = task.await.unwrap();
        assert_eq!(received.len(), CLIENTS * MESSAGES);
        for label in &labels {
            let prefix = format!("{label}: ");
            let from_label: Vec<&str> = received
                .iter()
                .filter_map(|line| line.strip_prefix(prefix.as_str()))
                .collect();
            let expected: Vec<String> = (0..MESSAGES).map(|i| format!("msg {i}")).collect();
            assert_eq!(from_label, expected);
        }
    }

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_full_server_refuses_connection() {
    let config = ServerConfig {
        max_clients: 1,
        ..ServerConfig::default()
    };
    let (addr, shutdown, server) = start_test_server(config).await;

    let mut a = TestClient::connect(addr).await;
    a.recv().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let refusal = read_line(&mut lines).await.unwrap();
    assert_eq!(refusal, "SERVER: Server is full, try again later.");
    assert!(read_line(&mut lines).await.is_none());

    // The refused connection was never announced
    a.send("still alone").await;
    assert_eq!(a.recv().await, format!("{}: still alone", a.label));

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_long_line_is_rejected_for_sender_only() {
    let config = ServerConfig {
        max_line_length: 16,
        ..ServerConfig::default()
    };
    let (addr, shutdown, server) = start_test_server(config).await;

    let mut a = TestClient::connect(addr).await;
    a.recv().await;
    let mut b = TestClient::connect(addr).await;
    b.recv().await;
    a.recv().await;

    a.send("this is definitely longer than sixteen bytes").await;
    assert_eq!(a.recv().await, "SERVER: Message too long (max 16 bytes)");

    a.send("short").await;
    assert_eq!(b.recv().await, format!("{}: short", a.label));

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let (addr, shutdown, server) = start_test_server(ServerConfig::default()).await;

    let mut a = TestClient::connect(addr).await;
    a.recv().await;
    let mut b = TestClient::connect(addr).await;
    b.recv().await;
    a.recv_until(&joined(&b.label)).await;

    shutdown.trigger();
    timeout(WAIT, server).await.unwrap().unwrap();

    a.expect_closed().await;
    b.expect_closed().await;
}
