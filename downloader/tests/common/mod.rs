#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Keeps the connection open after the partial body
    Stall,
    /// Closes the connection after the partial body
    Close,
    /// Reads the request and never answers
    Silent,
}

/// Answers every request with `Content-Length: total` but only sends the first `sent` bytes.
pub struct StallingServer {
    pub url: String,
    requests: Arc<AtomicUsize>,
}

impl StallingServer {
    /// Sends `sent` bytes, then keeps the connection open without sending anything else.
    pub async fn start(total: usize, sent: usize) -> Self {
        Self::spawn(total, sent, Behaviour::Stall).await
    }

    /// Sends `sent` bytes, then drops the connection.
    pub async fn closing(total: usize, sent: usize) -> Self {
        Self::spawn(total, sent, Behaviour::Close).await
    }

    /// Never sends response headers.
    pub async fn silent() -> Self {
        Self::spawn(0, 0, Behaviour::Silent).await
    }

    async fn spawn(total: usize, sent: usize, behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, total, sent, behaviour));
            }
        });
        StallingServer { url, requests }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve(mut socket: TcpStream, total: usize, sent: usize, behaviour: Behaviour) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    if let Behaviour::Silent = behaviour {
        std::future::pending::<()>().await;
    }
    let head = format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\ncontent-type: application/octet-stream\r\n\r\n",
        total
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&body(sent)).await;
    let _ = socket.flush().await;
    match behaviour {
        Behaviour::Close => {
            let _ = socket.shutdown().await;
        }
        _ => std::future::pending::<()>().await,
    }
}
