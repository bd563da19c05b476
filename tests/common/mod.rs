//! Local SOCKS5 fixtures for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Target URL used by fixture runs; the fixtures answer it themselves
pub const TEST_URL: &str = "http://127.0.0.1/ip";

/// How a fixture proxy behaves
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Complete the handshake and answer the tunnelled request with this status
    Respond(u16),
    /// Refuse every authentication method
    RejectAuth,
    /// Accept the TCP connection and never send a byte
    Silent,
}

/// Start a fixture proxy on an ephemeral loopback port
pub async fn spawn_socks5(behaviour: Behaviour) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = serve(stream, behaviour).await;
            });
        }
    });

    addr
}

/// A loopback address with nothing listening on it
pub fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn serve(mut stream: TcpStream, behaviour: Behaviour) -> std::io::Result<()> {
    // Greeting: VER NMETHODS METHODS...
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;

    let status = match behaviour {
        Behaviour::RejectAuth => {
            stream.write_all(&[0x05, 0xff]).await?;
            return stream.shutdown().await;
        }
        Behaviour::Silent => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            return Ok(());
        }
        Behaviour::Respond(status) => status,
    };
    stream.write_all(&[0x05, 0x00]).await?;

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let addr_len = match request[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => return stream.shutdown().await,
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
        .await?;

    // Tunnelled HTTP request, answered by the fixture itself.
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = r#"{"origin": "127.0.0.1"}"#;
    let response = format!(
        "HTTP/1.1 {status} Fixture\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
