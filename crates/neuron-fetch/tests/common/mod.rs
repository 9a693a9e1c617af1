//! A minimal HTTP/1.1 server for tests: one request per connection, bodies
//! looked up by request target (path and query, without the leading slash).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub type Objects = HashMap<String, Vec<u8>>;

struct Store {
    objects: Objects,
    /// Bearer token every request must carry, if any.
    token: Option<String>,
}

/// Start a server and return its base URL. `build` receives the base URL so
/// that responses can point back at the server.
pub async fn serve(build: impl FnOnce(&str) -> Objects, token: Option<&str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let store = Arc::new(Store {
        objects: build(&base),
        token: token.map(str::to_string),
    });

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _ = respond(socket, &store).await;
            });
        }
    });
    base
}

async fn respond(mut socket: TcpStream, store: &Store) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&request);
    let mut lines = head.lines();
    let target = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .trim_start_matches('/')
        .to_string();
    let authorization = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("authorization")
            .then(|| value.trim().to_string())
    });

    let authorized = match &store.token {
        Some(token) => authorization.as_deref() == Some(format!("Bearer {token}").as_str()),
        None => true,
    };
    let (status, body) = if !authorized {
        ("401 Unauthorized", Vec::new())
    } else {
        match store.objects.get(&target) {
            Some(body) => ("200 OK", body.clone()),
            None => ("404 Not Found", Vec::new()),
        }
    };

    let mut response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    socket.write_all(&response).await?;
    socket.shutdown().await
}
