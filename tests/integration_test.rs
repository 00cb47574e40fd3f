// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 端到端测试：在临时端口上启动真实的服务器，通过原始 TCP 连接与 WebSocket 客户端访问。

use std::{
    io::Read,
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use serde_json::{json, Value};
use ssr_webserver::{Autoreload, Config, HandlebarsEngine, Server};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};

struct TestServer {
    addr: SocketAddr,
    autoreload: Arc<Autoreload>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    _frontend: tempfile::TempDir,
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn frontend() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app.html",
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{{$seo.title}}</title>\n</head>\n<body>{{> header}}<!--PAGE--></body>\n</html>",
    );
    write(dir.path(), "components/header.html", "<header>{{company}}</header>");
    write(dir.path(), "pages/index.html", "<h1>{{heading}}</h1>");
    write(dir.path(), "pages/about.html", "<p>{{$path}}</p>");
    write(dir.path(), "style/main.css", &"body { margin: 0 auto; }\n".repeat(50));
    dir
}

async fn start(mode: &str) -> TestServer {
    let dir = frontend();
    let root = dir.path().display().to_string();
    let config = Config::from_toml_str(&format!(
        r#"
        mode = '{mode}'
        max_request_size = 4096

        [data]
        company = 'ACME'

        [renderer]
        frontend_directory = '{root}'

        [autoreload]
        watch_directory = '{root}'

        [cache]
        directory = '{root}/.cache'

        [[routes]]
        path = '/'
        page = 'index.html'
        data = {{ heading = 'Welcome' }}

        [[routes]]
        path = '/about'
        page = 'about.html'
        seo = {{ title = 'About' }}

        [[routes]]
        path = '/api'
        method = 'POST'
        data = {{ answer = 42 }}
        "#
    ))
    .unwrap();

    let server = Server::new(config, Arc::new(HandlebarsEngine::new()))
        .await
        .unwrap();
    let autoreload = server.autoreload();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, receiver) = watch::channel(false);
    let handle = tokio::spawn(async move {
        server.serve(listener, receiver).await.unwrap();
    });

    TestServer {
        addr,
        autoreload,
        shutdown,
        handle,
        _frontend: dir,
    }
}

async fn send(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

/// 返回状态码、小写的响应头与响应体
fn parse(response: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    let head = String::from_utf8_lossy(&response[..end]).to_string();
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect();
    (status, headers, response[end + 4..].to_vec())
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

async fn get(addr: SocketAddr, path: &str) -> (u16, Vec<(String, String)>, String) {
    let raw = send(addr, format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes()).await;
    let (status, headers, body) = parse(&raw);
    (status, headers, String::from_utf8(body).unwrap())
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_unregistered_path_is_empty_404() {
        let server = start("production").await;
        let (status, headers, body) = get(server.addr, "/does-not-exist").await;
        assert_eq!(status, 404);
        assert_eq!(header(&headers, "content-length"), Some("0"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_post_route_returns_json() {
        let server = start("production").await;
        let raw = send(
            server.addr,
            b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await;
        let (status, headers, body) = parse(&raw);
        assert_eq!(status, 200);
        assert_eq!(header(&headers, "content-type"), Some("application/json"));
        assert_eq!(header(&headers, "cache-control"), Some("no-cache"));
        assert_eq!(String::from_utf8(body.clone()).unwrap(), r#"{"answer":42}"#);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"answer": 42}));
    }

    #[tokio::test]
    async fn test_production_page_without_injection() {
        let server = start("production").await;
        let (status, headers, body) = get(server.addr, "/").await;
        assert_eq!(status, 200);
        assert_eq!(header(&headers, "content-type"), Some("text/html; charset=utf-8"));
        assert!(body.contains("<title>Default title</title>"));
        assert!(body.contains("<header>ACME</header><h1>Welcome</h1>"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn test_page_seo_and_path() {
        let server = start("production").await;
        let (_, _, body) = get(server.addr, "/about?ref=home").await;
        assert!(body.contains("<title>About</title>"));
        assert!(body.contains("<p>/about</p>"));
    }

    #[tokio::test]
    async fn test_development_page_gets_client_script() {
        let server = start("development").await;
        let (status, _, body) = get(server.addr, "/").await;
        assert_eq!(status, 200);
        assert!(body.starts_with("<!DOCTYPE html>\n<html>\n<head>\n<script>"));
        assert!(body.contains("/__autoreload"));
        assert!(body.contains("<h1>Welcome</h1>"));
    }

    #[tokio::test]
    async fn test_static_file() {
        let server = start("production").await;
        let (status, headers, body) = get(server.addr, "/style/main.css").await;
        assert_eq!(status, 200);
        assert_eq!(header(&headers, "content-type"), Some("text/css;charset=utf-8"));
        assert_eq!(
            header(&headers, "cache-control"),
            Some("public, max-age=31536000, must-revalidate")
        );
        assert!(body.starts_with("body { margin: 0 auto; }"));

        let (status, _, _) = get(server.addr, "/style/missing.css").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_gzip_encoding() {
        let server = start("production").await;
        let raw = send(
            server.addr,
            b"GET /style/main.css HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip, deflate\r\n\r\n",
        )
        .await;
        let (status, headers, body) = parse(&raw);
        assert_eq!(status, 200);
        assert_eq!(header(&headers, "content-encoding"), Some("gzip"));
        assert_eq!(
            header(&headers, "content-length"),
            Some(body.len().to_string().as_str())
        );

        let mut decoded = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "body { margin: 0 auto; }\n".repeat(50));
    }

    #[tokio::test]
    async fn test_websocket_receives_reload() {
        let server = start("development").await;
        let url = format!("ws://{}/__autoreload", server.addr);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while server.autoreload.connections().len() != 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(server.autoreload.broadcast_reload(), 1);

        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message.to_text().unwrap(), "emit_reload");

        drop(socket);
        timeout(Duration::from_secs(5), async {
            while !server.autoreload.connections().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_file_change_triggers_reload() {
        let server = start("development").await;
        let url = format!("ws://{}/__autoreload", server.addr);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let page = server._frontend.path().join("pages/index.html");

        // 监听器在后台任务中启动，持续修改文件直到收到刷新信号
        let message = timeout(Duration::from_secs(10), async {
            let mut round = 0;
            loop {
                std::fs::write(&page, format!("<h1>{}</h1>", round)).unwrap();
                round += 1;
                if let Ok(Some(message)) = timeout(Duration::from_millis(500), socket.next()).await {
                    break message.unwrap();
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(message.to_text().unwrap(), "emit_reload");
    }

    #[tokio::test]
    async fn test_autoreload_endpoint_absent_in_production() {
        let server = start("production").await;
        let (status, _, _) = get(server.addr, "/__autoreload").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let server = start("development").await;
        let (status, _, _) = get(server.addr, "/").await;
        assert_eq!(status, 200);

        server.shutdown.send(true).unwrap();
        timeout(Duration::from_secs(5), server.handle)
            .await
            .unwrap()
            .unwrap();
    }
}
