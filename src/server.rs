// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器
//!
//! 负责组装路由表并运行监听循环。每个连接由独立的 Tokio 任务处理：
//! 读取完整报文 → 解析 → 路由分发 → 压缩 → 写回。
//! 如果响应是 WebSocket 握手，连接随后移交给实时刷新模块。
//!
//! 路由注册顺序：实时刷新保留路径 → 静态资源前缀 → 配置文件中声明的路由 → 调用方追加的路由。

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
};

use crate::{
    autoreload::Autoreload,
    config::{Config, RouteConfig},
    disk_cache::DiskCache,
    exception::Exception,
    handlers::{CachedController, Controller, JsonHandler, PageHandler, StaticData, StaticFiles},
    render::Render,
    request::{find_header_end, Request},
    response::Response,
    router::{Handler, Router},
    template::TemplateStore,
};

pub struct Server {
    config: Arc<Config>,
    store: Arc<TemplateStore>,
    autoreload: Arc<Autoreload>,
    disk_cache: Arc<DiskCache>,
    router: Router,
    active_connections: Arc<AtomicU32>,
}

impl Server {
    pub async fn new(config: Config, engine: Arc<dyn Render>) -> Result<Self, Exception> {
        let config = Arc::new(config);
        let store = Arc::new(TemplateStore::load(&config, engine).await?);
        let autoreload = Arc::new(Autoreload::new(&config));
        let disk_cache = Arc::new(DiskCache::new(
            &config.cache().directory,
            Duration::from_millis(config.cache().timeout_ms),
        ));

        let mut router = Router::new();
        autoreload.register(&mut router)?;
        let static_files: Arc<dyn Handler> =
            Arc::new(StaticFiles::new(config.renderer().frontend_path()));
        for pattern in config.static_routes() {
            router.get(pattern, vec![static_files.clone()])?;
        }

        let mut server = Self {
            config: config.clone(),
            store,
            autoreload,
            disk_cache,
            router,
            active_connections: Arc::new(AtomicU32::new(0)),
        };
        for route in config.routes() {
            server.add_config_route(route)?;
        }
        info!("路由表构建完成，共{}条路由", server.router.routes().len());
        Ok(server)
    }

    fn add_config_route(&mut self, route: &RouteConfig) -> Result<(), Exception> {
        let controller: Arc<dyn Controller> =
            Arc::new(StaticData::new(route.data.clone(), route.seo.clone()));
        match route.method.to_uppercase().as_str() {
            "GET" => {
                let page = route.page.as_deref().ok_or_else(|| {
                    Exception::InvalidRoute(format!("GET {} has no page", route.path))
                })?;
                self.page(&route.path, page, controller)?;
            }
            "POST" => {
                self.post(&route.path, controller)?;
            }
            other => {
                return Err(Exception::InvalidRoute(format!(
                    "unsupported method {} for {}",
                    other, route.path
                )))
            }
        }
        Ok(())
    }

    /// 注册一个页面路由
    pub fn page(
        &mut self,
        pattern: &str,
        page: &str,
        controller: Arc<dyn Controller>,
    ) -> Result<&mut Self, Exception> {
        let handler = PageHandler::new(self.store.clone(), page, controller);
        self.router.get(pattern, vec![Arc::new(handler)])?;
        Ok(self)
    }

    /// 注册一个返回 JSON 的 POST 路由
    pub fn post(
        &mut self,
        pattern: &str,
        controller: Arc<dyn Controller>,
    ) -> Result<&mut Self, Exception> {
        self.router
            .post(pattern, vec![Arc::new(JsonHandler::new(controller))])?;
        Ok(self)
    }

    /// 用持久化缓存包装控制器，仅在开发模式下生效
    pub fn cached(&self, controller: Arc<dyn Controller>) -> Arc<dyn Controller> {
        Arc::new(CachedController::new(
            controller,
            self.disk_cache.clone(),
            self.config.mode().is_development(),
        ))
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn store(&self) -> Arc<TemplateStore> {
        self.store.clone()
    }

    pub fn autoreload(&self) -> Arc<Autoreload> {
        self.autoreload.clone()
    }

    pub fn active_connections(&self) -> Arc<AtomicU32> {
        self.active_connections.clone()
    }

    /// 运行监听循环，直到 `shutdown` 变为 `true` 或其发送端被丢弃。
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Exception> {
        let server = Arc::new(self);

        let watcher = tokio::spawn({
            let autoreload = server.autoreload.clone();
            async move {
                if let Err(e) = autoreload.watch().await {
                    error!("文件监听启动失败: {}", e);
                }
            }
        });

        let mut id: u128 = 0;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("主循环接收到停机指令，正在退出...");
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("接受TCP连接失败: {}", e);
                            continue;
                        }
                    };
                    debug!("[ID{}]TCP连接已建立：{}", id, addr);

                    let server = server.clone();
                    let connection_id = id;
                    tokio::spawn(async move {
                        server.active_connections.fetch_add(1, Ordering::SeqCst);
                        server.handle_connection(stream, connection_id).await;
                        server.active_connections.fetch_sub(1, Ordering::SeqCst);
                    });
                    id += 1;
                }
            }
        }

        watcher.abort();
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream, id: u128) {
        let buffer = match read_request(&mut stream, self.config.max_request_size()).await {
            Ok(Some(buffer)) => buffer,
            Ok(None) => return,
            Err(e) => {
                warn!("[ID{}]读取HTTP请求失败: {}", id, e);
                let code = match e {
                    Exception::PayloadTooLarge(_) => 413,
                    _ => 400,
                };
                write_response(&mut stream, &Response::text(code, e.to_string()), id).await;
                return;
            }
        };
        debug!("[ID{}]HTTP请求接收完毕", id);

        let start_time = Instant::now();
        let request = match Request::try_from(&buffer, id) {
            Ok(request) => request,
            Err(e) => {
                error!("[ID{}]解析HTTP请求失败: {}", id, e);
                write_response(&mut stream, &Response::text(400, "Bad Request"), id).await;
                return;
            }
        };
        debug!("[ID{}]成功解析HTTP请求", id);

        let accept_encoding = request.accept_encoding().clone();
        let access = format!(
            "{}, {}, {}",
            request.version(),
            request.path(),
            request.method()
        );
        let user_agent = request.user_agent().to_string();

        let response = self
            .router
            .dispatch(request, id)
            .await
            .encode(&accept_encoding, id);
        debug!(
            "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
            id,
            start_time.elapsed().as_millis()
        );
        info!(
            "[ID{}] {}, {}, {}, {}, ",
            id,
            access,
            response.status_code(),
            response.information(),
            user_agent,
        );

        if !write_response(&mut stream, &response, id).await {
            return;
        }
        if response.is_upgrade() {
            self.autoreload.accept(stream, id).await;
        }
    }
}

async fn write_response(stream: &mut TcpStream, response: &Response, id: u128) -> bool {
    let bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, bytes.len());
    if let Err(e) = stream.write_all(&bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return false;
    }
    let _ = stream.flush().await;
    true
}

/// 读取一个完整的请求：报文头加上 `Content-Length` 声明的请求体。
/// 对端在发送任何数据之前关闭连接时返回 `None`。
async fn read_request(stream: &mut TcpStream, limit: usize) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(Exception::MalformedRequest(
                "connection closed before the request was complete".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > limit {
            return Err(Exception::PayloadTooLarge(limit));
        }

        if let Some(end) = find_header_end(&buffer) {
            let total = match (end + 4).checked_add(content_length(&buffer[..end])) {
                Some(total) if total <= limit => total,
                _ => return Err(Exception::PayloadTooLarge(limit)),
            };
            if buffer.len() >= total {
                buffer.truncate(total);
                return Ok(Some(buffer));
            }
        }
    }
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length() {
        assert_eq!(content_length(b"POST / HTTP/1.1\r\nContent-Length: 12"), 12);
        assert_eq!(content_length(b"POST / HTTP/1.1\r\ncontent-length:3\r\nHost: x"), 3);
        assert_eq!(content_length(b"GET / HTTP/1.1\r\nHost: x"), 0);
        assert_eq!(content_length(b"POST / HTTP/1.1\r\nContent-Length: abc"), 0);
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_read_request_waits_for_body() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            client
                .write_all(b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(b"llo").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let buffer = read_request(&mut server, 1024).await.unwrap().unwrap();
        assert!(buffer.ends_with(b"\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn test_read_request_limit() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            let _ = client
                .write_all(b"POST /api HTTP/1.1\r\nContent-Length: 5000\r\n\r\n")
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        assert_eq!(
            read_request(&mut server, 1024).await.unwrap_err(),
            Exception::PayloadTooLarge(1024)
        );
    }

    #[tokio::test]
    async fn test_read_request_huge_content_length() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            let _ = client
                .write_all(b"POST /api HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n")
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        assert_eq!(
            read_request(&mut server, 1024 * 1024).await.unwrap_err(),
            Exception::PayloadTooLarge(1024 * 1024)
        );
    }

    #[tokio::test]
    async fn test_read_request_closed_without_data() {
        let (client, mut server) = pair().await;
        drop(client);
        assert_eq!(read_request(&mut server, 1024).await.unwrap(), None);
    }
}
