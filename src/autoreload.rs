// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 实时刷新
//!
//! 仅在开发模式下生效，包含三部分：
//! 1. 中间件：保留路径上的请求升级为 WebSocket；其余请求先交给后续处理器，再向完整的 HTML 文档注入客户端脚本。
//! 2. 连接集合：记录当前所有 WebSocket 连接，广播刷新信号时单个连接的失败不影响其他连接。
//! 3. 目录监听：文件变化经过合并后触发一次广播。
//!
//! 非开发模式下注册、监听与注入全部跳过。

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    tungstenite::{handshake::derive_accept_key, protocol::Role, Message},
    WebSocketStream,
};

use crate::{
    config::Config,
    context::RequestContext,
    exception::Exception,
    param::{AUTORELOAD_ENDPOINT, RECONNECTION_DELAY_MS, RELOAD_EVENT},
    response::Response,
    router::{Handler, Next, Router},
    watch::watch as watch_directory,
};

lazy_static! {
    static ref HTML_DOCUMENT: Regex = Regex::new(r"(?i)^<(html|!doctype html)[\s>]").unwrap();
    static ref HEAD_TAG: Regex = Regex::new(r"(?i)<head>").unwrap();
}

/// `<!doctype html>` 加上一个分隔字符的长度
const HTML_PREFIX_LEN: usize = 16;

/// 当前所有实时刷新连接
#[derive(Default)]
pub struct ConnectionSet {
    next_id: AtomicU64,
    members: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Message>>> {
        match self.members.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("连接集合锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 加入集合，返回连接编号与该连接的待发送消息队列
    pub fn join(&self) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().insert(id, sender);
        (id, receiver)
    }

    pub fn leave(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 向所有连接发送同一条文本消息，返回成功投递的连接数。投递失败的连接会被移出集合。
    pub fn broadcast(&self, text: &str) -> usize {
        let mut members = self.lock();
        let mut failed = Vec::new();
        for (id, sender) in members.iter() {
            if sender.send(Message::text(text.to_string())).is_err() {
                failed.push(*id);
            }
        }
        for id in &failed {
            debug!("实时刷新连接{}已失效，移出集合", id);
            members.remove(id);
        }
        members.len()
    }
}

pub struct Autoreload {
    enabled: bool,
    watch_directory: PathBuf,
    debounce: Duration,
    connections: ConnectionSet,
}

impl Autoreload {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.autoreload_active(),
            watch_directory: PathBuf::from(&config.autoreload().watch_directory),
            debounce: Duration::from_millis(config.autoreload().debounce_ms),
            connections: ConnectionSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// 注册中间件与保留路径。必须先于其他路由注册，保证保留路径优先匹配。
    pub fn register(self: &Arc<Self>, router: &mut Router) -> Result<(), Exception> {
        if !self.enabled {
            return Ok(());
        }
        router.layer(self.clone());
        router.get(AUTORELOAD_ENDPOINT, vec![])?;
        info!("实时刷新已启用：{}", AUTORELOAD_ENDPOINT);
        Ok(())
    }

    pub fn broadcast_reload(&self) -> usize {
        let delivered = self.connections.broadcast(RELOAD_EVENT);
        info!("检测到文件变化，已通知{}个页面刷新", delivered);
        delivered
    }

    /// 监听目录并在变化时广播刷新信号，直到所在任务被取消
    pub async fn watch(self: Arc<Self>) -> Result<(), Exception> {
        if !self.enabled {
            return Ok(());
        }
        let this = self.clone();
        watch_directory(&self.watch_directory, self.debounce, move || {
            this.broadcast_reload();
        })
        .await
    }

    /// 接管已经完成握手的连接，直到任意一方关闭
    pub async fn accept(&self, stream: TcpStream, id: u128) {
        let socket = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        let (mut sink, mut source) = socket.split();
        let (connection, mut outgoing) = self.connections.join();
        info!(
            "[ID{}]实时刷新连接已建立，当前连接数：{}",
            id,
            self.connections.len()
        );

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("[ID{}]发送刷新信号失败: {}", id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("[ID{}]实时刷新连接出错: {}", id, e);
                    break;
                }
            }
        }

        self.connections.leave(connection);
        writer.abort();
        info!(
            "[ID{}]实时刷新连接已关闭，当前连接数：{}",
            id,
            self.connections.len()
        );
    }
}

#[async_trait]
impl Handler for Autoreload {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Response, Exception> {
        if ctx.request().pathname() == AUTORELOAD_ENDPOINT {
            let request = ctx.request();
            let key = match request.header("sec-websocket-key") {
                Some(key) if request.is_websocket_upgrade() => key,
                _ => {
                    warn!("[ID{}]{}只接受WebSocket升级请求", ctx.id(), AUTORELOAD_ENDPOINT);
                    return Ok(Response::text(426, "Expected a websocket upgrade"));
                }
            };
            return Ok(Response::switching_protocols(&derive_accept_key(key.as_bytes())));
        }

        let mut response = next.run(ctx).await?;
        if !starts_like_html(response.body()) {
            return Ok(response);
        }
        let injected = inject_client(&response.body_text());
        if let Some(html) = injected {
            debug!("[ID{}]已注入实时刷新脚本", ctx.id());
            response.set_body(html);
        }
        Ok(response)
    }
}

/// 响应体是否为完整的 HTML 文档
pub fn is_html(body: &str) -> bool {
    HTML_DOCUMENT.is_match(body)
}

/// 只检查响应体开头的若干字节，图片、字体等二进制响应不会被整体解码
pub fn starts_like_html(body: &[u8]) -> bool {
    let prefix = &body[..body.len().min(HTML_PREFIX_LEN)];
    is_html(&String::from_utf8_lossy(prefix))
}

/// 在第一个 `<head>` 之后插入客户端脚本。不是 HTML 文档或没有 `<head>` 时返回 `None`。
pub fn inject_client(body: &str) -> Option<String> {
    if !is_html(body) {
        return None;
    }
    let head = HEAD_TAG.find(body)?;
    Some(
        [
            &body[..head.end()],
            "\n<script>",
            &client_script(),
            "</script>",
            &body[head.end()..],
        ]
        .concat(),
    )
}

/// 浏览器端脚本。收到刷新信号时重新加载页面；连接断开后每隔固定时间重连，
/// 重连成功同样重新加载，以便拿到重启后的服务端渲染结果。
pub fn client_script() -> String {
    format!(
        r#"(function () {{
  var url = (location.protocol === "https:" ? "wss://" : "ws://") + location.host + "{endpoint}";
  var socket = null;
  var timer = null;
  function refresh() {{
    location.reload();
  }}
  function connect(onopen) {{
    if (socket) socket.close();
    socket = new WebSocket(url);
    if (onopen) socket.addEventListener("open", onopen);
    socket.addEventListener("message", function (event) {{
      if (event.data === "{event}") refresh();
    }});
    socket.addEventListener("close", function () {{
      clearTimeout(timer);
      timer = setTimeout(function () {{
        connect(refresh);
      }}, {delay});
    }});
  }}
  connect();
}})();"#,
        endpoint = AUTORELOAD_ENDPOINT,
        event = RELOAD_EVENT,
        delay = RECONNECTION_DELAY_MS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use serde_json::json;

    struct Page(&'static str);

    #[async_trait]
    impl Handler for Page {
        async fn handle(&self, _ctx: &mut RequestContext, _next: Next<'_>) -> Result<Response, Exception> {
            Ok(Response::html(self.0))
        }
    }

    struct Api;

    #[async_trait]
    impl Handler for Api {
        async fn handle(&self, _ctx: &mut RequestContext, _next: Next<'_>) -> Result<Response, Exception> {
            Ok(Response::json(&json!({"html": "<html><head>"})))
        }
    }

    fn development() -> Config {
        Config::from_toml_str("mode = 'development'").unwrap()
    }

    fn router_with(autoreload: &Arc<Autoreload>) -> Router {
        let mut router = Router::new();
        autoreload.register(&mut router).unwrap();
        router
            .get("/", vec![Arc::new(Page("<!DOCTYPE html><html><head><title>x</title></head></html>"))])
            .unwrap();
        router.get("/fragment", vec![Arc::new(Page("<div><head></head></div>"))]).unwrap();
        router.post("/api", vec![Arc::new(Api)]).unwrap();
        router
    }

    fn request(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    #[test]
    fn test_is_html() {
        assert!(is_html("<!DOCTYPE html><html></html>"));
        assert!(is_html("<!doctype html>"));
        assert!(is_html("<HTML lang=\"en\"><head></head></HTML>"));
        assert!(!is_html("{\"a\":1}"));
        assert!(!is_html("<div>hi</div>"));
        assert!(!is_html("<htmlx>"));
    }

    #[test]
    fn test_inject_after_first_head() {
        let body = "<!DOCTYPE html><html><head><title>t</title></head><body><head></head></body></html>";
        let injected = inject_client(body).unwrap();
        assert!(injected.starts_with("<!DOCTYPE html><html><head>\n<script>"));
        assert_eq!(injected.matches("<script>").count(), 1);
        assert!(injected.ends_with("</script><title>t</title></head><body><head></head></body></html>"));
    }

    #[test]
    fn test_non_html_is_untouched() {
        assert_eq!(inject_client("{\"html\":\"<html><head>\"}"), None);
        assert_eq!(inject_client("<html><body></body></html>"), None);
    }

    #[test]
    fn test_client_script_constants() {
        let script = client_script();
        assert!(script.contains("\"/__autoreload\""));
        assert!(script.contains("\"emit_reload\""));
        assert!(script.contains("}, 1000);"));
    }

    #[test]
    fn test_client_script_reloads_after_reconnect() {
        let script = client_script();
        let close_handler = &script[script.find("\"close\"").unwrap()..];
        assert!(close_handler.contains("clearTimeout(timer);"));
        assert!(close_handler.contains("connect(refresh);"));
        assert!(script.contains("socket.addEventListener(\"open\", onopen)"));
        // 首次连接不刷新
        assert!(script.trim_end().ends_with("connect();\n})();"));
    }

    #[test]
    fn test_starts_like_html_checks_prefix_only() {
        assert!(starts_like_html(b"<!DOCTYPE html>\n<html>\xff\xfe"));
        assert!(starts_like_html(b"<html>"));
        assert!(!starts_like_html(b"\x89PNG\r\n\x1a\n\x00\x00"));
        assert!(!starts_like_html(b""));
        assert!(!starts_like_html(b"{\"html\":\"<html>\"}"));
    }

    #[test]
    fn test_broadcast_isolates_failures() {
        let set = ConnectionSet::new();
        let (_, mut alive) = set.join();
        let (_, dead) = set.join();
        drop(dead);

        assert_eq!(set.broadcast(RELOAD_EVENT), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(alive.try_recv().unwrap(), Message::text(RELOAD_EVENT));
    }

    #[test]
    fn test_leave_removes_member() {
        let set = ConnectionSet::new();
        let (first, _a) = set.join();
        let (second, _b) = set.join();
        assert_ne!(first, second);
        set.leave(first);
        assert_eq!(set.len(), 1);
        set.leave(first);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_middleware_injects_into_html_only() {
        let autoreload = Arc::new(Autoreload::new(&development()));
        let router = router_with(&autoreload);

        let page = router.dispatch(request("GET / HTTP/1.1\r\n\r\n"), 0).await;
        assert!(page.body_text().contains("<head>\n<script>"));

        let fragment = router.dispatch(request("GET /fragment HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(fragment.body_text(), "<div><head></head></div>");

        let api = router.dispatch(request("POST /api HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(api.body_text(), r#"{"html":"<html><head>"}"#);
    }

    #[tokio::test]
    async fn test_endpoint_handshake() {
        let autoreload = Arc::new(Autoreload::new(&development()));
        let router = router_with(&autoreload);

        let response = router
            .dispatch(
                request("GET /__autoreload HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"),
                0,
            )
            .await;
        assert_eq!(response.status_code(), 101);
        assert!(response.is_upgrade());
        assert_eq!(
            response.header("sec-websocket-accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );

        let plain = router
            .dispatch(request("GET /__autoreload HTTP/1.1\r\n\r\n"), 0)
            .await;
        assert_eq!(plain.status_code(), 426);
    }

    #[tokio::test]
    async fn test_disabled_outside_development() {
        let production = Config::from_toml_str("mode = 'production'").unwrap();
        let autoreload = Arc::new(Autoreload::new(&production));
        assert!(!autoreload.is_enabled());

        let router = router_with(&autoreload);
        assert_eq!(router.routes().len(), 3);
        let page = router.dispatch(request("GET / HTTP/1.1\r\n\r\n"), 0).await;
        assert!(!page.body_text().contains("<script>"));
        let endpoint = router.dispatch(request("GET /__autoreload HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(endpoint.status_code(), 404);

        // 关闭时 watch 立即返回
        autoreload.clone().watch().await.unwrap();
    }
}
