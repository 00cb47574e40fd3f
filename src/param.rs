// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了渲染服务器遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 静态资源使用的 MIME 类型映射表。
//! - HTTP 方法、版本及编码格式的强类型枚举。
//! - 模板占位符、实时刷新端点等保留字。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "ssr-webserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 外壳模板中被页面片段替换的占位符
pub const PAGE_PLACEHOLDER: &str = "<!--PAGE-->";

/// 实时刷新使用的保留路径，只接受 WebSocket 升级请求
pub const AUTORELOAD_ENDPOINT: &str = "/__autoreload";

/// 服务端推送给浏览器的"立即刷新"信号
pub const RELOAD_EVENT: &str = "emit_reload";

/// 浏览器端断线后的重连间隔（毫秒）
pub const RECONNECTION_DELAY_MS: u64 = 1000;

/// 文件事件的默认合并窗口（毫秒）
pub const DEFAULT_DEBOUNCE_MS: u64 = 80;

/// 动态内容（HTML、JSON、错误信息）的缓存策略
pub const NO_CACHE: &str = "no-cache";

/// 静态资源的缓存策略
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=31536000, must-revalidate";

/// 无法识别扩展名时的兜底 MIME
pub const DEFAULT_MIME: &str = "text/plain";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx
        map.insert(101, "Switching Protocols");

        // 2xx
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(204, "No Content");

        // 3xx
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(413, "Content Too Large");
        map.insert(426, "Upgrade Required");

        // 5xx
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型（Media Type）的映射表。
    ///
    /// 静态资源路由依据它设置 `Content-Type`，找不到时使用 [`DEFAULT_MIME`]。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("avif", "image/avif");
        map.insert("bmp", "image/bmp");
        map.insert("css", "text/css;charset=utf-8");
        map.insert("csv", "text/csv");
        map.insert("eot", "application/vnd.ms-fontobject");
        map.insert("gif", "image/gif");
        map.insert("htm", "text/html;charset=utf-8");
        map.insert("html", "text/html;charset=utf-8");
        map.insert("ico", "image/x-icon");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("js", "text/javascript;charset=utf-8");
        map.insert("json", "application/json");
        map.insert("jsonld", "application/ld+json");
        map.insert("map", "application/json");
        map.insert("mjs", "text/javascript;charset=utf-8");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain");
        map.insert("wasm", "application/wasm");
        map.insert("webm", "video/webm");
        map.insert("webmanifest", "application/manifest+json");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.1 版本
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 获取资源的元数据（不包含响应体）
    Head,
    /// 查询服务器支持的选项
    Options,
    /// 提交数据或执行操作
    Post,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
        }
    }
}

/// 根据文件扩展名查找 MIME 类型，找不到时返回 `text/plain`。
pub fn mime_for(extension: Option<&str>) -> &'static str {
    extension
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| MIME_TYPES.get(e.as_str()).copied())
        .unwrap_or(DEFAULT_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_known() {
        assert_eq!(mime_for(Some("css")), "text/css;charset=utf-8");
        assert_eq!(mime_for(Some("PNG")), "image/png");
    }

    #[test]
    fn test_mime_unknown_defaults_to_plain_text() {
        assert_eq!(mime_for(Some("xyz")), "text/plain");
        assert_eq!(mime_for(None), "text/plain");
    }

    #[test]
    fn test_method_display() {
        assert_eq!(HttpRequestMethod::Post.to_string(), "POST");
        assert_eq!(HttpEncoding::Gzip.to_string(), "gzip");
    }
}
