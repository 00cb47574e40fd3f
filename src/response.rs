// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应构建模块
//!
//! `Response` 既是处理链中可变的响应构建器，也负责最终序列化为 HTTP/1.1 报文。
//! 压缩在处理链结束之后、写回套接字之前进行，因此中间件看到的永远是明文响应体。

use crate::param::*;

use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};
use serde_json::Value;

use std::{
    borrow::Cow,
    io::{self, Write},
};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    /// 额外的响应头，按插入顺序输出
    headers: Vec<(String, String)>,
    content: Bytes,
    /// 响应发送后连接是否移交给 WebSocket
    upgrade: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            headers: Vec::new(),
            content: Bytes::new(),
            upgrade: false,
        }
    }

    /// 只有状态码、没有响应体的响应
    pub fn empty(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response
    }

    /// 未匹配任何路由时的 404，响应体为空
    pub fn not_found() -> Self {
        Self::empty(404)
    }

    pub fn html(html: impl Into<String>) -> Self {
        let mut response = Self::new();
        response
            .set_content_type("text/html; charset=utf-8")
            .set_header("cache-control", NO_CACHE)
            .set_body(html.into());
        response
    }

    /// 响应体为 `serde_json::to_string(value)` 的 JSON 响应
    pub fn json(value: &Value) -> Self {
        let mut response = Self::new();
        response
            .set_content_type("application/json")
            .set_header("cache-control", NO_CACHE)
            .set_body(value.to_string());
        response
    }

    /// 纯文本响应，主要用于错误信息
    pub fn text(code: u16, message: impl Into<String>) -> Self {
        let mut response = Self::new();
        response
            .set_code(code)
            .set_content_type("text/plain; charset=utf-8")
            .set_header("cache-control", NO_CACHE)
            .set_body(message.into());
        response
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::text(500, message)
    }

    /// 静态文件响应
    pub fn file(content: Bytes, mime: &str) -> Self {
        let mut response = Self::new();
        response
            .set_content_type(mime)
            .set_header("cache-control", STATIC_CACHE_CONTROL)
            .set_body(content);
        response
    }

    /// WebSocket 握手成功的 101 响应，写出后连接由实时刷新模块接管
    pub fn switching_protocols(accept_key: &str) -> Self {
        let mut response = Self::empty(101);
        response
            .set_header("upgrade", "websocket")
            .set_header("connection", "Upgrade")
            .set_header("sec-websocket-accept", accept_key);
        response.upgrade = true;
        response
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&information) => information.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// 设置响应头，同名（大小写不敏感）的旧值会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        let name = name.to_lowercase();
        if name == "content-type" {
            return self.set_content_type(value);
        }
        self.headers.retain(|(key, _)| *key != name);
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.content = body.into();
        self
    }

    /// 按客户端声明的编码压缩响应体。图片、字体等已压缩格式与空响应体保持原样。
    pub fn encode(mut self, accept_encoding: &[HttpEncoding], id: u128) -> Self {
        if self.upgrade || self.content.is_empty() || self.content_encoding.is_some() {
            return self;
        }
        let skip = self
            .content_type
            .as_deref()
            .map_or(true, should_skip_compression);
        if skip {
            return self;
        }
        let encoding = match decide_encoding(accept_encoding) {
            Some(encoding) => encoding,
            None => return self,
        };
        match compress(&self.content, encoding) {
            Ok(compressed) => {
                debug!(
                    "[ID{}]使用{}压缩，原始: {} bytes -> 压缩后: {} bytes",
                    id,
                    encoding,
                    self.content.len(),
                    compressed.len()
                );
                self.content = Bytes::from(compressed);
                self.content_encoding = Some(encoding);
            }
            Err(e) => {
                error!("[ID{}]压缩响应体失败: {}，返回未压缩内容", id, e);
            }
        }
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let mut header = [
            version,
            " ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
        ]
        .concat();

        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&["Content-Encoding: ", &e.to_string(), CRLF].concat());
        }
        if !self.upgrade {
            header.push_str(&["Content-Length: ", &self.content.len().to_string(), CRLF].concat());
        }
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value, CRLF].concat());
        }
        if !self.upgrade && self.header("connection").is_none() {
            header.push_str(&["Connection: close", CRLF].concat());
        }
        header.push_str(CRLF);

        [header.as_bytes(), &self.content].concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        if name == "content-type" {
            return self.content_type();
        }
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.content
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress(data: &[u8], mode: HttpEncoding) -> io::Result<Vec<u8>> {
    match mode {
        HttpEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        HttpEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/",
        "video/",
        "audio/",
        "application/zip",
        "application/gzip",
        "application/wasm",
        "font/woff",
        "font/woff2",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}
