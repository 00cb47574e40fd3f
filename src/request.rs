// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 2. HTTP 标头（Headers）的提取，字段名统一转为小写。
//! 3. 请求体（Body）的截取，供 POST 路由的控制器使用。
//! 4. 查询字符串与 Cookie 的解析。

use crate::{exception::Exception, param::*};
use log::error;
use std::collections::HashMap;

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（包含查询字符串）
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 客户端接受的内容类型（MIME）
    accept: Option<String>,
    /// 全部标头，字段名为小写
    headers: HashMap<String, String>,
    /// 请求体（按 UTF-8 宽松解码）
    body: String,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 以空行为界拆分报文头与请求体，报文头必须是合法的 UTF-8。
    /// 2. 解析请求行：提取方法、路径和协议版本。
    /// 3. 迭代解析标头。
    /// 4. 解析 `Accept-Encoding` 以支持后续的压缩传输。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 连接 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match find_header_end(buffer) {
            Some(end) => (&buffer[..end], &buffer[end + 4..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        // 1. 报文头转换为字符串，失败则判定为非法的 HTTP 请求
        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string.trim_end_matches('\0'),
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or_default();

        // 2. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
        let path = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };

        // 3. 迭代各行解析 Headers
        let mut headers = HashMap::new();
        for line in request_lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let user_agent = headers.get("user-agent").cloned().unwrap_or_default();
        let accept = headers.get("accept").cloned();

        // 4. 解析 Accept-Encoding 标头，只要包含关键词即视为支持
        let mut accept_encoding = vec![];
        if let Some(encoding) = headers.get("accept-encoding") {
            if encoding.contains("gzip") {
                accept_encoding.push(HttpEncoding::Gzip);
            }
            if encoding.contains("deflate") {
                accept_encoding.push(HttpEncoding::Deflate);
            }
        }

        Ok(Self {
            method,
            path,
            version,
            user_agent,
            accept_encoding,
            accept,
            headers,
            body: String::from_utf8_lossy(body).to_string(),
        })
    }
}

/// 返回报文头结束标记 `\r\n\r\n` 的起始下标
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取不含查询字符串与片段的路径部分
    pub fn pathname(&self) -> &str {
        self.path
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or("/")
    }

    /// 获取查询字符串（不含 `?`）
    pub fn query_string(&self) -> &str {
        match self.path.split_once('?') {
            Some((_, query)) => query.split('#').next().unwrap_or_default(),
            None => "",
        }
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    pub fn accept(&self) -> Option<&String> {
        self.accept.as_ref()
    }

    /// 按小写字段名查询标头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// 解析查询参数。重复的键以最后一次出现为准。
    pub fn query_params(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    /// 解析 `Cookie` 标头
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        if let Some(header) = self.header("cookie") {
            for pair in header.split(';') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((key, value)) => cookies.insert(key.to_string(), value.to_string()),
                    None => cookies.insert(pair.to_string(), String::new()),
                };
            }
        }
        cookies
    }

    /// 判断是否为 WebSocket 升级请求
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map_or(false, |u| u.eq_ignore_ascii_case("websocket"));
        let connection = self
            .header("connection")
            .map_or(false, |c| c.to_lowercase().contains("upgrade"));
        upgrade && connection && self.header("sec-websocket-key").is_some()
    }
}
