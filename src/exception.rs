// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务端渲染管线在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖协议解析错误、文件系统错误、模板渲染错误、缓存与实时刷新错误。
//! - **语义映射**：路由层会把未处理的异常统一转换为 `500` 响应，响应体即为 `Display` 输出。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志或返回给客户端。

use std::{fmt, io};

/// 服务器处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，用于指示处理失败的具体原因。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本（例如：HTTP/2.0）。
    UnsupportedHttpVersion,
    /// 请求报文结构残缺（缺少请求行、报文过大等）。
    MalformedRequest(String),
    /// 请求报文超过配置的大小上限。对应 `413 Content Too Large`。
    PayloadTooLarge(usize),
    /// 在指定目录下未找到所请求的文件。在 Web 语义中对应 `404 Not Found`。
    FileNotFound(String),
    /// 请求的路径格式非法或包含越权尝试（如目录遍历攻击）。对应 `400 Bad Request`。
    InvalidPath(String),
    /// 其余的文件系统或网络 I/O 错误。
    Io(String),
    /// 模板存储中找不到指定的模板文件。
    TemplateNotFound(String),
    /// 模板引擎在编译或渲染阶段报告的错误。
    Render(String),
    /// 路由表注册阶段的错误（例如路径模式无法编译）。
    InvalidRoute(String),
    /// 配置文件无法读取或解析。
    Config(String),
    /// 持久化缓存读写失败。
    Cache(String),
    /// 页面控制器（数据加载器）执行失败。
    Controller(String),
    /// WebSocket 握手或收发失败。
    WebSocket(String),
    /// 文件监听器无法启动。
    Watch(String),
}

use Exception::*;

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
///
/// 这些描述信息会被写入系统日志，也会作为 500 响应的纯文本响应体返回。
impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            MalformedRequest(reason) => write!(f, "Malformed request: {}", reason),
            PayloadTooLarge(limit) => write!(f, "Request exceeds {} bytes", limit),
            FileNotFound(path) => write!(f, "File not found: {}", path),
            InvalidPath(path) => write!(f, "Invalid path: {}", path),
            Io(message) => write!(f, "I/O error: {}", message),
            TemplateNotFound(key) => write!(f, "Template not found: {}", key),
            Render(message) => write!(f, "Render error: {}", message),
            InvalidRoute(message) => write!(f, "Invalid route: {}", message),
            Config(message) => write!(f, "Config error: {}", message),
            Cache(message) => write!(f, "Cache error: {}", message),
            Controller(message) => write!(f, "Controller error: {}", message),
            WebSocket(message) => write!(f, "WebSocket error: {}", message),
            Watch(message) => write!(f, "Watch error: {}", message),
        }
    }
}

impl std::error::Error for Exception {}

impl From<io::Error> for Exception {
    fn from(error: io::Error) -> Self {
        Io(error.to_string())
    }
}

impl Exception {
    /// 将 `io::Error` 与出错路径一并转换，区分"文件不存在"和其余 I/O 错误。
    pub fn from_io(error: io::Error, path: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => FileNotFound(path.to_string()),
            _ => Io(format!("{}: {}", path, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_message() {
        let e = Render("unclosed block".to_string());
        assert_eq!(e.to_string(), "Render error: unclosed block");
    }

    #[test]
    fn test_from_io_not_found() {
        let error = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(
            Exception::from_io(error, "style/a.css"),
            FileNotFound("style/a.css".to_string())
        );
    }

    #[test]
    fn test_from_io_other() {
        let error = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        match Exception::from_io(error, "a") {
            Io(message) => assert!(message.contains("denied")),
            other => panic!("Expected Io, got {:?}", other),
        }
    }
}
