// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求上下文
//!
//! 每个请求在路由匹配成功后创建一个 `RequestContext`，响应发送后随之销毁。
//! 路径参数、查询参数与 Cookie 在创建时解析一次，之后只读；只有响应构建器可以被处理链修改。

use std::collections::HashMap;

use crate::{request::Request, response::Response};

pub struct RequestContext {
    id: u128,
    request: Request,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, String>,
    cookies: HashMap<String, String>,
    response: Response,
}

impl RequestContext {
    pub fn new(request: Request, path_params: HashMap<String, String>, id: u128) -> Self {
        let query_params = request.query_params();
        let cookies = request.cookies();
        Self {
            id,
            request,
            path_params,
            query_params,
            cookies,
            response: Response::new(),
        }
    }

    /// 连接 ID，用于日志追踪
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// 取出当前的响应构建器，原位置留下一个空的 200 响应
    pub fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_parses_query_and_cookies_once() {
        let request = Request::try_from(
            b"GET /blog/42?sort=asc HTTP/1.1\r\nCookie: theme=dark\r\n\r\n",
            7,
        )
        .unwrap();
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let ctx = RequestContext::new(request, params, 7);
        assert_eq!(ctx.id(), 7);
        assert_eq!(ctx.path_param("id"), Some("42"));
        assert_eq!(ctx.query_params()["sort"], "asc");
        assert_eq!(ctx.cookies()["theme"], "dark");
        assert_eq!(ctx.request().pathname(), "/blog/42");
    }

    #[test]
    fn test_take_response_leaves_default() {
        let request = Request::try_from(b"GET / HTTP/1.1\r\n\r\n", 0).unwrap();
        let mut ctx = RequestContext::new(request, HashMap::new(), 0);
        ctx.response_mut().set_code(404);

        assert_eq!(ctx.take_response().status_code(), 404);
        assert_eq!(ctx.response().status_code(), 200);
    }
}
