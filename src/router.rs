// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 路由表按注册顺序匹配，第一个方法与路径模式都匹配的路由胜出，与模式的"具体程度"无关。
//!
//! ## 路径模式
//! - `:name` 匹配一个路径段，以 `name` 为键放入路径参数。
//! - `( ... )` 中的内容按正则表达式原样保留，按出现顺序以 `"0"`、`"1"`…为键。
//! - `*` 等价于 `(.*)`。
//! - 其余字符按字面匹配。
//!
//! ## 处理链
//! 全局中间件（`layer`）排在路由自身的处理器之前，组成一条有序的处理链。
//! 每个处理器拿到上下文与"链的剩余部分"，可以调用 `next.run(ctx)` 继续，也可以直接返回（短路）。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::{debug, error};
use regex::Regex;

use crate::{
    context::RequestContext, exception::Exception, param::HttpRequestMethod, request::Request,
    response::Response,
};

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Response, Exception>;
}

/// 处理链中尚未执行的部分
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Handler>]) -> Self {
        Self { chain }
    }

    /// 执行链中的下一个处理器。链已走完时返回上下文中的响应构建器。
    pub async fn run(self, ctx: &mut RequestContext) -> Result<Response, Exception> {
        match self.chain.split_first() {
            Some((handler, rest)) => handler.handle(ctx, Next { chain: rest }).await,
            None => Ok(ctx.take_response()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

pub struct Route {
    method: HttpRequestMethod,
    pattern: String,
    regex: Regex,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Route {
    pub fn new(
        method: HttpRequestMethod,
        pattern: &str,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Result<Self, Exception> {
        Ok(Self {
            method,
            pattern: pattern.to_string(),
            regex: compile_pattern(pattern)?,
            handlers,
        })
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 路径匹配时返回提取出的路径参数
    pub fn matches(&self, method: HttpRequestMethod, pathname: &str) -> Option<HashMap<String, String>> {
        if method != self.method {
            return None;
        }
        let captures = self.regex.captures(pathname)?;
        let mut params = HashMap::new();
        let mut position = 0;
        for (index, name) in self.regex.capture_names().enumerate().skip(1) {
            let value = captures
                .get(index)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match name {
                Some(name) => {
                    params.insert(name.to_string(), value);
                }
                None => {
                    params.insert(position.to_string(), value);
                    position += 1;
                }
            }
        }
        Some(params)
    }
}

/// 把路径模式编译为锚定的正则表达式
fn compile_pattern(pattern: &str) -> Result<Regex, Exception> {
    let mut source = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ':' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    source.push_str(&regex::escape(":"));
                } else {
                    source.push_str(&format!("(?P<{}>[^/]+)", name));
                }
            }
            '(' => {
                let mut depth = 1;
                let mut group = String::from("(");
                for inner in chars.by_ref() {
                    group.push(inner);
                    match inner {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if depth != 0 {
                    return Err(Exception::InvalidRoute(format!("unclosed group in {}", pattern)));
                }
                source.push_str(&group);
            }
            '*' => source.push_str("(.*)"),
            _ => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| Exception::InvalidRoute(format!("{}: {}", pattern, e)))
}

#[derive(Default)]
pub struct Router {
    layers: Vec<Arc<dyn Handler>>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条路由。先注册的路由优先匹配。
    pub fn register(
        &mut self,
        method: HttpRequestMethod,
        pattern: &str,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Result<&mut Self, Exception> {
        let route = Route::new(method, pattern, handlers)?;
        debug!("注册路由：{} {}", method, pattern);
        self.routes.push(route);
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Result<&mut Self, Exception> {
        self.register(HttpRequestMethod::Get, pattern, handlers)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Result<&mut Self, Exception> {
        self.register(HttpRequestMethod::Post, pattern, handlers)
    }

    /// 添加全局中间件，作用于所有匹配成功的请求，排在路由处理器之前
    pub fn layer(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.layers.push(handler);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// 按注册顺序查找第一条匹配的路由
    pub fn find(
        &self,
        method: HttpRequestMethod,
        pathname: &str,
    ) -> Option<(&Route, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(method, pathname).map(|params| (route, params)))
    }

    /// 把请求交给匹配的处理链。未匹配返回空响应体的 404，处理链失败返回 500。
    pub async fn dispatch(&self, request: Request, id: u128) -> Response {
        let (route, params) = match self.find(request.method(), request.pathname()) {
            Some(found) => found,
            None => {
                debug!("[ID{}]没有匹配的路由：{} {}", id, request.method(), request.path());
                return Response::not_found();
            }
        };
        debug!("[ID{}]匹配到路由：{} {}", id, route.method(), route.pattern());

        let chain: Vec<Arc<dyn Handler>> = self
            .layers
            .iter()
            .chain(route.handlers.iter())
            .cloned()
            .collect();
        let mut ctx = RequestContext::new(request, params, id);

        match Next::new(&chain).run(&mut ctx).await {
            Ok(response) => response,
            Err(e) => {
                error!("[ID{}]处理请求时发生错误：{}", id, e);
                Response::internal_error(e.to_string())
            }
        }
    }
}
