// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内置处理器
//!
//! - [`PageHandler`]：调用控制器取得数据后渲染页面（GET 路由）。
//! - [`JsonHandler`]：把控制器数据以 JSON 返回（POST 路由）。
//! - [`StaticFiles`]：从前端目录读取静态资源。
//! - [`CachedController`]：开发模式下把控制器结果写入持久化缓存，避免反复请求慢速数据源。

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::{
    context::RequestContext,
    disk_cache::DiskCache,
    exception::Exception,
    param::mime_for,
    response::Response,
    router::{Handler, Next},
    seo::SeoOverrides,
    template::TemplateStore,
};

/// 控制器为一次请求提供的数据
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RouteData {
    pub data: Map<String, Value>,
    pub seo: SeoOverrides,
}

/// 页面数据加载器
#[async_trait]
pub trait Controller: Send + Sync {
    async fn load(&self, ctx: &RequestContext) -> Result<RouteData, Exception>;
}

/// 没有控制器的路由使用空数据
pub struct EmptyController;

#[async_trait]
impl Controller for EmptyController {
    async fn load(&self, _ctx: &RequestContext) -> Result<RouteData, Exception> {
        Ok(RouteData::default())
    }
}

/// 始终返回同一份数据，配置文件中声明的路由使用它
pub struct StaticData(RouteData);

impl StaticData {
    pub fn new(data: Map<String, Value>, seo: SeoOverrides) -> Self {
        Self(RouteData { data, seo })
    }
}

#[async_trait]
impl Controller for StaticData {
    async fn load(&self, _ctx: &RequestContext) -> Result<RouteData, Exception> {
        Ok(self.0.clone())
    }
}

pub struct PageHandler {
    store: Arc<TemplateStore>,
    page: String,
    controller: Arc<dyn Controller>,
}

impl PageHandler {
    pub fn new(store: Arc<TemplateStore>, page: &str, controller: Arc<dyn Controller>) -> Self {
        Self {
            store,
            page: page.to_string(),
            controller,
        }
    }
}

#[async_trait]
impl Handler for PageHandler {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<Response, Exception> {
        let mut route_data = self.controller.load(ctx).await?;
        if route_data.seo.url.is_none() {
            route_data.seo.url = Some(ctx.request().pathname().to_string());
        }
        Ok(self
            .store
            .render_page(&self.page, &route_data.data, &route_data.seo, ctx.id())
            .await)
    }
}

pub struct JsonHandler {
    controller: Arc<dyn Controller>,
}

impl JsonHandler {
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Handler for JsonHandler {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<Response, Exception> {
        let route_data = self.controller.load(ctx).await?;
        Ok(Response::json(&Value::Object(route_data.data)))
    }
}

/// 静态资源：请求路径直接映射到前端目录下的文件
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<Response, Exception> {
        let id = ctx.id();
        let relative = ctx.request().pathname().trim_start_matches('/');

        if relative.contains('\0') || relative.split('/').any(|segment| segment == "..") {
            warn!("[ID{}]请求的路径：{} 包含非法字符，返回400", id, relative);
            return Ok(Response::text(400, "Bad Request"));
        }

        let path = self.root.join(relative);
        let is_file = match fs::metadata(&path).await {
            Ok(metadata) => metadata.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(Exception::from_io(e, relative)),
        };
        if !is_file {
            warn!("[ID{}]请求的路径：{} 不存在，返回404", id, relative);
            return Ok(Response::not_found());
        }

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                return match Exception::from_io(e, relative) {
                    Exception::FileNotFound(_) => Ok(Response::not_found()),
                    other => Err(other),
                };
            }
        };
        let extension = path.extension().and_then(|e| e.to_str());
        debug!("[ID{}]读取静态文件：{}", id, path.display());
        Ok(Response::file(Bytes::from(content), mime_for(extension)))
    }
}

/// 包装另一个控制器，开发模式下以"路径 + 查询字符串"为键读写持久化缓存。
/// 生产模式下直接透传。
pub struct CachedController {
    inner: Arc<dyn Controller>,
    cache: Arc<DiskCache>,
    enabled: bool,
}

impl CachedController {
    pub fn new(inner: Arc<dyn Controller>, cache: Arc<DiskCache>, enabled: bool) -> Self {
        Self {
            inner,
            cache,
            enabled,
        }
    }
}

#[async_trait]
impl Controller for CachedController {
    async fn load(&self, ctx: &RequestContext) -> Result<RouteData, Exception> {
        if !self.enabled {
            return self.inner.load(ctx).await;
        }
        let key = ctx.request().path();
        if let Some(data) = self.cache.get::<RouteData>(key).await {
            debug!("[ID{}]控制器数据来自持久化缓存：{}", ctx.id(), key);
            return Ok(data);
        }
        let data = self.inner.load(ctx).await?;
        if let Err(e) = self.cache.set(key, &data).await {
            warn!("[ID{}]写入持久化缓存失败: {}", ctx.id(), e);
        }
        Ok(data)
    }
}
