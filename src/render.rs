// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板渲染
//!
//! 模板存储只依赖 [`Render`] 这一接口：给定模板文本、合并后的数据与组件片段，返回渲染结果。
//! 默认实现基于 handlebars，并注册了 `json` 与 `escape` 两个过滤器。

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderError,
};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{exception::Exception, util::escape_html};

#[cfg_attr(test, mockall::automock)]
pub trait Render: Send + Sync {
    /// `partials` 的键为组件名（相对组件目录的路径，不含扩展名），值为组件模板文本。
    /// 只在这一次渲染中可见。
    fn render(
        &self,
        template: &str,
        data: &Value,
        partials: &HashMap<String, String>,
    ) -> Result<String, Exception>;

    /// 注册常驻组件，之后的每次渲染都能直接引用，不必再随 `render` 传入
    fn register_partials(&self, partials: &HashMap<String, String>) -> Result<(), Exception>;
}

pub struct HandlebarsEngine {
    registry: RwLock<Handlebars<'static>>,
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_helper("json", Box::new(json_helper));
        registry.register_helper("escape", Box::new(escape_helper));
        Self {
            registry: RwLock::new(registry),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Handlebars<'static>> {
        match self.registry.read() {
            Ok(registry) => registry,
            Err(poisoned) => {
                warn!("模板注册表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Handlebars<'static>> {
        match self.registry.write() {
            Ok(registry) => registry,
            Err(poisoned) => {
                warn!("模板注册表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }
}

fn register_all(
    registry: &mut Handlebars<'static>,
    partials: &HashMap<String, String>,
) -> Result<(), Exception> {
    for (name, source) in partials {
        registry
            .register_partial(name, source)
            .map_err(|e| Exception::Render(format!("component {}: {}", name, e)))?;
    }
    Ok(())
}

impl Render for HandlebarsEngine {
    fn render(
        &self,
        template: &str,
        data: &Value,
        partials: &HashMap<String, String>,
    ) -> Result<String, Exception> {
        // 没有临时组件时直接使用共享的注册表，避免复制与重新编译
        if partials.is_empty() {
            return self
                .read()
                .render_template(template, data)
                .map_err(|e| Exception::Render(e.to_string()));
        }
        let mut registry = self.read().clone();
        register_all(&mut registry, partials)?;
        registry
            .render_template(template, data)
            .map_err(|e| Exception::Render(e.to_string()))
    }

    fn register_partials(&self, partials: &HashMap<String, String>) -> Result<(), Exception> {
        register_all(&mut self.write(), partials)?;
        debug!("已注册{}个常驻组件", partials.len());
        Ok(())
    }
}

/// 以三个空格缩进输出 JSON
pub fn to_pretty_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|p| p.value().clone()).unwrap_or(Value::Null);
    let text = to_pretty_json(&value).map_err(|e| RenderError::new(e.to_string()))?;
    out.write(&text)?;
    Ok(())
}

fn escape_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let text = match h.param(0).map(|p| p.value()) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    out.write(&escape_html(&text))?;
    Ok(())
}
