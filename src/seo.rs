// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # SEO 元数据
//!
//! 每次渲染页面时都会基于默认 SEO 配置、控制器给出的覆盖项以及请求路径重新计算一份
//! 元数据，以 `$seo` 的名字注入模板。`url` 字段永远由来源地址与路径拼接得到。

use serde_derive::{Deserialize, Serialize};
use url::Url;

use crate::config::Mode;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SeoConfig {
    pub title: String,
    pub description: String,
    pub origin: String,
    pub url: String,
    pub image: String,
    pub theme: String,
    pub language: String,
    pub locale: String,
}

/// 单个页面对默认 SEO 配置的覆盖，`None` 表示沿用默认值。
///
/// `url` 只取其路径部分，主机名始终来自站点来源地址。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SeoOverrides {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub theme: Option<String>,
    pub language: Option<String>,
    pub locale: Option<String>,
}

impl Default for SeoConfig {
    fn default() -> Self {
        Self {
            title: "Default title".to_string(),
            description: "Default description".to_string(),
            origin: String::new(),
            url: String::new(),
            image: "assets/default.png".to_string(),
            theme: "#ffffff".to_string(),
            language: "no".to_string(),
            locale: "nb_NO".to_string(),
        }
    }
}

/// 计算站点来源地址：开发模式固定为本机端口，生产模式使用配置的站点地址。
pub fn compute_origin(mode: Mode, port: u16, configured_url: &str) -> String {
    match mode {
        Mode::Development => format!("http://localhost:{}", port),
        Mode::Production => configured_url.trim_end_matches('/').to_string(),
    }
}

impl SeoConfig {
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self.url = join_url(origin, "/");
        self
    }

    /// 为一次请求生成 SEO 对象：默认值在前，覆盖项在后，`url` 最后重新计算。
    pub fn for_request(&self, overrides: &SeoOverrides) -> SeoConfig {
        let pick = |value: &Option<String>, fallback: &String| {
            value.clone().unwrap_or_else(|| fallback.clone())
        };
        let requested = overrides.url.as_deref().unwrap_or("/");

        SeoConfig {
            title: pick(&overrides.title, &self.title),
            description: pick(&overrides.description, &self.description),
            origin: self.origin.clone(),
            url: join_url(&self.origin, requested),
            image: pick(&overrides.image, &self.image),
            theme: pick(&overrides.theme, &self.theme),
            language: pick(&overrides.language, &self.language),
            locale: pick(&overrides.locale, &self.locale),
        }
    }
}

fn pathname(url_or_path: &str) -> String {
    let path = match Url::parse(url_or_path) {
        Ok(url) => url.path().to_string(),
        Err(_) => url_or_path
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or("/")
            .to_string(),
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

fn join_url(origin: &str, url_or_path: &str) -> String {
    let path = pathname(url_or_path);
    match Url::parse(origin).and_then(|base| base.join(&path)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}{}", origin.trim_end_matches('/'), path),
    }
}
