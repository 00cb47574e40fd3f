// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 配置在启动时从 TOML 文件中读取一次，之后以 `Arc<Config>` 的形式显式传递给
//! 路由、模板存储与缓存，不存在任何全局可变配置。

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

use log::warn;
use std::{fs, path::PathBuf};

use crate::{
    exception::Exception,
    param::DEFAULT_DEBOUNCE_MS,
    seo::{compute_origin, SeoConfig, SeoOverrides},
};

/// 运行模式。开发模式下模板每次从磁盘读取并启用实时刷新；生产模式下模板在启动时预加载。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    pub fn is_development(&self) -> bool {
        *self == Mode::Development
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    mode: Mode,
    port: u16,
    local: bool,
    worker_threads: usize,
    /// 生产环境下对外暴露的站点地址
    url: String,
    max_request_size: usize,
    seo: SeoConfig,
    /// 所有模板共享的全局渲染数据
    data: Map<String, Value>,
    renderer: RendererConfig,
    autoreload: AutoreloadConfig,
    cache: CacheConfig,
    static_routes: Vec<String>,
    routes: Vec<RouteConfig>,
}

/// 模板目录布局，子目录均相对于 `frontend_directory`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RendererConfig {
    pub frontend_directory: String,
    pub components_directory: String,
    pub pages_directory: String,
    pub templates_directory: String,
    pub main_template_filename: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AutoreloadConfig {
    pub enabled: bool,
    pub watch_directory: String,
    pub debounce_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 内存缓存的最大条目数
    pub max_items: usize,
    /// 内存缓存条目的存活时间
    pub max_age_ms: u64,
    /// 持久化缓存目录
    pub directory: String,
    /// 持久化缓存条目的存活时间
    pub timeout_ms: u64,
}

/// 配置文件中声明的路由。GET 路由渲染 `page`，POST 路由把 `data` 以 JSON 返回。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default = "default_route_method")]
    pub method: String,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub seo: SeoOverrides,
}

fn default_route_method() -> String {
    "GET".to_string()
}

fn default_static_routes() -> Vec<String> {
    vec![
        "/assets/(.*)".to_string(),
        "/static/(.*)".to_string(),
        "/script/(.*)".to_string(),
        "/style/(.*)".to_string(),
    ]
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frontend_directory: "frontend".to_string(),
            components_directory: "components".to_string(),
            pages_directory: "pages".to_string(),
            templates_directory: "templates".to_string(),
            main_template_filename: "app.html".to_string(),
        }
    }
}

impl RendererConfig {
    pub fn frontend_path(&self) -> PathBuf {
        PathBuf::from(&self.frontend_directory)
    }

    pub fn components_path(&self) -> PathBuf {
        self.frontend_path().join(&self.components_directory)
    }

    pub fn pages_path(&self) -> PathBuf {
        self.frontend_path().join(&self.pages_directory)
    }

    pub fn templates_path(&self) -> PathBuf {
        self.frontend_path().join(&self.templates_directory)
    }

    pub fn main_template_path(&self) -> PathBuf {
        self.frontend_path().join(&self.main_template_filename)
    }
}

impl Default for AutoreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_directory: "frontend".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            max_age_ms: 5000,
            directory: ".cache".to_string(),
            timeout_ms: 1000 * 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            mode: Mode::default(),
            port: 3000,
            local: true,
            worker_threads: 0,
            url: "https://production.url.com".to_string(),
            max_request_size: 1024 * 1024,
            seo: SeoConfig::default(),
            data: Map::new(),
            renderer: RendererConfig::default(),
            autoreload: AutoreloadConfig::default(),
            cache: CacheConfig::default(),
            static_routes: default_static_routes(),
            routes: Vec::new(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename)
            .map_err(|e| Exception::Config(format!("no such file {}: {}", filename, e)))?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(str_val: &str) -> Result<Self, Exception> {
        let raw_config: Config =
            toml::from_str(str_val).map_err(|e| Exception::Config(e.to_string()))?;
        Ok(raw_config.validated())
    }

    /// 修正非法取值。这些值在运行期不可能合法地为零。
    fn validated(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.cache.max_items == 0 {
            warn!("cache.max_items被设置为0，但目前尚不支持禁用缓存，因此该值将被改为20。");
            self.cache.max_items = 20;
        }
        if self.autoreload.debounce_ms == 0 {
            warn!(
                "autoreload.debounce_ms被设置为0，该值将被改为{}。",
                DEFAULT_DEBOUNCE_MS
            );
            self.autoreload.debounce_ms = DEFAULT_DEBOUNCE_MS;
        }
        if self.max_request_size < 1024 {
            warn!("max_request_size过小，该值将被改为1024。");
            self.max_request_size = 1024;
        }
        self
    }
}

impl Config {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    pub fn seo(&self) -> &SeoConfig {
        &self.seo
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn renderer(&self) -> &RendererConfig {
        &self.renderer
    }

    pub fn autoreload(&self) -> &AutoreloadConfig {
        &self.autoreload
    }

    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    pub fn static_routes(&self) -> &[String] {
        &self.static_routes
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// 站点来源地址，参见 [`compute_origin`]。
    pub fn origin(&self) -> String {
        compute_origin(self.mode, self.port, &self.url)
    }

    /// 实时刷新仅在开发模式且配置开启时生效。
    pub fn autoreload_active(&self) -> bool {
        self.mode.is_development() && self.autoreload.enabled
    }
}
