// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板存储
//!
//! 负责读取外壳模板、页面模板、普通模板与组件，并把它们交给渲染器。
//!
//! - **开发模式**：不做任何预加载，每次渲染都从磁盘重新读取，修改文件后刷新即可看到效果。
//! - **生产模式**：启动时一次性读入全部模板，此后只读；渲染结果额外写入内存缓存。
//!
//! 页面渲染分两步：先渲染页面片段，把它替换进外壳模板的占位符，再把组合后的文本整体渲染一次，
//! 使外壳中的表达式（例如 SEO 信息）也能看到页面数据。
//!
//! 渲染数据的合并顺序（后者覆盖前者）：全局数据 → `$dev` / `$path` / `$seo` → 页面数据。
//! 页面数据中与保留键同名的字段会被忽略。

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::fs;

use crate::{
    cache::BoundedCache,
    config::{Config, Mode, RendererConfig},
    disk_cache::DiskCache,
    exception::Exception,
    param::PAGE_PLACEHOLDER,
    render::Render,
    response::Response,
    seo::{SeoConfig, SeoOverrides},
    util::{collect_files, strip_extension},
};

/// 模板数据中的保留键，页面数据不能覆盖
pub const RESERVED_KEYS: [&str; 3] = ["$dev", "$path", "$seo"];

const PAGES: &str = "pages";
const TEMPLATES: &str = "templates";
const COMPONENTS: &str = "components";

pub struct TemplateStore {
    mode: Mode,
    renderer: RendererConfig,
    base_data: Map<String, Value>,
    seo: SeoConfig,
    engine: Arc<dyn Render>,
    /// 生产模式下预加载的模板，键为逻辑路径（如 `pages/index.html`）
    templates: HashMap<String, String>,
    fragments: Option<BoundedCache<String>>,
}

impl TemplateStore {
    pub async fn load(config: &Config, engine: Arc<dyn Render>) -> Result<Self, Exception> {
        let mut store = Self {
            mode: config.mode(),
            renderer: config.renderer().clone(),
            base_data: config.data().clone(),
            seo: config.seo().clone().with_origin(&config.origin()),
            engine,
            templates: HashMap::new(),
            fragments: None,
        };

        if store.mode.is_development() {
            info!("开发模式：模板将在每次请求时从磁盘读取");
            return Ok(store);
        }

        store.preload().await?;
        store.fragments = Some(BoundedCache::new(
            config.cache().max_items,
            Duration::from_millis(config.cache().max_age_ms),
        ));
        Ok(store)
    }

    async fn preload(&mut self) -> Result<(), Exception> {
        let shell_path = self.renderer.main_template_path();
        match fs::read_to_string(&shell_path).await {
            Ok(source) => {
                self.templates
                    .insert(self.renderer.main_template_filename.clone(), source);
            }
            Err(e) => warn!("外壳模板{}无法读取: {}", shell_path.display(), e),
        }

        let mut partials = HashMap::new();
        for (prefix, dir) in [
            (PAGES, self.renderer.pages_path()),
            (TEMPLATES, self.renderer.templates_path()),
            (COMPONENTS, self.renderer.components_path()),
        ] {
            for relative in collect_files(&dir).await? {
                let path = dir.join(&relative);
                let source = fs::read_to_string(&path)
                    .await
                    .map_err(|e| Exception::from_io(e, &path.to_string_lossy()))?;
                if prefix == COMPONENTS {
                    partials
                        .insert(strip_extension(&relative).to_string(), source.clone());
                }
                self.templates.insert(format!("{}/{}", prefix, relative), source);
            }
        }
        // 组件只在启动时编译一次，此后渲染不再传入
        self.engine.register_partials(&partials)?;
        info!("生产模式：已预加载{}个模板", self.templates.len());
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 已预加载的模板键，开发模式下为空
    pub fn template_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.renderer.frontend_path().join(self.relative_path(key))
    }

    fn relative_path(&self, key: &str) -> String {
        let (prefix, rest) = match key.split_once('/') {
            Some(split) => split,
            None => return key.to_string(),
        };
        let directory = match prefix {
            PAGES => &self.renderer.pages_directory,
            TEMPLATES => &self.renderer.templates_directory,
            COMPONENTS => &self.renderer.components_directory,
            _ => return key.to_string(),
        };
        format!("{}/{}", directory, rest)
    }

    async fn source(&self, key: &str) -> Result<String, Exception> {
        if !self.mode.is_development() {
            return self
                .templates
                .get(key)
                .cloned()
                .ok_or_else(|| Exception::TemplateNotFound(key.to_string()));
        }
        let path = self.path_for(key);
        fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Exception::TemplateNotFound(key.to_string()),
            _ => Exception::from_io(e, &path.to_string_lossy()),
        })
    }

    async fn load_partials(&self) -> Result<HashMap<String, String>, Exception> {
        if !self.mode.is_development() {
            return Ok(HashMap::new());
        }
        let dir = self.renderer.components_path();
        let mut partials = HashMap::new();
        for relative in collect_files(&dir).await? {
            let path = dir.join(&relative);
            let source = fs::read_to_string(&path)
                .await
                .map_err(|e| Exception::from_io(e, &path.to_string_lossy()))?;
            partials.insert(strip_extension(&relative).to_string(), source);
        }
        Ok(partials)
    }

    /// 按合并顺序构造一次渲染使用的数据
    pub fn merge_data(&self, data: &Map<String, Value>, seo_overrides: &SeoOverrides) -> Value {
        let seo = self.seo.for_request(seo_overrides);
        let path = seo_overrides.url.clone().unwrap_or_else(|| "/".to_string());

        let mut merged = self.base_data.clone();
        merged.insert("$dev".to_string(), Value::Bool(self.mode.is_development()));
        merged.insert("$path".to_string(), Value::String(path));
        merged.insert(
            "$seo".to_string(),
            serde_json::to_value(seo).unwrap_or(Value::Null),
        );
        for (key, value) in data {
            if RESERVED_KEYS.contains(&key.as_str()) {
                warn!("页面数据中的保留键{}被忽略", key);
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    fn render_cached(
        &self,
        key: &str,
        template: &str,
        data: &Value,
        partials: &HashMap<String, String>,
    ) -> Result<String, Exception> {
        let cache = match &self.fragments {
            Some(cache) => cache,
            None => return self.engine.render(template, data, partials),
        };
        let cache_key = DiskCache::digest(&format!("{}\n{}", key, data));
        if let Some(html) = cache.get(&cache_key) {
            debug!("渲染缓存命中：{}", key);
            return Ok(html);
        }
        let html = self.engine.render(template, data, partials)?;
        cache.set(&cache_key, html.clone());
        Ok(html)
    }

    /// 渲染一个完整页面，返回 HTML 字符串
    pub async fn page_html(
        &self,
        page_id: &str,
        data: &Map<String, Value>,
        seo_overrides: &SeoOverrides,
        id: u128,
    ) -> Result<String, Exception> {
        let shell_key = self.renderer.main_template_filename.clone();
        let shell = self.source(&shell_key).await?;
        let page_key = format!("{}/{}", PAGES, page_id);
        let page = match self.source(&page_key).await {
            Ok(page) => page,
            Err(Exception::TemplateNotFound(_)) => {
                warn!("[ID{}]页面模板{}不存在，将渲染空页面", id, page_key);
                String::new()
            }
            Err(e) => return Err(e),
        };

        let merged = self.merge_data(data, seo_overrides);
        let partials = self.load_partials().await?;
        let cache_key = format!("{}+{}", shell_key, page_key);

        if let Some(cache) = &self.fragments {
            let digest = DiskCache::digest(&format!("{}\n{}", cache_key, merged));
            if let Some(html) = cache.get(&digest) {
                debug!("[ID{}]页面缓存命中：{}", id, page_key);
                return Ok(html);
            }
            let html = self.compose(&shell, &page, &merged, &partials)?;
            cache.set(&digest, html.clone());
            return Ok(html);
        }
        self.compose(&shell, &page, &merged, &partials)
    }

    fn compose(
        &self,
        shell: &str,
        page: &str,
        data: &Value,
        partials: &HashMap<String, String>,
    ) -> Result<String, Exception> {
        let fragment = self.engine.render(page, data, partials)?;
        let composed = shell.replacen(PAGE_PLACEHOLDER, &fragment, 1);
        self.engine.render(&composed, data, partials)
    }

    pub async fn component_html(
        &self,
        component_id: &str,
        data: &Map<String, Value>,
    ) -> Result<String, Exception> {
        let key = format!("{}/{}", COMPONENTS, with_default_extension(component_id));
        let source = self.source(&key).await?;
        let merged = self.merge_data(data, &SeoOverrides::default());
        let partials = self.load_partials().await?;
        self.render_cached(&key, &source, &merged, &partials)
    }

    pub async fn template_html(
        &self,
        template_id: &str,
        data: &Map<String, Value>,
    ) -> Result<String, Exception> {
        let key = format!("{}/{}", TEMPLATES, template_id);
        let source = self.source(&key).await?;
        let merged = self.merge_data(data, &SeoOverrides::default());
        let partials = self.load_partials().await?;
        self.render_cached(&key, &source, &merged, &partials)
    }

    /// 渲染调用方直接给出的模板文本，组件照常可用
    pub async fn string_html(
        &self,
        template: &str,
        data: &Map<String, Value>,
    ) -> Result<String, Exception> {
        let merged = self.merge_data(data, &SeoOverrides::default());
        let partials = self.load_partials().await?;
        self.engine.render(template, &merged, &partials)
    }

    pub async fn render_page(
        &self,
        page_id: &str,
        data: &Map<String, Value>,
        seo_overrides: &SeoOverrides,
        id: u128,
    ) -> Response {
        into_response(self.page_html(page_id, data, seo_overrides, id).await, id)
    }

    pub async fn render_component(
        &self,
        component_id: &str,
        data: &Map<String, Value>,
        id: u128,
    ) -> Response {
        into_response(self.component_html(component_id, data).await, id)
    }

    pub async fn render_template(
        &self,
        template_id: &str,
        data: &Map<String, Value>,
        id: u128,
    ) -> Response {
        into_response(self.template_html(template_id, data).await, id)
    }

    pub async fn render_string(&self, template: &str, data: &Map<String, Value>, id: u128) -> Response {
        into_response(self.string_html(template, data).await, id)
    }
}

fn with_default_extension(id: &str) -> String {
    if id.rsplit('/').next().map_or(false, |name| name.contains('.')) {
        id.to_string()
    } else {
        format!("{}.html", id)
    }
}

fn into_response(result: Result<String, Exception>, id: u128) -> Response {
    match result {
        Ok(html) => Response::html(html),
        Err(e) => {
            error!("[ID{}]渲染失败：{}", id, e);
            Response::internal_error(e.to_string())
        }
    }
}
