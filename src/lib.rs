pub mod autoreload;
pub mod cache;
pub mod config;
pub mod context;
pub mod disk_cache;
pub mod exception;
pub mod handlers;
pub mod param;
pub mod render;
pub mod request;
pub mod response;
pub mod router;
pub mod seo;
pub mod server;
pub mod template;
pub mod util;
pub mod watch;

pub use autoreload::Autoreload;
pub use cache::BoundedCache;
pub use config::{Config, Mode};
pub use context::RequestContext;
pub use disk_cache::DiskCache;
pub use exception::Exception;
pub use handlers::{Controller, RouteData};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use render::{HandlebarsEngine, Render};
pub use request::Request;
pub use response::Response;
pub use router::{Handler, Next, Router};
pub use seo::{compute_origin, SeoConfig, SeoOverrides};
pub use server::Server;
pub use template::TemplateStore;
