//! `liffey serve` command implementation.
//!
//! Serves individual ES modules on demand instead of a bundle:
//!
//! ```text
//! Browser requests GET /src/app.js
//!   → resolve (stage hooks + file system)
//!   → load (stage hooks + file system)
//!   → transform (stage hooks: define, import rewrite, ...)
//!   → serve as application/javascript with a weak ETag
//! ```
//!
//! Non-module paths fall through to static file serving, and extensionless
//! routes fall back to `index.html` so client-side routing survives a
//! refresh.

use axum::{
    extract::{Path as AxumPath, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use liffey_core::config::Mode;
use liffey_core::pipeline::stages::{AliasStage, DefineStage};
use liffey_core::utils::{clean_url, strip_base, FS_PREFIX, VALID_ID_PREFIX};
use liffey_core::{
    load_config_file, transform_request, ConfigFile, Pipeline, ResolveStage, ResolvedConfig,
    RewriteStage, Stage,
};
use miette::{miette, IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Serve command parameters, CLI flags already parsed.
#[derive(Debug)]
pub struct ServeAction {
    pub root: PathBuf,
    pub port: u16,
    pub host: String,
    pub base: Option<String>,
    pub mode: Option<String>,
    pub config: Option<PathBuf>,
}

struct ServerState {
    config: ResolvedConfig,
    pipeline: Pipeline,
}

pub async fn run(action: ServeAction) -> Result<()> {
    let root = action
        .root
        .canonicalize()
        .into_diagnostic()
        .map_err(|_| miette!("project root not found: {}", action.root.display()))?;

    let file_config = load_config_file(&root, action.config.as_deref())
        .map_err(|e| miette!("{e}"))?
        .map(|(path, config)| {
            tracing::debug!(config = %path.display(), "loaded config file");
            config
        })
        .unwrap_or_default();

    let mode = match action.mode.as_deref() {
        Some("production") => Mode::Production,
        Some("development") => Mode::Development,
        Some(other) => return Err(miette!("unknown mode: {other}")),
        None => file_config.mode.unwrap_or_default(),
    };
    let base = action
        .base
        .or_else(|| file_config.base.clone())
        .unwrap_or_else(|| "/".to_string());

    let config = ResolvedConfig::new(root, &base, mode);
    let pipeline = assemble_pipeline(&config, &file_config);

    pipeline
        .config_resolved(&config)
        .map_err(|e| miette!("{e}"))?;
    pipeline.server_start().map_err(|e| miette!("{e}"))?;

    let state = Arc::new(ServerState { config, pipeline });

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/*path", get(serve_path))
        .with_state(state);

    let addr = format!("{}:{}", action.host, action.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %addr, mode = mode.as_str(), "liffey dev server listening");

    axum::serve(listener, app).await.into_diagnostic()
}

/// Assemble the stage list: aliases first, then the resolver, define
/// replacement and finally the import rewriter.
fn assemble_pipeline(config: &ResolvedConfig, file_config: &ConfigFile) -> Pipeline {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();

    if !file_config.resolve.alias.is_empty() {
        // Aliases targeting "./x" are project-root relative.
        let expanded = file_config
            .resolve
            .alias
            .iter()
            .map(|(from, to)| {
                let to = to.strip_prefix("./").map_or_else(
                    || to.clone(),
                    |rel| format!("{}/{rel}", config.root_id),
                );
                (from.clone(), to)
            })
            .collect();
        stages.push(Box::new(AliasStage::from_map(&expanded)));
    }

    stages.push(Box::new(ResolveStage::new(config)));
    stages.push(Box::new(DefineStage::new(config.mode, &file_config.define)));
    stages.push(Box::new(RewriteStage::new(config)));

    Pipeline::new(stages)
}

async fn serve_index(State(state): State<Arc<ServerState>>) -> Response {
    serve_static_file(&state, "/index.html").await
}

/// Whether a URL should go through the transform pipeline.
fn is_module_request(url: &str) -> bool {
    url.starts_with(VALID_ID_PREFIX)
        || url.starts_with(FS_PREFIX)
        || liffey_core::utils::is_js_request(url)
}

async fn serve_path(
    State(state): State<Arc<ServerState>>,
    AxumPath(path): AxumPath<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let mut url = format!("/{path}");
    if let Some(q) = query {
        url.push('?');
        url.push_str(&q);
    }
    let url = strip_base(&url, &state.config.base);

    if is_module_request(&url) {
        match transform_request(&state.config, &state.pipeline, &url) {
            Ok(Some(out)) => {
                // Cache validation per weak entity tag.
                if headers
                    .get(header::IF_NONE_MATCH)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|tag| tag == out.etag)
                {
                    return StatusCode::NOT_MODIFIED.into_response();
                }
                return Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/javascript")
                    .header(header::CACHE_CONTROL, "no-cache")
                    .header(header::ETAG, out.etag)
                    .body(out.code.into())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(url = %url, error = %err, "transform failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("transform failed for {url}: {err}"),
                )
                    .into_response();
            }
        }
    }

    serve_static_file(&state, &url).await
}

/// Static file pass-through with an `index.html` fallback for extensionless
/// routes.
async fn serve_static_file(state: &ServerState, url: &str) -> Response {
    let rel = clean_url(url).trim_start_matches('/');
    let file = state.config.root.join(rel);

    if let Ok(bytes) = tokio::fs::read(&file).await {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(rel))
            .header(header::CACHE_CONTROL, "no-cache")
            .body(bytes.into())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    // Extensionless route: client-side routing fallback.
    let last = rel.rsplit('/').next().unwrap_or(rel);
    if !last.contains('.') {
        let index = state.config.root.join("index.html");
        if let Ok(html) = tokio::fs::read(&index).await {
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(html.into())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    }

    (StatusCode::NOT_FOUND, format!("not found: {url}")).into_response()
}

/// Just enough content-type coverage for dev serving.
fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
