//! Server-side view rendering.
//!
//! # Data Flow
//! ```text
//! res.render("login", locals)
//!     → settings chain: `views` dir + `view engine` extension
//!     → TemplateCache::render_file(<views>/login.<engine>)
//!         cache hit  → compiled Template
//!         cache miss → tokio::fs read → template.rs compile → cache insert
//!     → Template::render(locals) → HTML string
//! ```
//!
//! # Design Decisions
//! - Cache keyed by absolute path, filled once, never invalidated
//! - Read and compile failures surface as render errors

mod expr;
pub mod template;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

pub use template::Template;

/// Template compilation or rendering failure.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("template locals must be an object")]
    InvalidLocals,
}

/// Compiled templates keyed by absolute file path.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<PathBuf, Arc<Template>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a template file, compiling it on first use.
    pub async fn render_file(
        &self,
        path: &Path,
        locals: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let template = self.load(path).await?;
        template.render(locals)
    }

    /// Fetch the compiled template for `path`, compiling it if absent.
    pub async fn load(&self, path: &Path) -> Result<Arc<Template>, TemplateError> {
        let absolute = std::path::absolute(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(template) = self.entries.get(&absolute) {
            return Ok(Arc::clone(template.value()));
        }

        let source = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|source| TemplateError::Io {
                path: absolute.clone(),
                source,
            })?;
        let template = Arc::new(Template::compile(&source)?);

        tracing::debug!(path = %absolute.display(), "Template compiled");
        self.entries.insert(absolute, Arc::clone(&template));
        Ok(template)
    }

    /// Number of compiled templates held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` has already been compiled.
    pub fn contains(&self, path: &Path) -> bool {
        std::path::absolute(path)
            .map(|absolute| self.entries.contains_key(&absolute))
            .unwrap_or(false)
    }
}
