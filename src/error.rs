// src/error.rs
//! Error kinds surfaced by the push core.
//!
//! Each stage owns its own enum so callers can tell a template that never compiled
//! apart from a batch that failed to render, and a failed send apart from a send
//! that went out but could not be recorded.

use std::time::Duration;

use thiserror::Error;

use crate::model::EntryId;

/// Channel configuration is missing or malformed. Raised when a channel is saved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{channel_type} channel: missing required field `{field}`")]
    MissingField {
        channel_type: &'static str,
        field: &'static str,
    },
    #[error("{channel_type} channel: invalid `{field}`: {reason}")]
    InvalidField {
        channel_type: &'static str,
        field: &'static str,
        reason: String,
    },
    #[error("channel `{0}` is disabled")]
    ChannelDisabled(String),
    #[error("invalid cron expression `{expr}`: {reason}")]
    Cron { expr: String, reason: String },
}

/// Template syntax error. Blocks saving or attaching the template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("template:{line}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// The template compiled but could not be executed against this batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template:{line}: can't evaluate field `{field}`")]
    UnknownField { line: usize, field: String },
    #[error("template:{line}: can't print `{field}` (it is a list)")]
    NotPrintable { line: usize, field: String },
    #[error("template:{line}: range can't iterate over `{field}`")]
    NotIterable { line: usize, field: String },
}

/// A channel send failed. Items stay unpushed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("building message failed: {0}")]
    Build(String),
    #[error("smtp: {0}")]
    Smtp(String),
    #[error("http request failed: {0}")]
    Request(String),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// Repository failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("reading window entry {0} not found")]
    NotFound(EntryId),
    #[error("reading window entry {0} is already pushed")]
    AlreadyPushed(EntryId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Catalog lookups (channels, templates, tasks).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} `{id}` not found")]
pub struct NotFound {
    pub kind: &'static str,
    pub id: String,
}

impl NotFound {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Rejections from the catalog when saving or deleting channels, templates and tasks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    NotFound(#[from] NotFound),
    #[error("{kind} `{id}` is still referenced by {by}")]
    InUse {
        kind: &'static str,
        id: String,
        by: String,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Everything a composition (or the lookup that precedes it) can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    NotFound(#[from] NotFound),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The batch went out but the pushed transition was not recorded.
    /// The same items may be sent again on the next trigger.
    #[error("delivered {delivered} item(s) but mark-pushed failed: {source}")]
    Reconciliation {
        delivered: usize,
        #[source]
        source: StoreError,
    },
}

impl ComposeError {
    /// Stable tag used for metrics labels, logs and the HTTP error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::Config(_) => "config",
            ComposeError::NotFound(_) => "not_found",
            ComposeError::Compile(_) => "compile",
            ComposeError::Render(_) => "render",
            ComposeError::Delivery(_) => "delivery",
            ComposeError::Store(_) => "store",
            ComposeError::Reconciliation { .. } => "reconciliation",
        }
    }
}
