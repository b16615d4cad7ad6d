// src/template/mod.rs
//! Digest templates: compile once, render against a batch.
//!
//! Rendering is a pure function of `(CompiledTemplate, BatchContext)`. Syntax errors
//! surface from [`compile`] as [`CompileError`]; problems that depend on the data
//! (unknown field, ranging over a scalar) surface from [`render`] as [`RenderError`].

pub mod defaults;
mod parse;
mod render;

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CompileError, RenderError};
use crate::model::ReadingWindowEntry;

/// Items `.Shown` lists; the remainder is reported through `.More`.
pub const DIGEST_SHOWN: usize = 10;

/// `.ShortSummary` keeps this many characters before appending `...`.
pub const SHORT_SUMMARY_CHARS: usize = 100;

/// How interpolated values are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escaping {
    /// HTML bodies (email). Values are attribute-safe escaped.
    Html,
    /// Markdown / plain-text bodies (push channels, subject lines).
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    nodes: Vec<parse::Node>,
    escaping: Escaping,
}

impl CompiledTemplate {
    pub fn escaping(&self) -> Escaping {
        self.escaping
    }
}

/// Compile an HTML template body.
pub fn compile(body: &str) -> Result<CompiledTemplate, CompileError> {
    compile_with(body, Escaping::Html)
}

pub fn compile_with(body: &str, escaping: Escaping) -> Result<CompiledTemplate, CompileError> {
    Ok(CompiledTemplate {
        nodes: parse::parse(body)?,
        escaping,
    })
}

/// Render `tpl` against `ctx`. Returns the output and the number of items in the batch.
pub fn render(tpl: &CompiledTemplate, ctx: &BatchContext) -> Result<(String, usize), RenderError> {
    let out = render::render_nodes(&tpl.nodes, tpl.escaping, ctx)?;
    Ok((out, ctx.news.len()))
}

/// One item as seen by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub id: String,
    /// 1-based position in the batch.
    pub index: usize,
    pub title: String,
    pub summary: String,
    pub trans_title: Option<String>,
    pub trans_summary: Option<String>,
    pub url: String,
    pub source: String,
    pub category: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

impl ItemView {
    pub fn from_entry(entry: &ReadingWindowEntry, index: usize) -> Self {
        let it = &entry.item;
        Self {
            id: it.id.clone(),
            index,
            title: it.title.clone(),
            summary: it.summary.clone(),
            trans_title: it.trans_title.clone(),
            trans_summary: it.trans_summary.clone(),
            url: it.url.clone(),
            source: it.source.clone(),
            category: entry.category.clone(),
            author: it.author.clone(),
            image_url: it.image_url.clone(),
        }
    }

    /// Translated title when present, original otherwise.
    pub fn display_title(&self) -> &str {
        non_blank(&self.trans_title).unwrap_or(&self.title)
    }

    pub fn display_summary(&self) -> &str {
        non_blank(&self.trans_summary).unwrap_or(&self.summary)
    }

    /// Display summary cut at [`SHORT_SUMMARY_CHARS`] characters.
    pub fn short_summary(&self) -> Cow<'_, str> {
        let full = self.display_summary();
        match full.char_indices().nth(SHORT_SUMMARY_CHARS) {
            Some((cut, _)) => Cow::Owned(format!("{}...", &full[..cut])),
            None => Cow::Borrowed(full),
        }
    }
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|v| !v.trim().is_empty())
}

/// The data a template renders against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchContext {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub generated: String,
    pub news: Vec<ItemView>,
}

impl BatchContext {
    pub fn new(news: Vec<ItemView>, generated_at: DateTime<Utc>) -> Self {
        Self {
            date: generated_at.format("%Y-%m-%d").to_string(),
            generated: generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            news,
        }
    }

    pub fn from_entries(entries: &[ReadingWindowEntry], generated_at: DateTime<Utc>) -> Self {
        let news = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ItemView::from_entry(e, i + 1))
            .collect();
        Self::new(news, generated_at)
    }

    pub fn count(&self) -> usize {
        self.news.len()
    }

    /// The head of the batch a bounded digest lists.
    pub fn shown(&self) -> &[ItemView] {
        &self.news[..self.news.len().min(DIGEST_SHOWN)]
    }

    /// Items left out of [`shown`](Self::shown).
    pub fn more(&self) -> usize {
        self.news.len() - self.shown().len()
    }
}

/// Placeholder items for the live preview when the window is empty.
pub fn sample_items() -> Vec<ItemView> {
    let mk = |i: usize, title: &str, trans: &str, source: &str, category: &str, summary: &str| ItemView {
        id: format!("sample-{i}"),
        index: i,
        title: title.to_string(),
        summary: String::new(),
        trans_title: Some(trans.to_string()),
        trans_summary: Some(summary.to_string()),
        url: format!("https://example.com/{i}"),
        source: source.to_string(),
        category: category.to_string(),
        author: None,
        image_url: None,
    };
    vec![
        mk(
            1,
            "Example: OpenAI announces GPT-5",
            "Example (translated): OpenAI announces GPT-5",
            "Hacker News",
            "tech",
            "Sample summary used for the template preview. Real pushes use items from the reading window.",
        ),
        mk(
            2,
            "Example: Apple reveals new AI features",
            "Example (translated): Apple reveals new AI features",
            "TechCrunch",
            "ai",
            "Another sample summary. Collect and translate news to preview against real items.",
        ),
    ]
}
