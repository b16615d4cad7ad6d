// src/template/render.rs
use std::borrow::Cow;

use super::parse::{FieldRef, Node};
use super::{BatchContext, Escaping, ItemView};
use crate::error::RenderError;

enum Value<'a> {
    Text(Cow<'a, str>),
    Number(usize),
    List(&'a [ItemView]),
}

impl Value<'_> {
    fn truthy(&self) -> bool {
        match self {
            Value::Text(s) => !s.is_empty(),
            Value::Number(n) => *n != 0,
            Value::List(l) => !l.is_empty(),
        }
    }
}

/// The current dot: the batch itself, or one item inside `{{range .News}}`.
#[derive(Clone, Copy)]
enum Dot<'a> {
    Batch,
    Item(&'a ItemView),
}

struct Renderer<'a> {
    ctx: &'a BatchContext,
    escaping: Escaping,
    out: String,
}

impl<'a> Renderer<'a> {
    fn lookup(&self, dot: Dot<'a>, field: &FieldRef, line: usize) -> Result<Value<'a>, RenderError> {
        let scope = if field.root { Dot::Batch } else { dot };
        let value = match scope {
            Dot::Batch => batch_field(self.ctx, &field.name),
            Dot::Item(item) => item_field(item, &field.name),
        };
        value.ok_or_else(|| RenderError::UnknownField {
            line,
            field: field.to_string(),
        })
    }

    fn walk(&mut self, nodes: &[Node], dot: Dot<'a>) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(t) => self.out.push_str(t),
                Node::Field { field, line } => match self.lookup(dot, field, *line)? {
                    Value::Text(s) => self.emit(&s),
                    Value::Number(n) => self.out.push_str(&n.to_string()),
                    Value::List(_) => {
                        return Err(RenderError::NotPrintable {
                            line: *line,
                            field: field.to_string(),
                        })
                    }
                },
                Node::If {
                    cond,
                    then,
                    otherwise,
                    line,
                } => {
                    let branch = if self.lookup(dot, cond, *line)?.truthy() {
                        then
                    } else {
                        otherwise
                    };
                    self.walk(branch, dot)?;
                }
                Node::Range {
                    list,
                    body,
                    otherwise,
                    line,
                } => {
                    let Value::List(items) = self.lookup(dot, list, *line)? else {
                        return Err(RenderError::NotIterable {
                            line: *line,
                            field: list.to_string(),
                        });
                    };
                    if items.is_empty() {
                        self.walk(otherwise, dot)?;
                    }
                    for item in items {
                        self.walk(body, Dot::Item(item))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, s: &str) {
        match self.escaping {
            Escaping::Html => self.out.push_str(&html_escape::encode_quoted_attribute(s)),
            Escaping::Plain => self.out.push_str(s),
        }
    }
}

fn batch_field<'a>(ctx: &'a BatchContext, name: &str) -> Option<Value<'a>> {
    Some(match name {
        "Date" => Value::Text(Cow::Borrowed(&ctx.date)),
        "Generated" => Value::Text(Cow::Borrowed(&ctx.generated)),
        "Count" => Value::Number(ctx.news.len()),
        "News" => Value::List(&ctx.news),
        "Shown" => Value::List(ctx.shown()),
        "More" => Value::Number(ctx.more()),
        _ => return None,
    })
}

fn item_field<'a>(item: &'a ItemView, name: &str) -> Option<Value<'a>> {
    let text = |s: &'a str| Value::Text(Cow::Borrowed(s));
    let opt = |s: &'a Option<String>| Value::Text(Cow::Borrowed(s.as_deref().unwrap_or("")));
    Some(match name {
        "ID" => text(&item.id),
        "Index" => Value::Number(item.index),
        "Title" => text(&item.title),
        "Summary" => text(&item.summary),
        "TransTitle" => opt(&item.trans_title),
        "TransSummary" => opt(&item.trans_summary),
        "DisplayTitle" => text(item.display_title()),
        "DisplaySummary" => text(item.display_summary()),
        "ShortSummary" => Value::Text(item.short_summary()),
        "URL" => text(&item.url),
        "Source" => text(&item.source),
        "Category" => text(&item.category),
        "Author" => opt(&item.author),
        "ImageURL" => opt(&item.image_url),
        _ => return None,
    })
}

pub(super) fn render_nodes(
    nodes: &[Node],
    escaping: Escaping,
    ctx: &BatchContext,
) -> Result<String, RenderError> {
    let mut r = Renderer {
        ctx,
        escaping,
        out: String::new(),
    };
    r.walk(nodes, Dot::Batch)?;
    Ok(r.out)
}
