// src/template/parse.rs
//! Lexer + parser for the `{{ … }}` template dialect.
//!
//! Supported actions: `{{.Field}}`, `{{$.Field}}`, `{{if .F}}`, `{{else if .F}}`,
//! `{{range .F}}`, `{{else}}`, `{{end}}`, `{{/* comment */}}`, with `{{- ` / ` -}}`
//! whitespace trimming. As in Go templates, a trim marker must be separated from the
//! action by whitespace; `{{.Title-}}` is a bad field reference, not a trim.
//! Pipelines, functions and variables other than `$` are not supported.

use crate::error::CompileError;

/// Reference to a context field. `root` is set for `$.Field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub root: bool,
    pub name: String,
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.root {
            write!(f, "$.{}", self.name)
        } else {
            write!(f, ".{}", self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Field {
        field: FieldRef,
        line: usize,
    },
    If {
        cond: FieldRef,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
    Range {
        list: FieldRef,
        body: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Field(FieldRef),
    If(FieldRef),
    ElseIf(FieldRef),
    Range(FieldRef),
    Else,
    End,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Action { action: Action, line: usize },
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

fn lex(src: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut rest = src;
    let mut line = 1usize;
    let mut trim_next_text = false;

    loop {
        let Some(start) = rest.find(OPEN) else {
            push_text(&mut tokens, rest, trim_next_text, false);
            break;
        };

        let (text, after_open) = rest.split_at(start);
        let after_open = &after_open[OPEN.len()..];
        let action_line = line + text.matches('\n').count();

        let trim_left = after_open
            .strip_prefix('-')
            .is_some_and(|r| r.starts_with(|c: char| c.is_ascii_whitespace()));
        push_text(&mut tokens, text, trim_next_text, trim_left);

        let Some(end) = after_open.find(CLOSE) else {
            return Err(CompileError::new(action_line, "unclosed action"));
        };
        let raw = &after_open[..end];
        let mut inner = raw;
        if trim_left {
            inner = &inner[1..];
        }
        trim_next_text = inner
            .strip_suffix('-')
            .is_some_and(|r| r.ends_with(|c: char| c.is_ascii_whitespace()));
        if trim_next_text {
            inner = &inner[..inner.len() - 1];
        }

        let action = parse_action(inner.trim(), action_line)?;
        tokens.push(Token::Action {
            action,
            line: action_line,
        });

        line = action_line + raw.matches('\n').count();
        rest = &after_open[end + CLOSE.len()..];
    }

    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool, trim_end: bool) {
    let mut t = text;
    if trim_start {
        t = t.trim_start();
    }
    if trim_end {
        t = t.trim_end();
    }
    if !t.is_empty() {
        tokens.push(Token::Text(t.to_string()));
    }
}

fn parse_action(body: &str, line: usize) -> Result<Action, CompileError> {
    if body.starts_with("/*") {
        if body.ends_with("*/") && body.len() >= 4 {
            return Ok(Action::Comment);
        }
        return Err(CompileError::new(line, "unclosed comment"));
    }
    if body.is_empty() {
        return Err(CompileError::new(line, "missing value for command"));
    }

    let mut words = body.split_whitespace();
    let head = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let keyword_arg = |kw: &str| -> Result<FieldRef, CompileError> {
        match args.as_slice() {
            [one] => parse_field(one, line),
            [] => Err(CompileError::new(line, format!("missing value for {kw}"))),
            _ => Err(CompileError::new(
                line,
                format!("{kw} takes a single field, got `{}`", args.join(" ")),
            )),
        }
    };

    match head {
        "if" => keyword_arg("if").map(Action::If),
        "range" => keyword_arg("range").map(Action::Range),
        "else" if args.first() == Some(&"if") => match &args[1..] {
            [one] => parse_field(one, line).map(Action::ElseIf),
            [] => Err(CompileError::new(line, "missing value for else if")),
            rest => Err(CompileError::new(
                line,
                format!("else if takes a single field, got `{}`", rest.join(" ")),
            )),
        },
        "else" | "end" if !args.is_empty() => Err(CompileError::new(
            line,
            format!("unexpected `{}` after {head}", args.join(" ")),
        )),
        "else" => Ok(Action::Else),
        "end" => Ok(Action::End),
        _ if head.starts_with('.') || head.starts_with('$') => {
            if !args.is_empty() {
                return Err(CompileError::new(
                    line,
                    format!("unexpected `{}` after field {head}", args.join(" ")),
                ));
            }
            parse_field(head, line).map(Action::Field)
        }
        other => Err(CompileError::new(
            line,
            format!("function or keyword `{other}` not supported"),
        )),
    }
}

fn parse_field(raw: &str, line: usize) -> Result<FieldRef, CompileError> {
    let (root, rest) = match raw.strip_prefix('$') {
        Some(r) => (true, r),
        None => (false, raw),
    };
    let Some(name) = rest.strip_prefix('.') else {
        return Err(CompileError::new(line, format!("bad field reference `{raw}`")));
    };
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(CompileError::new(line, format!("bad field reference `{raw}`")));
    }
    Ok(FieldRef {
        root,
        name: name.to_string(),
    })
}

/// What closed a block while parsing its children.
enum Stop {
    Eof,
    Else(usize),
    ElseIf(usize, FieldRef),
    End(usize),
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    fn block(&mut self) -> Result<(Vec<Node>, Stop), CompileError> {
        let mut nodes = Vec::new();
        while let Some(tok) = self.tokens.next() {
            match tok {
                Token::Text(t) => nodes.push(Node::Text(t)),
                Token::Action { action, line } => match action {
                    Action::Comment => {}
                    Action::Field(field) => nodes.push(Node::Field { field, line }),
                    Action::Else => return Ok((nodes, Stop::Else(line))),
                    Action::ElseIf(cond) => return Ok((nodes, Stop::ElseIf(line, cond))),
                    Action::End => return Ok((nodes, Stop::End(line))),
                    Action::If(cond) => {
                        let (then, otherwise) = self.branches("if", line)?;
                        nodes.push(Node::If {
                            cond,
                            then,
                            otherwise,
                            line,
                        });
                    }
                    Action::Range(list) => {
                        let (body, otherwise) = self.branches("range", line)?;
                        nodes.push(Node::Range {
                            list,
                            body,
                            otherwise,
                            line,
                        });
                    }
                },
            }
        }
        Ok((nodes, Stop::Eof))
    }

    /// Children of an `if`/`range` up to its `{{end}}`, split at an optional `{{else}}`.
    /// An `{{else if}}` chain becomes a nested `If` in the else branch sharing that `{{end}}`.
    fn branches(
        &mut self,
        kw: &str,
        opened_at: usize,
    ) -> Result<(Vec<Node>, Vec<Node>), CompileError> {
        let missing_end = || {
            CompileError::new(
                opened_at,
                format!("unexpected EOF: {kw} has no matching {{{{end}}}}"),
            )
        };
        match self.block()? {
            (main, Stop::End(_)) => Ok((main, Vec::new())),
            (_, Stop::Eof) => Err(missing_end()),
            (main, Stop::ElseIf(line, cond)) if kw == "if" => {
                let (then, otherwise) = self.branches("if", opened_at)?;
                Ok((
                    main,
                    vec![Node::If {
                        cond,
                        then,
                        otherwise,
                        line,
                    }],
                ))
            }
            (_, Stop::ElseIf(line, _)) => Err(CompileError::new(
                line,
                format!("{kw} does not take {{{{else if}}}}"),
            )),
            (main, Stop::Else(_)) => match self.block()? {
                (alt, Stop::End(_)) => Ok((main, alt)),
                (_, Stop::Eof) => Err(missing_end()),
                (_, Stop::Else(line) | Stop::ElseIf(line, _)) => {
                    Err(CompileError::new(line, format!("{kw} has more than one {{{{else}}}}")))
                }
            },
        }
    }
}

pub fn parse(src: &str) -> Result<Vec<Node>, CompileError> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens: tokens.into_iter(),
    };
    match p.block()? {
        (nodes, Stop::Eof) => Ok(nodes),
        (_, Stop::Else(line) | Stop::ElseIf(line, _)) => {
            Err(CompileError::new(line, "unexpected {{else}}"))
        }
        (_, Stop::End(line)) => Err(CompileError::new(line, "unexpected {{end}}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FieldRef {
        FieldRef {
            root: false,
            name: name.into(),
        }
    }

    #[test]
    fn parses_nested_blocks() {
        let nodes = parse("<h1>{{$.Date}}</h1>{{range .News}}{{if .TransTitle}}{{.TransTitle}}{{else}}{{.Title}}{{end}}{{end}}").unwrap();
        assert_eq!(nodes.len(), 4);
        match &nodes[3] {
            Node::Range { list, body, .. } => {
                assert_eq!(list, &field("News"));
                assert!(matches!(&body[0], Node::If { otherwise, .. } if otherwise.len() == 1));
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn trim_markers_eat_whitespace() {
        let nodes = parse("a  \n {{- .Title -}} \n  b").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a".into()),
                Node::Field {
                    field: field("Title"),
                    line: 2
                },
                Node::Text("b".into()),
            ]
        );
    }

    #[test]
    fn else_if_chains_nest_under_one_end() {
        let nodes = parse("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::If {
                cond: field("A"),
                then: vec![Node::Text("a".into())],
                otherwise: vec![Node::If {
                    cond: field("B"),
                    then: vec![Node::Text("b".into())],
                    otherwise: vec![Node::Text("c".into())],
                    line: 1,
                }],
                line: 1,
            }]
        );
        let err = parse("{{if .A}}\n{{else if .B}}\nb").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn comments_are_dropped() {
        let nodes = parse("x{{/* note */}}y").unwrap();
        assert_eq!(nodes, vec![Node::Text("x".into()), Node::Text("y".into())]);
    }

    #[test]
    fn reports_line_of_unclosed_block() {
        let err = parse("line1\nline2 {{range .News}}\n{{.Title}}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("range"));
    }

    #[test]
    fn rejects_syntax_errors() {
        for bad in [
            "{{.Title",
            "{{end}}",
            "{{else}}",
            "{{if}}x{{end}}",
            "{{.}}",
            "{{.Title | upper}}",
            "{{template \"x\"}}",
            "{{if .A}}{{else}}{{else}}{{end}}",
            "{{/* open }}",
            "{{.News.Title}}",
            "{{.Title-}}",
            "{{-.Title}}",
            "{{range .News}}{{else if .Count}}{{end}}",
            "{{if .A}}{{else}}{{else if .B}}{{end}}",
            "{{else if .A}}",
        ] {
            assert!(parse(bad).is_err(), "should reject {bad:?}");
        }
    }
}
