//! Parser for Arborfiles.
//!
//! One statement per line; a trailing `\` continues it on the next line and
//! `#` starts a comment.  Statements are lists of words split into sections
//! by `:`, except `command`, whose template is the raw text after `=`.
//!
//! Parsed statements borrow from the input text, marked with the lifetime
//! `'text`.

use crate::graph::Placement;
use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    line: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub fn format(&self, filename: &Path) -> String {
        format!("{}:{}: {}", filename.display(), self.line, self.msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExeKind {
    Dist,
    Util,
    Test,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Statement<'text> {
    Contain {
        dirs: Vec<&'text str>,
        protected: bool,
    },
    Refer(Vec<&'text str>),
    StaticLib {
        name: &'text str,
        public: Vec<&'text str>,
        private: Vec<&'text str>,
        syslibs: Vec<&'text str>,
    },
    DynamicLib {
        name: &'text str,
        libs: Vec<&'text str>,
    },
    Exe {
        kind: ExeKind,
        name: &'text str,
        sources: Vec<&'text str>,
        syslibs: Vec<&'text str>,
    },
    Scripts(Placement, Vec<&'text str>),
    Data(Placement, Vec<&'text str>),
    Docs(Vec<&'text str>),
    Depend {
        node: &'text str,
        deps: Vec<&'text str>,
    },
    Command {
        tool: &'text str,
        template: String,
    },
}

/// Drop a comment: `#` at the start of the line or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &c) in bytes.iter().enumerate() {
        if c == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// Split a word list into `:`-separated sections.  A colon may stand alone
/// or be attached to a word.
fn sections<'text>(segments: &[&'text str]) -> Vec<Vec<&'text str>> {
    let mut out: Vec<Vec<&'text str>> = vec![Vec::new()];
    for word in segments.iter().flat_map(|s| s.split_whitespace()) {
        for (i, part) in word.split(':').enumerate() {
            if i > 0 {
                out.push(Vec::new());
            }
            if let (false, Some(sec)) = (part.is_empty(), out.last_mut()) {
                sec.push(part);
            }
        }
    }
    out
}

pub struct Parser<'text> {
    lines: std::iter::Enumerate<std::str::Lines<'text>>,
}

impl<'text> Parser<'text> {
    pub fn new(text: &'text str) -> Parser<'text> {
        Parser {
            lines: text.lines().enumerate(),
        }
    }

    /// Read the physical lines of the next statement, returning its first
    /// line number.
    fn read_logical(&mut self) -> Option<(usize, Vec<&'text str>)> {
        let mut segments = Vec::new();
        let mut start = None;
        for (i, line) in self.lines.by_ref() {
            let line = strip_comment(line).trim();
            let (line, continues) = match line.strip_suffix('\\') {
                Some(rest) => (rest.trim_end(), true),
                None => (line, false),
            };
            if !line.is_empty() {
                start.get_or_insert(i + 1);
                segments.push(line);
            }
            if !continues && start.is_some() {
                break;
            }
        }
        start.map(|line| (line, segments))
    }

    /// Read the next statement, or None at end of input.
    pub fn read(&mut self) -> ParseResult<Option<(usize, Statement<'text>)>> {
        let Some((line, segments)) = self.read_logical() else {
            return Ok(None);
        };
        let err = |msg: String| ParseError { msg, line };

        if segments[0].split_whitespace().next() == Some("command") {
            // The tool name is borrowed from the first line; the template may
            // span continuation lines.
            let after = &segments[0]["command".len()..];
            let tool = after.split('=').next().unwrap_or("").trim();
            let text = segments.join(" ");
            let Some((_, template)) = text.split_once('=') else {
                return Err(err("expected 'command <action> = <template>'".into()));
            };
            if tool.is_empty() || tool.contains(char::is_whitespace) {
                return Err(err(format!("bad command name {:?}", tool)));
            }
            return Ok(Some((
                line,
                Statement::Command {
                    tool,
                    template: template.trim().to_string(),
                },
            )));
        }

        let mut secs = sections(&segments);
        let mut head = std::mem::take(&mut secs[0]);
        let keyword = if head.is_empty() { "" } else { head.remove(0) };
        let rest = &secs[1..];

        let single = |head: &[&'text str]| -> ParseResult<&'text str> {
            match head {
                [name] => Ok(*name),
                _ => Err(err(format!("{} takes exactly one name", keyword))),
            }
        };
        let nonempty = |words: Vec<&'text str>| -> ParseResult<Vec<&'text str>> {
            if words.is_empty() {
                return Err(err(format!("{} needs at least one name", keyword)));
            }
            Ok(words)
        };
        let arity = |min: usize, max: usize| -> ParseResult<()> {
            if rest.len() < min || rest.len() > max {
                return Err(err(format!("wrong number of ':' sections for {}", keyword)));
            }
            Ok(())
        };
        let section = |i: usize| rest.get(i).cloned().unwrap_or_default();

        let stmt = match keyword {
            "contain" => {
                arity(0, 1)?;
                let protected = match rest.first().map(|s| s.as_slice()) {
                    None => false,
                    Some(["protected"]) => true,
                    Some(_) => return Err(err("expected ': protected'".into())),
                };
                Statement::Contain {
                    dirs: nonempty(head)?,
                    protected,
                }
            }
            "refer" => {
                arity(0, 0)?;
                Statement::Refer(nonempty(head)?)
            }
            "static-lib" => {
                arity(1, 3)?;
                Statement::StaticLib {
                    name: single(&head)?,
                    public: section(0),
                    private: section(1),
                    syslibs: section(2),
                }
            }
            "dynamic-lib" => {
                arity(1, 1)?;
                Statement::DynamicLib {
                    name: single(&head)?,
                    libs: nonempty(section(0))?,
                }
            }
            "dist-exe" | "util-exe" | "test-exe" => {
                arity(1, 2)?;
                let kind = match keyword {
                    "dist-exe" => ExeKind::Dist,
                    "util-exe" => ExeKind::Util,
                    _ => ExeKind::Test,
                };
                Statement::Exe {
                    kind,
                    name: single(&head)?,
                    sources: section(0),
                    syslibs: section(1),
                }
            }
            "priv-script" | "dist-script" | "priv-data" | "dist-data" => {
                arity(0, 0)?;
                let placement = if keyword.starts_with("dist") {
                    Placement::Dist
                } else {
                    Placement::Priv
                };
                let names = nonempty(head)?;
                if keyword.ends_with("script") {
                    Statement::Scripts(placement, names)
                } else {
                    Statement::Data(placement, names)
                }
            }
            "doc" => {
                arity(0, 0)?;
                Statement::Docs(nonempty(head)?)
            }
            "depend" => {
                arity(1, 1)?;
                Statement::Depend {
                    node: single(&head)?,
                    deps: nonempty(section(0))?,
                }
            }
            _ => return Err(err(format!("unknown statement {:?}", keyword))),
        };
        Ok(Some((line, stmt)))
    }
}
