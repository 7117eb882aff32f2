//! Command templates with embedded variable references, e.g.
//! `cc -c -o $out $in`, and their expansion into plain command lines.

use anyhow::bail;
use std::fmt;

/// One token within a Template, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    VarRef(String),
}

/// A parsed but unexpanded command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl Template {
    /// Parse `$name`, `${name}` and `$$` references.
    pub fn parse(text: &str) -> anyhow::Result<Template> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }
            let mut name = String::new();
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    literal.push('$');
                    continue;
                }
                Some('{') => {
                    chars.next();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) if is_var_char(c) => name.push(c),
                            Some(c) => bail!("bad character {:?} in ${{}} reference", c),
                            None => bail!("unterminated ${{ in {:?}", text),
                        }
                    }
                }
                _ => {
                    while let Some(&c) = chars.peek() {
                        if c == '-' || !is_var_char(c) {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                }
            }
            if name.is_empty() {
                bail!("bad $-reference in {:?}", text);
            }
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::VarRef(name));
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Template { parts })
    }

    /// Expand the template; unknown variables expand to nothing.
    pub fn evaluate(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::VarRef(name) => {
                    if let Some((_, val)) = vars.iter().find(|(k, _)| k == name) {
                        out.push_str(val);
                    }
                }
            }
        }
        out
    }
}

/// The external commands a build needs, as named in `command` statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Compile,
    Archive,
    LinkDynamic,
    LinkExe,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Compile, Tool::Archive, Tool::LinkDynamic, Tool::LinkExe];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Compile => "compile",
            Tool::Archive => "archive",
            Tool::LinkDynamic => "link-dynamic",
            Tool::LinkExe => "link-exe",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    fn default_template(self) -> &'static str {
        match self {
            Tool::Compile => "cc -c -Isrc -o $out $in",
            Tool::Archive => "rm -f $out && ar rcs $out $in",
            Tool::LinkDynamic => {
                "cc -shared -o $out -Wl,--whole-archive $in -Wl,--no-whole-archive $syslibs"
            }
            Tool::LinkExe => "cc -o $out $in $syslibs",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command templates per tool.
#[derive(Debug, Clone)]
pub struct Toolchain {
    templates: [Template; 4],
}

impl Default for Toolchain {
    fn default() -> Self {
        let templates = Tool::ALL.map(|tool| {
            Template::parse(tool.default_template()).expect("built-in templates parse")
        });
        Toolchain { templates }
    }
}

impl Toolchain {
    pub fn set(&mut self, tool: Tool, template: Template) {
        self.templates[tool as usize] = template;
    }

    /// Render a tool invocation.
    pub fn command(&self, tool: Tool, ins: &[String], out: &str, syslibs: &[String]) -> String {
        let ins = ins.join(" ");
        let syslibs = syslibs
            .iter()
            .map(|lib| format!("-l{}", lib))
            .collect::<Vec<_>>()
            .join(" ");
        let cmd = self.templates[tool as usize].evaluate(&[
            ("in", &ins),
            ("out", out),
            ("syslibs", &syslibs),
        ]);
        cmd.trim_end().to_string()
    }
}
