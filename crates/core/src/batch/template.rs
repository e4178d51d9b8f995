//! Command templates and their per-item expansion.
//!
//! Placeholders are written `{name}`; `{{` and `}}` produce literal braces.
//!
//! Two execution modes exist:
//!
//! - [`TemplateMode::Direct`] splits the template into arguments with POSIX
//!   shell-word rules once, at parse time. Values are substituted inside the
//!   argument they appear in and the program is spawned without a shell, so
//!   a value can never turn into extra arguments, redirections or globs.
//! - [`TemplateMode::Shell`] hands the expanded text to `<shell> -c`. Every
//!   substituted value is shell-quoted; shell syntax (`&&`, redirection,
//!   globbing) comes only from the template text. Placeholders must therefore
//!   appear outside quotes.
//!
//! Values are never sanitized beyond keeping each one a single token.
//! Whatever a value contains is passed through literally.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::error::BatchError;
use super::variables::VariableSet;

// Private-use code points mark placeholder positions while the template is
// split into words.
const MARK_OPEN: char = '\u{E000}';
const MARK_CLOSE: char = '\u{E001}';

/// How an expanded template is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Spawn the program directly with an argument vector.
    #[default]
    Direct,
    /// Run the expanded text through a shell.
    Shell,
}

/// A concrete, executable command for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConcreteCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Shell-quoted rendering for logs and manual reproduction.
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

impl fmt::Display for ConcreteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Words(Vec<Vec<Segment>>),
    Script { shell: String, segments: Vec<Segment> },
}

/// An immutable command template, shared read-only by every item of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    body: Body,
}

impl CommandTemplate {
    /// Parses a template for direct execution.
    pub fn parse(raw: &str) -> Result<Self, BatchError> {
        let segments = lex(raw, false)?;

        let mut marked = String::with_capacity(raw.len());
        let mut names = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => marked.push_str(&text),
                Segment::Placeholder(name) => {
                    marked.push(MARK_OPEN);
                    marked.push_str(&names.len().to_string());
                    marked.push(MARK_CLOSE);
                    names.push(name);
                }
            }
        }

        let words = shell_words::split(&marked)
            .map_err(|e| BatchError::malformed(raw, e.to_string()))?;
        if words.is_empty() {
            return Err(BatchError::EmptyCommand {
                template: raw.to_string(),
            });
        }

        let words = words
            .iter()
            .map(|word| unmark(word, &names, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            body: Body::Words(words),
        })
    }

    /// Parses a template that runs through `shell -c`.
    pub fn parse_shell(raw: &str, shell: impl Into<String>) -> Result<Self, BatchError> {
        let segments = lex(raw, true)?;
        if raw.trim().is_empty() {
            return Err(BatchError::EmptyCommand {
                template: raw.to_string(),
            });
        }
        Ok(Self {
            raw: raw.to_string(),
            body: Body::Script {
                shell: shell.into(),
                segments,
            },
        })
    }

    /// Parses a template in the given mode.
    pub fn with_mode(raw: &str, mode: TemplateMode, shell: &str) -> Result<Self, BatchError> {
        match mode {
            TemplateMode::Direct => Self::parse(raw),
            TemplateMode::Shell => Self::parse_shell(raw, shell),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn mode(&self) -> TemplateMode {
        match self.body {
            Body::Words(_) => TemplateMode::Direct,
            Body::Script { .. } => TemplateMode::Shell,
        }
    }

    /// Every placeholder name referenced by the template.
    pub fn placeholders(&self) -> BTreeSet<&str> {
        let segments: Box<dyn Iterator<Item = &Segment> + '_> = match &self.body {
            Body::Words(words) => Box::new(words.iter().flatten()),
            Body::Script { segments, .. } => Box::new(segments.iter()),
        };
        segments
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fails on the first placeholder not in `keys`.
    pub fn check_keys(&self, keys: &[&str]) -> Result<(), BatchError> {
        match self.placeholders().into_iter().find(|p| !keys.contains(p)) {
            Some(missing) => Err(BatchError::unresolved(missing, &self.raw)),
            None => Ok(()),
        }
    }

    /// Substitutes every placeholder with its value.
    pub fn expand(&self, vars: &VariableSet) -> Result<ConcreteCommand, BatchError> {
        match &self.body {
            Body::Words(words) => {
                let mut argv = Vec::with_capacity(words.len());
                for word in words {
                    let mut arg = String::new();
                    for segment in word {
                        match segment {
                            Segment::Literal(text) => arg.push_str(text),
                            Segment::Placeholder(name) => arg.push_str(self.lookup(vars, name)?),
                        }
                    }
                    argv.push(arg);
                }

                let mut argv = argv.into_iter();
                let program = argv.next().unwrap_or_default();
                if program.is_empty() {
                    return Err(BatchError::EmptyCommand {
                        template: self.raw.clone(),
                    });
                }
                Ok(ConcreteCommand::new(program, argv.collect()))
            }
            Body::Script { shell, segments } => {
                let mut script = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => script.push_str(text),
                        Segment::Placeholder(name) => {
                            script.push_str(&shell_words::quote(self.lookup(vars, name)?))
                        }
                    }
                }
                Ok(ConcreteCommand::new(
                    shell.clone(),
                    vec!["-c".to_string(), script],
                ))
            }
        }
    }

    fn lookup<'v>(&self, vars: &'v VariableSet, name: &str) -> Result<&'v str, BatchError> {
        vars.get(name)
            .ok_or_else(|| BatchError::unresolved(name, &self.raw))
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Escapes braces so `text` is taken literally by [`CommandTemplate`].
pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits template text into literals and placeholders.
///
/// With `reject_quoted` set, a placeholder inside single or double quotes is
/// an error, since shell mode quotes values itself.
fn lex(raw: &str, reject_quoted: bool) -> Result<Vec<Segment>, BatchError> {
    if raw.contains(MARK_OPEN) || raw.contains(MARK_CLOSE) {
        return Err(BatchError::malformed(raw, "contains reserved characters"));
    }

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) if is_key_char(ch) => name.push(ch),
                        Some(ch) => {
                            return Err(BatchError::malformed(
                                raw,
                                format!("invalid character {ch:?} in placeholder"),
                            ))
                        }
                        None => return Err(BatchError::malformed(raw, "unclosed placeholder")),
                    }
                }
                if name.is_empty() {
                    return Err(BatchError::malformed(raw, "empty placeholder"));
                }
                if reject_quoted && (in_single || in_double) {
                    return Err(BatchError::malformed(
                        raw,
                        format!("placeholder {{{name}}} is quoted; shell mode quotes values itself"),
                    ));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => return Err(BatchError::malformed(raw, "unmatched '}'")),
            '\\' if !in_single => {
                literal.push(c);
                if let Some(escaped) = chars.next() {
                    literal.push(escaped);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                literal.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                literal.push(c);
            }
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Rebuilds one split word, turning markers back into placeholders.
fn unmark(word: &str, names: &[String], raw: &str) -> Result<Vec<Segment>, BatchError> {
    let mut segments = Vec::new();
    let mut rest = word;

    while let Some(open) = rest.find(MARK_OPEN) {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + MARK_OPEN.len_utf8()..];
        let close = after
            .find(MARK_CLOSE)
            .ok_or_else(|| BatchError::malformed(raw, "corrupted placeholder marker"))?;
        let name = after[..close]
            .parse::<usize>()
            .ok()
            .and_then(|i| names.get(i))
            .ok_or_else(|| BatchError::malformed(raw, "corrupted placeholder marker"))?;
        segments.push(Segment::Placeholder(name.clone()));
        rest = &after[close + MARK_CLOSE.len_utf8()..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}
