//! Submission script contract.
//!
//! The script sent to the remote service is opaque text, except for a few
//! landmarks this crate relies on:
//!
//! - `##INPUT_SANDBOX##`: replaced with the list of sandbox files at submit.
//! - a `# <-- user settings` / `# user settings -->` marker pair delimiting
//!   the region rewritten with one directive per configured setting.
//! - `<ident> = Job(...)`: the variable the setting directives are called on.
//! - `.setParametricInputData([[...], ...])`: the per-sub-job dataset
//!   partitions of a parametric job, rewritten to `.setInputData([...])` when
//!   a single sub-job is resubmitted.
//! - `%n`: the per-sub-job name token.
//!
//! Values are rendered as Python literals because that is what the remote
//! side evaluates.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};


pub const SCRIPT_FILE_NAME: &str = "dirac-script.py";
pub const INPUT_SANDBOX_TOKEN: &str = "##INPUT_SANDBOX##";
pub const SETTINGS_START: &str = "# <-- user settings\n";
pub const SETTINGS_END: &str = "# user settings -->";
pub const NAME_TOKEN: &str = "%n";

const PARAMETRIC_DIRECTIVE: &str = ".setParametricInputData(";
const INPUT_DIRECTIVE: &str = ".setInputData(";


// ---------------------------------------------------------------------------
// SettingValue
// ---------------------------------------------------------------------------

/// A user setting applied to the job definition at submit/resubmit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SettingValue>),
}

impl SettingValue {
    /// Render as a Python literal.
    pub fn python_repr(&self) -> String {
        match self {
            SettingValue::Bool(true) => "True".into(),
            SettingValue::Bool(false) => "False".into(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            SettingValue::Str(s) => quote(s),
            SettingValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.python_repr()).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Str(s.to_string())
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Int(i)
    }
}


// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Render a list of strings as a Python list literal: `['a', 'b']`.
pub fn python_list(items: &[String]) -> String {
    let parts: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", parts.join(", "))
}

/// Substitute the sandbox file list into a script template.
pub fn substitute_sandbox(template: &str, files: &[String]) -> String {
    template.replace(INPUT_SANDBOX_TOKEN, &python_list(files))
}

/// One setting directive line. Strings are double-quoted with `\` and `"`
/// escaped, everything else is written as its Python literal.
pub fn setting_directive(ident: &str, key: &str, value: &SettingValue) -> String {
    match value {
        SettingValue::Str(s) => format!(
            "{}.set{}(\"{}\")\n",
            ident,
            key,
            s.replace('\\', "\\\\").replace('"', "\\\"")
        ),
        other => format!("{}.set{}({})\n", ident, key, other.python_repr()),
    }
}


// ---------------------------------------------------------------------------
// Script inspection and rewriting
// ---------------------------------------------------------------------------

fn job_ident_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([A-Za-z_]\w*)\s*=\s*(?:[A-Za-z_]\w*\.)*\w*Job\s*\(").ok()
    })
    .as_ref()
}

/// Name of the variable bound to the job definition (`j = Job()` gives `j`).
pub fn job_ident(script: &str) -> Result<String> {
    job_ident_regex()
        .and_then(|re| re.captures(script))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| BackendError::Script("no job definition found".into()))
}

/// Replace the user-settings region with one directive per setting, in key
/// order. Everything outside the markers is kept byte-for-byte.
pub fn apply_user_settings(
    script: &str,
    ident: &str,
    settings: &BTreeMap<String, SettingValue>,
) -> Result<String> {
    let start = script
        .find(SETTINGS_START)
        .ok_or_else(|| BackendError::Script("user settings start marker missing".into()))?;
    let region_start = start + SETTINGS_START.len();
    let region_end = script[region_start..]
        .find(SETTINGS_END)
        .map(|offset| region_start + offset)
        .ok_or_else(|| BackendError::Script("user settings end marker missing".into()))?;

    let mut out = String::with_capacity(script.len());
    out.push_str(&script[..region_start]);
    for (key, value) in settings {
        out.push_str(&setting_directive(ident, key, value));
    }
    out.push_str(&script[region_end..]);
    Ok(out)
}

/// Locate `directive(...)`: returns the directive start, the argument start
/// and the index of the closing paren. Parens inside quoted strings are
/// ignored.
fn directive_span(script: &str, directive: &str) -> Option<(usize, usize, usize)> {
    let start = script.find(directive)?;
    let arg_start = start + directive.len();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in script[arg_start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, arg_start, arg_start + offset));
                }
            }
            _ => {}
        }
    }
    None
}

/// Recover the ordered dataset partitions of a parametric job. A script
/// without the parametric directive has none.
pub fn parametric_datasets(script: &str) -> Result<Vec<Vec<String>>> {
    let Some((_, arg_start, arg_end)) = directive_span(script, PARAMETRIC_DIRECTIVE) else {
        if script.contains(PARAMETRIC_DIRECTIVE) {
            return Err(BackendError::Script("unterminated parametric input directive".into()));
        }
        return Ok(Vec::new());
    };
    let literal = parse_literal(&script[arg_start..arg_end])?;
    let Literal::List(partitions) = literal else {
        return Err(BackendError::Script("parametric input data is not a list".into()));
    };
    partitions
        .into_iter()
        .map(|partition| match partition {
            Literal::List(files) => files
                .into_iter()
                .map(|f| match f {
                    Literal::Str(s) => Ok(s),
                    Literal::List(_) => Err(BackendError::Script(
                        "nested list inside a dataset partition".into(),
                    )),
                })
                .collect(),
            Literal::Str(s) => Ok(vec![s]),
        })
        .collect()
}

/// Turn the parametric directive into a concrete single-dataset directive
/// and substitute the per-sub-job name token.
pub fn rewrite_parametric(script: &str, dataset: &[String], index: usize) -> Result<String> {
    let (start, _, arg_end) = directive_span(script, PARAMETRIC_DIRECTIVE)
        .ok_or_else(|| BackendError::Script("no parametric input directive".into()))?;
    let mut out = String::with_capacity(script.len());
    out.push_str(&script[..start]);
    out.push_str(INPUT_DIRECTIVE);
    out.push_str(&python_list(dataset));
    out.push(')');
    out.push_str(&script[arg_end + 1..]);
    Ok(out.replace(NAME_TOKEN, &index.to_string()))
}


// ---------------------------------------------------------------------------
// Python list literal parser (strings and nested lists only)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Literal {
    Str(String),
    List(Vec<Literal>),
}

struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn value(&mut self) -> Result<Literal> {
        self.skip_ws();
        match self.chars.next() {
            Some('[') => self.list(),
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(c) => Err(BackendError::Script(format!("unexpected '{}' in dataset list", c))),
            None => Err(BackendError::Script("dataset list ends early".into())),
        }
    }

    fn list(&mut self) -> Result<Literal> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&']') {
                self.chars.next();
                return Ok(Literal::List(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => return Ok(Literal::List(items)),
                Some(c) => {
                    return Err(BackendError::Script(format!(
                        "expected ',' or ']' in dataset list, found '{}'",
                        c
                    )))
                }
                None => return Err(BackendError::Script("unterminated dataset list".into())),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<Literal> {
        let mut s = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    if let Some(next) = self.chars.next() {
                        s.push(next);
                    }
                }
                c if c == quote => return Ok(Literal::Str(s)),
                c => s.push(c),
            }
        }
        Err(BackendError::Script("unterminated string in dataset list".into()))
    }
}

fn parse_literal(text: &str) -> Result<Literal> {
    let mut parser = LiteralParser { chars: text.chars().peekable() };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.chars.next().is_some() {
        return Err(BackendError::Script("trailing text after dataset list".into()));
    }
    Ok(value)
}
