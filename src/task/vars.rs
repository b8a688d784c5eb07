//! Variable binding for `${{NAME}}` tokens
//!
//! Substitution is a single left-to-right pass: a substituted value is never
//! scanned again. Task variables shadow globals, and their own values are
//! bound against the globals once, when the scope is built.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::common::{Error, Result};

const TOKEN_OPEN: &str = "${{";
const TOKEN_CLOSE: &str = "}}";

/// Built-in variable holding the selected board name
pub const BOARD_VAR: &str = "BOARD";
/// Built-in variable holding the run start timestamp
pub const NOW_VAR: &str = "NOW";

/// The global variable table, built once at start-up
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table with the built-ins: `BOARD` and `NOW`
    pub fn builtin(board: &str, now: DateTime<Local>) -> Self {
        let mut vars = Self::new();
        vars.insert(BOARD_VAR, board);
        vars.insert(NOW_VAR, now.format("%Y-%m-%d %H:%M:%S").to_string());
        vars
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Variables {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

/// Variables visible to one task: its own `vars` over the globals
pub struct Scope<'a> {
    globals: &'a Variables,
    /// Bound task values; `Err` holds the undefined name a value referenced
    locals: HashMap<String, std::result::Result<String, String>>,
}

impl<'a> Scope<'a> {
    pub fn new(globals: &'a Variables, task_vars: &HashMap<String, String>) -> Self {
        let locals = task_vars
            .iter()
            .map(|(name, raw)| {
                let bound = substitute(raw, |token| {
                    globals
                        .get(token)
                        .ok_or_else(|| Error::UndefinedVariable {
                            name: token.to_string(),
                        })
                })
                .map_err(|e| match e {
                    Error::UndefinedVariable { name } => name,
                    other => other.to_string(),
                });
                (name.clone(), bound)
            })
            .collect();

        Self { globals, locals }
    }

    fn lookup(&self, name: &str) -> Result<&str> {
        match self.locals.get(name) {
            Some(Ok(value)) => Ok(value),
            Some(Err(missing)) => Err(Error::UndefinedVariable {
                name: missing.clone(),
            }),
            None => self.globals.get(name).ok_or_else(|| Error::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Replace every `${{NAME}}` token in `text`
    pub fn bind(&self, text: &str) -> Result<String> {
        substitute(text, |name| self.lookup(name))
    }
}

/// Bind `text` against task variables first, then globals
pub fn bind(globals: &Variables, task_vars: &HashMap<String, String>, text: &str) -> Result<String> {
    Scope::new(globals, task_vars).bind(text)
}

fn substitute<'v, F>(text: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Result<&'v str>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(TOKEN_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + TOKEN_OPEN.len()..];

        match after.find(TOKEN_CLOSE) {
            Some(end) if is_token_name(&after[..end]) => {
                out.push_str(lookup(after[..end].trim())?);
                rest = &after[end + TOKEN_CLOSE.len()..];
            }
            _ => {
                // Not a token; keep the opener literally
                out.push_str(TOKEN_OPEN);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_token_name(raw: &str) -> bool {
    !raw.trim().is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c.is_whitespace())
}
