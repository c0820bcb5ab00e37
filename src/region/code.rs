use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::EdenError;

/// A region code as written in configuration: `7`, `"07"` or `"56h"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for CodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeValue::Int(n) => write!(f, "{n}"),
            CodeValue::Text(s) => f.write_str(s),
        }
    }
}

impl CodeValue {
    /// Canonical matching form, see [`normalize_code`].
    pub fn normalized(&self) -> String { normalize_code(&self.to_string()) }
}

/// Canonical form of a region code: the first ASCII alphanumeric token,
/// with leading zeros stripped when the token is purely numeric.
/// Returns an empty string when the input has no such token.
///
/// `"07"`, `"7"`, `" 7 "` and `7` all normalize to `"7"`; `"56h"` stays `"56h"`.
pub fn normalize_code(raw: &str) -> String {
    let token = raw
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = token.trim_start_matches('0');
        return if stripped.is_empty() { "0".into() } else { stripped.into() };
    }
    token.to_string()
}

/// Score a column name as a likely Level III code field.
fn code_field_score(column: &str) -> i32 {
    let cl = column.to_ascii_lowercase();
    let level3 = cl.contains("l3") || cl.contains("level3") || cl.contains("lvl3");
    let mut score = 0;
    if level3 { score += 4; }
    if cl.contains("code") { score += 3; }
    if cl.contains("us") && level3 { score += 2; }
    if cl.contains("eco") || cl.contains("region") { score += 1; }
    if cl.contains("name") || cl.contains("desc") || cl.contains("label") { score -= 2; }
    score
}

/// Choose the attribute column holding region codes.
///
/// An explicit `preferred` column must exist. Otherwise columns are scored by
/// name and the best one wins (ties go to the lexicographically greater name);
/// a best score below 3 is too weak to trust.
pub(crate) fn pick_code_field(columns: &[String], preferred: Option<&str>, subject: &str) -> Result<String> {
    if let Some(preferred) = preferred {
        if columns.iter().any(|c| c == preferred) {
            return Ok(preferred.to_string());
        }
        bail!(EdenError::config(
            subject,
            format!("code field {preferred:?} not found; available columns: {}", columns.join(", ")),
        ));
    }

    let best = columns.iter()
        .map(|c| (code_field_score(c), c))
        .max();
    match best {
        Some((score, column)) if score >= 3 => Ok(column.clone()),
        _ => bail!(EdenError::config(
            subject,
            format!("could not infer the code field; set code_field explicitly. Columns: {}", columns.join(", ")),
        )),
    }
}
