//! Placeholder substitution for conditional statement templates
//!
//! Placeholders are written as `{id}` where `id` is a sub-condition's short id.
//! Substitution is a single pass over the template, so a substituted value is
//! never re-scanned for placeholders.

use crate::error::{ExprError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}\s]+)\}").expect("placeholder pattern is valid"))
}

/// Replace every `{id}` occurrence with the bound value's textual form
///
/// Placeholders with no binding are left untouched; evaluating the result
/// then fails with [`ExprError::UnresolvedPlaceholder`].
pub fn substitute<I, K, V>(template: &str, bindings: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    let values: HashMap<String, String> = bindings
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.to_string()))
        .collect();

    placeholder_regex()
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Distinct placeholder ids in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(template) {
        let id = &caps[1];
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Verify every placeholder in the template names a known id
pub fn check_placeholders<S: AsRef<str>>(template: &str, known: &[S]) -> Result<()> {
    for id in placeholders(template) {
        if !known.iter().any(|k| k.as_ref() == id) {
            return Err(ExprError::UnknownPlaceholder(id));
        }
    }
    Ok(())
}
