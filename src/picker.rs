use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

pub const MAX_FLOWS: usize = 3;
pub const MAX_FLOW_LEN: usize = 64;

static FLOW_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid flow name regex"));
static HYPHEN_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-{2,}").expect("valid hyphen run regex"));

/// Normalization applied on every keystroke: leading whitespace dropped,
/// spaces become hyphens, hyphen runs collapse, everything lowercased.
pub fn normalize_typing(raw: &str) -> String {
    let spaced = raw.trim_start().replace(' ', "-");
    HYPHEN_RUNS.replace_all(&spaced, "-").to_lowercase()
}

/// Typing normalization plus hyphens trimmed from both ends.
pub fn normalize_final(raw: &str) -> String {
    normalize_typing(raw).trim_matches('-').to_string()
}

pub fn is_valid_flow(name: &str) -> bool {
    name.chars().count() <= MAX_FLOW_LEN && FLOW_NAME.is_match(name)
}

/// The flows attached to a post draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowPicker {
    flows: Vec<String>,
}

impl FlowPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `raw` after final normalization and returns the stored name.
    /// Empty input is ignored and yields `Ok(None)`.
    pub fn commit(&mut self, raw: &str) -> Result<Option<String>, ValidationError> {
        let name = normalize_final(raw);
        if name.is_empty() {
            return Ok(None);
        }
        if self.is_full() {
            return Err(ValidationError::FlowLimit { max: MAX_FLOWS });
        }
        if !is_valid_flow(&name) {
            return Err(ValidationError::MalformedFlow { max: MAX_FLOW_LEN });
        }
        if self.flows.contains(&name) {
            return Err(ValidationError::DuplicateFlow);
        }
        self.flows.push(name.clone());
        Ok(Some(name))
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.flows.len();
        self.flows.retain(|flow| flow != name);
        before != self.flows.len()
    }

    pub fn pop(&mut self) -> Option<String> {
        self.flows.pop()
    }

    /// A full picker disables its input.
    pub fn is_full(&self) -> bool {
        self.flows.len() >= MAX_FLOWS
    }

    pub fn flows(&self) -> &[String] {
        &self.flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_normalization() {
        assert_eq!(normalize_typing("  My  Flow"), "my-flow");
        assert_eq!(normalize_typing("cats "), "cats-");
        assert_eq!(normalize_final("My Flow"), "my-flow");
        assert_eq!(normalize_final("--a--b--"), "a-b");
    }

    #[test]
    fn commit_rules() {
        let mut picker = FlowPicker::new();
        assert_eq!(picker.commit("My Flow"), Ok(Some("my-flow".into())));
        assert_eq!(picker.commit("my flow"), Err(ValidationError::DuplicateFlow));
        assert_eq!(picker.commit("   "), Ok(None));
        assert_eq!(
            picker.commit("caf\u{e9}"),
            Err(ValidationError::MalformedFlow { max: MAX_FLOW_LEN })
        );
        picker.commit("two").unwrap();
        picker.commit("three").unwrap();
        assert!(picker.is_full());
        assert_eq!(
            picker.commit("four"),
            Err(ValidationError::FlowLimit { max: MAX_FLOWS })
        );
        assert!(picker.remove("two"));
        assert!(!picker.is_full());
        assert_eq!(picker.flows(), ["my-flow", "three"]);
    }

    #[test]
    fn long_names_rejected() {
        let mut picker = FlowPicker::new();
        let long = "a".repeat(MAX_FLOW_LEN + 1);
        assert!(picker.commit(&long).is_err());
        assert!(picker.commit(&"a".repeat(MAX_FLOW_LEN)).is_ok());
    }
}
