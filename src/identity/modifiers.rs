//! Modifier string parsing
//!
//! `w_200,h_100` becomes `[("w", "200"), ("h", "100")]`. Tokens split on
//! `,` or `&`; name and value split at the first `_`, `=` or `:`. A bare
//! token is a flag with value `"true"`, and a lone `_` means no modifiers.

use std::fmt;

/// Value assigned to flag modifiers such as `grayscale`
pub const FLAG_VALUE: &str = "true";

/// Ordered modifier-name to value mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    entries: Vec<(String, String)>,
}

impl Modifiers {
    /// Parse a raw modifier string
    pub fn parse(raw: &str) -> Self {
        let mut modifiers = Self::default();
        if raw == "_" {
            return modifiers;
        }

        for token in raw.split([',', '&']).filter(|t| !t.is_empty()) {
            let (name, value) = match token.find(['_', '=', ':']) {
                Some(idx) => (&token[..idx], &token[idx + 1..]),
                None => (token, FLAG_VALUE),
            };
            if name.is_empty() {
                continue;
            }
            modifiers.insert(name, value);
        }
        modifiers
    }

    /// Insert or replace a modifier, keeping its first position
    pub fn insert(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Look up a modifier value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Look up the first present name among aliases (e.g. `w` and `width`)
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "_");
        }
        let tokens: Vec<String> = self
            .entries
            .iter()
            .map(|(n, v)| {
                if v == FLAG_VALUE {
                    n.clone()
                } else {
                    format!("{}_{}", n, v)
                }
            })
            .collect();
        write!(f, "{}", tokens.join(","))
    }
}
