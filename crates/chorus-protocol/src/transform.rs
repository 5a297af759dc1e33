//! Prompt transforms — pure string mappers looked up by (category, method).
//!
//! Anything the table does not know, including `category = "none"`, is the
//! identity. Resolving a transform never fails.

use std::collections::HashMap;

use crate::types::TransformSpec;

/// A pure, stateless prompt transform.
pub type TransformFn = fn(&str) -> String;

/// Registry of transforms keyed by (category, method).
#[derive(Clone)]
pub struct TransformTable {
    transforms: HashMap<(String, String), TransformFn>,
}

impl TransformTable {
    /// Empty table: every lookup is the identity.
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Table with the built-in transforms.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("ciphers", "rot13", rot13);
        table.register("ciphers", "atbash", atbash);
        table.register("ciphers", "caesar", caesar3);
        table.register("text", "reverse", reverse);
        table.register("text", "leetspeak", leetspeak);
        table
    }

    pub fn register(&mut self, category: &str, method: &str, f: TransformFn) {
        self.transforms
            .insert((category.to_string(), method.to_string()), f);
    }

    pub fn contains(&self, spec: &TransformSpec) -> bool {
        self.lookup(spec).is_some()
    }

    fn lookup(&self, spec: &TransformSpec) -> Option<TransformFn> {
        if spec.is_identity() {
            return None;
        }
        self.transforms
            .get(&(spec.category.clone(), spec.method.clone()))
            .copied()
    }

    /// Apply a transform to `text`.
    pub fn apply(&self, spec: &TransformSpec, text: &str) -> String {
        match self.lookup(spec) {
            Some(f) => f(text),
            None => text.to_string(),
        }
    }
}

impl Default for TransformTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for TransformTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.transforms.keys().collect();
        keys.sort();
        f.debug_struct("TransformTable").field("transforms", &keys).finish()
    }
}

fn shift_letter(c: char, shift: u8) -> char {
    match c {
        'a'..='z' => (((c as u8 - b'a' + shift) % 26) + b'a') as char,
        'A'..='Z' => (((c as u8 - b'A' + shift) % 26) + b'A') as char,
        _ => c,
    }
}

fn rot13(text: &str) -> String {
    text.chars().map(|c| shift_letter(c, 13)).collect()
}

fn caesar3(text: &str) -> String {
    text.chars().map(|c| shift_letter(c, 3)).collect()
}

fn atbash(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'a'..='z' => (b'z' - (c as u8 - b'a')) as char,
            'A'..='Z' => (b'Z' - (c as u8 - b'A')) as char,
            _ => c,
        })
        .collect()
}

fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

fn leetspeak(text: &str) -> String {
    text.chars()
        .map(|c| match c.to_ascii_lowercase() {
            'a' => '4',
            'e' => '3',
            'i' => '1',
            'o' => '0',
            's' => '5',
            't' => '7',
            _ => c,
        })
        .collect()
}
