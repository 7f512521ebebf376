//! Aggregated material script text with a name-hashed entry table.
//!
//! Every accepted file is appended to one buffer. Files are concatenated
//! last-first, so when two files define the same name the one that sorts
//! later is found first.

use log::{debug, warn};

use tessera_core::constants::MAX_SHADERTEXT_HASH;

use crate::lexer::Lexer;
use crate::parser::names::name_hash;

/// One script file: its name (for diagnostics) and contents.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub name: String,
    pub text: String,
}

impl ScriptFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextIndex {
    text: String,
    /// Byte offsets of material names, bucketed by `name_hash`.
    buckets: Vec<Vec<usize>>,
    entries: usize,
    rejected: Vec<String>,
}

impl Default for TextIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// True when every top-level name in `text` is followed by a brace block.
fn well_formed(text: &str) -> bool {
    let mut lx = Lexer::new(text);
    while lx.next_token(true).is_some() {
        let body = lx.clone();
        if lx.next_token(true) != Some("{") {
            return false;
        }
        lx = body;
        lx.skip_braced_section(0);
    }
    true
}

impl TextIndex {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            buckets: vec![Vec::new(); MAX_SHADERTEXT_HASH],
            entries: 0,
            rejected: Vec::new(),
        }
    }

    /// Build the index from script files, sorted by name first. A file
    /// with a name not followed by `{` is rejected as a whole.
    pub fn build(mut files: Vec<ScriptFile>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let mut index = Self::new();

        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            debug!("...loading '{}'", file.name);
            if well_formed(&file.text) {
                accepted.push(file);
            } else {
                warn!("bad material file {} has incorrect syntax", file.name);
                index.rejected.push(file.name);
            }
        }

        for file in accepted.iter().rev() {
            index.text.push_str(&file.text);
            index.text.push('\n');
        }

        let mut lx = Lexer::new(&index.text);
        while let Some(name) = lx.next_token(true) {
            let end = lx.position();
            let quoted = index.text[..end].ends_with('"');
            let offset = end - name.len() - if quoted { 2 } else { 0 };
            index.buckets[name_hash(name, MAX_SHADERTEXT_HASH)].push(offset);
            index.entries += 1;
            lx.skip_braced_section(0);
        }
        index
    }

    /// A cursor positioned just after the definition of `name`.
    pub fn find(&self, name: &str) -> Option<Lexer<'_>> {
        let bucket = &self.buckets[name_hash(name, MAX_SHADERTEXT_HASH)];
        bucket.iter().find_map(|&offset| {
            let mut lx = Lexer::at(&self.text, offset);
            match lx.next_token(true) {
                Some(token) if token.eq_ignore_ascii_case(name) => Some(lx),
                _ => None,
            }
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names of every indexed definition, in text order.
    pub fn names(&self) -> Vec<&str> {
        let mut offsets: Vec<usize> = self.buckets.iter().flatten().copied().collect();
        offsets.sort_unstable();
        offsets
            .into_iter()
            .filter_map(|offset| Lexer::at(&self.text, offset).next_token(true))
            .collect()
    }

    /// Number of definitions, duplicates included.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Files dropped for bad syntax.
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(files: &[(&str, &str)]) -> TextIndex {
        TextIndex::build(
            files
                .iter()
                .map(|(name, text)| ScriptFile::new(*name, *text))
                .collect(),
        )
    }

    #[test]
    fn test_find_positions_after_name() {
        let idx = index(&[(
            "base.shader",
            "textures/base/wall\n{\n{\nmap textures/base/wall.tga\n}\n}\n",
        )]);
        let mut lx = idx.find("textures/base/wall").unwrap();
        assert_eq!(lx.next_token(true), Some("{"));
        assert_eq!(lx.next_token(true), Some("{"));
        assert_eq!(lx.next_token(true), Some("map"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let idx = index(&[("a.shader", "Textures/Sky/Space\n{\n}\n")]);
        assert!(idx.contains("textures/sky/space"));
        assert!(!idx.contains("textures/sky/void"));
    }

    #[test]
    fn test_later_file_wins() {
        let idx = index(&[
            ("b.shader", "shared\n{\nsort nearest\n}\n"),
            ("a.shader", "shared\n{\nsort opaque\n}\n"),
        ]);
        assert_eq!(idx.len(), 2);
        let mut lx = idx.find("shared").unwrap();
        lx.next_token(true);
        lx.next_token(true);
        assert_eq!(lx.next_token(true), Some("nearest"));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let idx = index(&[
            ("good.shader", "one\n{\n}\n"),
            ("bad.shader", "two\nsort opaque\n"),
        ]);
        assert_eq!(idx.rejected(), ["bad.shader".to_string()]);
        assert!(idx.contains("one"));
        assert!(!idx.contains("two"));
    }

    #[test]
    fn test_comments_between_definitions() {
        let idx = index(&[(
            "c.shader",
            "// header\nfirst\n{\n{ map a }\n}\n/* block */ second\n{\n}\n",
        )]);
        assert_eq!(idx.names(), vec!["first", "second"]);
        assert!(idx.contains("second"));
    }
}
