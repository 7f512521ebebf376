use std::fmt::Write;

/// One piece of generated source.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Static(&'static str),
    Owned(String),
    /// Printed with six decimals, the same for every program so equal
    /// inputs give equal text.
    Float(f64),
    Int(i64),
}

/// Ordered list of fragments for one shader stage, joined once at the end.
#[derive(Debug, Clone, Default)]
pub struct SourceBuilder {
    parts: Vec<Fragment>,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, s: &'static str) -> &mut Self {
        self.parts.push(Fragment::Static(s));
        self
    }

    pub fn owned(&mut self, s: impl Into<String>) -> &mut Self {
        self.parts.push(Fragment::Owned(s.into()));
        self
    }

    pub fn float(&mut self, v: impl Into<f64>) -> &mut Self {
        self.parts.push(Fragment::Float(v.into()));
        self
    }

    pub fn int(&mut self, v: i64) -> &mut Self {
        self.parts.push(Fragment::Int(v));
        self
    }

    /// `vec<n>(a, b, ...)` with every component as a float literal.
    pub fn vector(&mut self, values: &[f32]) -> &mut Self {
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.text(", ");
            }
            self.float(*v);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn assemble(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Fragment::Static(s) => out.push_str(s),
                Fragment::Owned(s) => out.push_str(s),
                Fragment::Float(v) => {
                    let _ = write!(out, "{v:.6}");
                }
                Fragment::Int(v) => {
                    let _ = write!(out, "{v}");
                }
            }
        }
        out
    }
}
