//! Collision-free identifiers for generated source.

use std::collections::{HashMap, HashSet};

use texc_ir::{Handle, Variable};

const RESERVED: &[&str] = &[
    "args", "auto", "blockDim", "blockIdx", "break", "case", "char", "const", "continue",
    "default", "do", "double", "else", "enum", "extern", "float", "fmaxf", "fminf", "for", "free",
    "goto", "gridDim", "if", "inline", "int", "isnan", "long", "malloc", "rand", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch",
    "threadIdx", "typedef", "union", "unsigned", "void", "volatile", "while",
];

/// Assigns each variable a unique C identifier derived from its name hint.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, so `x.outer` is emitted as
/// `x_outer`; clashes get a numeric suffix in first-come order.
#[derive(Debug, Default)]
pub struct UniqueNameManager {
    names: HashMap<Handle<Variable>, String>,
    taken: HashSet<String>,
}

impl UniqueNameManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier for `var`, allocating one on first use.
    pub fn get(&mut self, var: Handle<Variable>, hint: &str) -> &str {
        if !self.names.contains_key(&var) {
            let name = self.fresh(hint);
            self.names.insert(var, name);
        }
        &self.names[&var]
    }

    /// Reserves an identifier not tied to any variable.
    pub fn fresh(&mut self, hint: &str) -> String {
        let mut base: String = hint
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
            base.insert(0, '_');
        }
        if base.starts_with("texc_") || RESERVED.contains(&base.as_str()) {
            base.push('_');
        }
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{Dtype, Ir};

    #[test]
    fn sanitizes_and_dedupes() {
        let mut ir = Ir::new();
        let a = ir.new_var("x.outer", Dtype::INT32);
        let b = ir.new_var("x_outer", Dtype::INT32);
        let c = ir.new_var("int", Dtype::INT32);
        let d = ir.new_var("0d", Dtype::INT32);
        let mut names = UniqueNameManager::new();
        assert_eq!(names.get(a, "x.outer"), "x_outer");
        assert_eq!(names.get(b, "x_outer"), "x_outer_1");
        assert_eq!(names.get(a, "x.outer"), "x_outer");
        assert_eq!(names.get(c, "int"), "int_");
        assert_eq!(names.get(d, "0d"), "_0d");
    }
}
