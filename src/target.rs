use indexmap::IndexMap;

use crate::ast::AttrMap;

/// One generated function: the main render function, or an auxiliary one
/// (slot content, default content, lazy `t-set` body).
#[derive(Debug, Clone)]
pub(crate) struct CodeTarget {
    pub name: String,
    pub indent_level: usize,
    pub loop_level: usize,
    pub code: Vec<String>,
    pub has_root: bool,
    pub has_cache: bool,
    pub has_ref: bool,
    /// Ref name to (variable, setter expression).
    pub ref_info: IndexMap<String, (String, String)>,
    pub should_protect_scope: bool,
    /// Handlers wrapped around the root block (slot content events).
    pub on: Option<AttrMap>,
}

impl CodeTarget {
    pub fn new<N: Into<String>>(name: N, on: Option<AttrMap>) -> Self {
        Self {
            name: name.into(),
            indent_level: 0,
            loop_level: 0,
            code: Vec::new(),
            has_root: false,
            has_cache: false,
            has_ref: false,
            ref_info: IndexMap::new(),
            should_protect_scope: false,
            on,
        }
    }

    fn indent(&self, line: &str) -> String {
        format!("{}{line}", "  ".repeat(self.indent_level + 1))
    }

    pub fn add_line(&mut self, line: &str) {
        let line = self.indent(line);
        self.code.push(line);
    }

    pub fn insert_line(&mut self, idx: usize, line: &str) {
        let line = self.indent(line);
        self.code.insert(idx.min(self.code.len()), line);
    }

    /// Key expression for blocks created at the current loop depth.
    pub fn current_key(&self, t_key_expr: Option<&str>) -> String {
        let key = if self.loop_level > 0 {
            format!("key{}", self.loop_level)
        } else {
            "key".to_string()
        };
        match t_key_expr {
            Some(t_key) => format!("{t_key} + {key}"),
            None => key,
        }
    }

    pub fn generate_code(&self) -> String {
        let mut result = vec![format!("function {}(ctx, node, key = \"\") {{", self.name)];
        if self.has_ref {
            result.push("  const refs = ctx.__owl__.refs;".to_string());
            for (id, expr) in self.ref_info.values() {
                result.push(format!("  const {id} = {expr};"));
            }
        }
        if self.should_protect_scope {
            result.push("  ctx = Object.create(ctx);".to_string());
            result.push("  ctx[isBoundary] = 1".to_string());
        }
        if self.has_cache {
            result.push("  let cache = ctx.cache || {};".to_string());
            result.push("  let nextCache = ctx.cache = {};".to_string());
        }
        result.extend(self.code.iter().cloned());
        if !self.has_root {
            result.push("return text('');".to_string());
        }
        result.push("}".to_string());
        result.join("\n  ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_target() {
        let target = CodeTarget::new("slot1", None);
        assert_eq!(
            target.generate_code(),
            "function slot1(ctx, node, key = \"\") {\n  return text('');\n  }"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indent_and_preamble() {
        let mut target = CodeTarget::new("template", None);
        target.has_root = true;
        target.has_ref = true;
        target
            .ref_info
            .insert("input".to_string(), ("ref1".to_string(), "setter".to_string()));
        target.add_line("let b2 = 1;");
        target.indent_level += 1;
        target.add_line("nested;");
        target.indent_level -= 1;
        target.insert_line(0, "first;");
        let code = target.generate_code();
        let lines: Vec<&str> = code.split("\n  ").collect();
        assert_eq!(
            lines,
            vec![
                "function template(ctx, node, key = \"\") {",
                "  const refs = ctx.__owl__.refs;",
                "  const ref1 = setter;",
                "  first;",
                "  let b2 = 1;",
                "    nested;",
                "}",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_current_key() {
        let mut target = CodeTarget::new("template", None);
        assert_eq!(target.current_key(None), "key");
        target.loop_level = 2;
        assert_eq!(target.current_key(None), "key2");
        assert_eq!(target.current_key(Some("tKey_1")), "tKey_1 + key2");
    }
}
