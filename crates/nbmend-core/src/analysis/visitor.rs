//! Per-cell definition/use extraction over the Python syntax tree.
//!
//! Scope ids are integers local to one cell: 0 is the cell's module scope,
//! and every function body, lambda body, or comprehension entered during the
//! walk is assigned a fresh, strictly larger id. The invariant that a nested
//! scope's id is always greater than its enclosing scope's id is what the
//! accessibility rule in `resolver` relies on.

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::errors::Result;

/// The scope id of a cell's outermost (module-level) scope.
pub const MODULE_SCOPE: i64 = 0;

/// Definitions and uses recorded for one cell: variable name → the scope ids
/// in which that name is bound / read.
#[derive(Clone, Debug, Default)]
pub struct CellScopes {
    pub defs: IndexMap<String, Vec<i64>>,
    pub uses: IndexMap<String, Vec<i64>>,
}

impl CellScopes {
    fn record(map: &mut IndexMap<String, Vec<i64>>, name: &str, scope: i64) {
        let scopes = map.entry(name.to_string()).or_default();
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
}

/// Walk the syntax tree of one cell and collect its definitions and uses.
pub fn analyze_source(source: &str) -> Result<CellScopes> {
    let tree = super::parser::parse(source)?;
    let mut walker = ScopeWalker {
        source: source.as_bytes(),
        scopes: CellScopes::default(),
        next_scope: MODULE_SCOPE,
    };
    walker.walk(tree.root_node(), MODULE_SCOPE);
    Ok(walker.scopes)
}

struct ScopeWalker<'a> {
    source: &'a [u8],
    scopes: CellScopes,
    next_scope: i64,
}

impl<'a> ScopeWalker<'a> {
    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn enter_scope(&mut self) -> i64 {
        self.next_scope += 1;
        self.next_scope
    }

    fn record_def(&mut self, name: &str, scope: i64) {
        if !name.is_empty() {
            CellScopes::record(&mut self.scopes.defs, name, scope);
        }
    }

    fn record_use(&mut self, name: &str, scope: i64) {
        if !name.is_empty() {
            CellScopes::record(&mut self.scopes.uses, name, scope);
        }
    }

    fn walk_children(&mut self, node: Node<'_>, scope: i64) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.walk(child, scope);
        }
    }

    fn walk(&mut self, node: Node<'_>, scope: i64) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node).to_string();
                self.record_use(&name, scope);
            }

            "function_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name).to_string();
                    self.record_def(&name, scope);
                }
                let inner = self.enter_scope();
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.walk_parameters(params, inner, scope);
                }
                if let Some(return_type) = node.child_by_field_name("return_type") {
                    self.walk(return_type, scope);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, inner);
                }
            }

            "lambda" => {
                let inner = self.enter_scope();
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.walk_parameters(params, inner, scope);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, inner);
                }
            }

            // Class bodies are not one of the nested scopes the model tracks;
            // methods inside still get their own scopes via their own arms.
            "class_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name).to_string();
                    self.record_def(&name, scope);
                }
                if let Some(superclasses) = node.child_by_field_name("superclasses") {
                    self.walk(superclasses, scope);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
            }

            "list_comprehension"
            | "set_comprehension"
            | "dictionary_comprehension"
            | "generator_expression" => {
                let inner = self.enter_scope();
                self.walk_children(node, inner);
            }

            "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.collect_targets(left, scope);
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
            }

            "assignment" => {
                if let Some(ty) = node.child_by_field_name("type") {
                    self.walk(ty, scope);
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.collect_targets(left, scope);
                }
            }

            // `x += 1` both reads and rebinds x.
            "augmented_assignment" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.walk(left, scope);
                    self.collect_targets(left, scope);
                }
            }

            "named_expression" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, scope);
                }
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name).to_string();
                    self.record_def(&name, scope);
                }
            }

            "for_statement" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.collect_targets(left, scope);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    self.walk(alternative, scope);
                }
            }

            "as_pattern" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    if child.kind() == "as_pattern_target" {
                        self.collect_targets(child, scope);
                    } else {
                        self.walk(child, scope);
                    }
                }
            }

            "except_clause" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for (i, child) in children.into_iter().enumerate() {
                    if i > 0 && child.kind() == "identifier" {
                        let name = self.text(child).to_string();
                        self.record_def(&name, scope);
                    } else {
                        self.walk(child, scope);
                    }
                }
            }

            "import_statement" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.collect_import_binding(child, scope);
                }
            }

            "import_from_statement" => {
                let module = node.child_by_field_name("module_name");
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    if let Some(module) = module {
                        if child.id() == module.id() {
                            continue;
                        }
                    }
                    self.collect_import_binding(child, scope);
                }
            }

            // `global x` / `nonlocal x` declare, they neither bind nor read.
            "global_statement" | "nonlocal_statement" => {}

            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.walk(object, scope);
                }
            }

            "subscript" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, scope);
                }
                if let Some(index) = node.child_by_field_name("subscript") {
                    self.walk(index, scope);
                }
            }

            // `f(key=value)`: the keyword name is not a variable.
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, scope);
                }
            }

            _ => self.walk_children(node, scope),
        }
    }

    /// Record defs for an assignment-target pattern. Attribute and subscript
    /// targets bind nothing; their bases are reads.
    fn collect_targets(&mut self, node: Node<'_>, scope: i64) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node).to_string();
                self.record_def(&name, scope);
            }
            "pattern_list"
            | "tuple_pattern"
            | "list_pattern"
            | "parenthesized_expression"
            | "list_splat_pattern"
            | "dictionary_splat_pattern"
            | "as_pattern_target" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.collect_targets(child, scope);
                }
            }
            "attribute" | "subscript" => self.walk(node, scope),
            _ => self.walk(node, scope),
        }
    }

    /// Parameters bind in the function's own scope; annotations and default
    /// values are evaluated in the enclosing scope.
    fn walk_parameters(&mut self, params: Node<'_>, inner: i64, outer: i64) {
        let mut cursor = params.walk();
        let children: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "identifier" => {
                    let name = self.text(child).to_string();
                    self.record_def(&name, inner);
                }
                "typed_parameter" => {
                    if let Some(first) = child.named_child(0) {
                        self.collect_param_name(first, inner);
                    }
                    if let Some(ty) = child.child_by_field_name("type") {
                        self.walk(ty, outer);
                    }
                }
                "default_parameter" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        self.collect_param_name(name, inner);
                    }
                    if let Some(value) = child.child_by_field_name("value") {
                        self.walk(value, outer);
                    }
                }
                "typed_default_parameter" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        self.collect_param_name(name, inner);
                    }
                    if let Some(ty) = child.child_by_field_name("type") {
                        self.walk(ty, outer);
                    }
                    if let Some(value) = child.child_by_field_name("value") {
                        self.walk(value, outer);
                    }
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    self.collect_param_name(child, inner);
                }
                "tuple_pattern" => self.collect_targets(child, inner),
                _ => {}
            }
        }
    }

    fn collect_param_name(&mut self, node: Node<'_>, inner: i64) {
        if node.kind() == "identifier" {
            let name = self.text(node).to_string();
            self.record_def(&name, inner);
        } else {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            for child in children {
                self.collect_param_name(child, inner);
            }
        }
    }

    /// Bound name of one `import` / `from … import` item: the alias when
    /// present, else the first component of the dotted name.
    fn collect_import_binding(&mut self, node: Node<'_>, scope: i64) {
        match node.kind() {
            "aliased_import" => {
                if let Some(alias) = node.child_by_field_name("alias") {
                    let name = self.text(alias).to_string();
                    self.record_def(&name, scope);
                }
            }
            "dotted_name" => {
                if let Some(first) = node.named_child(0) {
                    let name = self.text(first).to_string();
                    self.record_def(&name, scope);
                }
            }
            "identifier" => {
                let name = self.text(node).to_string();
                self.record_def(&name, scope);
            }
            // `from m import *` binds nothing we can name statically.
            "wildcard_import" => {}
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes_of(map: &IndexMap<String, Vec<i64>>, name: &str) -> Vec<i64> {
        map.get(name).cloned().unwrap_or_default()
    }

    #[test]
    fn module_level_defs_and_uses() {
        let scopes = analyze_source("x = 1\ny = x + 1\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "x"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "y"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "x"), vec![0]);
        assert!(scopes.uses.get("y").is_none());
    }

    #[test]
    fn function_scope_binds_params_and_locals() {
        let scopes = analyze_source("def f(a):\n    b = a + c\n    return b\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "f"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "a"), vec![1]);
        assert_eq!(scopes_of(&scopes.defs, "b"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "a"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "c"), vec![1]);
    }

    #[test]
    fn nested_scope_ids_strictly_increase() {
        let scopes =
            analyze_source("def outer():\n    def inner():\n        q = 1\n    inner()\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "outer"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "inner"), vec![1]);
        assert_eq!(scopes_of(&scopes.defs, "q"), vec![2]);
        assert_eq!(scopes_of(&scopes.uses, "inner"), vec![1]);
    }

    #[test]
    fn lambda_parameters_are_scoped() {
        let scopes = analyze_source("g = lambda v: v + w\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "g"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "v"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "v"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "w"), vec![1]);
    }

    #[test]
    fn comprehension_gets_its_own_scope() {
        let scopes = analyze_source("ys = [i * i for i in xs]\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "ys"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "i"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "i"), vec![1]);
        assert_eq!(scopes_of(&scopes.uses, "xs"), vec![1]);
    }

    #[test]
    fn imports_bind_roots_and_aliases() {
        let scopes = analyze_source(
            "import numpy as np\nimport os.path\nfrom collections import OrderedDict\n",
        )
        .unwrap();
        assert_eq!(scopes_of(&scopes.defs, "np"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "os"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "OrderedDict"), vec![0]);
        assert!(scopes.defs.get("collections").is_none());
    }

    #[test]
    fn for_with_except_targets_bind() {
        let scopes = analyze_source(
            "for i in rng:\n    pass\nwith open(p) as fh:\n    pass\ntry:\n    pass\nexcept ValueError as e:\n    pass\n",
        )
        .unwrap();
        assert_eq!(scopes_of(&scopes.defs, "i"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "fh"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "e"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "rng"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "p"), vec![0]);
    }

    #[test]
    fn augmented_assignment_reads_and_binds() {
        let scopes = analyze_source("x += 1\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "x"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "x"), vec![0]);
    }

    #[test]
    fn walrus_binds_in_current_scope() {
        let scopes = analyze_source("if (n := limit) > 5:\n    pass\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "n"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "limit"), vec![0]);
    }

    #[test]
    fn attribute_assignment_binds_nothing() {
        let scopes = analyze_source("obj.attr = val\n").unwrap();
        assert!(scopes.defs.get("attr").is_none());
        assert!(scopes.defs.get("obj").is_none());
        assert_eq!(scopes_of(&scopes.uses, "obj"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "val"), vec![0]);
    }

    #[test]
    fn tuple_unpacking_binds_all_names() {
        let scopes = analyze_source("a, (b, c) = fetch()\n").unwrap();
        assert_eq!(scopes_of(&scopes.defs, "a"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "b"), vec![0]);
        assert_eq!(scopes_of(&scopes.defs, "c"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "fetch"), vec![0]);
    }

    #[test]
    fn keyword_argument_name_is_not_a_use() {
        let scopes = analyze_source("plot(color=shade)\n").unwrap();
        assert!(scopes.uses.get("color").is_none());
        assert_eq!(scopes_of(&scopes.uses, "shade"), vec![0]);
        assert_eq!(scopes_of(&scopes.uses, "plot"), vec![0]);
    }
}
