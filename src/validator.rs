use std::sync::Arc;

use itertools::Itertools;
use tree_sitter::{Node, Parser};

use crate::config::SandboxConfig;
use crate::domain::{Violation, ViolationKind};

/// Static pre-execution checker. Parses the submitted source with the
/// Python grammar and walks the tree collecting violations; it never
/// executes code and has no side effects.
///
/// The verdict is advisory defense-in-depth: the process sandbox in the
/// runner remains the actual security boundary.
#[derive(Clone, Debug)]
pub struct Validator {
    config: Arc<SandboxConfig>,
}

impl Validator {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        Self { config }
    }

    /// `Ok(())` when the source is clean, otherwise every violation found,
    /// deduplicated and ordered by source location. A source that does not
    /// parse fails closed with a single `SyntaxError` violation.
    pub fn validate(&self, source: &str) -> Result<(), Vec<Violation>> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .expect("Python grammar is compatible with the linked tree-sitter");

        let Some(tree) = parser.parse(source, None) else {
            return Err(vec![Violation::new(
                ViolationKind::SyntaxError,
                1,
                1,
                "source could not be parsed",
            )]);
        };

        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error_position(root);
            return Err(vec![Violation::new(
                ViolationKind::SyntaxError,
                line,
                column,
                "source is not valid Python syntax",
            )]);
        }

        let mut violations = Vec::new();
        self.walk(root, source.as_bytes(), &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            let violations = violations
                .into_iter()
                .unique()
                .sorted_by_key(|v| (v.line, v.column))
                .collect();
            Err(violations)
        }
    }

    fn walk(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        match node.kind() {
            "import_statement" => self.check_import(node, source, violations),
            "import_from_statement" => self.check_import_from(node, source, violations),
            "attribute" => self.check_attribute(node, source, violations),
            "identifier" => self.check_identifier(node, source, violations),
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, violations);
        }
    }

    /// `import a.b.c [as x]` — the root segment decides reachability.
    fn check_import(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let target = match child.kind() {
                "dotted_name" => Some(child),
                "aliased_import" => child.child_by_field_name("name"),
                _ => None,
            };
            if let Some(target) = target {
                self.check_module_name(target, source, violations);
            }
        }
    }

    fn check_import_from(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        let Some(module) = node.child_by_field_name("module_name") else {
            return;
        };
        if module.kind() == "relative_import" {
            let (line, column) = position(module);
            violations.push(Violation::new(
                ViolationKind::DisallowedImport,
                line,
                column,
                "relative imports are not allowed",
            ));
            return;
        }
        self.check_module_name(module, source, violations);
    }

    fn check_module_name(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        let Ok(dotted) = node.utf8_text(source) else {
            return;
        };
        let root = dotted.split('.').next().unwrap_or(dotted);
        if !self.config.allowed_modules.contains(root) {
            let (line, column) = position(node);
            violations.push(Violation::new(
                ViolationKind::DisallowedImport,
                line,
                column,
                format!("import of module '{root}' is not allowed"),
            ));
        }
    }

    /// Attribute-style disguises: `builtins.eval`, `x.open`, and access
    /// into reflection surfaces such as `f.__globals__`.
    fn check_attribute(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        let Some(attr) = node.child_by_field_name("attribute") else {
            return;
        };
        let Ok(name) = attr.utf8_text(source) else {
            return;
        };

        if self.config.blocked_builtins.contains(name) {
            let (line, column) = position(attr);
            violations.push(Violation::new(
                ViolationKind::RestrictedCall,
                line,
                column,
                format!("reference to restricted builtin '{name}' is not allowed"),
            ));
        } else if self.config.blocked_dunder_attrs.contains(name) {
            let (line, column) = position(attr);
            violations.push(Violation::new(
                ViolationKind::DisallowedConstruct,
                line,
                column,
                format!("access to reflection attribute '{name}' is not allowed"),
            ));
        }
    }

    /// Bare references to blocked builtins, including aliasing without a
    /// call (`f = eval`). Identifiers in attribute position were already
    /// handled by `check_attribute`.
    fn check_identifier(&self, node: Node<'_>, source: &[u8], violations: &mut Vec<Violation>) {
        if let Some(parent) = node.parent() {
            if parent.kind() == "attribute"
                && parent.child_by_field_name("attribute") == Some(node)
            {
                return;
            }
            // `def open(...)` shadows the builtin instead of reaching it,
            // but fail closed: shadowed names stay flagged.
        }

        let Ok(name) = node.utf8_text(source) else {
            return;
        };

        if self.config.blocked_builtins.contains(name) {
            let (line, column) = position(node);
            violations.push(Violation::new(
                ViolationKind::RestrictedCall,
                line,
                column,
                format!("reference to restricted builtin '{name}' is not allowed"),
            ));
        } else if name == "__builtins__" {
            let (line, column) = position(node);
            violations.push(Violation::new(
                ViolationKind::DisallowedConstruct,
                line,
                column,
                "access to '__builtins__' is not allowed",
            ));
        }
    }
}

fn position(node: Node<'_>) -> (usize, usize) {
    let point = node.start_position();
    (point.row + 1, point.column + 1)
}

fn first_error_position(root: Node<'_>) -> (usize, usize) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return position(node);
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        // Depth-first, leftmost error first.
        stack.extend(children.into_iter().rev());
    }
    (1, 1)
}
