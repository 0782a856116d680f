// File: src/location.rs
//
// Location propagation for synthesized nodes.
//
// The rewriter builds statements that never existed in the source (guards,
// marker assignments, raises). They are created with a missing location and
// receive the position of the construct they replace. Nodes that already have
// a position keep it unless the caller asks to overwrite.

use crate::ast::{ExceptHandler, Expr, ExprKind, FStringPart, Location, Module, Parameters, Stmt, StmtKind};

/// How `copy_location` treats a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyMode {
    /// Replace positions that are already present
    pub overwrite: bool,
    /// Descend into every child node
    pub recursive: bool,
}

impl CopyMode {
    /// Fill only the missing positions of a whole subtree
    pub const FILL: CopyMode = CopyMode { overwrite: false, recursive: true };
    /// Force every node of a subtree onto one position
    pub const STAMP: CopyMode = CopyMode { overwrite: true, recursive: true };
}

/// A tree node with a position.
pub trait Located {
    fn location(&self) -> Location;
    fn location_mut(&mut self) -> &mut Location;
    fn for_each_child(&mut self, f: &mut dyn FnMut(&mut dyn Located));
}

/// Copies `source` onto `target` (and its descendants when recursive).
pub fn copy_location(source: Location, target: &mut dyn Located, mode: CopyMode) {
    let location = target.location_mut();
    if mode.overwrite || location.is_missing() {
        *location = source;
    }
    if mode.recursive {
        target.for_each_child(&mut |child| copy_location(source, child, mode));
    }
}

/// Gives every node without a position the position of its parent.
/// Top-level statements fall back to line 1, column 0.
pub fn fix_missing_locations(module: &mut Module) {
    let root = Location::new(1, 0, 1, 0);
    for stmt in &mut module.body {
        fix_node(stmt, root);
    }
}

fn fix_node(node: &mut dyn Located, parent: Location) {
    let location = node.location_mut();
    if location.is_missing() {
        *location = parent;
    }
    let current = *location;
    node.for_each_child(&mut |child| fix_node(child, current));
}

/// Shifts every present position down by `offset` lines.
pub fn increment_lineno(module: &mut Module, offset: usize) {
    if offset == 0 {
        return;
    }
    for stmt in &mut module.body {
        shift_node(stmt, offset);
    }
}

fn shift_node(node: &mut dyn Located, offset: usize) {
    let location = node.location_mut();
    if !location.is_missing() {
        location.line += offset;
        location.end_line += offset;
    }
    node.for_each_child(&mut |child| shift_node(child, offset));
}

fn visit_params(params: &mut Parameters, f: &mut dyn FnMut(&mut dyn Located)) {
    for param in &mut params.args {
        if let Some(annotation) = &mut param.annotation {
            f(annotation);
        }
        if let Some(default) = &mut param.default {
            f(default);
        }
    }
}

fn visit_stmts(stmts: &mut [Stmt], f: &mut dyn FnMut(&mut dyn Located)) {
    for stmt in stmts {
        f(stmt);
    }
}

impl Located for Stmt {
    fn location(&self) -> Location {
        self.location
    }

    fn location_mut(&mut self) -> &mut Location {
        &mut self.location
    }

    fn for_each_child(&mut self, f: &mut dyn FnMut(&mut dyn Located)) {
        match &mut self.kind {
            StmtKind::FunctionDef(def) => {
                for decorator in &mut def.decorators {
                    f(decorator);
                }
                visit_params(&mut def.params, f);
                if let Some(returns) = &mut def.returns {
                    f(returns);
                }
                visit_stmts(&mut def.body, f);
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    f(target);
                }
                f(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                f(target);
                f(value);
            }
            StmtKind::AnnAssign { target, annotation, value } => {
                f(target);
                f(annotation);
                if let Some(value) = value {
                    f(value);
                }
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                f(target);
                f(iter);
                visit_stmts(body, f);
                visit_stmts(orelse, f);
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                f(test);
                visit_stmts(body, f);
                visit_stmts(orelse, f);
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                visit_stmts(body, f);
                for handler in handlers {
                    f(handler);
                }
                visit_stmts(orelse, f);
                visit_stmts(finalbody, f);
            }
            StmtKind::Raise { exc, cause } => {
                if let Some(exc) = exc {
                    f(exc);
                }
                if let Some(cause) = cause {
                    f(cause);
                }
            }
            StmtKind::Expr { value } => f(value),
            StmtKind::Import { .. }
            | StmtKind::ImportFrom { .. }
            | StmtKind::Global { .. }
            | StmtKind::Nonlocal { .. }
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => {}
        }
    }
}

impl Located for ExceptHandler {
    fn location(&self) -> Location {
        self.location
    }

    fn location_mut(&mut self) -> &mut Location {
        &mut self.location
    }

    fn for_each_child(&mut self, f: &mut dyn FnMut(&mut dyn Located)) {
        if let Some(type_) = &mut self.type_ {
            f(type_);
        }
        visit_stmts(&mut self.body, f);
    }
}

impl Located for Expr {
    fn location(&self) -> Location {
        self.location
    }

    fn location_mut(&mut self) -> &mut Location {
        &mut self.location
    }

    fn for_each_child(&mut self, f: &mut dyn FnMut(&mut dyn Located)) {
        match &mut self.kind {
            ExprKind::Name { .. } | ExprKind::Constant { .. } => {}
            ExprKind::JoinedStr { parts } => {
                for part in parts {
                    if let FStringPart::Expr { value, .. } = part {
                        f(value.as_mut());
                    }
                }
            }
            ExprKind::BinOp { left, right, .. } => {
                f(left.as_mut());
                f(right.as_mut());
            }
            ExprKind::UnaryOp { operand, .. } => f(operand.as_mut()),
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    f(value);
                }
            }
            ExprKind::Compare { left, comparators, .. } => {
                f(left.as_mut());
                for comparator in comparators {
                    f(comparator);
                }
            }
            ExprKind::Call { func, args, keywords } => {
                f(func.as_mut());
                for arg in args {
                    f(arg);
                }
                for keyword in keywords {
                    f(&mut keyword.value);
                }
            }
            ExprKind::Attribute { value, .. }
            | ExprKind::Await { value }
            | ExprKind::Starred { value } => f(value.as_mut()),
            ExprKind::Subscript { value, index } => {
                f(value.as_mut());
                f(index.as_mut());
            }
            ExprKind::List { elts } | ExprKind::Tuple { elts } => {
                for elt in elts {
                    f(elt);
                }
            }
            ExprKind::Dict { keys, values } => {
                for key in keys {
                    f(key);
                }
                for value in values {
                    f(value);
                }
            }
            ExprKind::Lambda { params, body } => {
                visit_params(params, f);
                f(body.as_mut());
            }
            ExprKind::IfExp { test, body, orelse } => {
                f(test.as_mut());
                f(body.as_mut());
                f(orelse.as_mut());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located_name(id: &str, line: usize) -> Expr {
        Expr::new(ExprKind::Name { id: id.into() }, Location::new(line, 0, line, id.len()))
    }

    #[test]
    fn test_fill_keeps_existing_positions() {
        let mut stmt = Stmt::synthetic(StmtKind::Expr {
            value: Expr::call(located_name("f", 7), vec![Expr::int(1)], vec![]),
        });
        copy_location(Location::new(3, 4, 3, 9), &mut stmt, CopyMode::FILL);

        assert_eq!(stmt.location.line, 3);
        let StmtKind::Expr { value } = &stmt.kind else { panic!() };
        assert_eq!(value.location.line, 3);
        let ExprKind::Call { func, args, .. } = &value.kind else { panic!() };
        assert_eq!(func.location.line, 7);
        assert_eq!(args[0].location.column, 4);
    }

    #[test]
    fn test_stamp_overwrites() {
        let mut expr = located_name("x", 7);
        copy_location(Location::new(2, 1, 2, 2), &mut expr, CopyMode::STAMP);
        assert_eq!(expr.location, Location::new(2, 1, 2, 2));
    }

    #[test]
    fn test_non_recursive_copy_leaves_children() {
        let mut expr = Expr::call(Expr::name("f"), vec![], vec![]);
        let mode = CopyMode { overwrite: false, recursive: false };
        copy_location(Location::new(5, 0, 5, 3), &mut expr, mode);
        let ExprKind::Call { func, .. } = &expr.kind else { panic!() };
        assert!(func.location.is_missing());
    }

    #[test]
    fn test_fix_missing_inherits_from_parent() {
        let mut module = Module {
            body: vec![
                Stmt::synthetic(StmtKind::Pass),
                Stmt::new(
                    StmtKind::Expr { value: Expr::name("y") },
                    Location::new(4, 2, 4, 3),
                ),
            ],
        };
        fix_missing_locations(&mut module);
        assert_eq!(module.body[0].location.line, 1);
        let StmtKind::Expr { value } = &module.body[1].kind else { panic!() };
        assert_eq!(value.location, Location::new(4, 2, 4, 3));
    }

    #[test]
    fn test_increment_lineno() {
        let mut module = Module {
            body: vec![Stmt::new(StmtKind::Pass, Location::new(1, 0, 1, 4)), Stmt::synthetic(StmtKind::Pass)],
        };
        increment_lineno(&mut module, 9);
        assert_eq!(module.body[0].location.line, 10);
        assert!(module.body[1].location.is_missing());
    }
}
