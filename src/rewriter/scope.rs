// File: src/rewriter/scope.rs
//
// Loop bookkeeping for the rewriter.
// Tracks the loop nesting depth and the set of depths that need an exit guard,
// both scoped to the innermost function or lambda.

use std::collections::BTreeSet;

/// State saved when entering a nested function
#[derive(Debug, Clone)]
struct SavedScope {
    depth: usize,
    usage: BTreeSet<usize>,
}

/// Depth and usage tracking with one independent frame per function scope
///
/// Entering a function pushes its name, saves the caller's depth and usage and
/// starts over at depth 0. Exits never cross a function boundary, so nothing
/// from an inner function can mark a loop of the outer one.
///
/// # Examples
///
/// ```ignore
/// let mut scope = ScopeTracker::new();
/// scope.enter_function("f");
/// let depth = scope.enter_loop();       // 1
/// scope.mark_usage(depth);
/// assert!(scope.take_usage(depth));     // the loop needs a guard
/// scope.exit_loop();
/// scope.exit_function();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeTracker {
    depth: usize,
    usage: BTreeSet<usize>,
    names: Vec<String>,
    saved: Vec<SavedScope>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current loop depth, 0 outside any loop
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enter_function(&mut self, name: &str) {
        self.names.push(name.to_string());
        self.saved.push(SavedScope {
            depth: self.depth,
            usage: std::mem::take(&mut self.usage),
        });
        self.depth = 0;
    }

    pub fn exit_function(&mut self) {
        self.names.pop();
        if let Some(saved) = self.saved.pop() {
            self.depth = saved.depth;
            self.usage = saved.usage;
        }
    }

    /// Enters a loop and returns its 1-based depth
    pub fn enter_loop(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    pub fn exit_loop(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn mark_usage(&mut self, depth: usize) {
        self.usage.insert(depth);
    }

    /// Marks every depth in `1..=depth`
    pub fn mark_usage_up_to(&mut self, depth: usize) {
        self.usage.extend(1..=depth);
    }

    /// Tests and clears the mark for `depth`
    pub fn take_usage(&mut self, depth: usize) -> bool {
        self.usage.remove(&depth)
    }

    pub fn is_used(&self, depth: usize) -> bool {
        self.usage.contains(&depth)
    }

    /// Dotted name of the enclosing scopes, `<module>` at top level
    pub fn function_name(&self) -> String {
        if self.names.is_empty() {
            "<module>".to_string()
        } else {
            self.names.join(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_depth_increments_and_decrements() {
        let mut scope = ScopeTracker::new();
        assert_eq!(scope.enter_loop(), 1);
        assert_eq!(scope.enter_loop(), 2);
        scope.exit_loop();
        assert_eq!(scope.depth(), 1);
        scope.exit_loop();
        assert_eq!(scope.depth(), 0);
    }

    #[test]
    fn test_take_usage_clears_once() {
        let mut scope = ScopeTracker::new();
        scope.mark_usage(2);
        assert!(scope.take_usage(2));
        assert!(!scope.take_usage(2));
    }

    #[test]
    fn test_mark_usage_up_to() {
        let mut scope = ScopeTracker::new();
        scope.mark_usage_up_to(3);
        assert!(scope.is_used(1) && scope.is_used(2) && scope.is_used(3));
        assert!(!scope.is_used(4));
    }

    #[test]
    fn test_function_scopes_are_independent() {
        let mut scope = ScopeTracker::new();
        scope.enter_function("outer");
        scope.enter_loop();
        scope.mark_usage(1);

        scope.enter_function("inner");
        assert_eq!(scope.depth(), 0);
        assert!(!scope.is_used(1));
        assert_eq!(scope.function_name(), "outer.inner");
        scope.enter_loop();
        scope.mark_usage(1);
        scope.exit_function();

        assert_eq!(scope.depth(), 1);
        assert!(scope.take_usage(1));
        assert_eq!(scope.function_name(), "outer");
    }

    #[test]
    fn test_module_level_name() {
        assert_eq!(ScopeTracker::new().function_name(), "<module>");
    }
}
