// File: src/module.rs
//
// Module resolution and caching for `import` statements.
// The loader owns the bookkeeping; the interpreter drives the actual
// parse-rewrite-execute step so module code runs on the same interpreter.

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use tracing::debug;

use crate::interpreter::Value;
use crate::rewriter::RewriteOptions;

/// Why a module could not be loaded
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    NotFound(String),
    Circular(Vec<String>),
    Unreadable { path: PathBuf, reason: String },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LoadError::NotFound(name) => write!(f, "No module named '{}'", name),
            LoadError::Circular(chain) => write!(f, "Circular import detected: {}", chain.join(" -> ")),
            LoadError::Unreadable { path, reason } => {
                write!(f, "Failed to read module {}: {}", path.display(), reason)
            }
        }
    }
}

/// Source of a module that is about to be executed
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

/// Manages module loading, caching, and resolution
pub struct ModuleLoader {
    /// Cache of loaded modules to avoid re-executing them
    loaded_modules: AHashMap<String, Value>,
    /// Stack of modules currently being loaded (for circular import detection)
    loading_stack: Vec<String>,
    /// Search paths for module resolution
    search_paths: Vec<PathBuf>,
    /// Rewrite every loaded file before executing it
    trace: Option<RewriteOptions>,
}

impl ModuleLoader {
    /// Creates a new module loader searching the current directory
    pub fn new() -> Self {
        ModuleLoader {
            loaded_modules: AHashMap::new(),
            loading_stack: Vec::new(),
            search_paths: vec![PathBuf::from(".")],
            trace: None,
        }
    }

    /// Adds a search path for module resolution
    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) {
        let path = path.as_ref().to_path_buf();
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Enables rewriting of imported files with the given base options.
    /// The filename of each module replaces the one in `options`.
    pub fn enable_trace(&mut self, options: RewriteOptions) {
        self.trace = Some(options);
    }

    /// Rewrite options for a module file, when tracing is on
    pub fn trace_options(&self, path: &Path) -> Option<RewriteOptions> {
        self.trace.as_ref().map(|options| RewriteOptions { filename: path.display().to_string(), ..options.clone() })
    }

    /// Resolves a dotted module name to a file path (`a.b` -> `a/b.py`)
    pub fn resolve_module_path(&self, module_name: &str) -> Option<PathBuf> {
        let relative = format!("{}.py", module_name.replace('.', "/"));
        self.search_paths.iter().map(|search_path| search_path.join(&relative)).find(|path| path.is_file())
    }

    pub fn cached(&self, module_name: &str) -> Option<Value> {
        self.loaded_modules.get(module_name).cloned()
    }

    /// Starts loading a module: detects cycles, finds and reads the file
    pub fn begin(&mut self, module_name: &str) -> Result<ModuleSource, LoadError> {
        if self.loading_stack.iter().any(|name| name == module_name) {
            let mut chain = self.loading_stack.clone();
            chain.push(module_name.to_string());
            return Err(LoadError::Circular(chain));
        }

        let path = self
            .resolve_module_path(module_name)
            .ok_or_else(|| LoadError::NotFound(module_name.to_string()))?;
        let text = fs::read_to_string(&path)
            .map_err(|e| LoadError::Unreadable { path: path.clone(), reason: e.to_string() })?;

        debug!(module = module_name, path = %path.display(), "loading module");
        self.loading_stack.push(module_name.to_string());
        Ok(ModuleSource { name: module_name.to_string(), path, text })
    }

    /// Finishes a load started with `begin`; successful modules are cached
    pub fn finish(&mut self, module_name: &str, module: Option<Value>) {
        if let Some(index) = self.loading_stack.iter().rposition(|name| name == module_name) {
            self.loading_stack.remove(index);
        }
        if let Some(module) = module {
            self.loaded_modules.insert(module_name.to_string(), module);
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_dotted_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("helpers.py"), "x = 1\n").unwrap();

        let mut loader = ModuleLoader::new();
        loader.add_search_path(dir.path());
        assert_eq!(loader.resolve_module_path("pkg.helpers"), Some(dir.path().join("pkg/helpers.py")));
        assert_eq!(loader.resolve_module_path("missing"), None);
    }

    #[test]
    fn test_detects_circular_imports() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "import a\n").unwrap();

        let mut loader = ModuleLoader::new();
        loader.add_search_path(dir.path());
        let source = loader.begin("a").unwrap();
        assert_eq!(source.text, "import a\n");
        assert_eq!(loader.begin("a").unwrap_err(), LoadError::Circular(vec!["a".into(), "a".into()]));

        loader.finish("a", Some(Value::None));
        assert_eq!(loader.cached("a"), Some(Value::None));
    }

    #[test]
    fn test_missing_module_message() {
        let loader_error = ModuleLoader::new().begin("definitely_not_here").unwrap_err();
        assert_eq!(loader_error.to_string(), "No module named 'definitely_not_here'");
    }

    #[test]
    fn test_trace_options_use_module_path() {
        let mut loader = ModuleLoader::new();
        assert!(loader.trace_options(Path::new("m.py")).is_none());
        loader.enable_trace(RewriteOptions::default().with_indicator('~'));
        let options = loader.trace_options(Path::new("m.py")).unwrap();
        assert_eq!(options.filename, "m.py");
        assert_eq!(options.indicator, '~');
    }
}
