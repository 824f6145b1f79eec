//! Namespace prefix scopes.

use smol_str::SmolStr;

/// Prefix binding declared at some element depth.
#[derive(Debug, Clone)]
struct Binding {
    prefix: SmolStr,
    uri: SmolStr,
    depth: u32,
}

/// Stack-based prefix resolver.
///
/// The empty prefix is the default namespace. Declaring the default
/// namespace as `""` undeclares it for the scope.
#[derive(Debug, Default)]
pub struct NamespaceScope {
    bindings: Vec<Binding>,
    depth: u32,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn declare(&mut self, prefix: &str, uri: &str) {
        if prefix == "xml" || prefix == "xmlns" {
            return;
        }
        self.bindings.push(Binding {
            prefix: SmolStr::new(prefix),
            uri: SmolStr::new(uri),
            depth: self.depth,
        });
    }

    /// Namespace bound to `prefix` (`None` = default namespace).
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        let prefix = prefix.unwrap_or("");
        if prefix == "xml" {
            return Some("http://www.w3.org/XML/1998/namespace");
        }
        self.bindings
            .iter()
            .rev()
            .find(|binding| binding.prefix == prefix)
            .map(|binding| binding.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.depth = 0;
    }
}
