//! Persistent environments mapping dotted names to values or types.
//!
//! A [`Bindings`] is an immutable linked list shared through [`Arc`]s, so
//! extending an environment is cheap and earlier versions remain valid; the
//! iterations of a scatter all share the enclosing environment's structure.
//!
//! Names may contain dots; the segments before the final one form
//! namespaces (e.g. `fruit.apple.honeycrisp` lives in namespace
//! `fruit.apple`). Resolution is by full name; iteration follows insertion
//! order. Shadowing within a namespace is not prevented here, but is
//! rejected statically by the type checker.

use std::sync::Arc;

/// A single name-to-value binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding<T> {
    /// The bound (possibly dotted) name.
    name: String,
    /// The bound value.
    value: T,
}

impl<T> Binding<T> {
    /// Gets the name of the binding.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the value of the binding.
    pub fn value(&self) -> &T {
        &self.value
    }
}

/// A node in the persistent binding list.
#[derive(Debug)]
struct Node<T> {
    /// The binding of the node.
    binding: Binding<T>,
    /// The remainder of the list.
    next: Option<Arc<Node<T>>>,
}

/// An immutable persistent mapping from dotted names to values.
#[derive(Debug)]
pub struct Bindings<T> {
    /// The most recent binding.
    head: Option<Arc<Node<T>>>,
    /// The number of bindings in the map.
    len: usize,
}

impl<T> Clone for Bindings<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Bindings<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bindings<T> {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Returns a new environment with the given binding added.
    ///
    /// The receiver is unchanged.
    pub fn bind(&self, name: impl Into<String>, value: T) -> Self {
        Self {
            head: Some(Arc::new(Node {
                binding: Binding {
                    name: name.into(),
                    value,
                },
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Resolves a name to its bound value.
    ///
    /// The most recent binding of the name wins.
    pub fn resolve(&self, name: &str) -> Option<&T> {
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            if n.binding.name == name {
                return Some(&n.binding.value);
            }

            node = n.next.as_deref();
        }

        None
    }

    /// Determines if the given name is bound.
    pub fn has_binding(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Determines if any binding lives inside the given namespace.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            if n.binding.name.len() > namespace.len()
                && n.binding.name.starts_with(namespace)
                && n.binding.name.as_bytes()[namespace.len()] == b'.'
            {
                return true;
            }

            node = n.next.as_deref();
        }

        false
    }

    /// Gets the number of bindings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Determines if the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates the bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding<T>> {
        let mut bindings = Vec::with_capacity(self.len);
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            bindings.push(&n.binding);
            node = n.next.as_deref();
        }

        bindings.into_iter().rev()
    }
}

impl<T: Clone> Bindings<T> {
    /// Returns a new environment with every name prefixed by the given
    /// namespace.
    pub fn wrap_namespace(&self, namespace: &str) -> Self {
        let mut result = Self::new();
        for binding in self.iter() {
            result = result.bind(
                format!("{namespace}.{name}", name = binding.name),
                binding.value.clone(),
            );
        }

        result
    }

    /// Returns a new environment containing the bindings inside the given
    /// namespace, with the namespace prefix stripped.
    pub fn enter_namespace(&self, namespace: &str) -> Self {
        let mut result = Self::new();
        for binding in self.iter() {
            if let Some(rest) = binding.name.strip_prefix(namespace) {
                if let Some(stripped) = rest.strip_prefix('.') {
                    result = result.bind(stripped.to_string(), binding.value.clone());
                }
            }
        }

        result
    }

    /// Returns a new environment without the names bound in `other`.
    pub fn subtract<U>(&self, other: &Bindings<U>) -> Self {
        let mut result = Self::new();
        for binding in self.iter() {
            if !other.has_binding(&binding.name) {
                result = result.bind(binding.name.clone(), binding.value.clone());
            }
        }

        result
    }
}

impl<T> FromIterator<(String, T)> for Bindings<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (name, value) in iter {
            result = result.bind(name, value);
        }

        result
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bind_and_resolve() {
        let env = Bindings::new().bind("a", 1).bind("b", 2);
        assert_eq!(env.resolve("a"), Some(&1));
        assert_eq!(env.resolve("b"), Some(&2));
        assert_eq!(env.resolve("c"), None);
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn persistence() {
        let base = Bindings::new().bind("a", 1);
        let extended = base.bind("b", 2);
        assert!(base.resolve("b").is_none());
        assert_eq!(extended.resolve("b"), Some(&2));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn insertion_order() {
        let env = Bindings::new().bind("x", 1).bind("y", 2).bind("z", 3);
        let names: Vec<_> = env.iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, ["x", "y", "z"]);
    }

    #[test]
    fn namespaces() {
        let env = Bindings::new()
            .bind("fruit.apple.honeycrisp", 1)
            .bind("fruit.pear", 2)
            .bind("basket", 3);

        assert!(env.has_namespace("fruit"));
        assert!(env.has_namespace("fruit.apple"));
        assert!(!env.has_namespace("basket"));
        assert!(!env.has_namespace("fru"));

        let fruit = env.enter_namespace("fruit");
        assert_eq!(fruit.resolve("pear"), Some(&2));
        assert_eq!(fruit.resolve("apple.honeycrisp"), Some(&1));
        assert!(fruit.resolve("basket").is_none());

        let wrapped = fruit.wrap_namespace("bowl");
        assert_eq!(wrapped.resolve("bowl.pear"), Some(&2));
    }

    #[test]
    fn subtraction() {
        let outer = Bindings::new().bind("a", 1).bind("b", 2);
        let inner = outer.bind("c", 3).bind("d", 4);
        let added = inner.subtract(&outer);
        assert_eq!(added.len(), 2);
        assert_eq!(added.resolve("c"), Some(&3));
        assert!(added.resolve("a").is_none());
    }

    #[test]
    fn shadowing_resolves_latest() {
        let env = Bindings::new().bind("a", 1).bind("a", 2);
        assert_eq!(env.resolve("a"), Some(&2));
    }
}
