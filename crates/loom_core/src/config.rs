//! Configuration trees — the XML-like structures extensions contribute.
//!
//! A [`ConfigTree`] is an arena of [`ConfigNode`]s. Representing the tree as
//! an arena (rather than `Rc<RefCell<Node>>` with back-pointers) lets a node
//! carry a parent *index* — a weak, lookup-only reference — without creating
//! reference cycles.

use hashbrown::HashMap;

/// Index of a node within a [`ConfigTree`]'s arena.
pub type NodeId = usize;

/// A single element in a configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    /// The element's tag name.
    pub name: String,
    /// Attributes, in declaration order. Keys are unique within the node.
    pub attributes: Vec<(String, String)>,
    /// Text content, if any.
    pub text: Option<String>,
    /// Index of the parent node, or `None` for the tree root.
    pub parent: Option<NodeId>,
    /// This node's zero-based position among its parent's children.
    pub sibling_index: usize,
    /// Indices of this node's children, in document order.
    pub children: Vec<NodeId>,
}

impl ConfigNode {
    /// Returns the value of `key`, if this node declares it.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An arena-backed configuration tree contributed by an extension.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    nodes: Vec<ConfigNode>,
}

/// Error produced while building a [`ConfigTree`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigBuildError {
    /// Two attributes with the same key were declared on one node.
    #[error("duplicate attribute {key:?} on element {element:?}")]
    DuplicateAttribute {
        /// The element name.
        element: String,
        /// The repeated attribute key.
        key: String,
    },
}

/// Builder for a [`ConfigTree`], used by descriptor loaders to assemble the
/// parsed form of an extension's configuration.
#[derive(Debug, Default)]
pub struct ConfigTreeBuilder {
    tree: ConfigTree,
}

impl ConfigTreeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node as a child of `parent` (or as the root, if `parent` is
    /// `None` and the tree is currently empty). Returns the new node's id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigBuildError::DuplicateAttribute`] if `attributes`
    /// contains a repeated key.
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        name: impl Into<String>,
        attributes: Vec<(String, String)>,
        text: Option<String>,
    ) -> Result<NodeId, ConfigBuildError> {
        let name = name.into();
        let mut seen: HashMap<&str, ()> = HashMap::new();
        for (key, _) in &attributes {
            if seen.insert(key.as_str(), ()).is_some() {
                return Err(ConfigBuildError::DuplicateAttribute {
                    element: name,
                    key: key.clone(),
                });
            }
        }

        let sibling_index = parent.map_or(0, |p| self.tree.nodes[p].children.len());
        let id = self.tree.nodes.len();
        self.tree.nodes.push(ConfigNode {
            name,
            attributes,
            text,
            parent,
            sibling_index,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.tree.nodes[p].children.push(id);
        }
        Ok(id)
    }

    /// Finishes the tree.
    #[must_use]
    pub fn build(self) -> ConfigTree {
        self.tree
    }
}

impl ConfigTree {
    /// Returns the node at `id`, if any.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&ConfigNode> {
        self.nodes.get(id)
    }

    /// Returns the root node's id (node `0`), if the tree is non-empty.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() { None } else { Some(0) }
    }

    /// Resolves a slash-separated path relative to `base`.
    ///
    /// `..` selects the parent; any other segment selects the first
    /// (lowest-index) child with that name; a trailing `@attr` segment is
    /// not consumed here — see [`Self::lookup_value`].
    #[must_use]
    pub fn lookup_element(&self, base: NodeId, path: &str) -> Option<NodeId> {
        let mut current = base;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment.starts_with('@') {
                // An attribute segment only makes sense as the final
                // component; treat it as "no such element" here.
                return None;
            }
            current = if segment == ".." {
                self.nodes.get(current)?.parent?
            } else {
                self.nodes
                    .get(current)?
                    .children
                    .iter()
                    .find(|&&child| self.nodes[child].name == segment)
                    .copied()?
            };
        }
        Some(current)
    }

    /// Resolves a path exactly like [`Self::lookup_element`], but allows a
    /// trailing `@attr` segment selecting an attribute value instead of an
    /// element.
    #[must_use]
    pub fn lookup_value(&self, base: NodeId, path: &str) -> Option<String> {
        let (element_path, attr) = match path.rsplit_once('/') {
            Some((head, tail)) if tail.starts_with('@') => (head, Some(&tail[1..])),
            _ if path.starts_with('@') => ("", Some(&path[1..])),
            _ => (path, None),
        };

        let node_id = if element_path.is_empty() {
            base
        } else {
            self.lookup_element(base, element_path)?
        };
        let node = self.nodes.get(node_id)?;

        match attr {
            Some(key) => node.attribute(key).map(str::to_owned),
            None => node.text.clone(),
        }
    }
}
