/// Variable trees
///
/// Variables and their members live in an arena. A parent owns the
/// indices of its children and every child stores the index of its
/// parent, so a tree can be unfolded or pruned without borrowed
/// back-pointers.

use serde::Serialize;

/// Index of a variable inside its [`VariableTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariableId(usize);

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: String,
    pub parent: Option<VariableId>,
    pub children: Vec<VariableId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VariableTree {
    nodes: Vec<Variable>,
    roots: Vec<VariableId>,
}

impl VariableTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: String, value: String, parent: Option<VariableId>) -> VariableId {
        let id = VariableId(self.nodes.len());
        self.nodes.push(Variable {
            name,
            value,
            type_name: String::new(),
            parent,
            children: Vec::new(),
        });
        id
    }

    /// Add a top level variable
    pub fn add_root(&mut self, name: impl Into<String>, value: impl Into<String>) -> VariableId {
        let id = self.push(name.into(), value.into(), None);
        self.roots.push(id);
        id
    }

    /// Add a member to `parent`. Returns `None` if `parent` is not in this tree.
    pub fn add_child(
        &mut self,
        parent: VariableId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<VariableId> {
        if parent.0 >= self.nodes.len() {
            return None;
        }
        let id = self.push(name.into(), value.into(), Some(parent));
        self.nodes[parent.0].children.push(id);
        Some(id)
    }

    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.nodes.get_mut(id.0)
    }

    pub fn roots(&self) -> &[VariableId] {
        &self.roots
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Find a top level variable by name
    pub fn find_root(&self, name: &str) -> Option<VariableId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.nodes[id.0].name == name)
    }

    /// Find a direct member of `parent` by name
    pub fn find_child(&self, parent: VariableId, name: &str) -> Option<VariableId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|id| self.nodes[id.0].name == name)
    }

    pub fn children(&self, id: VariableId) -> &[VariableId] {
        self.get(id).map(|v| v.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: VariableId) -> Option<VariableId> {
        self.get(id).and_then(|v| v.parent)
    }

    /// Dotted name from the root down to `id`, e.g. `person.address.street`
    pub fn qualified_name(&self, id: VariableId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.get(current) {
                Some(var) => {
                    parts.push(var.name.as_str());
                    cursor = var.parent;
                }
                None => break,
            }
        }
        parts.reverse();
        parts.join(".")
    }

    /// Detach all members of `id`. Detached nodes stay in the arena but
    /// are no longer reachable from any root.
    pub fn clear_children(&mut self, id: VariableId) {
        let children = match self.get_mut(id) {
            Some(var) => std::mem::take(&mut var.children),
            None => return,
        };
        for child in children {
            if let Some(var) = self.get_mut(child) {
                var.parent = None;
            }
        }
    }

    /// Number of variables reachable from the roots
    pub fn reachable_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<VariableId> = self.roots.clone();
        while let Some(id) = stack.pop() {
            count += 1;
            stack.extend_from_slice(self.children(id));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_child_links() {
        let mut tree = VariableTree::new();
        let person = tree.add_root("person", "{...}");
        let address = tree.add_child(person, "address", "{...}").unwrap();
        let street = tree.add_child(address, "street", "\"Main\"").unwrap();

        assert_eq!(tree.parent(street), Some(address));
        assert_eq!(tree.parent(person), None);
        assert_eq!(tree.children(person), &[address]);
        assert_eq!(tree.qualified_name(street), "person.address.street");
        assert_eq!(tree.find_child(address, "street"), Some(street));
        assert_eq!(tree.find_root("person"), Some(person));
    }

    #[test]
    fn test_clear_children_detaches_subtree() {
        let mut tree = VariableTree::new();
        let root = tree.add_root("v", "{1, 2}");
        tree.add_child(root, "[0]", "1").unwrap();
        let second = tree.add_child(root, "[1]", "2").unwrap();
        assert_eq!(tree.reachable_count(), 3);

        tree.clear_children(root);
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.parent(second), None);
        assert_eq!(tree.reachable_count(), 1);
    }

    #[test]
    fn test_add_child_to_unknown_parent() {
        let mut tree = VariableTree::new();
        let mut other = VariableTree::new();
        other.add_root("a", "1");
        let foreign = other.add_root("b", "2");
        assert!(tree.add_child(foreign, "x", "1").is_none());
    }
}
