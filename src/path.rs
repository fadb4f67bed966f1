use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a node in the flow tree: child indices from the root scope.
///
/// The root scope has an empty path and displays as `root`; its second
/// child's first child displays as `root.1.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopePath(Vec<usize>);

impl ScopePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for index in &self.0 {
            write!(f, ".{index}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_indices_from_root() {
        let path = ScopePath::root().child(1).child(0);
        assert_eq!(path.to_string(), "root.1.0");
        assert_eq!(ScopePath::root().to_string(), "root");
    }

    #[test]
    fn child_does_not_alter_parent() {
        let parent = ScopePath::root().child(3);
        let child = parent.child(2);
        assert_eq!(parent.to_string(), "root.3");
        assert_eq!(child.to_string(), "root.3.2");
        assert_ne!(parent, child);
    }
}
