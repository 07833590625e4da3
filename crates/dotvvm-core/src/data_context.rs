//! Binding scopes active at a point of the control tree.

use crate::types::TypeRef;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct Frame {
    data_type: TypeRef,
    parent: Option<DataContextStack>,
    depth: usize,
}

/// Immutable chain of data-context frames. Cloning shares the chain; a
/// pushed frame references its parent and never the other way round.
#[derive(Clone)]
pub struct DataContextStack(Arc<Frame>);

impl DataContextStack {
    pub fn root(data_type: TypeRef) -> Self {
        Self(Arc::new(Frame {
            data_type,
            parent: None,
            depth: 0,
        }))
    }

    /// New stack with `data_type` on top of `self`.
    pub fn push(&self, data_type: TypeRef) -> Self {
        Self(Arc::new(Frame {
            data_type,
            parent: Some(self.clone()),
            depth: self.0.depth + 1,
        }))
    }

    pub fn data_type(&self) -> &TypeRef {
        &self.0.data_type
    }

    pub fn parent(&self) -> Option<&DataContextStack> {
        self.0.parent.as_ref()
    }

    /// Zero for the root frame.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn root_type(&self) -> &TypeRef {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.data_type()
    }

    /// Frame `level` steps up (`_parent` is level 1).
    pub fn ancestor(&self, level: usize) -> Option<&DataContextStack> {
        self.ancestors().nth(level)
    }

    /// Current frame first, root last.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: Some(self),
        }
    }

    pub fn same_frame(&self, other: &DataContextStack) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Types from the root frame to the current one.
    pub fn types(&self) -> Vec<TypeRef> {
        let mut types: Vec<TypeRef> = self.ancestors().map(|s| s.data_type().clone()).collect();
        types.reverse();
        types
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a DataContextStack>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a DataContextStack;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

impl fmt::Debug for DataContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types()).finish()
    }
}

impl fmt::Display for DataContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.types().iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join(" > "))
    }
}

impl Serialize for DataContextStack {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.types().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_frames_share_their_parent() {
        let root = DataContextStack::root(TypeRef::named("Page"));
        let item = root.push(TypeRef::named("Customer"));
        let order = item.push(TypeRef::named("Order"));

        assert_eq!(order.depth(), 2);
        assert!(order.parent().unwrap().same_frame(&item));
        assert!(item.parent().unwrap().same_frame(&root));
        assert_eq!(order.root_type(), &TypeRef::named("Page"));
        assert_eq!(order.ancestor(2).unwrap().data_type(), &TypeRef::named("Page"));
        assert!(order.ancestor(3).is_none());
        assert_eq!(order.to_string(), "Page > Customer > Order");
    }

    #[test]
    fn siblings_do_not_see_each_other() {
        let root = DataContextStack::root(TypeRef::named("Page"));
        let a = root.push(TypeRef::named("A"));
        let b = root.push(TypeRef::named("B"));
        assert!(a.parent().unwrap().same_frame(b.parent().unwrap()));
        assert_eq!(a.types(), vec![TypeRef::named("Page"), TypeRef::named("A")]);
        assert_eq!(b.types(), vec![TypeRef::named("Page"), TypeRef::named("B")]);
    }
}
