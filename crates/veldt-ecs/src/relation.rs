//! Parent/child relationships between entities.
//!
//! Links are single-parent: setting a parent replaces any existing one.
//! Destroying an entity severs every link touching it, orphaning its
//! children rather than cascading the destroy.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::entity::Entity;

/// Bidirectional parent/child index.
#[derive(Debug, Default)]
pub struct RelationshipTable {
    /// child -> parent.
    parent: HashMap<Entity, Entity>,
    /// parent -> children, in attach order.
    children: HashMap<Entity, IndexSet<Entity>>,
}

impl RelationshipTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `parent` the parent of `child`, replacing any existing parent.
    ///
    /// Self-parenting is refused. Returns whether the link was recorded.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> bool {
        if child == parent {
            return false;
        }
        if let Some(old) = self.parent.insert(child, parent) {
            if let Some(siblings) = self.children.get_mut(&old) {
                siblings.shift_remove(&child);
            }
        }
        self.children.entry(parent).or_default().insert(child);
        true
    }

    /// Detach `child` from its parent. Returns the former parent.
    pub fn remove_parent(&mut self, child: Entity) -> Option<Entity> {
        let parent = self.parent.remove(&child)?;
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.shift_remove(&child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }

    /// The parent of `entity`, if it has one.
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        self.parent.get(&entity).copied()
    }

    /// The children of `entity`, in attach order.
    pub fn children_of(&self, entity: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.children.get(&entity).into_iter().flatten().copied()
    }

    /// Whether `parent` is the recorded parent of `child`.
    pub fn is_parent_of(&self, parent: Entity, child: Entity) -> bool {
        self.parent.get(&child) == Some(&parent)
    }

    /// Sever every link touching `entity`: detach it from its parent and
    /// orphan all of its children. Returns the number of links removed.
    pub fn sever_all(&mut self, entity: Entity) -> usize {
        let mut severed = 0;
        if self.remove_parent(entity).is_some() {
            severed += 1;
        }
        if let Some(orphans) = self.children.remove(&entity) {
            for child in &orphans {
                self.parent.remove(child);
            }
            severed += orphans.len();
        }
        severed
    }

    /// Number of child -> parent links.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether no links exist.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn e(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn set_and_query_parent() {
        let mut table = RelationshipTable::new();
        assert!(table.set_parent(e(1), e(0)));
        assert_eq!(table.parent_of(e(1)), Some(e(0)));
        assert!(table.is_parent_of(e(0), e(1)));
        assert!(!table.is_parent_of(e(1), e(0)));
        assert_eq!(table.children_of(e(0)).collect::<Vec<_>>(), vec![e(1)]);
    }

    #[test]
    fn children_keep_attach_order() {
        let mut table = RelationshipTable::new();
        for i in [3u32, 1, 2] {
            table.set_parent(e(i), e(0));
        }
        let kids: Vec<Entity> = table.children_of(e(0)).collect();
        assert_eq!(kids, vec![e(3), e(1), e(2)]);
    }

    #[test]
    fn reparenting_moves_the_child() {
        let mut table = RelationshipTable::new();
        table.set_parent(e(2), e(0));
        table.set_parent(e(2), e(1));
        assert_eq!(table.parent_of(e(2)), Some(e(1)));
        assert_eq!(table.children_of(e(0)).count(), 0);
        assert_eq!(table.children_of(e(1)).collect::<Vec<_>>(), vec![e(2)]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn self_parenting_is_refused() {
        let mut table = RelationshipTable::new();
        assert!(!table.set_parent(e(0), e(0)));
        assert_eq!(table.parent_of(e(0)), None);
    }

    #[test]
    fn remove_parent_returns_the_former_parent() {
        let mut table = RelationshipTable::new();
        table.set_parent(e(1), e(0));
        assert_eq!(table.remove_parent(e(1)), Some(e(0)));
        assert_eq!(table.remove_parent(e(1)), None);
        assert_eq!(table.children_of(e(0)).count(), 0);
    }

    #[test]
    fn sever_orphans_children_without_cascading() {
        let mut table = RelationshipTable::new();
        table.set_parent(e(1), e(0)); // 0 is parent of 1
        table.set_parent(e(2), e(1)); // 1 is parent of 2
        table.set_parent(e(3), e(1)); // 1 is parent of 3

        let severed = table.sever_all(e(1));
        assert_eq!(severed, 3);
        assert_eq!(table.parent_of(e(2)), None);
        assert_eq!(table.parent_of(e(3)), None);
        assert_eq!(table.children_of(e(0)).count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn sever_on_unrelated_entity_is_a_no_op() {
        let mut table = RelationshipTable::new();
        table.set_parent(e(1), e(0));
        assert_eq!(table.sever_all(e(9)), 0);
        assert_eq!(table.len(), 1);
    }
}
