//! Tree traversal and invariant checks over an [`OrganizationRepository`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use orgflags_core::{OrganizationId, RepositoryError};

use crate::graph::{BulkValidation, ParentGraph};
use crate::organization::Organization;
use crate::repository::OrganizationRepository;

/// Resolves descendants and validates parent assignments.
#[derive(Debug, Clone)]
pub struct OrgHierarchyResolver<R> {
    repo: R,
}

impl<R: OrganizationRepository> OrgHierarchyResolver<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Every organization whose ancestor chain includes `root` (root excluded).
    ///
    /// Breadth-first over `find_by_parent_id`; no ordering guarantee beyond
    /// that. A visited set stops the walk if stored links loop back.
    pub fn descendant_ids(&self, root: OrganizationId) -> Result<Vec<OrganizationId>, RepositoryError> {
        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut descendants = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in self.repo.find_by_parent_id(current)? {
                if visited.insert(child.id) {
                    descendants.push(child.id);
                    queue.push_back(child.id);
                } else {
                    warn!(
                        organization_id = %child.id,
                        parent_id = %current,
                        "organization reached twice while resolving descendants; stored hierarchy has a loop"
                    );
                }
            }
        }

        Ok(descendants)
    }

    pub fn has_descendants(&self, root: OrganizationId) -> Result<bool, RepositoryError> {
        Ok(!self.repo.find_by_parent_id(root)?.is_empty())
    }

    /// Whether `child` may be placed under `parent`.
    ///
    /// - no parent: always valid (root insert)
    /// - unknown parent: invalid
    /// - `child` on the parent's ancestor chain (or equal to it): invalid
    /// - a loop in the stored ancestor chain: invalid
    pub fn is_valid_parent_child(
        &self,
        parent: Option<OrganizationId>,
        child: OrganizationId,
    ) -> Result<bool, RepositoryError> {
        let Some(parent) = parent else {
            return Ok(true);
        };
        if self.repo.find_by_id(parent)?.is_none() {
            return Ok(false);
        }

        let mut visited = HashSet::new();
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Ok(false);
            }
            if !visited.insert(id) {
                warn!(organization_id = %id, "ancestor chain loops back on itself");
                return Ok(false);
            }
            current = self.repo.find_by_id(id)?.and_then(|org| org.parent_id);
        }

        Ok(true)
    }

    /// Validate a batch against the tree invariants, merged with stored data.
    ///
    /// Incoming records replace the stored version of the same id. Stored
    /// ancestors referenced by the batch are pulled in until the parent chain
    /// leaves known data, so cycles running through both stored and new
    /// records are found.
    pub fn validate_bulk(&self, orgs: &[Organization]) -> Result<BulkValidation, RepositoryError> {
        if orgs.is_empty() {
            return Ok(BulkValidation::Ok);
        }

        let mut merged: HashMap<OrganizationId, Option<OrganizationId>> = HashMap::new();
        for org in orgs {
            match merged.entry(org.id) {
                Entry::Vacant(slot) => {
                    slot.insert(org.parent_id);
                }
                Entry::Occupied(existing) => {
                    if *existing.get() != org.parent_id {
                        return Ok(BulkValidation::MultipleParents);
                    }
                }
            }
        }

        let mut requested: HashSet<OrganizationId> = HashSet::new();
        let mut frontier = missing_parents(&merged, &requested);
        while !frontier.is_empty() {
            requested.extend(frontier.iter().copied());
            for stored in self.repo.find_all_by_id(&frontier)? {
                merged.entry(stored.id).or_insert(stored.parent_id);
            }
            frontier = missing_parents(&merged, &requested);
        }

        let graph = ParentGraph::from_links(merged);
        if graph.has_cycle() {
            return Ok(BulkValidation::Cyclic);
        }
        Ok(BulkValidation::Ok)
    }
}

/// Parent ids referenced by `merged` that are neither present nor already looked up.
fn missing_parents(
    merged: &HashMap<OrganizationId, Option<OrganizationId>>,
    requested: &HashSet<OrganizationId>,
) -> Vec<OrganizationId> {
    let mut missing: Vec<OrganizationId> = merged
        .values()
        .flatten()
        .filter(|parent| !merged.contains_key(*parent) && !requested.contains(*parent))
        .copied()
        .collect();
    missing.sort_unstable();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryOrganizationRepository;
    use proptest::prelude::*;
    use proptest::sample::Index;
    use std::sync::Arc;

    fn id(v: i64) -> OrganizationId {
        OrganizationId::new(v)
    }

    /// 1 -> {2, 3}, 2 -> {4}, 4 -> {5}; 6 is a separate root.
    fn sample_tree() -> OrgHierarchyResolver<Arc<InMemoryOrganizationRepository>> {
        let repo = InMemoryOrganizationRepository::arc();
        repo.save_all(vec![
            Organization::root(id(1), "root"),
            Organization::child(id(2), "a", id(1)),
            Organization::child(id(3), "b", id(1)),
            Organization::child(id(4), "a.a", id(2)),
            Organization::child(id(5), "a.a.a", id(4)),
            Organization::root(id(6), "other"),
        ])
        .unwrap();
        OrgHierarchyResolver::new(repo)
    }

    fn sorted(mut ids: Vec<OrganizationId>) -> Vec<OrganizationId> {
        ids.sort();
        ids
    }

    #[test]
    fn descendants_cover_the_whole_subtree() {
        let resolver = sample_tree();

        assert_eq!(
            sorted(resolver.descendant_ids(id(1)).unwrap()),
            vec![id(2), id(3), id(4), id(5)]
        );
        assert_eq!(resolver.descendant_ids(id(4)).unwrap(), vec![id(5)]);
        assert!(resolver.descendant_ids(id(6)).unwrap().is_empty());
        assert!(resolver.descendant_ids(id(404)).unwrap().is_empty());

        assert!(resolver.has_descendants(id(2)).unwrap());
        assert!(!resolver.has_descendants(id(3)).unwrap());
    }

    #[test]
    fn descendants_terminate_on_corrupt_loop() {
        let repo = InMemoryOrganizationRepository::arc();
        repo.save_all(vec![
            Organization::child(id(1), "a", id(3)),
            Organization::child(id(2), "b", id(1)),
            Organization::child(id(3), "c", id(2)),
        ])
        .unwrap();
        let resolver = OrgHierarchyResolver::new(repo);

        assert_eq!(sorted(resolver.descendant_ids(id(1)).unwrap()), vec![id(2), id(3)]);
    }

    #[test]
    fn parent_child_validation() {
        let resolver = sample_tree();

        assert!(resolver.is_valid_parent_child(None, id(1)).unwrap());
        assert!(resolver.is_valid_parent_child(Some(id(5)), id(7)).unwrap());
        assert!(resolver.is_valid_parent_child(Some(id(6)), id(2)).unwrap());

        // unknown parent
        assert!(!resolver.is_valid_parent_child(Some(id(404)), id(7)).unwrap());
        // child is an ancestor of parent
        assert!(!resolver.is_valid_parent_child(Some(id(5)), id(1)).unwrap());
        assert!(!resolver.is_valid_parent_child(Some(id(4)), id(2)).unwrap());
        // self-parent
        assert!(!resolver.is_valid_parent_child(Some(id(3)), id(3)).unwrap());
    }

    #[test]
    fn parent_child_validation_stops_on_corrupt_loop() {
        let repo = InMemoryOrganizationRepository::arc();
        repo.save_all(vec![
            Organization::child(id(1), "a", id(2)),
            Organization::child(id(2), "b", id(1)),
        ])
        .unwrap();
        let resolver = OrgHierarchyResolver::new(repo);

        assert!(!resolver.is_valid_parent_child(Some(id(1)), id(9)).unwrap());
    }

    #[test]
    fn bulk_empty_is_ok() {
        let resolver = sample_tree();
        assert_eq!(resolver.validate_bulk(&[]).unwrap(), BulkValidation::Ok);
    }

    #[test]
    fn bulk_two_node_cycle_is_rejected() {
        let resolver = OrgHierarchyResolver::new(InMemoryOrganizationRepository::arc());
        let batch = vec![
            Organization::child(id(10), "A", id(11)),
            Organization::child(id(11), "B", id(10)),
        ];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Cyclic);
    }

    #[test]
    fn bulk_three_node_cycle_is_rejected() {
        let resolver = OrgHierarchyResolver::new(InMemoryOrganizationRepository::arc());
        let batch = vec![
            Organization::child(id(1), "p", id(3)),
            Organization::child(id(2), "c", id(1)),
            Organization::child(id(3), "g", id(2)),
        ];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Cyclic);
    }

    #[test]
    fn bulk_duplicate_with_same_parent_is_ok() {
        let resolver = sample_tree();
        let batch = vec![
            Organization::child(id(7), "child", id(1)),
            Organization::child(id(7), "duplicate child", id(1)),
        ];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Ok);
    }

    #[test]
    fn bulk_conflicting_parents_are_rejected() {
        let resolver = sample_tree();
        let batch = vec![
            Organization::child(id(7), "child", id(1)),
            Organization::child(id(7), "child", id(6)),
        ];
        assert_eq!(
            resolver.validate_bulk(&batch).unwrap(),
            BulkValidation::MultipleParents
        );
    }

    #[test]
    fn bulk_cycle_through_stored_records_is_found() {
        let resolver = sample_tree();
        // 1 is stored as the ancestor of 5; making 5 the parent of 1 closes a loop.
        let batch = vec![Organization::child(id(1), "root", id(5))];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Cyclic);
    }

    #[test]
    fn bulk_reassigning_stored_child_is_allowed() {
        let resolver = sample_tree();
        let batch = vec![Organization::child(id(4), "moved", id(6))];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Ok);
    }

    #[test]
    fn bulk_reassignment_creating_cycle_is_rejected() {
        let resolver = sample_tree();
        // 2 under 4 while 4 is stored under 2.
        let batch = vec![Organization::child(id(2), "a", id(4))];
        assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Cyclic);
    }

    /// Random forest as `(id, parent)` pairs; parents always point at earlier ids.
    fn forest() -> impl Strategy<Value = Vec<(i64, Option<i64>)>> {
        (1usize..30)
            .prop_flat_map(|n| prop::collection::vec((any::<bool>(), any::<Index>()), n))
            .prop_map(|choices| {
                choices
                    .iter()
                    .enumerate()
                    .map(|(i, (is_root, pick))| {
                        let parent = (i > 0 && !is_root).then(|| pick.index(i) as i64);
                        (i as i64, parent)
                    })
                    .collect::<Vec<_>>()
            })
    }

    fn store(links: &[(i64, Option<i64>)]) -> OrgHierarchyResolver<Arc<InMemoryOrganizationRepository>> {
        let repo = InMemoryOrganizationRepository::arc();
        repo.save_all(
            links
                .iter()
                .map(|(i, p)| Organization::root(id(*i), format!("org-{i}")).with_parent(p.map(id)))
                .collect(),
        )
        .unwrap();
        OrgHierarchyResolver::new(repo)
    }

    fn is_ancestor_or_self(links: &[(i64, Option<i64>)], candidate: i64, of: i64) -> bool {
        let parents: HashMap<i64, Option<i64>> = links.iter().copied().collect();
        let mut current = Some(of);
        while let Some(node) = current {
            if node == candidate {
                return true;
            }
            current = parents.get(&node).copied().flatten();
        }
        false
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a parent assignment is invalid exactly when the child is the
        /// parent itself or one of its ancestors.
        #[test]
        fn parent_child_validity_matches_ancestry(
            links in forest(),
            parent_pick in any::<Index>(),
            child_pick in any::<Index>(),
        ) {
            let resolver = store(&links);
            let parent = parent_pick.index(links.len()) as i64;
            let child = child_pick.index(links.len()) as i64;

            let valid = resolver.is_valid_parent_child(Some(id(parent)), id(child)).unwrap();
            prop_assert_eq!(valid, !is_ancestor_or_self(&links, child, parent));
        }

        /// Property: the descendant set of a node is exactly the nodes it is an
        /// ancestor of.
        #[test]
        fn descendants_match_ancestry(links in forest(), root_pick in any::<Index>()) {
            let resolver = store(&links);
            let root = root_pick.index(links.len()) as i64;

            let mut expected: Vec<OrganizationId> = links
                .iter()
                .map(|(i, _)| *i)
                .filter(|i| *i != root && is_ancestor_or_self(&links, root, *i))
                .map(id)
                .collect();
            expected.sort();

            prop_assert_eq!(sorted(resolver.descendant_ids(id(root)).unwrap()), expected);
        }

        /// Property: re-submitting part of a stored forest is valid, and pointing a
        /// stored node at one of its own descendants is always caught.
        #[test]
        fn bulk_against_stored_forest(
            links in forest(),
            node_pick in any::<Index>(),
            below_pick in any::<Index>(),
        ) {
            let resolver = store(&links);
            let batch: Vec<Organization> = links
                .iter()
                .step_by(2)
                .map(|(i, p)| Organization::root(id(*i), "again").with_parent(p.map(id)))
                .collect();
            prop_assert_eq!(resolver.validate_bulk(&batch).unwrap(), BulkValidation::Ok);

            let node = node_pick.index(links.len()) as i64;
            let below: Vec<i64> = links
                .iter()
                .map(|(i, _)| *i)
                .filter(|i| is_ancestor_or_self(&links, node, *i))
                .collect();
            let new_parent = below[below_pick.index(below.len())];
            let closing = vec![Organization::root(id(node), "loop").with_parent(Some(id(new_parent)))];
            prop_assert_eq!(resolver.validate_bulk(&closing).unwrap(), BulkValidation::Cyclic);
        }
    }
}
