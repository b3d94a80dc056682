//! Cycle detection over prerequisite edges.

use std::collections::{HashMap, HashSet};
use certrack_core::{CourseId, CoursePrerequisite, PrerequisiteType};

/// Directed view of the blocking prerequisite edges.
///
/// RECOMMENDED edges never block enrollment and are left out, so a cycle
/// through them is harmless.
pub struct PrerequisiteGraph<'a> {
    edges: HashMap<&'a CourseId, Vec<&'a CourseId>>,
}

impl<'a> PrerequisiteGraph<'a> {
    /// Build the graph from active blocking edges.
    pub fn new(edges: &'a [CoursePrerequisite]) -> Self {
        let mut map: HashMap<&CourseId, Vec<&CourseId>> = HashMap::new();
        for e in edges.iter().filter(|e| e.is_active && blocks(e.prerequisite_type)) {
            map.entry(&e.course_id).or_default().push(&e.prerequisite_course_id);
        }
        Self { edges: map }
    }

    /// Path `from -> .. -> to`, if one exists.
    pub fn path(&self, from: &CourseId, to: &CourseId) -> Option<Vec<CourseId>> {
        let mut visited: HashSet<CourseId> = HashSet::new();
        let mut stack: Vec<CourseId> = Vec::new();
        if self.dfs(from, to, &mut visited, &mut stack) {
            Some(stack)
        } else {
            None
        }
    }

    fn dfs(
        &self,
        current: &CourseId,
        target: &CourseId,
        visited: &mut HashSet<CourseId>,
        stack: &mut Vec<CourseId>,
    ) -> bool {
        stack.push(current.clone());
        if current == target {
            return true;
        }
        if visited.insert(current.clone()) {
            if let Some(next) = self.edges.get(current) {
                for n in next {
                    if self.dfs(n, target, visited, stack) {
                        return true;
                    }
                }
            }
        }
        stack.pop();
        false
    }

    /// The cycle `candidate` would close, as a course path starting and
    /// ending at `candidate.course_id`.
    pub fn cycle_with(&self, candidate: &CoursePrerequisite) -> Option<Vec<CourseId>> {
        if !blocks(candidate.prerequisite_type) {
            return None;
        }
        let mut path = self.path(&candidate.prerequisite_course_id, &candidate.course_id)?;
        path.insert(0, candidate.course_id.clone());
        Some(path)
    }
}

fn blocks(ty: PrerequisiteType) -> bool {
    !matches!(ty, PrerequisiteType::Recommended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_indirect_cycle() {
        let edges = vec![
            CoursePrerequisite::new("B", "A", PrerequisiteType::Required),
            CoursePrerequisite::new("C", "B", PrerequisiteType::Required),
        ];
        let graph = PrerequisiteGraph::new(&edges);

        let closing = CoursePrerequisite::new("A", "C", PrerequisiteType::Required);
        let cycle = graph.cycle_with(&closing).unwrap();
        assert_eq!(
            cycle,
            vec![CourseId::new("A"), CourseId::new("C"), CourseId::new("B"), CourseId::new("A")]
        );
    }

    #[test]
    fn test_recommended_edges_ignored() {
        let edges = vec![CoursePrerequisite::new("B", "A", PrerequisiteType::Recommended)];
        let graph = PrerequisiteGraph::new(&edges);

        let back = CoursePrerequisite::new("A", "B", PrerequisiteType::Required);
        assert!(graph.cycle_with(&back).is_none());
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let edges = vec![
            CoursePrerequisite::new("B", "A", PrerequisiteType::Required),
            CoursePrerequisite::new("C", "B", PrerequisiteType::Alternative),
        ];
        let graph = PrerequisiteGraph::new(&edges);
        let extra = CoursePrerequisite::new("D", "C", PrerequisiteType::Required);
        assert!(graph.cycle_with(&extra).is_none());
    }
}
