use std::collections::{HashMap, HashSet};

/// Directed `actor → set of actors it waits on`, derived from pending
/// requests (spec.md §4.B). Not thread-safe on its own; callers hold it
/// behind the same mutex as the Lock Table (spec.md §5).
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
	edges: HashMap<String, HashSet<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
	White,
	Grey,
	Black,
}

impl WaitForGraph {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds the edge `waiter → holder`. No-op for self-loops (spec.md §3
	/// invariant: "no self-loops").
	pub fn add_edge(&mut self, waiter: &str, holder: &str) {
		if waiter == holder {
			return;
		}
		self.edges.entry(waiter.to_string()).or_default().insert(holder.to_string());
	}

	/// Removes the specific edge `waiter → holder`, if present.
	pub fn remove_edge(&mut self, waiter: &str, holder: &str) {
		if let Some(targets) = self.edges.get_mut(waiter) {
			targets.remove(holder);
			if targets.is_empty() {
				self.edges.remove(waiter);
			}
		}
	}

	/// Erases all outgoing edges from `actor` and all incoming edges
	/// pointing at it from other actors.
	pub fn remove_actor(&mut self, actor: &str) {
		self.edges.remove(actor);
		for targets in self.edges.values_mut() {
			targets.remove(actor);
		}
		self.edges.retain(|_, targets| !targets.is_empty());
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.edges.is_empty()
	}

	fn all_nodes(&self) -> Vec<String> {
		let mut nodes: HashSet<&str> = HashSet::new();
		for (waiter, targets) in &self.edges {
			nodes.insert(waiter.as_str());
			for t in targets {
				nodes.insert(t.as_str());
			}
		}
		nodes.into_iter().map(str::to_string).collect()
	}

	fn targets_of(&self, node: &str) -> Vec<String> {
		self.edges.get(node).map(|s| s.iter().cloned().collect()).unwrap_or_default()
	}

	/// Enumerates every simple cycle reachable in the current graph without
	/// mutating it (spec.md §4.B / Design Notes "Recursive DFS in the
	/// source"). Uses an iterative DFS with an explicit recursion stack;
	/// a back-edge to a grey (on-stack) node yields the cycle
	/// `stack[grey_index..] + [grey]`, so `len(cycle) == cycle_length + 1`.
	/// Overlapping cycles sharing a node are reported independently.
	#[must_use]
	pub fn detect_cycles(&self) -> Vec<Vec<String>> {
		let nodes = self.all_nodes();
		let mut color: HashMap<String, Color> = nodes.iter().map(|n| (n.clone(), Color::White)).collect();
		let mut cycles = Vec::new();

		for start in &nodes {
			if color.get(start) != Some(&Color::White) {
				continue;
			}
			self.dfs_from(start, &mut color, &mut cycles);
		}

		cycles
	}

	fn dfs_from(&self, start: &str, color: &mut HashMap<String, Color>, cycles: &mut Vec<Vec<String>>) {
		// Explicit-stack iterative DFS: each frame is the node plus an
		// iterator cursor over its outgoing edges, and `path` is the list
		// of nodes currently grey (on the simulated recursion stack).
		let mut stack: Vec<(String, std::vec::IntoIter<String>)> = Vec::new();
		let mut path: Vec<String> = Vec::new();

		color.insert(start.to_string(), Color::Grey);
		path.push(start.to_string());
		stack.push((start.to_string(), self.targets_of(start).into_iter()));

		while let Some((node, iter)) = stack.last_mut() {
			let node = node.clone();
			if let Some(next) = iter.next() {
				match color.get(&next).copied().unwrap_or(Color::White) {
					Color::White => {
						color.insert(next.clone(), Color::Grey);
						path.push(next.clone());
						let targets = self.targets_of(&next);
						stack.push((next, targets.into_iter()));
					}
					Color::Grey => {
						if let Some(pos) = path.iter().position(|a| *a == next) {
							let mut cycle: Vec<String> = path[pos..].to_vec();
							cycle.push(next);
							cycles.push(cycle);
						}
					}
					Color::Black => {}
				}
			} else {
				color.insert(node, Color::Black);
				stack.pop();
				path.pop();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_cycle_on_empty_graph() {
		let g = WaitForGraph::new();
		assert!(g.detect_cycles().is_empty());
	}

	#[test]
	fn detects_two_cycle() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "B");
		g.add_edge("B", "A");
		let cycles = g.detect_cycles();
		assert_eq!(cycles.len(), 1);
		let c = &cycles[0];
		assert_eq!(c.first(), c.last());
		assert_eq!(c.len(), 3); // A, B, A
	}

	#[test]
	fn detects_three_cycle() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "B");
		g.add_edge("B", "C");
		g.add_edge("C", "A");
		let cycles = g.detect_cycles();
		assert_eq!(cycles.len(), 1);
		assert_eq!(cycles[0].len(), 4);
	}

	#[test]
	fn self_loop_is_ignored() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "A");
		assert!(g.is_empty());
	}

	#[test]
	fn acyclic_graph_reports_nothing() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "B");
		g.add_edge("B", "C");
		assert!(g.detect_cycles().is_empty());
	}

	#[test]
	fn remove_actor_erases_incoming_and_outgoing() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "B");
		g.add_edge("B", "A");
		g.remove_actor("B");
		assert!(g.detect_cycles().is_empty());
		assert!(g.is_empty());
	}

	#[test]
	fn detection_does_not_mutate_graph() {
		let mut g = WaitForGraph::new();
		g.add_edge("A", "B");
		g.add_edge("B", "A");
		let before = g.clone();
		let _ = g.detect_cycles();
		assert_eq!(format!("{before:?}"), format!("{g:?}"));
	}

	#[test]
	fn overlapping_cycles_reported_independently() {
		let mut g = WaitForGraph::new();
		// A <-> B and A <-> C: two distinct 2-cycles sharing node A.
		g.add_edge("A", "B");
		g.add_edge("B", "A");
		g.add_edge("A", "C");
		g.add_edge("C", "A");
		let cycles = g.detect_cycles();
		assert_eq!(cycles.len(), 2);
	}
}
