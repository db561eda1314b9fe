use log::debug;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A worklist solver over a dependency graph: an edge `a -> b` means the
/// value of `b` is computed from the value of `a`. Nodes missing from the
/// seed start at `bottom`, which must be the identity of `join`.
pub struct Dataflow<N, T, F, J> {
  graph: Graph<N, ()>,
  mapping: HashMap<N, T>,
  worklist: VecDeque<NodeIndex>,
  transfer: F,
  bottom: T,
  join: J,
  /// Nodes taken off the worklist so far.
  pub visits: usize,
  /// Times a node's value changed.
  pub updates: usize,
}

impl<N, T, F, J> Dataflow<N, T, F, J>
where
  N: Copy + Hash + Eq,
  T: Clone + PartialEq,
  F: FnMut(&HashMap<N, T>, N, T) -> T,
  J: Fn(T, &T) -> T,
{
  pub fn new(
    mut mapping: HashMap<N, T>,
    graph: Graph<N, ()>,
    transfer: F,
    bottom: T,
    join: J,
  ) -> Self {
    for &label in graph.node_weights() {
      mapping.entry(label).or_insert_with(|| bottom.clone());
    }
    Self {
      worklist: graph.node_indices().collect(),
      graph,
      mapping,
      transfer,
      bottom,
      join,
      visits: 0,
      updates: 0,
    }
  }

  /// Recomputes the next node on the worklist. Returns `None` once the
  /// worklist is empty, i.e. at the fixed point.
  pub fn step(&mut self) -> Option<N> {
    let node_ix = self.worklist.pop_front()?;
    self.visits += 1;
    let g = &self.graph;
    let label = g[node_ix];
    let input = g
      .neighbors_directed(node_ix, Direction::Incoming)
      .map(|node_ix| &self.mapping[&g[node_ix]])
      .fold(self.bottom.clone(), &self.join);
    let output = (self.transfer)(&self.mapping, label, input);
    if output != self.mapping[&label] {
      self.mapping.insert(label, output);
      self.updates += 1;
      for node_ix in g.neighbors_directed(node_ix, Direction::Outgoing) {
        self.worklist.push_back(node_ix);
      }
    }
    Some(label)
  }

  pub fn graph(&self) -> &Graph<N, ()> {
    &self.graph
  }

  pub fn mapping(&self) -> &HashMap<N, T> {
    &self.mapping
  }

  pub fn run(mut self) -> HashMap<N, T> {
    while self.step().is_some() {}
    debug!(
      "dataflow over {} nodes: {} visits, {} updates",
      self.graph.node_count(),
      self.visits,
      self.updates
    );
    self.mapping
  }
}

pub fn analyze_dataflow<N, T, F, J>(
  mapping: HashMap<N, T>,
  g: Graph<N, ()>,
  transfer: F,
  bottom: T,
  join: J,
) -> HashMap<N, T>
where
  N: Copy + Hash + Eq,
  T: Clone + PartialEq,
  F: FnMut(&HashMap<N, T>, N, T) -> T,
  J: Fn(T, &T) -> T,
{
  Dataflow::new(mapping, g, transfer, bottom, join).run()
}

#[cfg(test)]
mod tests {
  use super::*;
  use maplit::hashmap;
  use pretty_assertions::assert_eq;

  /// Longest distance from `a` in a small graph with a cycle, capped at 10.
  fn chain() -> Graph<char, ()> {
    let mut g = Graph::new();
    let a = g.add_node('a');
    let b = g.add_node('b');
    let c = g.add_node('c');
    g.add_edge(a, b, ());
    g.add_edge(b, c, ());
    g.add_edge(c, b, ());
    g
  }

  fn distance(_: &HashMap<char, u32>, label: char, input: u32) -> u32 {
    if label == 'a' {
      1
    } else {
      (input + 1).min(10)
    }
  }

  #[test]
  fn reaches_fixed_point() {
    let g = chain();
    let result = analyze_dataflow(HashMap::new(), g, distance, 0, |x, y| {
      x.max(*y)
    });
    assert_eq!(result, hashmap! { 'a' => 1, 'b' => 10, 'c' => 10 });
  }

  #[test]
  fn seeded_with_solution_changes_nothing() {
    let g = chain();
    let seed = hashmap! { 'a' => 1, 'b' => 10, 'c' => 10 };
    let mut solver =
      Dataflow::new(seed.clone(), g, distance, 0, |x: u32, y: &u32| x.max(*y));
    while solver.step().is_some() {}
    assert_eq!(solver.updates, 0);
    assert_eq!(solver.visits, 3);
    assert_eq!(solver.mapping(), &seed);
  }

  #[test]
  fn seed_is_kept_for_nodes_outside_the_graph() {
    let g = chain();
    let result = analyze_dataflow(
      hashmap! { 'z' => 7 },
      g,
      distance,
      0,
      |x, y| x.max(*y),
    );
    assert_eq!(result[&'z'], 7);
  }
}
