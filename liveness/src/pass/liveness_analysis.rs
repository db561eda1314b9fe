use super::dataflow::Dataflow;
use crate::{Options, Summary};
use asm::{Class, Instr, RegSet};
use control::{Callee, Cfg, Edge, Exit};
use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use std::collections::HashMap;

/// Live registers at every instruction boundary of every block: entry `i` is
/// the set before instruction `i`, the last entry the set on exit.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
  pub live: IndexMap<NodeIndex, Vec<RegSet>>,
  /// Continuations each return block flows back to.
  pub returns_to: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl Liveness {
  pub fn live_in(&self, node: NodeIndex) -> RegSet {
    self.live.get(&node).map_or(RegSet::new(), |live| live[0])
  }

  pub fn live_out(&self, node: NodeIndex) -> RegSet {
    self
      .live
      .get(&node)
      .and_then(|live| live.last().copied())
      .unwrap_or_default()
  }
}

pub struct AnalysisState<'a> {
  pub cfg: &'a Cfg,
  pub summaries: &'a IndexMap<u16, Summary>,
  pub external: Summary,
}

impl<'a> AnalysisState<'a> {
  pub fn callee_summary(&self, callee: &Callee) -> Summary {
    match callee {
      Callee::Internal { entry, .. } => self
        .summaries
        .get(entry)
        .copied()
        .unwrap_or(self.external),
      Callee::External(_) | Callee::Opaque(_) => self.external,
    }
  }

  /// Live-out of `node` given the join of its successors' live-in.
  pub fn exit_liveness(&self, node: NodeIndex, input: RegSet) -> RegSet {
    let block = &self.cfg.graph[node];
    if block.opaque {
      return RegSet::all();
    }
    match block.exit {
      Exit::Call(i) if self.cfg.call_sites[i].continuation.is_none() => {
        RegSet::all()
      }
      Exit::Halt => RegSet::new(),
      _ => input,
    }
  }

  pub fn block_liveness(&self, node: NodeIndex, out: RegSet) -> Vec<RegSet> {
    let block = &self.cfg.graph[node];
    let mut set = vec![RegSet::new(); block.code.len() + 1];
    set[block.code.len()] = out;
    for (i, ins) in block.code.iter().enumerate().rev() {
      set[i] = self.instr_liveness(ins, block.exit, set[i + 1]);
    }
    set
  }

  fn instr_liveness(&self, ins: &Instr, exit: Exit, after: RegSet) -> RegSet {
    match (ins.class(), exit) {
      (Class::Call, Exit::Call(i)) => {
        let summary = self.callee_summary(&self.cfg.call_sites[i].callee);
        (after - summary.kills) | summary.uses
      }
      _ => (after - ins.writes()) | ins.reads(),
    }
  }

  /// Dependency graph of backward liveness over `nodes`: each block depends
  /// on its `Flow` and `Continue` successors. Node weights are CFG nodes.
  pub fn dependencies(
    &self,
    nodes: impl IntoIterator<Item = NodeIndex>,
  ) -> (Graph<NodeIndex, ()>, HashMap<NodeIndex, NodeIndex>) {
    let nodes: Vec<_> = nodes.into_iter().collect();
    let mut graph = Graph::new();
    let mut ixs = HashMap::new();
    for &node in &nodes {
      ixs.insert(node, graph.add_node(node));
    }
    for node in nodes {
      let ix = ixs[&node];
      for (succ, edge) in self.cfg.successors(node) {
        if edge == Edge::Call {
          continue;
        }
        if let Some(&succ_ix) = ixs.get(&succ) {
          graph.add_edge(succ_ix, ix, ());
        }
      }
    }
    (graph, ixs)
  }
}

/// Whole-program liveness: return blocks take the live-in of the
/// continuations of every call into their routine.
pub struct ProgramLiveness<'a> {
  state: AnalysisState<'a>,
  /// Continuation blocks each return block flows back to.
  continuations: HashMap<NodeIndex, Vec<NodeIndex>>,
  /// Registers live after a return whatever its callers do.
  extra: HashMap<NodeIndex, RegSet>,
}

impl<'a> ProgramLiveness<'a> {
  pub fn new(
    cfg: &'a Cfg,
    summaries: &'a IndexMap<u16, Summary>,
    options: &Options,
  ) -> Self {
    let mut this = Self {
      state: AnalysisState {
        cfg,
        summaries,
        external: options.external,
      },
      continuations: HashMap::new(),
      extra: HashMap::new(),
    };
    for node in this.returns(&cfg.roots()) {
      *this.extra.entry(node).or_default() |= options.root_live;
    }
    for entry in cfg.entries() {
      let block = match cfg.block_at(entry) {
        Some(block) => block,
        None => continue,
      };
      for node in this.returns(&[block]) {
        for site in cfg.call_sites_of(entry) {
          match site.continuation {
            Some(next) => this.continuations.entry(node).or_default().push(next),
            None => {
              this.extra.insert(node, RegSet::all());
            }
          }
        }
      }
    }
    this
  }

  fn returns(&self, from: &[NodeIndex]) -> Vec<NodeIndex> {
    let cfg = self.state.cfg;
    cfg
      .body(from)
      .into_iter()
      .filter(|&node| cfg.graph[node].exit == Exit::Return)
      .collect()
  }

  pub fn live_out(&self, node: NodeIndex, input: RegSet) -> RegSet {
    let input = input | self.extra.get(&node).copied().unwrap_or_default();
    self.state.exit_liveness(node, input)
  }

  /// Block dependencies plus an edge from every continuation to the return
  /// blocks that flow back to it.
  pub fn dependencies(&self) -> Graph<NodeIndex, ()> {
    let cfg = self.state.cfg;
    let (mut graph, ixs) = self.state.dependencies(cfg.graph.node_indices());
    for (node, nexts) in &self.continuations {
      for next in nexts {
        graph.add_edge(ixs[next], ixs[node], ());
      }
    }
    graph
  }

  /// A solver for the live-in of every block, starting from `seed`.
  pub fn solver(
    &'a self,
    seed: HashMap<NodeIndex, RegSet>,
  ) -> Dataflow<
    NodeIndex,
    RegSet,
    impl FnMut(&HashMap<NodeIndex, RegSet>, NodeIndex, RegSet) -> RegSet + 'a,
    impl Fn(RegSet, &RegSet) -> RegSet,
  > {
    Dataflow::new(
      seed,
      self.dependencies(),
      move |_: &HashMap<NodeIndex, RegSet>, node: NodeIndex, input: RegSet| {
        self.state.block_liveness(node, self.live_out(node, input))[0]
      },
      RegSet::new(),
      |set1: RegSet, set2: &RegSet| set1 | *set2,
    )
  }

  /// Expands block live-in sets to every instruction boundary.
  pub fn expand(&self, live_in: &HashMap<NodeIndex, RegSet>) -> Liveness {
    let cfg = self.state.cfg;
    let mut live = IndexMap::new();
    for &node in cfg.blocks.values() {
      let mut input = RegSet::new();
      for (succ, edge) in cfg.successors(node) {
        if edge != Edge::Call {
          input |= live_in[&succ];
        }
      }
      for next in self.continuations.get(&node).into_iter().flatten() {
        input |= live_in[next];
      }
      let out = self.live_out(node, input);
      live.insert(node, self.state.block_liveness(node, out));
    }
    Liveness {
      live,
      returns_to: self.continuations.clone(),
    }
  }
}

pub fn analyze_liveness(
  cfg: &Cfg,
  summaries: &IndexMap<u16, Summary>,
  options: &Options,
) -> Liveness {
  let program = ProgramLiveness::new(cfg, summaries, options);
  let live_in = program.solver(HashMap::new()).run();
  program.expand(&live_in)
}
