use super::liveness_analysis::AnalysisState;
use crate::{Analysis, Summary};
use asm::{Class, Instr, Reg, RegSet};
use control::{CallSite, Edge, Exit};
use petgraph::graph::NodeIndex;
use std::collections::{HashSet, VecDeque};

impl Analysis {
  /// Whether `reg` is live right after the call at `site` returns. A call
  /// with no instruction at its return address gives no answer, so every
  /// register counts as live.
  pub fn is_live(&self, site: &CallSite, reg: Reg) -> bool {
    match site.continuation {
      Some(next) => self.liveness.live_in(next).contains(reg),
      None => true,
    }
  }

  /// Every call into `entry`, whichever of its labels the call names.
  pub fn call_sites_of(&self, entry: u16) -> Vec<&CallSite> {
    self.cfg.call_sites_of(entry).collect()
  }

  pub fn all_live_callers(&self, entry: u16, reg: Reg) -> Vec<&CallSite> {
    self
      .cfg
      .call_sites_of(entry)
      .filter(|site| self.is_live(site, reg))
      .collect()
  }

  /// The instruction `reg` is live for after the call at `site` returns:
  /// the nearest one reading it, or the return, call or unresolved jump it
  /// stays live across. `None` when `reg` is dead there or the call has no
  /// return address.
  pub fn first_reader(&self, site: &CallSite, reg: Reg) -> Option<u16> {
    let start = site.continuation?;
    if !self.liveness.live_in(start).contains(reg) {
      return None;
    }
    let state = AnalysisState {
      cfg: &self.cfg,
      summaries: &self.summaries,
      external: self.options.external,
    };
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
      let block = &self.cfg.graph[node];
      let mut killed = false;
      for ins in &block.code {
        let (reads, writes) = effects(&state, ins, block.exit);
        if reads.contains(reg) {
          return Some(ins.address);
        }
        if writes.contains(reg) {
          killed = true;
          break;
        }
      }
      if killed || block.exit == Exit::Halt {
        continue;
      }
      let last = block.code.last()?;
      let no_return = matches!(
        block.exit,
        Exit::Call(i) if self.cfg.call_sites[i].continuation.is_none()
      );
      if block.opaque || no_return {
        return Some(last.address);
      }
      let live: Vec<_> = self
        .live_successors(node)
        .filter(|&succ| self.liveness.live_in(succ).contains(reg))
        .collect();
      if live.is_empty() {
        // a return that `root_live` or a caller without continuation reads
        return Some(last.address);
      }
      for succ in live {
        if seen.insert(succ) {
          queue.push_back(succ);
        }
      }
    }
    None
  }

  /// Blocks whose live-in flows into the live-out of `node`.
  fn live_successors(
    &self,
    node: NodeIndex,
  ) -> impl Iterator<Item = NodeIndex> + '_ {
    self
      .cfg
      .successors(node)
      .filter(|&(_, edge)| edge != Edge::Call)
      .map(|(succ, _)| succ)
      .chain(self.liveness.returns_to.get(&node).into_iter().flatten().copied())
  }

  pub fn summary(&self, entry: u16) -> Option<Summary> {
    self.summaries.get(&entry).copied()
  }

  /// Live registers before the instruction at `address`.
  pub fn live_before(&self, address: u16) -> Option<RegSet> {
    let (node, i) = self.cfg.locate(address)?;
    Some(self.liveness.live[&node][i])
  }

  /// Live registers after the instruction at `address`; for a call, after
  /// the callee returns.
  pub fn live_after(&self, address: u16) -> Option<RegSet> {
    let (node, i) = self.cfg.locate(address)?;
    Some(self.liveness.live[&node][i + 1])
  }

  /// The instruction address `label` names, if it names one.
  pub fn entry_of(&self, label: &str) -> Option<u16> {
    let sym = self.program.symbols.get(label)?;
    self.program.instr_index(sym.address).map(|_| sym.address)
  }

  /// Addresses of jumps and branches into `entry` from outside its body,
  /// e.g. a `JMP` used as a tail call.
  pub fn tail_references(&self, entry: u16) -> Vec<u16> {
    let block = match self.cfg.block_at(entry) {
      Some(block) => block,
      None => return vec![],
    };
    let body = self.cfg.body(&[block]);
    let mut refs: Vec<_> = self
      .cfg
      .predecessors(block)
      .filter(|&(pred, edge)| edge == Edge::Flow && !body.contains(&pred))
      .filter_map(|(pred, _)| {
        let last = self.cfg.graph[pred].code.last()?;
        let falls_in = last.class() != Class::Jump
          && last.next_address() == entry as u32;
        (last.target().is_some() && !falls_in).then(|| last.address)
      })
      .collect();
    refs.sort_unstable();
    refs.dedup();
    refs
  }
}

/// Registers `ins` reads and writes; a call reads and writes what its
/// callee's summary says.
fn effects(state: &AnalysisState, ins: &Instr, exit: Exit) -> (RegSet, RegSet) {
  match (ins.class(), exit) {
    (Class::Call, Exit::Call(i)) => {
      let summary = state.callee_summary(&state.cfg.call_sites[i].callee);
      (summary.uses, summary.kills)
    }
    _ => (ins.reads(), ins.writes()),
  }
}
