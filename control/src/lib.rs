use asm::{Class, Expr, Instr, Mnemonic, Program, SymbolKind};
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use support::{
  MalformedProgramError, OpaqueControlFlowWarning, Range, WarningKind,
};

pub type Result<T> = std::result::Result<T, MalformedProgramError>;

#[derive(Debug, Clone)]
pub struct Block {
  pub code: Vec<Instr>,
  pub exit: Exit,
  /// Some successor could not be resolved, so every register is live on
  /// exit.
  pub opaque: bool,
}

impl Block {
  pub fn address(&self) -> u16 {
    self.code[0].address
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
  /// Falls through, branches or jumps. Successors are the `Flow` edges.
  Flow,
  /// Ends in the call recorded at this index of [`Cfg::call_sites`].
  Call(usize),
  /// `RTS` or `RTI`.
  Return,
  /// `BRK`
  Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
  Flow,
  /// Call block to callee entry.
  Call,
  /// Call block to the block the callee returns to.
  Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
  Internal { entry: u16, block: NodeIndex },
  /// An address outside the listing, e.g. an OS entry point.
  External(u16),
  /// A target expression that cannot be evaluated.
  Opaque(String),
}

#[derive(Debug, Clone)]
pub struct CallSite {
  pub address: u16,
  pub block: NodeIndex,
  pub callee: Callee,
  /// The operand as written, which may be any alias of the entry.
  pub target: String,
  /// The block holding the return address, if it is an instruction.
  pub continuation: Option<NodeIndex>,
  pub range: Range,
}

impl CallSite {
  pub fn entry(&self) -> Option<u16> {
    match self.callee {
      Callee::Internal { entry, .. } => Some(entry),
      _ => None,
    }
  }
}

pub struct Cfg {
  pub graph: Graph<Block, Edge>,
  /// Blocks by start address, in address order.
  pub blocks: IndexMap<u16, NodeIndex>,
  pub call_sites: Vec<CallSite>,
  pub warnings: Vec<OpaqueControlFlowWarning>,
}

enum Target {
  Instr(usize),
  External(u16),
  Unknown(String),
}

/// Splits `prog` into basic blocks and wires their edges.
pub fn build_cfg(prog: &Program) -> Result<Cfg> {
  let n = prog.instrs.len();
  let mut targets = Vec::with_capacity(n);
  let mut leaders = vec![false; n];
  if n > 0 {
    leaders[0] = true;
  }
  for (i, instr) in prog.instrs.iter().enumerate() {
    let target = match instr.target() {
      Some(expr) if !instr.is_indirect_jump() => {
        Some(resolve(prog, instr, expr)?)
      }
      _ => None,
    };
    if let Some(Target::Instr(t)) = target {
      leaders[t] = true;
    }
    let ends_block = matches!(
      instr.class(),
      Class::BranchConditional | Class::Jump | Class::Call | Class::Return
    );
    if i + 1 < n
      && (ends_block || instr.next_address() != prog.instrs[i + 1].address as u32)
    {
      leaders[i + 1] = true;
    }
    targets.push(target);
  }

  let mut builder = Builder {
    prog,
    cfg: Cfg {
      graph: Graph::new(),
      blocks: IndexMap::new(),
      call_sites: vec![],
      warnings: vec![],
    },
  };
  let mut ends = vec![];
  let mut start = 0;
  for i in 0..n {
    if i + 1 == n || leaders[i + 1] {
      let node = builder.cfg.graph.add_node(Block {
        code: prog.instrs[start..=i].to_vec(),
        exit: Exit::Flow,
        opaque: false,
      });
      builder.cfg.blocks.insert(prog.instrs[start].address, node);
      ends.push((node, i));
      start = i + 1;
    }
  }
  for (node, last) in ends {
    builder.wire(node, last, targets[last].as_ref());
  }

  debug!(
    "built {} blocks, {} edges, {} call sites",
    builder.cfg.graph.node_count(),
    builder.cfg.graph.edge_count(),
    builder.cfg.call_sites.len()
  );
  Ok(builder.cfg)
}

fn resolve(prog: &Program, instr: &Instr, expr: &Expr) -> Result<Target> {
  let address = match expr {
    Expr::Number(n) => *n,
    Expr::Symbol(name) => match prog.symbols.get(name) {
      Some(sym) => {
        if sym.kind == SymbolKind::Label
          && prog.instr_index(sym.address).is_none()
        {
          return Err(MalformedProgramError::new(
            instr.range,
            format!("label `{}` does not mark an instruction", name),
          ));
        }
        sym.address
      }
      None => {
        return Err(MalformedProgramError::new(
          instr.range,
          format!("undefined label `{}`", name),
        ))
      }
    },
    Expr::Computed(text) => return Ok(Target::Unknown(text.clone())),
  };
  if let Some(i) = prog.instr_index(address) {
    Ok(Target::Instr(i))
  } else if prog.covers(address) {
    Err(MalformedProgramError::new(
      instr.range,
      format!("`{}` (&{:04X}) is not the start of an instruction", expr, address),
    ))
  } else {
    Ok(Target::External(address))
  }
}

struct Builder<'a> {
  prog: &'a Program,
  cfg: Cfg,
}

impl<'a> Builder<'a> {
  fn wire(&mut self, node: NodeIndex, last: usize, target: Option<&Target>) {
    let prog = self.prog;
    let instr = &prog.instrs[last];
    let next = self.next_block(last);
    match instr.class() {
      Class::BranchConditional => {
        self.jump(node, instr, target);
        self.fall_through(node, instr, next);
      }
      Class::Jump if instr.is_indirect_jump() => {
        self.opaque(
          node,
          instr,
          WarningKind::IndirectJump,
          format!("indirect jump through `{}`", instr.operand),
        );
      }
      Class::Jump => self.jump(node, instr, target),
      Class::Call => self.call(node, instr, target, next),
      Class::Return => {
        self.cfg.graph[node].exit = if instr.mnemonic == Mnemonic::Brk {
          Exit::Halt
        } else {
          Exit::Return
        };
      }
      _ => self.fall_through(node, instr, next),
    }
  }

  fn call(
    &mut self,
    node: NodeIndex,
    instr: &Instr,
    target: Option<&Target>,
    next: Option<NodeIndex>,
  ) {
    let callee = match target {
      Some(Target::Instr(t)) => {
        let entry = self.prog.instrs[*t].address;
        let block = self.cfg.blocks[&entry];
        self.add_edge(node, block, Edge::Call);
        Callee::Internal { entry, block }
      }
      Some(Target::External(address)) => Callee::External(*address),
      Some(Target::Unknown(text)) => Callee::Opaque(text.clone()),
      None => Callee::Opaque(instr.operand.to_string()),
    };
    if let Callee::Opaque(text) = &callee {
      self.warn(
        instr,
        WarningKind::ComputedCall,
        format!("cannot resolve call target `{}`", text),
      );
    }
    match next {
      Some(next) => self.add_edge(node, next, Edge::Continue),
      None => self.warn(
        instr,
        WarningKind::NoContinuation,
        format!(
          "no instruction at the return address of the call at &{:04X}",
          instr.address
        ),
      ),
    }
    self.cfg.graph[node].exit = Exit::Call(self.cfg.call_sites.len());
    self.cfg.call_sites.push(CallSite {
      address: instr.address,
      block: node,
      callee,
      target: instr.operand.to_string(),
      continuation: next,
      range: instr.range,
    });
  }

  fn jump(&mut self, node: NodeIndex, instr: &Instr, target: Option<&Target>) {
    match target {
      Some(Target::Instr(t)) => {
        let to = self.cfg.blocks[&self.prog.instrs[*t].address];
        self.add_edge(node, to, Edge::Flow);
      }
      Some(Target::External(address)) => self.opaque(
        node,
        instr,
        WarningKind::ExternalTarget,
        format!("{} leaves the listing to &{:04X}", instr.mnemonic, address),
      ),
      Some(Target::Unknown(text)) => self.opaque(
        node,
        instr,
        WarningKind::ComputedTarget,
        format!("cannot resolve target `{}`", text),
      ),
      None => self.opaque(
        node,
        instr,
        WarningKind::ComputedTarget,
        format!("cannot resolve target `{}`", instr.operand),
      ),
    }
  }

  fn fall_through(
    &mut self,
    node: NodeIndex,
    instr: &Instr,
    next: Option<NodeIndex>,
  ) {
    match next {
      Some(next) => self.add_edge(node, next, Edge::Flow),
      None => self.opaque(
        node,
        instr,
        WarningKind::FallsThrough,
        format!(
          "execution runs past &{:04X} into data or the end of the listing",
          instr.address
        ),
      ),
    }
  }

  /// The block starting right after instruction `i` in memory.
  fn next_block(&self, i: usize) -> Option<NodeIndex> {
    let next = self.prog.instrs.get(i + 1)?;
    if self.prog.instrs[i].next_address() == next.address as u32 {
      self.cfg.blocks.get(&next.address).copied()
    } else {
      None
    }
  }

  fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: Edge) {
    let exists = self
      .cfg
      .graph
      .edges_connecting(from, to)
      .any(|e| *e.weight() == edge);
    if !exists {
      self.cfg.graph.add_edge(from, to, edge);
    }
  }

  fn opaque(
    &mut self,
    node: NodeIndex,
    instr: &Instr,
    kind: WarningKind,
    message: String,
  ) {
    self.cfg.graph[node].opaque = true;
    self.warn(instr, kind, message);
  }

  fn warn(&mut self, instr: &Instr, kind: WarningKind, message: String) {
    warn!("&{:04X}: {}", instr.address, message);
    self.cfg.warnings.push(OpaqueControlFlowWarning {
      range: instr.range,
      address: instr.address,
      kind,
      message,
    });
  }
}

impl Cfg {
  pub fn block_at(&self, address: u16) -> Option<NodeIndex> {
    self.blocks.get(&address).copied()
  }

  /// The block holding the instruction at `address`, and its position in
  /// the block.
  pub fn locate(&self, address: u16) -> Option<(NodeIndex, usize)> {
    let (_, &node) = self
      .blocks
      .iter()
      .take_while(|(&start, _)| start <= address)
      .last()?;
    let i = self.graph[node]
      .code
      .iter()
      .position(|instr| instr.address == address)?;
    Some((node, i))
  }

  pub fn successors(
    &self,
    node: NodeIndex,
  ) -> impl Iterator<Item = (NodeIndex, Edge)> + '_ {
    self.graph.edges(node).map(|e| (e.target(), *e.weight()))
  }

  /// Derived from the successor edges.
  pub fn predecessors(
    &self,
    node: NodeIndex,
  ) -> impl Iterator<Item = (NodeIndex, Edge)> + '_ {
    self
      .graph
      .edges_directed(node, Direction::Incoming)
      .map(|e| (e.source(), *e.weight()))
  }

  /// Successors that stay inside the current routine: everything but the
  /// edge into a callee.
  pub fn local_successors(
    &self,
    node: NodeIndex,
  ) -> impl Iterator<Item = NodeIndex> + '_ {
    self
      .successors(node)
      .filter(|(_, edge)| *edge != Edge::Call)
      .map(|(node, _)| node)
  }

  pub fn local_predecessors(
    &self,
    node: NodeIndex,
  ) -> impl Iterator<Item = NodeIndex> + '_ {
    self
      .predecessors(node)
      .filter(|(_, edge)| *edge != Edge::Call)
      .map(|(node, _)| node)
  }

  pub fn call_sites_of(&self, entry: u16) -> impl Iterator<Item = &CallSite> {
    self
      .call_sites
      .iter()
      .filter(move |site| site.entry() == Some(entry))
  }

  /// `(call site, target)` of every call that leaves the listing.
  pub fn external_calls(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
    self.call_sites.iter().filter_map(|site| match site.callee {
      Callee::External(target) => Some((site.address, target)),
      _ => None,
    })
  }

  /// Every address some call site enters, in address order.
  pub fn entries(&self) -> Vec<u16> {
    let mut entries: Vec<_> = self
      .call_sites
      .iter()
      .filter_map(CallSite::entry)
      .collect::<IndexSet<_>>()
      .into_iter()
      .collect();
    entries.sort_unstable();
    entries
  }

  /// Blocks reachable from `from` without entering a callee.
  pub fn body(&self, from: &[NodeIndex]) -> IndexSet<NodeIndex> {
    let mut seen = IndexSet::new();
    let mut stack = from.to_vec();
    while let Some(node) = stack.pop() {
      if seen.insert(node) {
        stack.extend(self.local_successors(node));
      }
    }
    seen
  }

  /// Code entered other than through a call: the first block and every
  /// block nothing points at.
  pub fn roots(&self) -> Vec<NodeIndex> {
    self
      .blocks
      .values()
      .enumerate()
      .filter(|&(i, &node)| i == 0 || self.predecessors(node).next().is_none())
      .map(|(_, &node)| node)
      .collect()
  }
}
