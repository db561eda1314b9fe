use super::dataflow::analyze_dataflow;
use super::liveness_analysis::AnalysisState;
use crate::{Options, Summary};
use asm::{Class, RegSet};
use control::{Cfg, Exit};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use std::collections::HashMap;

/// Summaries of every called routine. Each round recomputes every summary
/// from the previous round's, so mutually recursive routines settle
/// together.
pub fn compute_summaries(
  cfg: &Cfg,
  options: &Options,
) -> IndexMap<u16, Summary> {
  let bodies: Vec<_> = cfg
    .entries()
    .into_iter()
    .filter_map(|entry| {
      let block = cfg.block_at(entry)?;
      Some((entry, block, cfg.body(&[block])))
    })
    .collect();
  let mut summaries: IndexMap<_, _> = bodies
    .iter()
    .map(|&(entry, _, _)| {
      let summary = Summary {
        uses: RegSet::new(),
        kills: RegSet::all(),
      };
      (entry, summary)
    })
    .collect();

  let mut rounds = 0;
  loop {
    rounds += 1;
    let state = AnalysisState {
      cfg,
      summaries: &summaries,
      external: options.external,
    };
    let next: Vec<_> = bodies
      .par_iter()
      .map(|(entry, block, body)| (*entry, summarize(&state, *block, body)))
      .collect();
    let next: IndexMap<_, _> = next.into_iter().collect();
    if next == summaries {
      break;
    }
    summaries = next;
  }
  debug!(
    "{} summaries stable after {} rounds",
    summaries.len(),
    rounds
  );
  summaries
}

fn summarize(
  state: &AnalysisState,
  entry: NodeIndex,
  body: &IndexSet<NodeIndex>,
) -> Summary {
  Summary {
    uses: uses(state, entry, body),
    kills: kills(state, entry, body),
  }
}

/// Live-in of the entry when nothing is live after a return.
fn uses(
  state: &AnalysisState,
  entry: NodeIndex,
  body: &IndexSet<NodeIndex>,
) -> RegSet {
  let (graph, _) = state.dependencies(body.iter().copied());
  let live_in = analyze_dataflow(
    HashMap::new(),
    graph,
    |_, node, input| {
      state.block_liveness(node, state.exit_liveness(node, input))[0]
    },
    RegSet::new(),
    |set1, set2| set1 | *set2,
  );
  live_in[&entry]
}

/// Registers written on every path from the entry to a return or to
/// control flow that cannot be followed.
fn kills(
  state: &AnalysisState,
  entry: NodeIndex,
  body: &IndexSet<NodeIndex>,
) -> RegSet {
  let (mut graph, _) = state.dependencies(body.iter().copied());
  graph.reverse();
  let written = analyze_dataflow(
    HashMap::new(),
    graph,
    |_, node, input| {
      let input = if node == entry { RegSet::new() } else { input };
      block_kills(state, node, input)
    },
    RegSet::all(),
    |set1, set2| set1 & *set2,
  );

  let cfg = state.cfg;
  body
    .iter()
    .filter(|&&node| {
      let block = &cfg.graph[node];
      match block.exit {
        Exit::Return => true,
        Exit::Call(i) => cfg.call_sites[i].continuation.is_none(),
        Exit::Flow | Exit::Halt => block.opaque,
      }
    })
    .fold(RegSet::all(), |set, node| set & written[node])
}

fn block_kills(state: &AnalysisState, node: NodeIndex, input: RegSet) -> RegSet {
  let block = &state.cfg.graph[node];
  block
    .code
    .iter()
    .fold(input, |written, ins| match (ins.class(), block.exit) {
      (Class::Call, Exit::Call(i)) => {
        let callee = &state.cfg.call_sites[i].callee;
        written | state.callee_summary(callee).kills
      }
      _ => written | ins.writes(),
    })
}

#[cfg(test)]
mod tests {
  use crate::{Analysis, Options, Summary};
  use asm::{Reg::*, RegSet};
  use pretty_assertions::assert_eq;

  fn summary(input: &str, entry: u16, options: Options) -> Summary {
    let analysis = Analysis::from_source(input, options).unwrap();
    analysis.summaries[&entry]
  }

  #[test]
  fn straight_line() {
    let input = r#"
      ORG &8000
      JSR skip
      STY &70
      RTS
.skip
      LDA (&F2),Y
      CMP #' '
      RTS
    "#;
    assert_eq!(
      summary(input, 0x8006, Options::default()),
      Summary {
        uses: RegSet::regs([Y]),
        kills: RegSet::regs([A, C, Z]),
      }
    );
  }

  #[test]
  fn kills_only_what_every_path_writes() {
    let input = r#"
      ORG &8000
      JSR pick
      RTS
.pick
      BCS high
      LDX #0
      RTS
.high
      LDX #1
      LDY #1
      RTS
    "#;
    assert_eq!(
      summary(input, 0x8004, Options::default()),
      Summary {
        uses: RegSet::regs([C]),
        kills: RegSet::regs([X, Z]),
      }
    );
  }

  #[test]
  fn recursion_settles() {
    let input = r#"
      ORG &8000
      JSR count
      RTS
.count
      DEX
      BEQ done
      JSR count
.done
      RTS
    "#;
    assert_eq!(
      summary(input, 0x8004, Options::default()),
      Summary {
        uses: RegSet::regs([X]),
        kills: RegSet::regs([X, Z]),
      }
    );
  }

  #[test]
  fn routine_that_never_returns() {
    let input = r#"
      ORG &8000
      JSR fail
      STY &70
      RTS
.fail
      LDA #0
      BRK
    "#;
    assert_eq!(
      summary(input, 0x8006, Options::default()),
      Summary {
        uses: RegSet::new(),
        kills: RegSet::all(),
      }
    );
  }

  #[test]
  fn external_calls_use_the_configured_summary() {
    let input = r#"
OSWRCH = &FFEE
      ORG &8000
      JSR newline
      RTS
.newline
      LDA #13
      JSR OSWRCH
      RTS
    "#;
    assert_eq!(
      summary(input, 0x8004, Options::default()),
      Summary {
        uses: RegSet::all() - RegSet::regs([A, Z]),
        kills: RegSet::regs([A, Z]),
      }
    );

    let options = Options {
      external: Summary {
        uses: RegSet::regs([A]),
        kills: RegSet::regs([C]),
      },
      ..Options::default()
    };
    assert_eq!(
      summary(input, 0x8004, options),
      Summary {
        uses: RegSet::new(),
        kills: RegSet::regs([A, C, Z]),
      }
    );
  }

  #[test]
  fn falling_into_data_keeps_everything_live() {
    let input = r#"
      ORG &8000
      JSR broken
      RTS
.broken
      LDA #0
      EQUB &FF
    "#;
    assert_eq!(
      summary(input, 0x8004, Options::default()),
      Summary {
        uses: RegSet::all() - RegSet::regs([A, Z]),
        kills: RegSet::regs([A, Z]),
      }
    );
  }
}
