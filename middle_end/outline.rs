//! The execution outline: a structured tree view of one forward execution.
//!
//! The outline is strictly for the UI; WP correctness depends only on the
//! execution states it exposes.

use serde::Serialize;

use rand::rngs::StdRng;

use super::analysis::ProgramContext;
use super::exec::{self, BranchingChoice, ExecutionState};
use super::ir::*;

#[cfg(test)]
mod tests;

#[derive(Clone, Debug)]
pub enum OutlineEntry {
    /// A single source-statement stop.
    Instruction(ExecutionState),
    /// An if/else split; a side is `None` when it received no samples.
    Branch {
        state: ExecutionState,
        true_branch: Option<Outline>,
        false_branch: Option<Outline>,
    },
    /// A loop; `exit_states[i]` is the cumulative merge of states that
    /// exited after at most `i` iterations, `iterations[i]` the outline of
    /// the `(i+1)`-th iteration.
    Loop {
        state: ExecutionState,
        iterations: Vec<Outline>,
        exit_states: Vec<Option<ExecutionState>>,
    },
    /// The post-return terminal.
    End(ExecutionState),
}

#[derive(Clone, Debug, Default)]
pub struct Outline {
    pub entries: Vec<OutlineEntry>,
}

/// Build the outline of the whole execution starting at `state`.
pub fn generate_outline(
    ctx: &ProgramContext,
    state: ExecutionState,
    rng: &mut StdRng,
) -> (Outline, Option<ExecutionState>) {
    OutlineBuilder { ctx, rng }.generate(state, None)
}

struct OutlineBuilder<'a> {
    ctx: &'a ProgramContext,
    rng: &'a mut StdRng,
}

impl OutlineBuilder<'_> {
    fn generate(
        &mut self,
        state: ExecutionState,
        stop: Option<&InstId>,
    ) -> (Outline, Option<ExecutionState>) {
        let mut entries = vec![];

        let mut cur = if self.ctx.debug_info.entry(&state.position).is_none()
            && stop != Some(&state.position)
        {
            self.advance(state, stop)
        } else {
            Some(state)
        };

        loop {
            let s = match cur.take() {
                Some(s) => s,
                None => break,
            };
            if stop == Some(&s.position) {
                return (Outline { entries }, Some(s));
            }
            let entry = self
                .ctx
                .debug_info
                .entry(&s.position)
                .unwrap_or_else(|| panic!("stopped at {}.{} without debug info", s.position.0, s.position.1));
            match entry.kind {
                StatementKind::Simple => {
                    entries.push(OutlineEntry::Instruction(s.clone()));
                    cur = self.advance(s, stop);
                }
                StatementKind::IfElseBranch => {
                    let (entry, next) = self.build_branch(s);
                    entries.push(entry);
                    cur = next;
                }
                StatementKind::Loop => {
                    let (entry, next) = self.build_loop(s);
                    entries.push(entry);
                    cur = next;
                }
                StatementKind::Return => {
                    assert!(
                        stop.is_none(),
                        "outline reached the return terminal before its stop position"
                    );
                    entries.push(OutlineEntry::End(s));
                    return (Outline { entries }, None);
                }
            }
        }
        (Outline { entries }, None)
    }

    // run to the next debug-info position (or the given stop position).
    fn advance(&mut self, state: ExecutionState, stop: Option<&InstId>) -> Option<ExecutionState> {
        let mut stop_set = self.ctx.debug_info.positions();
        if let Some(p) = stop {
            stop_set.insert(p.clone());
        }
        exec::run_until_position(self.ctx, state, &stop_set, self.rng)
    }

    // the first non-phi position of the immediate postdominator: where both
    // arms of a branch meet again.
    fn join_position(&self, block: &BbId) -> InstId {
        let ipd = self.ctx.cfg.immediate_postdominator[block]
            .clone()
            .unwrap_or_else(|| panic!("branch block `{block}` has no immediate postdominator"));
        self.ctx.first_non_phi_position(&ipd)
    }

    fn build_branch(&mut self, state: ExecutionState) -> (OutlineEntry, Option<ExecutionState>) {
        let block = state.position.0.clone();
        let join = self.join_position(&block);
        let tt = match &self.ctx.program.block(&block).term {
            Terminal::Branch { tt, .. } => tt.clone(),
            term => panic!("if/else stop at `{block}` whose terminal is `{term}`"),
        };

        let mut true_branch = None;
        let mut false_branch = None;
        let mut finals = vec![];
        for child in exec::execute_next_instruction(self.ctx, &state, self.rng) {
            let target = taken_target(&child);
            let (outline, sub_final) = self.generate(child, Some(&join));
            if target == tt {
                true_branch = Some(outline);
            } else {
                false_branch = Some(outline);
            }
            if let Some(f) = sub_final {
                finals.push(f);
            }
        }

        let next = if finals.is_empty() {
            None
        } else {
            let mut merged = exec::merge(finals);
            merged.branching_histories = exec::collapse_histories(&state.branching_histories, &block);
            Some(merged)
        };
        (
            OutlineEntry::Branch {
                state,
                true_branch,
                false_branch,
            },
            next,
        )
    }

    fn build_loop(&mut self, state: ExecutionState) -> (OutlineEntry, Option<ExecutionState>) {
        let header = state.position.0.clone();
        let header_stop = state.position.clone();
        let body_target = match &self.ctx.program.block(&header).term {
            Terminal::Branch { tt, ff, .. } => {
                if self.ctx.cfg.loop_edges.contains(&(header.clone(), tt.clone())) {
                    tt.clone()
                } else {
                    ff.clone()
                }
            }
            term => panic!("loop stop at `{header}` whose terminal is `{term}`"),
        };

        let mut iterations = vec![];
        let mut exit_states: Vec<Option<ExecutionState>> = vec![];
        let mut exited: Vec<ExecutionState> = vec![];
        let mut at_header = Some(state.clone());

        while let Some(h) = at_header.take() {
            let mut body_child = None;
            for child in exec::execute_next_instruction(self.ctx, &h, self.rng) {
                if taken_target(&child) == body_target {
                    body_child = Some(child);
                } else {
                    exited.push(child);
                }
            }
            exit_states.push(if exited.is_empty() {
                None
            } else {
                Some(exec::merge(exited.clone()))
            });
            match body_child {
                None => break,
                Some(bc) => {
                    let (outline, back_at_header) = self.generate(bc, Some(&header_stop));
                    iterations.push(outline);
                    at_header = back_at_header;
                }
            }
        }

        let next = if exited.is_empty() {
            None
        } else {
            let mut merged = exec::merge(exited);
            merged.branching_histories = exec::collapse_histories(&state.branching_histories, &header);
            Some(merged)
        };
        (
            OutlineEntry::Loop {
                state,
                iterations,
                exit_states,
            },
            next,
        )
    }
}

// the branch target a freshly split child took, read off its history.
fn taken_target(child: &ExecutionState) -> BbId {
    match child.branching_histories[0].last() {
        Some(BranchingChoice::Choice { to, .. }) => to.clone(),
        _ => unreachable!("branch child without a recorded choice"),
    }
}

// SECTION: UI summary

#[derive(Clone, Debug, Serialize)]
pub struct OutlineSummary {
    pub kind: String,
    pub label: String,
    pub samples: usize,
    pub children: Vec<OutlineSummary>,
}

impl Outline {
    pub fn summarize(&self) -> Vec<OutlineSummary> {
        self.entries.iter().map(summarize_entry).collect()
    }
}

fn position_label(state: &ExecutionState) -> String {
    format!("{}.{}", state.position.0, state.position.1)
}

fn summarize_entry(entry: &OutlineEntry) -> OutlineSummary {
    match entry {
        OutlineEntry::Instruction(state) => OutlineSummary {
            kind: "instruction".to_string(),
            label: position_label(state),
            samples: state.samples.len(),
            children: vec![],
        },
        OutlineEntry::Branch {
            state,
            true_branch,
            false_branch,
        } => {
            let mut children = vec![];
            for (name, branch) in [("true", true_branch), ("false", false_branch)] {
                if let Some(outline) = branch {
                    children.push(OutlineSummary {
                        kind: "branch-side".to_string(),
                        label: name.to_string(),
                        samples: 0,
                        children: outline.summarize(),
                    });
                }
            }
            OutlineSummary {
                kind: "if-else".to_string(),
                label: position_label(state),
                samples: state.samples.len(),
                children,
            }
        }
        OutlineEntry::Loop {
            state, iterations, ..
        } => OutlineSummary {
            kind: "loop".to_string(),
            label: position_label(state),
            samples: state.samples.len(),
            children: iterations
                .iter()
                .enumerate()
                .map(|(i, outline)| OutlineSummary {
                    kind: "iteration".to_string(),
                    label: format!("{}", i + 1),
                    samples: 0,
                    children: outline.summarize(),
                })
                .collect(),
        },
        OutlineEntry::End(state) => OutlineSummary {
            kind: "end".to_string(),
            label: position_label(state),
            samples: state.samples.len(),
            children: vec![],
        },
    }
}
