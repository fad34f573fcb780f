//! Graphviz rendering of a program's control-flow graph.
//!
//! Blocks list their instructions together with the debugger stops sitting
//! between them; loop condition blocks are drawn with a double border, and
//! branch edges carry their taken side (the edge entering a loop body in
//! bold).

use super::*;
use crate::middle_end::analysis::ProgramContext;

pub fn dump_cfg(ctx: &ProgramContext) -> String {
    let mut nodes = String::new();
    let mut edges = String::new();

    for (bbid, block) in &ctx.program.body {
        let mut label = format!("{bbid}:\\l");
        // interleave the debug stops with the instructions they precede;
        // index insts.len() is the terminal position.
        for idx in 0..=block.insts.len() {
            if let Some(stop) = ctx.debug_info.entry(&(bbid.clone(), idx)) {
                label.push_str(&format!(" stop {:?} [{}]\\l", stop.kind, stop.range));
            }
            match block.insts.get(idx) {
                Some(inst) => label.push_str(&format!("  {inst}\\l")),
                None => label.push_str(&format!("  {}\\l", block.term)),
            }
        }

        let style = if ctx.cfg.loop_inducing_blocks.contains(bbid) {
            ", peripheries=2"
        } else {
            ""
        };
        nodes.push_str(&format!("  {bbid} [label=\"{label}\"{style}];\n"));

        match &block.term {
            Terminal::Jump(target) => {
                edges.push_str(&format!("  {bbid} -> {target};\n"));
            }
            Terminal::Branch { tt, ff, .. } => {
                for (target, side) in [(tt, "true"), (ff, "false")] {
                    let loop_entry =
                        if ctx.cfg.loop_edges.contains(&(bbid.clone(), target.clone())) {
                            " style=bold"
                        } else {
                            ""
                        };
                    edges.push_str(&format!(
                        "  {bbid} -> {target} [label=\"{side}\"{loop_entry}];\n"
                    ));
                }
            }
            Terminal::Ret => {}
        }
    }

    format!("digraph cfg {{\n  node [shape=box nojustify=true];\n{nodes}{edges}}}\n")
}
