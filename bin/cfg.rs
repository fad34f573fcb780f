use std::env;

use probdbg::front_end::{ast::validate::validate, lower, parse};
use probdbg::middle_end::analysis::ProgramContext;
use probdbg::middle_end::ir::{cfg_dump_impl::dump_cfg, DebugInfo, Program};

// dump the control-flow graph of a program as graphviz, annotated with the
// debugger stop positions.  accepts either a source program or a textual IR
// file (`.ir`, which carries no debug info).

pub fn run() {
    let args: Vec<String> = env::args().collect();

    let path = args
        .get(1)
        .unwrap_or_else(|| panic!("usage: cfg <program | file.ir>"));
    let input = read_from(path);

    let ctx = if path.ends_with(".ir") {
        let program = input
            .parse::<Program>()
            .unwrap_or_else(|err| panic!("{err}"))
            .validate()
            .unwrap_or_else(|err| panic!("{err}"));
        ProgramContext::new(program, DebugInfo::default())
    } else {
        let parsed = parse(&input).unwrap_or_else(|err| panic!("{err}"));
        let validated = validate(parsed).unwrap_or_else(|err| panic!("{err}"));
        let (program, debug_info) = lower(&validated);
        let program = program.validate().expect("the lowered program is valid");
        ProgramContext::new(program, debug_info)
    };

    println!("{}", dump_cfg(&ctx));
}

fn main() {
    run();
}

fn read_from(path: &str) -> String {
    String::from_utf8(
        std::fs::read(path)
            .unwrap_or_else(|_| panic!("Could not read the input file {}", path)),
    )
    .expect("The input file does not contain valid utf-8 text")
}
