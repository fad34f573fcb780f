use std::env;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use probdbg::front_end::{ast::validate::validate, lower, parse};
use probdbg::middle_end::analysis::ProgramContext;
use probdbg::middle_end::debugger::DEFAULT_SEED;
use probdbg::middle_end::exec::ExecutionState;
use probdbg::middle_end::outline::generate_outline;

// print the execution outline of a source program as JSON.

pub fn run() {
    let args: Vec<String> = env::args().collect();

    let path = args
        .get(1)
        .unwrap_or_else(|| panic!("usage: outline <program> [samples] [seed]"));
    let samples = args
        .get(2)
        .map(|s| s.parse::<usize>().unwrap())
        .unwrap_or(1000);
    let seed = args
        .get(3)
        .map(|s| s.parse::<u64>().unwrap())
        .unwrap_or(DEFAULT_SEED);

    let code = read_from(path);
    let parsed = parse(&code).unwrap_or_else(|err| panic!("{err}"));
    let validated = validate(parsed).unwrap_or_else(|err| panic!("{err}"));
    let (program, debug_info) = lower(&validated);
    let program = program.validate().expect("the lowered program is valid");

    let ctx = ProgramContext::new(program, debug_info);
    let state = ExecutionState::initial(&ctx, samples);
    let mut rng = StdRng::seed_from_u64(seed);
    let (outline, _) = generate_outline(&ctx, state, &mut rng);

    println!(
        "{}",
        serde_json::to_string_pretty(&outline.summarize()).unwrap()
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    run();
}

fn read_from(path: &str) -> String {
    String::from_utf8(
        std::fs::read(path)
            .unwrap_or_else(|_| panic!("Could not read the input file {}", path)),
    )
    .expect("The input file does not contain valid utf-8 text")
}
