use std::collections::BTreeMap as Map;
use std::env;

use tracing_subscriber::EnvFilter;

use probdbg::front_end::{ast::validate::validate, lower, parse};
use probdbg::middle_end::debugger::{ApproximationErrorHandling, Debugger, DEFAULT_SEED};

// run a source program to completion and print the exact posterior of every
// variable as JSON.

pub fn run() {
    let args: Vec<String> = env::args().collect();

    let path = args
        .get(1)
        .unwrap_or_else(|| panic!("usage: debug <program> [samples] [seed]"));
    let samples = args
        .get(2)
        .map(|s| s.parse::<usize>().unwrap())
        .unwrap_or(10000);
    let seed = args
        .get(3)
        .map(|s| s.parse::<u64>().unwrap())
        .unwrap_or(DEFAULT_SEED);

    let code = read_from(path);
    let parsed = parse(&code).unwrap_or_else(|err| panic!("{err}"));
    let validated = validate(parsed).unwrap_or_else(|err| panic!("{err}"));
    let (program, debug_info) = lower(&validated);
    let program = program.validate().expect("the lowered program is valid");

    let mut debugger = Debugger::with_seed(program, debug_info, samples, seed);
    if !debugger.is_terminated() {
        debugger.run_until_end().unwrap();
    }

    let values = debugger.variable_values(ApproximationErrorHandling::Distribute);
    let report: Map<String, Map<String, f64>> = values
        .into_iter()
        .map(|(name, vals)| {
            (
                name,
                vals.into_iter().map(|(v, p)| (v.to_string(), p)).collect(),
            )
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    eprintln!("approximation error: {}", debugger.approximation_error());
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
