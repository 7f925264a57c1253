//! Runs the vector accumulation scenarios on a compute device.
//!
//! Each scenario fills its inputs with uniform random values in `[0, 1)`,
//! accumulates them through a chain of kernel launches and checks the result
//! against a CPU reference sum.
//!
//! Usage: `vector_chain [pair|triple|chain|all] [--config <path>] [--host] [--adapter <index>] [--list]`

use std::env;
use std::process;
use std::time::Instant;

use chained_accumulator::config::{AccumulatorConfig, ConfigLoader};
use chained_accumulator::errors::AccumulatorResult;
use chained_accumulator::gpu::{DeviceContext, WgpuRuntime};
use chained_accumulator::{ChainedAccumulator, ComputeRuntime, HostRuntime, KernelArity};
use log::{error, info, warn};
use rand::Rng;

const PREVIEW_LEN: usize = 10;

struct Scenario {
    name: &'static str,
    description: &'static str,
    len: usize,
    inputs: usize,
    arity: KernelArity,
}

const SCENARIOS: [Scenario; 3] = [
    Scenario {
        name: "pair",
        description: "two vectors, one binary launch",
        len: 1024,
        inputs: 2,
        arity: KernelArity::Binary,
    },
    Scenario {
        name: "triple",
        description: "three vectors, one ternary launch",
        len: 4096,
        inputs: 3,
        arity: KernelArity::Ternary,
    },
    Scenario {
        name: "chain",
        description: "four vectors, three chained binary launches",
        len: 4096,
        inputs: 4,
        arity: KernelArity::Binary,
    },
];

struct Options {
    scenario: String,
    config_path: Option<String>,
    host: bool,
    adapter: Option<usize>,
    list: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        scenario: "all".to_string(),
        config_path: None,
        host: false,
        adapter: None,
        list: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" => options.list = true,
            "--host" => options.host = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path")?;
                options.config_path = Some(path.clone());
            }
            "--adapter" => {
                i += 1;
                let index = args
                    .get(i)
                    .ok_or("--adapter requires an index")?
                    .parse::<usize>()
                    .map_err(|e| format!("Invalid adapter index: {}", e))?;
                options.adapter = Some(index);
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option {}", flag)),
            name => options.scenario = name.to_string(),
        }
        i += 1;
    }

    Ok(options)
}

fn random_inputs(count: usize, len: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| (0..len).map(|_| rng.random::<f32>()).collect())
        .collect()
}

fn preview(values: &[f32]) -> &[f32] {
    &values[..PREVIEW_LEN.min(values.len())]
}

fn run_scenario<R: ComputeRuntime>(
    runtime: R,
    scenario: &Scenario,
    base: &AccumulatorConfig,
) -> AccumulatorResult<bool> {
    let config = base.clone().with_arity(scenario.arity);
    let mut accumulator = ChainedAccumulator::new(runtime, &config)?;

    let inputs = random_inputs(scenario.inputs, scenario.len);
    for (i, input) in inputs.iter().enumerate() {
        println!("v{} = {:?}", i + 1, preview(input));
    }

    let start = Instant::now();
    let (output, report) = accumulator.accumulate_verified(&inputs, &config.tolerance)?;
    let elapsed = start.elapsed();

    println!("result = {:?}", preview(&output.values));
    info!(
        "Scenario `{}`: {} launches in {:.3?}, {} of {} elements correct",
        scenario.name, output.launches, elapsed, report.correct, report.checked
    );
    Ok(report.is_match())
}

fn run_on_selected_runtime(
    scenario: &Scenario,
    config: &AccumulatorConfig,
    host: bool,
) -> Result<bool, String> {
    if host {
        return run_scenario(HostRuntime::new(), scenario, config).map_err(|e| e.to_string());
    }

    let context = DeviceContext::new(&config.device).map_err(|e| e.to_string())?;
    run_scenario(WgpuRuntime::from_context(context), scenario, config).map_err(|e| e.to_string())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            eprintln!(
                "Usage: {} [pair|triple|chain|all] [--config <path>] [--host] [--adapter <index>] [--list]",
                args.first().map(String::as_str).unwrap_or("vector_chain")
            );
            process::exit(2);
        }
    };

    if options.list {
        for scenario in &SCENARIOS {
            println!(
                "{:<8} N={:<5} {} ({} inputs)",
                scenario.name, scenario.len, scenario.description, scenario.inputs
            );
        }
        return;
    }

    let mut config = match &options.config_path {
        Some(path) => match ConfigLoader::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        },
        None => AccumulatorConfig::default(),
    };
    if options.adapter.is_some() {
        config.device.adapter_index = options.adapter;
    }

    let selected: Vec<&Scenario> = SCENARIOS
        .iter()
        .filter(|s| options.scenario == "all" || s.name == options.scenario)
        .collect();
    if selected.is_empty() {
        error!("Unknown scenario `{}`", options.scenario);
        process::exit(2);
    }

    let mut all_match = true;
    for scenario in selected {
        info!("Running scenario `{}` ({})", scenario.name, scenario.description);
        match run_on_selected_runtime(scenario, &config, options.host) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Scenario `{}` produced mismatching elements", scenario.name);
                all_match = false;
            }
            Err(e) => {
                error!("Scenario `{}` failed: {}", scenario.name, e);
                process::exit(1);
            }
        }
    }

    if !all_match {
        process::exit(1);
    }
}
