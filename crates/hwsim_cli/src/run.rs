//! `hwsim run`: elaborate a design and simulate it.
//!
//! Settings come from an optional `hwsim.toml`. Command-line flags override
//! the top component, the run length and tracing. Root inputs listed in the
//! settings are applied as top-level bindings, so they hold their value
//! before any bind or process runs.

use std::path::Path;

use hwsim_config::{load_config, parse_duration, SimConfig};
use hwsim_elaborate::TopBindings;
use hwsim_sim::{
    MemoryTracer, SimOptions, SimTime, Simulation, Value, DEFAULT_MAX_COMB_DEPTH, FS_PER_NS,
};

use crate::pipeline::{elaborate, infer_top, load_design};
use crate::{GlobalArgs, RunArgs};

/// Run length when neither the flags nor the settings give one.
const DEFAULT_RUN_FS: u64 = 100 * FS_PER_NS;

/// Runs the `hwsim run` command.
pub fn run(args: &RunArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Some(load_config(Path::new(path))?),
        None => None,
    };
    let ir = load_design(Path::new(&args.design))?;
    let explicit_top = args
        .top
        .as_deref()
        .or(config.as_ref().map(|c| c.simulation.top.as_str()));
    let top = infer_top(&ir, explicit_top)?;

    let end_fs = match (&args.time, &config) {
        (Some(t), _) => parse_duration(t)?,
        (None, Some(c)) => c.simulation.time.map_or(DEFAULT_RUN_FS, |d| d.as_fs()),
        (None, None) => DEFAULT_RUN_FS,
    };
    let trace = args.trace || config.as_ref().is_some_and(|c| c.trace.enabled);

    if !global.quiet {
        eprintln!("   Simulating {top} for {}", SimTime::from_fs(end_fs));
    }

    let Some(elaborated) = elaborate(&ir, &top, top_bindings(config.as_ref()))? else {
        return Ok(1);
    };
    let options = SimOptions {
        max_comb_depth: config
            .as_ref()
            .map_or(DEFAULT_MAX_COMB_DEPTH, |c| c.simulation.max_comb_depth),
        ..SimOptions::default()
    };
    let sim = elaborated.into_simulation(options)?;
    let tracer = MemoryTracer::new();
    if trace {
        sim.set_tracer(tracer.clone());
    }

    sim.start()?;
    if let Some(c) = &config {
        for clock in &c.clock {
            sim.drive_clock(&clock.signal, clock.period.as_fs())?;
        }
    }
    sim.run_until(end_fs)?;

    if trace {
        for change in tracer.changes() {
            println!(
                "{:>12} {}: {} -> {}",
                change.time.to_string(),
                change.signal,
                change.old,
                change.new
            );
        }
    }
    if !global.quiet {
        for (name, value) in root_signals(&sim)? {
            println!("{name} = {value}");
        }
        eprintln!("    Finished at {}", sim.now());
    }
    Ok(0)
}

fn top_bindings(config: Option<&SimConfig>) -> TopBindings {
    let mut bindings = TopBindings::new();
    if let Some(c) = config {
        for (name, value) in &c.inputs {
            bindings.insert(name.clone(), Value::Int(i128::from(*value)));
        }
    }
    bindings
}

/// Final values of the root's signal fields, in declaration order.
fn root_signals(sim: &Simulation) -> Result<Vec<(String, Value)>, hwsim_sim::SimError> {
    let tree = sim.tree();
    let root = tree.root();
    tree.comp(root)
        .fields
        .iter()
        .filter(|f| f.is_signal())
        .map(|f| Ok((f.name.clone(), sim.field_value(root, &f.name)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_ir::{AugOp, ComponentBuilder, Context, Expr, Stmt};
    use hwsim_elaborate::ElabSettings;

    fn counter() -> Context {
        let mut ir = Context::new();
        let mut top = ComponentBuilder::new("Counter");
        let clock = top.input("clock", 1);
        let reset = top.input("reset", 1);
        let count = top.output("count", 8);
        top.sync(
            "tick",
            clock,
            Some(reset),
            vec![Stmt::if_else(
                Expr::field(reset),
                vec![Stmt::assign(Expr::field(count), Expr::int(0))],
                vec![Stmt::aug_assign(Expr::field(count), AugOp::Add, Expr::int(1))],
            )],
        );
        ir.add_type(top.build()).unwrap();
        ir
    }

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn quiet() -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
        }
    }

    #[test]
    fn inputs_become_top_bindings() {
        let config = hwsim_config::load_config_from_str(
            "[simulation]\ntop = \"Counter\"\n[inputs]\nreset = 1\n",
        )
        .unwrap();
        let bindings = top_bindings(Some(&config));
        assert_eq!(bindings.get("reset"), Some(&Value::Int(1)));
        assert!(top_bindings(None).is_empty());
    }

    #[test]
    fn counter_runs_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let design = write(&dir, "design.json", &counter().to_json().unwrap());
        let config = write(
            &dir,
            "hwsim.toml",
            "[simulation]\ntop = \"Counter\"\ntime = \"95ns\"\n\n[[clock]]\nsignal = \"clock\"\nperiod = \"10ns\"\n",
        );
        let args = RunArgs {
            design,
            top: None,
            time: None,
            trace: true,
            config: Some(config),
        };
        assert_eq!(run(&args, &quiet()).unwrap(), 0);
    }

    #[test]
    fn root_signals_after_edges() {
        let ir = counter();
        let e = hwsim_elaborate::elaborate(&ir, "Counter", TopBindings::new(), ElabSettings::default())
            .unwrap();
        let sim = e.into_simulation(SimOptions::default()).unwrap();
        sim.start().unwrap();
        sim.clock_edge("clock").unwrap();
        sim.clock_edge("clock").unwrap();
        let signals = root_signals(&sim).unwrap();
        let names: Vec<&str> = signals.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["clock", "reset", "count"]);
        assert_eq!(signals[2].1, Value::Int(2));
    }

    #[test]
    fn bad_time_flag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let design = write(&dir, "design.json", &counter().to_json().unwrap());
        let args = RunArgs {
            design,
            top: Some("Counter".into()),
            time: Some("ten".into()),
            trace: false,
            config: None,
        };
        assert!(run(&args, &quiet()).is_err());
    }
}
