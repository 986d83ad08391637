//! `hwsim check`: validate and elaborate a design without simulating it.

use std::path::Path;

use hwsim_elaborate::TopBindings;

use crate::pipeline::{elaborate, infer_top, load_design};
use crate::{CheckArgs, GlobalArgs};

/// Runs the `hwsim check` command.
///
/// Prints the elaborated instance tree on success. Returns exit code 1 if
/// elaboration reported any error.
pub fn run(args: &CheckArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let ir = load_design(Path::new(&args.design))?;
    let top = infer_top(&ir, args.top.as_deref())?;

    if !global.quiet {
        eprintln!("   Elaborating {top}");
    }

    let Some(elaborated) = elaborate(&ir, &top, TopBindings::new())? else {
        return Ok(1);
    };
    let tree = &elaborated.tree;
    if !global.quiet {
        print!("{}", tree.render());
        for line in tree.bind_order() {
            println!("bind {line}");
        }
        eprintln!(
            "    Finished {} instance(s), {} bind(s), fingerprint {}",
            tree.len(),
            tree.bind_order().len(),
            tree.fingerprint()
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_ir::{ComponentBuilder, Context, DataType};

    fn write(ir: &Context) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.json");
        std::fs::write(&path, ir.to_json().unwrap()).unwrap();
        (dir, path.display().to_string())
    }

    fn quiet() -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
        }
    }

    #[test]
    fn clean_design_passes() {
        let mut ir = Context::new();
        let mut top = ComponentBuilder::new("Top");
        top.input("clock", 1);
        top.output("q", 4);
        ir.add_type(top.build()).unwrap();
        let (_dir, design) = write(&ir);
        let args = CheckArgs { design, top: None };
        assert_eq!(run(&args, &quiet()).unwrap(), 0);
    }

    #[test]
    fn unbound_root_port_fails() {
        let mut ir = Context::new();
        let mut top = ComponentBuilder::new("Top");
        top.port(
            "req",
            DataType::GetIf {
                element_type: Box::new(DataType::uint(8)),
            },
        );
        ir.add_type(top.build()).unwrap();
        let (_dir, design) = write(&ir);
        let args = CheckArgs {
            design,
            top: Some("Top".into()),
        };
        assert_eq!(run(&args, &quiet()).unwrap(), 1);
    }
}
