//! Shared steps of the `check` and `run` commands.

use std::collections::BTreeSet;
use std::path::Path;

use hwsim_elaborate::{ElabErrors, ElabSettings, Elaborated, TopBindings};
use hwsim_ir::{Context, DataType};

/// Loads a JSON design and checks that every type reference resolves.
pub fn load_design(path: &Path) -> Result<Context, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let ir = Context::from_json(&json)?;
    if let Err(errors) = ir.validate() {
        let lines: Vec<String> = errors.iter().map(|e| format!("  {e}")).collect();
        return Err(format!(
            "{} has {} invalid type reference(s):\n{}",
            path.display(),
            errors.len(),
            lines.join("\n")
        )
        .into());
    }
    log::debug!("loaded {} types from {}", ir.len(), path.display());
    Ok(ir)
}

/// Picks the top component: the explicit name if given, else the only
/// component type that no other type refers to.
pub fn infer_top(ir: &Context, explicit: Option<&str>) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(top) = explicit {
        return Ok(top.to_string());
    }
    let mut referenced = BTreeSet::new();
    for (_, named) in ir.iter() {
        collect_refs(&named.datatype, &mut referenced);
    }
    let roots: Vec<&str> = ir
        .iter()
        .filter(|(_, n)| n.datatype.is_component())
        .map(|(_, n)| n.name.as_str())
        .filter(|name| !referenced.contains(*name))
        .collect();
    match roots.as_slice() {
        [top] => Ok(top.to_string()),
        [] => Err("the design has no root component; pass --top".into()),
        many => Err(format!(
            "cannot infer the top component from {}; pass --top",
            many.join(", ")
        )
        .into()),
    }
}

fn collect_refs(dt: &DataType, out: &mut BTreeSet<String>) {
    if let DataType::Ref { name } = dt {
        out.insert(name.clone());
        return;
    }
    if let Some(st) = dt.as_struct() {
        if let Some(sup) = &st.super_type {
            collect_refs(sup, out);
        }
        for f in &st.fields {
            collect_refs(&f.datatype, out);
        }
        return;
    }
    dt.for_each_child(|child| collect_refs(child, out));
}

/// Elaborates `top`, printing every error on failure.
pub fn elaborate(
    ir: &Context,
    top: &str,
    bindings: TopBindings,
) -> Result<Option<Elaborated>, Box<dyn std::error::Error>> {
    match hwsim_elaborate::elaborate(ir, top, bindings, ElabSettings::default()) {
        Ok(e) => Ok(Some(e)),
        Err(errors) => {
            render_errors(&errors);
            Ok(None)
        }
    }
}

/// Prints elaboration errors to stderr. Returns the count.
pub fn render_errors(errors: &ElabErrors) -> usize {
    for e in errors.iter() {
        eprintln!("error: {e}");
    }
    eprintln!(
        "elaboration failed with {} error{}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    );
    errors.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_ir::ComponentBuilder;

    fn design() -> Context {
        let mut ir = Context::new();
        let mut leaf = ComponentBuilder::new("Leaf");
        leaf.input("a", 1);
        ir.add_type(leaf.build()).unwrap();
        let mut top = ComponentBuilder::new("Top");
        top.instance("leaf", "Leaf");
        ir.add_type(top.build()).unwrap();
        ir
    }

    #[test]
    fn top_is_the_unreferenced_component() {
        assert_eq!(infer_top(&design(), None).unwrap(), "Top");
        assert_eq!(infer_top(&design(), Some("Leaf")).unwrap(), "Leaf");
    }

    #[test]
    fn two_roots_are_ambiguous() {
        let mut ir = design();
        ir.add_type(ComponentBuilder::new("Other").build()).unwrap();
        let err = infer_top(&ir, None).unwrap_err().to_string();
        assert!(err.contains("Other"), "{err}");
        assert!(err.contains("Top"), "{err}");
    }

    #[test]
    fn load_round_trips_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.json");
        std::fs::write(&path, design().to_json().unwrap()).unwrap();
        let ir = load_design(&path).unwrap();
        assert!(ir.lookup("Top").is_some());
        assert!(ir.lookup("Leaf").is_some());
    }

    #[test]
    fn load_rejects_dangling_refs() {
        let mut ir = Context::new();
        let mut top = ComponentBuilder::new("Top");
        top.instance("ghost", "Ghost");
        ir.add_type(top.build()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.json");
        std::fs::write(&path, ir.to_json().unwrap()).unwrap();
        let err = load_design(&path).unwrap_err().to_string();
        assert!(err.contains("Ghost"), "{err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_design(Path::new("/nonexistent/design.json"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot read"), "{err}");
    }
}
