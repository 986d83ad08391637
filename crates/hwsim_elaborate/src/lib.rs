//! Elaboration and bind resolution for hwsim designs.
//!
//! Turns a component type registered in an IR [`Context`] into a live
//! [`SimTree`]: every child is instantiated depth-first, const fields and
//! width expressions are evaluated against their owning instance, runtime
//! objects (memories, channels, events, ...) are created, and each
//! component's binds are applied once all of its children are complete.
//!
//! Structural problems are collected rather than reported one at a time:
//! a failed elaboration returns [`ElabErrors`] naming every unbound root
//! port, every bind violation and every unresolved type it found.
//!
//! # Usage
//!
//! ```ignore
//! let elaborated = elaborate(&ir, "Top", TopBindings::new(), ElabSettings::default())?;
//! let sim = elaborated.into_simulation(SimOptions::default())?;
//! sim.start()?;
//! ```

#![warn(missing_docs)]

pub mod bind;
pub mod const_eval;
pub mod context;
pub mod errors;
pub mod instantiate;

pub use context::{ElabSettings, ElaborationContext, TopBindings, DEFAULT_MAX_DEPTH};
pub use errors::{ElabError, ElabErrors};

use hwsim_common::Interner;
use hwsim_ir::{Context, DataType, FieldKind, IrError};
use hwsim_sim::{CompId, SimError, SimOptions, SimTree, Simulation, Storage, Timebase};
use std::rc::Rc;

/// An elaborated design, ready to simulate.
pub struct Elaborated {
    /// The component tree.
    pub tree: SimTree,
    /// The scheduler the tree's events were created on.
    pub timebase: Timebase,
}

impl Elaborated {
    /// Wires the tree into a [`Simulation`].
    pub fn into_simulation(self, options: SimOptions) -> Result<Simulation, SimError> {
        Simulation::new(self.tree, self.timebase, options)
    }
}

/// Elaborates the component type `top` as the root of a new tree.
///
/// `bindings` supply values for the root's fields before the root's own
/// binds run. Every error found is returned, not only the first.
pub fn elaborate(
    ir: &Context,
    top: &str,
    bindings: TopBindings,
    settings: ElabSettings,
) -> Result<Elaborated, ElabErrors> {
    if ir.lookup(top).is_none() {
        return Err(ElabError::Ir(IrError::UnknownType(top.to_string())).into());
    }
    let mut ctx = ElaborationContext::new(
        ir,
        Rc::new(Interner::new()),
        Timebase::new(),
        settings,
        bindings,
    );
    match instantiate::instantiate(&mut ctx, &DataType::named(top), top, None, &[]) {
        Ok(root) => check_unbound_ports(&mut ctx, root),
        Err(e) => ctx.error(e),
    }
    let (tree, timebase) = ctx.finish()?;
    log::debug!(
        "elaborated {top}: {} instances, {} binds",
        tree.len(),
        tree.bind_order().len()
    );
    Ok(Elaborated { tree, timebase })
}

/// Reports the root's unbound ports. Unbound ports further down only fail
/// when used, so they are logged.
fn check_unbound_ports(ctx: &mut ElaborationContext<'_>, root: CompId) {
    let unbound = |c: &hwsim_sim::CompInstance| -> Vec<String> {
        c.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Port && f.storage == Storage::Unbound)
            .map(|f| f.name.clone())
            .collect()
    };
    for (id, c) in ctx.tree.iter() {
        if id != root {
            for port in unbound(c) {
                log::warn!("port {}.{port} is unbound", c.path);
            }
        }
    }
    let root_comp = ctx.tree.comp(root);
    let ports = unbound(root_comp);
    if !ports.is_empty() && ctx.settings.require_top_ports {
        let component = root_comp.path.clone();
        ctx.error(ElabError::UnboundTopLevelPort { component, ports });
    }
}
