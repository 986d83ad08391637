//! Bind resolution.
//!
//! Each side of a bind is resolved against the declaring instance into an
//! [`Endpoint`]. Binds run in three bands: those whose source is a method,
//! then those whose source is an export, then everything else. Within a
//! band declaration order is kept.
//!
//! Signal binds become propagation edges in the [`SimTree`]. Object binds
//! hand the runtime object to the unbound side; two unbound ports are
//! linked and receive the object together once one of them is bound.

use crate::const_eval::ConstEnv;
use crate::context::{ElaborationContext, FieldRef, TopBindings};
use crate::errors::ElabError;
use hwsim_ir::{analyze, Bind, Builtin, DataType, Direction, Expr, FieldKind};
use hwsim_sim::{
    AddrHandle, CompId, EventHookup, FieldSlot, Handle, RegionStorage, SimError, SimTree,
    Storage, Value,
};
use std::collections::BTreeMap;
use std::rc::Rc;

/// One side of a bind, resolved against the declaring instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// A field.
    Field(FieldRef),
    /// A function of an instance.
    Method {
        /// The owning instance.
        comp: CompId,
        /// Function name.
        name: String,
    },
    /// A member of an object field: `mmap`, `at` or an interface method.
    Member {
        /// The object field.
        slot: FieldRef,
        /// Member name.
        name: String,
    },
    /// A structural value.
    Value(Value),
}

/// Resolves a bind operand.
pub fn resolve_endpoint(tree: &SimTree, comp: CompId, expr: &Expr) -> Result<Endpoint, SimError> {
    if let Some(path) = expr.field_path() {
        return tree.follow(comp, &path).map(Endpoint::Field);
    }
    if let Expr::Attribute { value, attr } = expr {
        let owner = match value.as_ref() {
            Expr::RefSelf => Some(comp),
            other => match other.field_path() {
                Some(path) => {
                    let at = tree.follow(comp, &path)?;
                    match &tree.slot(at.0, at.1)?.storage {
                        Storage::Component(child) => Some(*child),
                        _ => {
                            return Ok(Endpoint::Member {
                                slot: at,
                                name: attr.clone(),
                            })
                        }
                    }
                }
                None => None,
            },
        };
        if let Some(owner) = owner {
            let c = tree.comp(owner);
            if c.functions.contains_key(attr) {
                return Ok(Endpoint::Method {
                    comp: owner,
                    name: attr.clone(),
                });
            }
            if let Some(index) = c.field_index(attr) {
                return Ok(Endpoint::Field((owner, index)));
            }
            return Err(SimError::UnknownField {
                component: c.path.clone(),
                field: attr.clone(),
            });
        }
    }
    ConstEnv::new(tree, comp).eval(expr).map(Endpoint::Value)
}

/// A readable form of an endpoint for logs and the bind record.
pub fn describe(tree: &SimTree, endpoint: &Endpoint) -> String {
    let field_name = |(c, i): FieldRef| {
        let comp = tree.comp(c);
        let name = comp.field(i).map(|f| f.name.as_str()).unwrap_or("?");
        format!("{}.{name}", comp.path)
    };
    match endpoint {
        Endpoint::Field(at) => field_name(*at),
        Endpoint::Method { comp, name } => format!("{}.{name}()", tree.comp(*comp).path),
        Endpoint::Member { slot, name } => format!("{}.{name}", field_name(*slot)),
        Endpoint::Value(v) => v.to_string(),
    }
}

fn rank(tree: &SimTree, comp: CompId, bind: &Bind) -> u8 {
    match resolve_endpoint(tree, comp, &bind.rhs) {
        Ok(Endpoint::Method { .. }) => 0,
        Ok(Endpoint::Field(at)) if is_export(tree, at) => 1,
        _ => 2,
    }
}

fn is_export(tree: &SimTree, (c, i): FieldRef) -> bool {
    matches!(tree.slot(c, i), Ok(s) if s.kind == FieldKind::Export)
}

/// Applies the binds declared on `comp`, in band order.
pub fn apply_binds(ctx: &mut ElaborationContext<'_>, comp: CompId, binds: &[&Bind]) {
    let mut ordered: Vec<(u8, &Bind)> = binds
        .iter()
        .map(|b| (rank(&ctx.tree, comp, b), *b))
        .collect();
    ordered.sort_by_key(|(band, _)| *band);
    for (_, bind) in ordered {
        if let Err(e) = apply_bind(ctx, comp, bind) {
            ctx.error(e);
        }
    }
}

fn violation(ctx: &ElaborationContext<'_>, comp: CompId, reason: String) -> ElabError {
    ElabError::BindViolation {
        component: ctx.tree.comp(comp).path.clone(),
        reason,
    }
}

fn endpoint_error(ctx: &ElaborationContext<'_>, comp: CompId, e: SimError) -> ElabError {
    match e {
        SimError::UnknownField { component, field } => ElabError::UnknownField { component, field },
        other => violation(ctx, comp, other.to_string()),
    }
}

fn apply_bind(ctx: &mut ElaborationContext<'_>, comp: CompId, bind: &Bind) -> Result<(), ElabError> {
    if bind.lhs.is_constant() {
        return Err(violation(ctx, comp, "a literal cannot be a bind target".into()));
    }
    let lhs = resolve_endpoint(&ctx.tree, comp, &bind.lhs)
        .map_err(|e| endpoint_error(ctx, comp, e))?;
    match lhs {
        Endpoint::Value(v) => Err(violation(
            ctx,
            comp,
            format!("bind target must be a field, found {}", v.type_name()),
        )),
        Endpoint::Method { name, .. } => Err(violation(
            ctx,
            comp,
            format!("method '{name}' cannot be a bind target"),
        )),
        Endpoint::Member { slot, name } if name == "mmap" => {
            map_regions(ctx, comp, slot, &bind.rhs)
        }
        Endpoint::Member { slot, name } if name == "at" => hook_event(ctx, comp, slot, &bind.rhs),
        Endpoint::Member { slot, name } => bind_member(ctx, comp, slot, &name, &bind.rhs),
        Endpoint::Field(target) => {
            let rhs = resolve_endpoint(&ctx.tree, comp, &bind.rhs)
                .map_err(|e| endpoint_error(ctx, comp, e))?;
            connect(ctx, comp, target, rhs)
        }
    }
}

fn storage_kind(s: &Storage) -> &'static str {
    match s {
        Storage::Signal => "signal",
        Storage::Const(_) => "constant",
        Storage::Component(_) => "instance",
        Storage::Object(_) => "object",
        Storage::Unbound => "unbound port",
    }
}

fn record(ctx: &mut ElaborationContext<'_>, lhs: String, rhs: String) {
    log::debug!("bind {lhs} <- {rhs}");
    ctx.tree.record_bind(format!("{lhs} <- {rhs}"));
}

fn connect(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    target: FieldRef,
    source: Endpoint,
) -> Result<(), ElabError> {
    let slot = ctx.tree.slot(target.0, target.1)?.clone();
    if let Storage::Const(_) = slot.storage {
        return Err(violation(
            ctx,
            comp,
            format!("constant '{}' cannot be a bind target", slot.name),
        ));
    }
    let lhs_desc = describe(&ctx.tree, &Endpoint::Field(target));
    let rhs_desc = describe(&ctx.tree, &source);
    match source {
        Endpoint::Field(from) => connect_fields(ctx, comp, target, from)?,
        Endpoint::Method { comp: owner, name } => match slot.storage {
            Storage::Unbound => ctx.bind_object(target, Value::Obj(Handle::Method { comp: owner, name })),
            _ => {
                return Err(violation(
                    ctx,
                    comp,
                    format!("{} '{}' cannot be bound to a method", storage_kind(&slot.storage), slot.name),
                ))
            }
        },
        Endpoint::Value(v) => match slot.storage {
            Storage::Signal => set_initial(ctx, target, &slot, v),
            Storage::Unbound => ctx.bind_object(target, v),
            _ => {
                return Err(violation(
                    ctx,
                    comp,
                    format!("{} '{}' already holds a value", storage_kind(&slot.storage), slot.name),
                ))
            }
        },
        Endpoint::Member { name, .. } => {
            return Err(violation(
                ctx,
                comp,
                format!("'{}' cannot be bound to member '{name}'", slot.name),
            ))
        }
    }
    record(ctx, lhs_desc, rhs_desc);
    Ok(())
}

fn set_initial(ctx: &ElaborationContext<'_>, at: FieldRef, slot: &FieldSlot, v: Value) {
    ctx.tree
        .comp(at.0)
        .state
        .set_value(slot.key, v.mask(slot.width, slot.signed));
}

fn connect_fields(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    l: FieldRef,
    r: FieldRef,
) -> Result<(), ElabError> {
    let ls = ctx.tree.slot(l.0, l.1)?.clone();
    let rs = ctx.tree.slot(r.0, r.1)?.clone();
    match (&ls.storage, &rs.storage) {
        (Storage::Signal, Storage::Signal) => connect_signals(ctx, comp, (l, &ls), (r, &rs))?,
        (Storage::Signal, Storage::Const(v)) => set_initial(ctx, l, &ls, v.clone()),
        (Storage::Unbound, Storage::Unbound) => ctx.link(l, r),
        (Storage::Unbound, Storage::Object(v)) => ctx.bind_object(l, v.clone()),
        (Storage::Object(v), Storage::Unbound) => ctx.bind_object(r, v.clone()),
        (Storage::Unbound, Storage::Component(c)) => {
            ctx.bind_object(l, Value::Obj(Handle::Component(*c)))
        }
        (a, b) => {
            return Err(violation(
                ctx,
                comp,
                format!(
                    "cannot bind {} '{}' to {} '{}'",
                    storage_kind(a),
                    ls.name,
                    storage_kind(b),
                    rs.name
                ),
            ))
        }
    }
    Ok(())
}

/// One side of a signal bind.
#[derive(Debug, Clone, Copy)]
struct SignalEnd {
    at: FieldRef,
    direction: Option<Direction>,
    depth: usize,
}

/// Chooses `(driver, target)` for a signal bind `lhs <- rhs`.
///
/// An output drives an input. Between two inputs the shallower side drives,
/// between two outputs the deeper one. A side without a direction is driven
/// by an output and drives an input. Otherwise the right-hand side drives.
fn pick_driver(lhs: SignalEnd, rhs: SignalEnd) -> (FieldRef, FieldRef) {
    use Direction::{Input, Output};
    let dir = |d: Option<Direction>| d.filter(|d| *d != Direction::InOut);
    let rhs_drives = match (dir(lhs.direction), dir(rhs.direction)) {
        (Some(Output), Some(Input)) => false,
        (Some(Input), Some(Output)) => true,
        (Some(Input), Some(Input)) => rhs.depth <= lhs.depth,
        (Some(Output), Some(Output)) => rhs.depth >= lhs.depth,
        (None, Some(Input)) | (Some(Output), None) => false,
        _ => true,
    };
    if rhs_drives {
        (rhs.at, lhs.at)
    } else {
        (lhs.at, rhs.at)
    }
}

/// Returns `true` if a sync or comb process of the owning instance writes
/// the field.
fn written_by_process(tree: &SimTree, (c, i): FieldRef) -> bool {
    let comp = tree.comp(c);
    comp.sync_processes
        .iter()
        .chain(&comp.comb_processes)
        .any(|f| analyze(&f.body).writes.iter().any(|p| p[..] == [i]))
}

fn connect_signals(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    (l, ls): (FieldRef, &FieldSlot),
    (r, rs): (FieldRef, &FieldSlot),
) -> Result<(), ElabError> {
    let end = |at: FieldRef, slot: &FieldSlot| SignalEnd {
        at,
        direction: slot.direction,
        depth: ctx.tree.comp(at.0).depth(),
    };
    let (driver, target) = pick_driver(end(l, ls), end(r, rs));

    let both_outputs =
        ls.direction == Some(Direction::Output) && rs.direction == Some(Direction::Output);
    if both_outputs
        && (ctx.tree.comp(comp).has_sync_or_comb() || written_by_process(&ctx.tree, target))
    {
        let target_desc = describe(&ctx.tree, &Endpoint::Field(target));
        let driver_desc = describe(&ctx.tree, &Endpoint::Field(driver));
        return Err(violation(
            ctx,
            comp,
            format!("output '{target_desc}' would have a second driver in output '{driver_desc}'"),
        ));
    }

    ctx.tree.add_signal_binding(driver, target);
    let current = {
        let d = ctx.tree.comp(driver.0);
        d.state.read(d.fields[driver.1 as usize].key)
    };
    let tslot = if target == l { ls } else { rs };
    set_initial(ctx, target, tslot, current);
    Ok(())
}

fn map_regions(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    space_at: FieldRef,
    rhs: &Expr,
) -> Result<(), ElabError> {
    let space_path = describe(&ctx.tree, &Endpoint::Field(space_at));
    let space = match &ctx.tree.slot(space_at.0, space_at.1)?.storage {
        Storage::Object(Value::Obj(Handle::AddressSpace(s))) => s.clone(),
        other => {
            let kind = storage_kind(other);
            return Err(violation(
                ctx,
                comp,
                format!("'{space_path}' is a {kind}, not an address space"),
            ));
        }
    };
    let entries: Vec<&Expr> = match rhs {
        Expr::Tuple { elts } => elts.iter().collect(),
        other => vec![other],
    };
    for entry in entries {
        let mapped = map_one(ctx, comp, entry).and_then(|(base, storage)| {
            let label = storage.label();
            space
                .borrow_mut()
                .add_mapping(base, storage)
                .map_err(|e| match e {
                    SimError::RegionOverlap { base, size } => ElabError::RegionOverlap {
                        space: space_path.clone(),
                        base,
                        size,
                    },
                    other => ElabError::Runtime(other),
                })?;
            Ok((base, label))
        });
        match mapped {
            Ok((base, label)) => {
                record(ctx, format!("{space_path}.mmap"), format!("{label}@0x{base:x}"))
            }
            Err(e) => ctx.error(e),
        }
    }
    Ok(())
}

/// Evaluates one `at(offset, storage)` entry.
fn map_one(
    ctx: &ElaborationContext<'_>,
    comp: CompId,
    entry: &Expr,
) -> Result<(u64, RegionStorage), ElabError> {
    let (offset, storage) = match entry {
        Expr::Call { func, args, .. }
            if matches!(func.as_ref(), Expr::Builtin(Builtin::At)) && args.len() == 2 =>
        {
            (&args[0], &args[1])
        }
        _ => {
            return Err(violation(
                ctx,
                comp,
                "mmap entries must be at(offset, storage)".into(),
            ))
        }
    };
    let env = ConstEnv::new(&ctx.tree, comp);
    let base = env
        .eval(offset)
        .and_then(|v| v.as_u64())
        .map_err(|e| violation(ctx, comp, e.to_string()))?;
    let storage = match env.eval(storage).map_err(|e| violation(ctx, comp, e.to_string()))? {
        Value::Obj(Handle::Memory(m)) => RegionStorage::Memory(m),
        Value::Obj(Handle::RegFile(r)) => RegionStorage::RegFile(r),
        other => {
            return Err(violation(
                ctx,
                comp,
                format!("cannot map a {} into an address space", other.type_name()),
            ))
        }
    };
    Ok((base, storage))
}

fn hook_event(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    event_at: FieldRef,
    rhs: &Expr,
) -> Result<(), ElabError> {
    let event_path = describe(&ctx.tree, &Endpoint::Field(event_at));
    let event = match &ctx.tree.slot(event_at.0, event_at.1)?.storage {
        Storage::Object(Value::Obj(Handle::Event(ev))) => ev.clone(),
        _ => {
            return Err(violation(
                ctx,
                comp,
                format!("'{event_path}' is not an event"),
            ))
        }
    };
    let source = resolve_endpoint(&ctx.tree, comp, rhs).map_err(|e| endpoint_error(ctx, comp, e))?;
    let Endpoint::Method { comp: owner, name } = source else {
        return Err(violation(
            ctx,
            comp,
            format!("the callback of '{event_path}' must be a method"),
        ));
    };
    let method_desc = describe(
        &ctx.tree,
        &Endpoint::Method {
            comp: owner,
            name: name.clone(),
        },
    );
    ctx.tree.add_event_hookup(EventHookup {
        event,
        comp: owner,
        method: name,
    });
    record(ctx, format!("{event_path}.at"), method_desc);
    Ok(())
}

fn bind_member(
    ctx: &mut ElaborationContext<'_>,
    comp: CompId,
    slot_at: FieldRef,
    member: &str,
    rhs: &Expr,
) -> Result<(), ElabError> {
    let slot_path = describe(&ctx.tree, &Endpoint::Field(slot_at));
    if let Some(DataType::Protocol(p)) = ctx.declared_type(slot_at) {
        if !p.methods.iter().any(|m| m.name == member) {
            let reason = format!("protocol '{}' of '{slot_path}' has no method '{member}'", p.name);
            return Err(violation(ctx, comp, reason));
        }
    }
    let source = resolve_endpoint(&ctx.tree, comp, rhs).map_err(|e| endpoint_error(ctx, comp, e))?;
    let rhs_desc = describe(&ctx.tree, &source);
    let value = match source {
        Endpoint::Method { comp: owner, name } => Value::Obj(Handle::Method { comp: owner, name }),
        Endpoint::Value(v) => v,
        Endpoint::Field(at) => match &ctx.tree.slot(at.0, at.1)?.storage {
            Storage::Object(v) => v.clone(),
            Storage::Component(c) => Value::Obj(Handle::Component(*c)),
            other => {
                let kind = storage_kind(other);
                return Err(violation(
                    ctx,
                    comp,
                    format!("interface member '{member}' cannot be a {kind}"),
                ));
            }
        },
        Endpoint::Member { .. } => {
            return Err(violation(
                ctx,
                comp,
                format!("interface member '{member}' must be a method"),
            ))
        }
    };

    let unbound = ctx.tree.slot(slot_at.0, slot_at.1)?.storage == Storage::Unbound;
    if unbound {
        let mut methods = BTreeMap::new();
        methods.insert(member.to_string(), value);
        ctx.bind_object(slot_at, Value::Obj(Handle::Interface(Rc::new(methods))));
    } else {
        let storage = &mut ctx.tree.comp_mut(slot_at.0).fields[slot_at.1 as usize].storage;
        let inserted = match storage {
            Storage::Object(Value::Obj(Handle::Interface(methods))) => {
                Rc::make_mut(methods).insert(member.to_string(), value);
                true
            }
            _ => false,
        };
        if !inserted {
            return Err(violation(
                ctx,
                comp,
                format!("'{slot_path}' has no member '{member}'"),
            ));
        }
    }
    record(ctx, format!("{slot_path}.{member}"), rhs_desc);
    Ok(())
}

/// Narrows a channel or address space to the shape of the port receiving
/// it. Other values pass through.
pub fn adapt_to_port(declared: Option<&DataType>, value: Value) -> Value {
    match (declared, value) {
        (Some(DataType::GetIf { .. }), Value::Obj(Handle::Channel(c))) => {
            Value::Obj(Handle::GetPort(c.get_if()))
        }
        (Some(DataType::PutIf { .. }), Value::Obj(Handle::Channel(c))) => {
            Value::Obj(Handle::PutPort(c.put_if()))
        }
        (Some(DataType::AddrHandle), Value::Obj(Handle::AddressSpace(s))) => {
            Value::Obj(Handle::AddrHandle(AddrHandle::new(s, 0)))
        }
        (_, v) => v,
    }
}

/// Applies values supplied for the root's fields.
pub fn apply_top_bindings(ctx: &mut ElaborationContext<'_>, root: CompId, top: TopBindings) {
    for (name, value) in top {
        let c = ctx.tree.comp(root);
        let Some(index) = c.field_index(&name) else {
            let component = c.path.clone();
            ctx.error(ElabError::UnknownField {
                component,
                field: name,
            });
            continue;
        };
        let slot = c.fields[index as usize].clone();
        let desc = format!("{}.{name}", c.path);
        match slot.storage {
            Storage::Signal => set_initial(ctx, (root, index), &slot, value.clone()),
            Storage::Unbound => ctx.bind_object((root, index), value.clone()),
            other => {
                let reason = format!("{} '{name}' cannot be bound from outside", storage_kind(&other));
                let e = violation(ctx, root, reason);
                ctx.error(e);
                continue;
            }
        }
        record(ctx, desc, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_sim::Channel;

    fn end(depth: usize, direction: Option<Direction>, index: u32) -> SignalEnd {
        SignalEnd {
            at: (CompId::from_raw(depth as u32), index),
            direction,
            depth,
        }
    }

    #[test]
    fn output_drives_input() {
        let out = end(1, Some(Direction::Output), 0);
        let inp = end(1, Some(Direction::Input), 1);
        assert_eq!(pick_driver(inp, out), (out.at, inp.at));
        assert_eq!(pick_driver(out, inp), (out.at, inp.at));
    }

    #[test]
    fn inputs_are_driven_from_above() {
        let parent = end(0, Some(Direction::Input), 0);
        let child = end(1, Some(Direction::Input), 1);
        assert_eq!(pick_driver(child, parent), (parent.at, child.at));
        assert_eq!(pick_driver(parent, child), (parent.at, child.at));
    }

    #[test]
    fn outputs_are_driven_from_below() {
        let parent = end(0, Some(Direction::Output), 0);
        let child = end(1, Some(Direction::Output), 1);
        assert_eq!(pick_driver(parent, child), (child.at, parent.at));
        assert_eq!(pick_driver(child, parent), (child.at, parent.at));
    }

    #[test]
    fn undirected_sides() {
        let plain = end(0, None, 0);
        let inp = end(1, Some(Direction::Input), 1);
        let out = end(1, Some(Direction::Output), 2);
        assert_eq!(pick_driver(plain, inp), (plain.at, inp.at));
        assert_eq!(pick_driver(plain, out), (out.at, plain.at));
        let other = end(0, None, 3);
        assert_eq!(pick_driver(plain, other), (other.at, plain.at));
    }

    #[test]
    fn channels_narrow_to_port_shape() {
        let ch = Channel::new(2);
        let get = DataType::GetIf {
            element_type: Box::new(DataType::uint(8)),
        };
        let put = DataType::PutIf {
            element_type: Box::new(DataType::uint(8)),
        };
        let v = Value::Obj(Handle::Channel(ch.clone()));
        assert_eq!(adapt_to_port(Some(&get), v.clone()).type_name(), "get port");
        assert_eq!(adapt_to_port(Some(&put), v.clone()).type_name(), "put port");
        assert_eq!(adapt_to_port(None, v.clone()), v);
        assert_eq!(adapt_to_port(Some(&get), Value::Int(1)), Value::Int(1));
    }
}
