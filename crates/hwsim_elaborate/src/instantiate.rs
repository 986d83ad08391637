//! Recursive instantiation of component types.
//!
//! Instances are built depth-first: every child is complete, binds
//! included, before the parent's binds run. Within one instance, const
//! fields are evaluated first so that widths, initial values and
//! construction arguments of the other fields can refer to them.

use crate::bind;
use crate::const_eval::{to_width, ConstEnv};
use crate::context::ElaborationContext;
use crate::errors::ElabError;
use hwsim_ir::{
    Bind, ComponentType, Context, DataType, EnumType, Field, FieldKind, Function, IrError,
};
use hwsim_sim::{
    AddressSpace, Channel, CompId, CompInstance, Event, FieldSlot, Handle, Lock, Memory,
    RegFile, Storage, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds an instance of the component `datatype` named `name`.
///
/// Errors local to one field or bind are recorded on the context and the
/// instance is still returned. The error is returned only when the
/// instance itself cannot exist.
pub fn instantiate(
    ctx: &mut ElaborationContext<'_>,
    datatype: &DataType,
    name: &str,
    parent: Option<CompId>,
    kwargs: &[(String, Value)],
) -> Result<CompId, ElabError> {
    let ir = ctx.ir;
    let path = match parent {
        Some(p) => format!("{}.{name}", ctx.tree.comp(p).path),
        None => name.to_string(),
    };
    let comp = component_type(ir, datatype, &path)?;
    ctx.push_instantiation(comp.name())?;
    let result = build_instance(ctx, comp, name, path, parent, kwargs);
    ctx.pop_instantiation();
    result
}

/// Resolves `datatype` to a component type.
pub fn component_type<'a>(
    ir: &'a Context,
    datatype: &'a DataType,
    referenced_by: &str,
) -> Result<&'a ComponentType, ElabError> {
    let resolved = ir
        .resolve(datatype)
        .map_err(|e| ir_error(e, referenced_by))?;
    resolved.as_component().ok_or_else(|| {
        ElabError::NotAComponent(
            datatype
                .name()
                .or_else(|| resolved.name())
                .unwrap_or(referenced_by)
                .to_string(),
        )
    })
}

pub(crate) fn ir_error(e: IrError, referenced_by: &str) -> ElabError {
    match e {
        IrError::UnresolvedType { name, .. } => ElabError::UnresolvedType {
            name,
            referenced_by: referenced_by.to_string(),
        },
        other => ElabError::Ir(other),
    }
}

/// The component and its component ancestors, root ancestor first.
fn component_lineage<'a>(
    ir: &'a Context,
    comp: &'a ComponentType,
) -> Result<Vec<&'a ComponentType>, ElabError> {
    let mut chain = vec![comp];
    let mut current = comp;
    while let Some(sup) = &current.body.super_type {
        let resolved = ir.resolve(sup).map_err(|e| ir_error(e, current.name()))?;
        let Some(next) = resolved.as_component() else {
            break;
        };
        if chain.iter().any(|c| c.name() == next.name()) {
            let mut names: Vec<String> = chain.iter().map(|c| c.name().to_string()).collect();
            names.push(next.name().to_string());
            return Err(ElabError::RecursiveInstantiation { chain: names });
        }
        chain.push(next);
        current = next;
    }
    chain.reverse();
    Ok(chain)
}

/// Adds `f`, replacing an inherited process of the same name in place.
fn merge_process(list: &mut Vec<Rc<Function>>, f: &Function) {
    let f = Rc::new(f.clone());
    match list.iter_mut().find(|e| e.name == f.name) {
        Some(slot) => *slot = f,
        None => list.push(f),
    }
}

fn build_instance(
    ctx: &mut ElaborationContext<'_>,
    comp: &ComponentType,
    name: &str,
    path: String,
    parent: Option<CompId>,
    kwargs: &[(String, Value)],
) -> Result<CompId, ElabError> {
    let ir = ctx.ir;
    let fields = ir.all_fields(&comp.body).map_err(|e| ir_error(e, &path))?;
    let lineage = component_lineage(ir, comp)?;
    let functions = ir.functions(&comp.body).map_err(|e| ir_error(e, &path))?;

    log::debug!("instantiate {path}: {}", comp.name());
    let id = ctx
        .tree
        .alloc(CompInstance::new(name, path.clone(), comp.name(), parent));

    for (arg, _) in kwargs {
        if !fields.iter().any(|f| &f.name == arg) {
            ctx.error(ElabError::UnknownField {
                component: path.clone(),
                field: arg.clone(),
            });
        }
    }

    for f in &fields {
        let key = ctx.tree.key(&f.name);
        ctx.tree.comp_mut(id).fields.push(FieldSlot {
            name: f.name.clone(),
            key,
            kind: f.kind,
            direction: f.direction,
            width: 0,
            signed: false,
            storage: Storage::Unbound,
        });
    }
    {
        let inst = ctx.tree.comp_mut(id);
        for f in functions {
            inst.functions.insert(f.name.clone(), Rc::new(f.clone()));
        }
        for layer in &lineage {
            for f in &layer.sync_processes {
                merge_process(&mut inst.sync_processes, f);
            }
            for f in &layer.comb_processes {
                merge_process(&mut inst.comb_processes, f);
            }
            for f in &layer.processes {
                merge_process(&mut inst.processes, f);
            }
        }
    }

    let kwarg = |name: &str| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v);

    for (index, f) in fields.iter().enumerate().filter(|(_, f)| f.is_const) {
        let value = match (kwarg(&f.name), &f.initial_value) {
            (Some(v), _) => Ok(v.clone()),
            (None, Some(init)) => ConstEnv::new(&ctx.tree, id).eval(init),
            (None, None) => Ok(Value::Int(0)),
        };
        match value {
            Ok(v) => {
                log::trace!("{path}.{} = {v}", f.name);
                ctx.tree.comp_mut(id).fields[index].storage = Storage::Const(v);
            }
            Err(e) => ctx.error(ElabError::InvalidField {
                component: path.clone(),
                field: f.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    for (index, f) in fields.iter().enumerate().filter(|(_, f)| !f.is_const) {
        if let Err(e) = build_field(ctx, id, index as u32, f, kwarg(&f.name)) {
            ctx.error(e);
        }
    }

    if parent.is_none() {
        if let Some(top) = ctx.take_top_bindings() {
            bind::apply_top_bindings(ctx, id, top);
        }
    }

    let binds: Vec<&Bind> = lineage.iter().flat_map(|c| c.bind_map.iter()).collect();
    bind::apply_binds(ctx, id, &binds);
    Ok(id)
}

/// Number of bits needed for every variant value of `e`.
fn enum_bits(e: &EnumType) -> u32 {
    let max = e.variants.iter().map(|(_, v)| *v).max().unwrap_or(0);
    if max <= 0 {
        1
    } else {
        128 - max.leading_zeros()
    }
}

fn build_field(
    ctx: &mut ElaborationContext<'_>,
    id: CompId,
    index: u32,
    f: &Field,
    kwarg: Option<&Value>,
) -> Result<(), ElabError> {
    let ir = ctx.ir;
    let path = ctx.tree.comp(id).path.clone();
    let invalid = |reason: String| ElabError::InvalidField {
        component: path.clone(),
        field: f.name.clone(),
        reason,
    };
    let resolved = ir
        .resolve(&f.datatype)
        .map_err(|e| ir_error(e, &format!("{path}.{}", f.name)))?;
    let width = match &f.width_expr {
        Some(e) => Some(
            ConstEnv::new(&ctx.tree, id)
                .eval(e)
                .and_then(|v| to_width(&v))
                .map_err(|e| invalid(e.to_string()))?,
        ),
        None => None,
    };

    let (storage, shape) = match resolved {
        DataType::Int(it) => {
            let bits = width.unwrap_or(it.bits);
            if bits == 0 {
                return Err(invalid("integer field needs a width".into()));
            }
            (Storage::Signal, Some((bits, it.signed)))
        }
        DataType::Enum(e) => (Storage::Signal, Some((width.unwrap_or(enum_bits(e)), false))),
        DataType::String => (Storage::Signal, Some((0, false))),
        DataType::Component(_) | DataType::Extern(_) => {
            let kwargs = match &f.kwargs_expr {
                Some(list) => {
                    let env = ConstEnv::new(&ctx.tree, id);
                    list.iter()
                        .map(|k| Ok((k.arg.clone(), env.eval(&k.value)?)))
                        .collect::<Result<Vec<_>, hwsim_sim::SimError>>()
                        .map_err(|e| invalid(e.to_string()))?
                }
                None => Vec::new(),
            };
            let child = instantiate(ctx, &f.datatype, &f.name, Some(id), &kwargs)?;
            (Storage::Component(child), None)
        }
        _ if kwarg.is_some() => {
            let v = kwarg.cloned().unwrap_or(Value::None);
            let v = bind::adapt_to_port(Some(resolved), v);
            (Storage::Object(v), None)
        }
        DataType::Memory(m) => {
            let elem = width
                .or_else(|| ir.resolve(&m.element_type).ok().and_then(DataType::bit_width))
                .unwrap_or(32);
            let mem = Memory::new(elem, m.size);
            (
                Storage::Object(Value::Obj(Handle::Memory(Rc::new(RefCell::new(mem))))),
                None,
            )
        }
        DataType::RegFile(r) => {
            let rf = RegFile::new(r.name.clone(), &r.layout());
            (
                Storage::Object(Value::Obj(Handle::RegFile(Rc::new(RefCell::new(rf))))),
                None,
            )
        }
        DataType::AddressSpace => (
            Storage::Object(Value::Obj(Handle::AddressSpace(Rc::new(RefCell::new(
                AddressSpace::new(),
            ))))),
            None,
        ),
        DataType::Channel(c) if f.kind != FieldKind::Port => (
            Storage::Object(Value::Obj(Handle::Channel(Channel::new(c.depth)))),
            None,
        ),
        DataType::Lock => (Storage::Object(Value::Obj(Handle::Lock(Lock::new()))), None),
        DataType::Event => (
            Storage::Object(Value::Obj(Handle::Event(Event::new(ctx.timebase.clone())))),
            None,
        ),
        DataType::Channel(_)
        | DataType::AddrHandle
        | DataType::GetIf { .. }
        | DataType::PutIf { .. }
        | DataType::Protocol(_) => {
            ctx.declare_unbound((id, index), resolved.clone());
            (Storage::Unbound, None)
        }
        DataType::Struct(_) | DataType::Class(_) | DataType::Tuple { .. } | DataType::Ref { .. } => {
            return Err(invalid(format!(
                "fields of type {} are not supported",
                resolved.name().unwrap_or("tuple")
            )))
        }
    };

    let key = ctx.tree.comp(id).fields[index as usize].key;
    if let Some((bits, signed)) = shape {
        let init = match (kwarg, &f.initial_value) {
            (Some(v), _) => Some(v.clone()),
            (None, Some(e)) => Some(
                ConstEnv::new(&ctx.tree, id)
                    .eval(e)
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            (None, None) => None,
        };
        if let Some(v) = init {
            ctx.tree.comp(id).state.set_value(key, v.mask(bits, signed));
        }
        let slot = &mut ctx.tree.comp_mut(id).fields[index as usize];
        slot.width = bits;
        slot.signed = signed;
    }
    ctx.tree.comp_mut(id).fields[index as usize].storage = storage;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ElabSettings, TopBindings};
    use hwsim_common::Interner;
    use hwsim_ir::{BinOp, ComponentBuilder, Expr, Keyword, MemoryType};
    use hwsim_sim::Timebase;

    fn elaborate_top(ir: &Context, top: &str) -> (hwsim_sim::SimTree, Vec<ElabError>) {
        let mut ctx = ElaborationContext::new(
            ir,
            Rc::new(Interner::new()),
            Timebase::new(),
            ElabSettings::default(),
            TopBindings::new(),
        );
        let dt = DataType::named(top);
        let _ = instantiate(&mut ctx, &dt, top, None, &[]);
        let errors = std::mem::take(&mut ctx.errors).into_vec();
        (ctx.tree, errors)
    }

    #[test]
    fn const_widths_and_kwargs() {
        let mut ir = Context::new();
        let mut reg = ComponentBuilder::new("Reg");
        let w = reg.constant("W", 4);
        reg.add(Field::new("q", DataType::uint(0)).with_width(Expr::field(w)));
        ir.add_type(reg.build()).unwrap();

        let mut top = ComponentBuilder::new("Top");
        let n = top.constant("N", 3);
        top.instance("small", "Reg");
        top.instance_with(
            "wide",
            "Reg",
            vec![Keyword {
                arg: "W".into(),
                value: Expr::bin(Expr::field(n), BinOp::Mult, Expr::int(4)),
            }],
        );
        ir.add_type(top.build()).unwrap();

        let (tree, errors) = elaborate_top(&ir, "Top");
        assert!(errors.is_empty(), "{errors:?}");
        let small = tree.find("small").unwrap();
        let wide = tree.find("wide").unwrap();
        assert_eq!(tree.comp(small).fields[1].width, 4);
        assert_eq!(tree.comp(wide).fields[1].width, 12);
        assert_eq!(tree.comp(wide).fields[0].storage, Storage::Const(Value::Int(12)));
    }

    #[test]
    fn initial_values_are_masked() {
        let mut ir = Context::new();
        let mut b = ComponentBuilder::new("Top");
        b.add(Field::new("x", DataType::uint(4)).with_init(Expr::int(0x1f)));
        ir.add_type(b.build()).unwrap();
        let (tree, errors) = elaborate_top(&ir, "Top");
        assert!(errors.is_empty());
        let root = tree.comp(tree.root());
        assert_eq!(root.state.read(root.fields[0].key), Value::Int(0xf));
    }

    #[test]
    fn objects_get_runtime_storage() {
        let mut ir = Context::new();
        let mut b = ComponentBuilder::new("Top");
        b.add(Field::new(
            "mem",
            DataType::Memory(MemoryType {
                element_type: Box::new(DataType::uint(8)),
                size: 16,
            }),
        ));
        b.add(Field::new("bus", DataType::AddressSpace));
        b.add(Field::new("lock", DataType::Lock));
        b.add(Field::new("ev", DataType::Event));
        ir.add_type(b.build()).unwrap();
        let (tree, errors) = elaborate_top(&ir, "Top");
        assert!(errors.is_empty());
        let kinds: Vec<&str> = tree
            .comp(tree.root())
            .fields
            .iter()
            .map(|f| match &f.storage {
                Storage::Object(v) => v.type_name(),
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["memory", "address space", "lock", "event"]);
    }

    #[test]
    fn inherited_fields_and_processes() {
        let mut ir = Context::new();
        let mut base = ComponentBuilder::new("Base");
        let clk = base.input("clock", 1);
        base.signal("count", 8);
        base.sync("tick", clk, None, vec![]);
        ir.add_type(base.build()).unwrap();
        let mut derived = ComponentBuilder::new("Derived").extends("Base", 2);
        derived.signal("extra", 4);
        derived.sync("tick", clk, None, vec![]);
        ir.add_type(derived.build()).unwrap();

        let (tree, errors) = elaborate_top(&ir, "Derived");
        assert!(errors.is_empty());
        let root = tree.comp(tree.root());
        let names: Vec<&str> = root.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["clock", "count", "extra"]);
        assert_eq!(root.sync_processes.len(), 1);
    }

    #[test]
    fn recursion_is_an_error() {
        let mut ir = Context::new();
        let mut b = ComponentBuilder::new("Loop");
        b.instance("inner", "Loop");
        ir.add_type(b.build()).unwrap();
        let (_, errors) = elaborate_top(&ir, "Loop");
        assert!(matches!(
            errors.as_slice(),
            [ElabError::RecursiveInstantiation { .. }]
        ));
    }

    #[test]
    fn unresolved_and_unknown_kwargs() {
        let mut ir = Context::new();
        let mut b = ComponentBuilder::new("Top");
        b.instance("ghost", "Missing");
        b.instance_with(
            "child",
            "Leaf",
            vec![Keyword {
                arg: "nope".into(),
                value: Expr::int(1),
            }],
        );
        ir.add_type(b.build()).unwrap();
        ir.add_type(ComponentBuilder::new("Leaf").build()).unwrap();
        let (_, errors) = elaborate_top(&ir, "Top");
        assert!(matches!(
            &errors[0],
            ElabError::UnresolvedType { name, referenced_by } if name == "Missing" && referenced_by == "Top.ghost"
        ));
        assert!(matches!(&errors[1], ElabError::UnknownField { field, .. } if field == "nope"));
    }

    #[test]
    fn enum_width() {
        let e = EnumType {
            name: "State".into(),
            variants: vec![("Idle".into(), 0), ("Busy".into(), 5)],
        };
        assert_eq!(enum_bits(&e), 3);
    }
}
