//! The elaborated component tree.
//!
//! A [`SimTree`] is produced by the elaborator and then owned by the
//! simulation. Its shape never changes after elaboration: the only mutable
//! parts are each instance's [`StateCell`] and the interiors of runtime
//! objects (memories, channels, ...).

use crate::error::SimError;
use crate::eval_state::StateCell;
use crate::event::Event;
use crate::value::{Handle, Value};
use hwsim_common::{ContentHash, ContentHasher, Ident, Interner};
use hwsim_ir::arena::Arena;
use hwsim_ir::{Direction, FieldKind, Function};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

hwsim_ir::define_id!(
    /// ID of a component instance in a [`SimTree`].
    CompId
);

/// What backs a field at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// A signal held in the instance's state, keyed by the field name.
    Signal,
    /// A structural constant.
    Const(Value),
    /// A child instance.
    Component(CompId),
    /// A runtime object, or the value a port was bound to.
    Object(Value),
    /// A port or export that nothing has been bound to yet.
    Unbound,
}

/// One field of an instance.
#[derive(Debug, Clone)]
pub struct FieldSlot {
    /// Field name.
    pub name: String,
    /// Interned name, the key into the instance's state.
    pub key: Ident,
    /// Field, port or export.
    pub kind: FieldKind,
    /// Signal direction.
    pub direction: Option<Direction>,
    /// Width in bits (signals only, 0 otherwise).
    pub width: u32,
    /// Signed signal.
    pub signed: bool,
    /// Runtime backing.
    pub storage: Storage,
}

impl FieldSlot {
    /// Returns `true` for signal fields.
    pub fn is_signal(&self) -> bool {
        self.storage == Storage::Signal
    }
}

/// A component instance.
#[derive(Debug)]
pub struct CompInstance {
    /// Instance name (the field name in the parent, or the type name at the
    /// root).
    pub name: String,
    /// Dotted path from the root.
    pub path: String,
    /// Name of the component type.
    pub type_name: String,
    /// The parent instance.
    pub parent: Option<CompId>,
    /// Fields in structural order.
    pub fields: Vec<FieldSlot>,
    /// Signal state.
    pub state: StateCell,
    /// Callable functions by name, overrides applied.
    pub functions: BTreeMap<String, Rc<Function>>,
    /// Clocked processes.
    pub sync_processes: Vec<Rc<Function>>,
    /// Combinational processes.
    pub comb_processes: Vec<Rc<Function>>,
    /// Free-running processes.
    pub processes: Vec<Rc<Function>>,
}

impl CompInstance {
    /// An instance with no fields or behavior yet.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        type_name: impl Into<String>,
        parent: Option<CompId>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            type_name: type_name.into(),
            parent,
            fields: Vec::new(),
            state: StateCell::new(),
            functions: BTreeMap::new(),
            sync_processes: Vec::new(),
            comb_processes: Vec::new(),
            processes: Vec::new(),
        }
    }

    /// Nesting depth; the root is 0.
    pub fn depth(&self) -> usize {
        self.path.matches('.').count()
    }

    /// Structural index of the named field.
    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
    }

    /// The field at `index`.
    pub fn field(&self, index: u32) -> Option<&FieldSlot> {
        self.fields.get(index as usize)
    }

    /// The field with the given state key.
    pub fn field_by_key(&self, key: Ident) -> Option<u32> {
        self.fields
            .iter()
            .position(|f| f.key == key)
            .map(|i| i as u32)
    }

    /// Child instances in field order.
    pub fn children(&self) -> impl Iterator<Item = CompId> + '_ {
        self.fields.iter().filter_map(|f| match &f.storage {
            Storage::Component(id) => Some(*id),
            _ => None,
        })
    }

    /// Returns `true` if the instance has sync or comb processes.
    pub fn has_sync_or_comb(&self) -> bool {
        !self.sync_processes.is_empty() || !self.comb_processes.is_empty()
    }
}

/// A method bound as the callback of an event.
#[derive(Debug, Clone)]
pub struct EventHookup {
    /// The event.
    pub event: Event,
    /// Instance owning the method.
    pub comp: CompId,
    /// Method name.
    pub method: String,
}

/// A mapped region, as reported by [`SimTree::region_map`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// First address.
    pub base: u64,
    /// Length in bytes.
    pub size: u64,
    /// Description of the backing storage.
    pub label: String,
}

/// An elaborated component tree.
pub struct SimTree {
    comps: Arena<CompId, CompInstance>,
    interner: Rc<Interner>,
    signal_bindings: BTreeMap<(CompId, u32), Vec<(CompId, u32)>>,
    bind_order: Vec<String>,
    event_hookups: Vec<EventHookup>,
}

impl fmt::Debug for SimTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimTree")
            .field("instances", &self.comps.len())
            .field("signal_bindings", &self.signal_bindings.len())
            .field("binds", &self.bind_order.len())
            .finish()
    }
}

impl SimTree {
    /// An empty tree. The first instance allocated becomes the root.
    pub fn new(interner: Rc<Interner>) -> Self {
        Self {
            comps: Arena::new(),
            interner,
            signal_bindings: BTreeMap::new(),
            bind_order: Vec::new(),
            event_hookups: Vec::new(),
        }
    }

    /// Adds an instance.
    pub fn alloc(&mut self, comp: CompInstance) -> CompId {
        self.comps.alloc(comp)
    }

    /// The root instance.
    pub fn root(&self) -> CompId {
        CompId::from_raw(0)
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.comps.len()
    }

    /// Returns `true` if no instance was allocated.
    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }

    /// The instance with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID does not belong to this tree.
    pub fn comp(&self, id: CompId) -> &CompInstance {
        self.comps.get(id)
    }

    /// The instance with the given ID, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the ID does not belong to this tree.
    pub fn comp_mut(&mut self, id: CompId) -> &mut CompInstance {
        self.comps.get_mut(id)
    }

    /// Every instance in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (CompId, &CompInstance)> {
        self.comps.iter()
    }

    /// The interner holding field names.
    pub fn interner(&self) -> &Rc<Interner> {
        &self.interner
    }

    /// Interns a field name.
    pub fn key(&self, name: &str) -> Ident {
        self.interner.get_or_intern(name)
    }

    /// The field slot at `(comp, index)`.
    pub fn slot(&self, comp: CompId, index: u32) -> Result<&FieldSlot, SimError> {
        let c = self.comp(comp);
        c.field(index).ok_or_else(|| SimError::UnknownField {
            component: c.path.clone(),
            field: format!("#{index}"),
        })
    }

    /// Finds an instance by dotted path. The path may start with the root's
    /// name or be relative to the root; the empty path is the root.
    pub fn find(&self, path: &str) -> Option<CompId> {
        if self.is_empty() {
            return None;
        }
        let root = self.root();
        let rel = if path == self.comp(root).path {
            ""
        } else {
            path.strip_prefix(&format!("{}.", self.comp(root).path))
                .unwrap_or(path)
        };
        let mut cur = root;
        for seg in rel.split('.').filter(|s| !s.is_empty()) {
            let c = self.comp(cur);
            let index = c.field_index(seg)?;
            match &c.fields[index as usize].storage {
                Storage::Component(child) => cur = *child,
                _ => return None,
            }
        }
        Some(cur)
    }

    /// Resolves `a.b.sig` to the instance and field index of `sig`.
    pub fn resolve_field(&self, path: &str) -> Result<(CompId, u32), SimError> {
        let (comp_path, field) = path.rsplit_once('.').unwrap_or(("", path));
        let comp = self
            .find(comp_path)
            .ok_or_else(|| SimError::NoSuchComponent(comp_path.to_string()))?;
        let c = self.comp(comp);
        let index = c.field_index(field).ok_or_else(|| SimError::UnknownField {
            component: c.path.clone(),
            field: field.to_string(),
        })?;
        Ok((comp, index))
    }

    /// Follows a structural field path from `comp`. Every step but the last
    /// must land on a child instance.
    pub fn follow(&self, comp: CompId, path: &[u32]) -> Result<(CompId, u32), SimError> {
        let Some((&last, prefix)) = path.split_last() else {
            return Err(SimError::eval("empty field path"));
        };
        let mut cur = comp;
        for &index in prefix {
            match &self.slot(cur, index)?.storage {
                Storage::Component(child) => cur = *child,
                _ => {
                    return Err(SimError::eval(format!(
                        "field #{index} of '{}' is not a component",
                        self.comp(cur).path
                    )))
                }
            }
        }
        self.slot(cur, last)?;
        Ok((cur, last))
    }

    /// Records that changes of `driver` propagate to `target`.
    pub fn add_signal_binding(&mut self, driver: (CompId, u32), target: (CompId, u32)) {
        let targets = self.signal_bindings.entry(driver).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Fields driven by `driver`.
    pub fn signal_targets(&self, driver: (CompId, u32)) -> &[(CompId, u32)] {
        self.signal_bindings
            .get(&driver)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every signal binding, ordered by driver.
    pub fn signal_bindings(&self) -> impl Iterator<Item = ((CompId, u32), &[(CompId, u32)])> {
        self.signal_bindings.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Appends a description of an applied bind.
    pub fn record_bind(&mut self, description: String) {
        self.bind_order.push(description);
    }

    /// Applied binds in application order.
    pub fn bind_order(&self) -> &[String] {
        &self.bind_order
    }

    /// Registers an event callback to install when the simulation is built.
    pub fn add_event_hookup(&mut self, hookup: EventHookup) {
        self.event_hookups.push(hookup);
    }

    /// Pending event callbacks.
    pub fn event_hookups(&self) -> &[EventHookup] {
        &self.event_hookups
    }

    /// The regions of every address-space field, keyed by field path.
    pub fn region_map(&self) -> Vec<(String, Vec<RegionInfo>)> {
        let mut out = Vec::new();
        for (_, c) in self.iter() {
            for f in &c.fields {
                if let Storage::Object(Value::Obj(Handle::AddressSpace(space))) = &f.storage {
                    let regions = space
                        .borrow()
                        .regions()
                        .iter()
                        .map(|r| RegionInfo {
                            base: r.base,
                            size: r.size,
                            label: r.storage.label(),
                        })
                        .collect();
                    out.push((format!("{}.{}", c.path, f.name), regions));
                }
            }
        }
        out
    }

    /// Fingerprint of the tree's structure, bind order and region maps.
    /// Elaborating the same IR twice yields the same fingerprint.
    pub fn fingerprint(&self) -> ContentHash {
        let mut h = ContentHasher::new();
        for (_, c) in self.iter() {
            h.update_str(&c.path).update_str(&c.type_name);
            for f in &c.fields {
                h.update_str(&f.name)
                    .update_u64(u64::from(f.width))
                    .update_str(storage_tag(&f.storage));
            }
        }
        for ((dc, di), targets) in self.signal_bindings() {
            h.update_u64(u64::from(dc.as_raw())).update_u64(u64::from(di));
            for (tc, ti) in targets {
                h.update_u64(u64::from(tc.as_raw())).update_u64(u64::from(*ti));
            }
        }
        for b in &self.bind_order {
            h.update_str(b);
        }
        for (path, regions) in self.region_map() {
            h.update_str(&path);
            for r in regions {
                h.update_u64(r.base).update_u64(r.size).update_str(&r.label);
            }
        }
        h.finish()
    }

    /// An indented listing of instances and their fields.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.is_empty() {
            self.render_comp(self.root(), 0, &mut out);
        }
        out
    }

    fn render_comp(&self, id: CompId, indent: usize, out: &mut String) {
        let c = self.comp(id);
        let pad = "  ".repeat(indent);
        let _ = writeln!(out, "{pad}{}: {}", c.name, c.type_name);
        for f in &c.fields {
            match &f.storage {
                Storage::Component(child) => self.render_comp(*child, indent + 1, out),
                Storage::Signal => {
                    let dir = match f.direction {
                        Some(Direction::Input) => "in ",
                        Some(Direction::Output) => "out ",
                        Some(Direction::InOut) => "inout ",
                        None => "",
                    };
                    let _ = writeln!(out, "{pad}  {dir}{} [{}]", f.name, f.width);
                }
                Storage::Const(v) => {
                    let _ = writeln!(out, "{pad}  const {} = {v}", f.name);
                }
                Storage::Object(v) => {
                    let _ = writeln!(out, "{pad}  {} <{}>", f.name, v.type_name());
                }
                Storage::Unbound => {
                    let _ = writeln!(out, "{pad}  {} <unbound>", f.name);
                }
            }
        }
    }
}

fn storage_tag(s: &Storage) -> &'static str {
    match s {
        Storage::Signal => "signal",
        Storage::Const(_) => "const",
        Storage::Component(_) => "component",
        Storage::Object(v) => v.type_name(),
        Storage::Unbound => "unbound",
    }
}
