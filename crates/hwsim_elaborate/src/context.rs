//! Mutable state for recursive elaboration.
//!
//! [`ElaborationContext`] owns the [`SimTree`] under construction, the
//! timebase that runtime objects attach to, the instantiation stack used for
//! recursion detection and the list of errors found so far. It is passed by
//! reference through every build step.

use crate::errors::{ElabError, ElabErrors};
use hwsim_common::Interner;
use hwsim_ir::{Context, DataType};
use hwsim_sim::{CompId, SimTree, Storage, Timebase, Value};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Values supplied for fields of the root instance, by field name.
///
/// Signal fields take the value as their initial value; ports and other
/// object fields are bound to it.
pub type TopBindings = BTreeMap<String, Value>;

/// A field of an instance.
pub type FieldRef = (CompId, u32);

/// Default nesting limit for component instances.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Elaboration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElabSettings {
    /// Deepest allowed instance nesting. The root is depth 0.
    pub max_depth: usize,
    /// Report unbound ports of the root instance as an error.
    pub require_top_ports: bool,
}

impl Default for ElabSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            require_top_ports: true,
        }
    }
}

/// Mutable state carried through recursive elaboration.
pub struct ElaborationContext<'a> {
    /// The IR being elaborated.
    pub ir: &'a Context,
    /// The tree being built.
    pub tree: SimTree,
    /// Scheduler handed to events and returned with the tree.
    pub timebase: Timebase,
    /// Elaboration settings.
    pub settings: ElabSettings,
    /// Errors collected so far.
    pub errors: ElabErrors,
    /// Type names currently being instantiated, outermost first.
    stack: Vec<String>,
    /// Values for the root's fields, taken once the root's fields exist.
    top_bindings: Option<TopBindings>,
    /// Unbound slots joined by port-to-port binds. Binding one later binds
    /// the rest.
    links: BTreeMap<FieldRef, Vec<FieldRef>>,
    /// Declared types of object slots that were left unbound.
    declared: HashMap<FieldRef, DataType>,
}

impl<'a> ElaborationContext<'a> {
    /// Creates a context with an empty tree.
    pub fn new(
        ir: &'a Context,
        interner: Rc<Interner>,
        timebase: Timebase,
        settings: ElabSettings,
        top_bindings: TopBindings,
    ) -> Self {
        Self {
            ir,
            tree: SimTree::new(interner),
            timebase,
            settings,
            errors: ElabErrors::new(),
            stack: Vec::new(),
            top_bindings: Some(top_bindings),
            links: BTreeMap::new(),
            declared: HashMap::new(),
        }
    }

    /// Records an error and carries on.
    pub fn error(&mut self, error: ElabError) {
        log::debug!("elaboration error: {error}");
        self.errors.push(error);
    }

    /// Pushes a type name onto the instantiation stack.
    ///
    /// Fails if the type is already being instantiated further up or the
    /// nesting limit is reached.
    pub fn push_instantiation(&mut self, type_name: &str) -> Result<(), ElabError> {
        if let Some(pos) = self.stack.iter().position(|n| n == type_name) {
            let mut chain = self.stack[pos..].to_vec();
            chain.push(type_name.to_string());
            return Err(ElabError::RecursiveInstantiation { chain });
        }
        if self.stack.len() > self.settings.max_depth {
            let mut chain = self.stack.clone();
            chain.push(type_name.to_string());
            return Err(ElabError::RecursiveInstantiation { chain });
        }
        self.stack.push(type_name.to_string());
        Ok(())
    }

    /// Pops the innermost type name.
    pub fn pop_instantiation(&mut self) {
        self.stack.pop();
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Takes the root's top bindings. Returns `None` after the first call.
    pub fn take_top_bindings(&mut self) -> Option<TopBindings> {
        self.top_bindings.take()
    }

    /// Remembers the declared type of an unbound object slot.
    pub fn declare_unbound(&mut self, slot: FieldRef, datatype: DataType) {
        self.declared.insert(slot, datatype);
    }

    /// The declared type of an unbound object slot.
    pub fn declared_type(&self, slot: FieldRef) -> Option<&DataType> {
        self.declared.get(&slot)
    }

    /// Joins two unbound slots.
    pub fn link(&mut self, a: FieldRef, b: FieldRef) {
        self.links.entry(a).or_default().push(b);
        self.links.entry(b).or_default().push(a);
    }

    /// Binds `slot` to `value` and every still-unbound slot linked to it.
    ///
    /// Channels are narrowed to their get or put end when the receiving
    /// slot was declared as one.
    pub fn bind_object(&mut self, slot: FieldRef, value: Value) {
        let mut work = vec![slot];
        let mut seen = vec![slot];
        while let Some(at) = work.pop() {
            let v = crate::bind::adapt_to_port(self.declared_type(at), value.clone());
            self.tree.comp_mut(at.0).fields[at.1 as usize].storage = Storage::Object(v);
            for next in self.links.get(&at).cloned().unwrap_or_default() {
                if seen.contains(&next) {
                    continue;
                }
                seen.push(next);
                if matches!(self.tree.slot(next.0, next.1), Ok(s) if s.storage == Storage::Unbound) {
                    work.push(next);
                }
            }
        }
    }

    /// Consumes the context, returning the tree or every recorded error.
    pub fn finish(self) -> Result<(SimTree, Timebase), ElabErrors> {
        if self.errors.is_empty() {
            Ok((self.tree, self.timebase))
        } else {
            Err(self.errors)
        }
    }
}
