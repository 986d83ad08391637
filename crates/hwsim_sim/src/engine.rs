//! Simulation engine with sync rounds, comb propagation, and task processes.
//!
//! [`Simulation`] owns an elaborated [`SimTree`] and a [`Timebase`]. Field
//! writes reach it through the interpreter:
//!
//! - Immediate writes (comb bodies, tasks, external drivers) update the
//!   current value at once, propagate along signal bindings, run every
//!   watching comb process depth-first, and record rising edges.
//! - When the outermost immediate write returns, the sync processes triggered
//!   by those edges run against the pre-edge state in one round. Their
//!   deferred writes are committed together across the tree, which may
//!   trigger further rounds.

use crate::error::SimError;
use crate::evaluator::{Frame, SyncStep, WriteMode};
use crate::event::{CallbackFuture, EventCallback};
use crate::time::SimTime;
use crate::timebase::{poll_once, TaskHandle, Timebase};
use crate::tracer::{LogTracer, SignalTracer};
use crate::tree::{CompId, SimTree, Storage};
use crate::value::{Handle, Value};
use hwsim_ir::{analyze, derive_sensitivity, Direction, Expr, Function};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

/// Default bound on nested comb re-evaluation.
pub const DEFAULT_MAX_COMB_DEPTH: usize = 1000;

/// Runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    /// Nesting limit for comb re-evaluation before
    /// [`SimError::CombCycleDetected`] is raised.
    pub max_comb_depth: usize,
    /// Install a [`LogTracer`] when no tracer was supplied.
    pub trace: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            max_comb_depth: DEFAULT_MAX_COMB_DEPTH,
            trace: false,
        }
    }
}

/// A sync or comb process: owning instance and position in its list.
pub(crate) type ProcKey = (CompId, usize);

type FieldRef = (CompId, u32);

/// Where a paused sync body resumes.
#[derive(Debug, Default)]
struct FsmState {
    resume: usize,
    skip: u64,
    locals: HashMap<String, Value>,
}

/// Process wiring resolved from the tree before the simulation starts.
#[derive(Debug, Default)]
struct Wiring {
    sync_triggers: HashMap<FieldRef, Vec<ProcKey>>,
    sync_resets: HashMap<ProcKey, FieldRef>,
    comb_sensitivity: Vec<(ProcKey, Vec<FieldRef>)>,
    comb_order: Vec<ProcKey>,
}

fn resolve_ref(tree: &SimTree, comp: CompId, expr: &Expr) -> Result<FieldRef, SimError> {
    let path = expr.field_path().ok_or_else(|| {
        SimError::eval(format!(
            "process reference in '{}' is not a field path",
            tree.comp(comp).path
        ))
    })?;
    tree.follow(comp, &path)
}

/// Every field reached from `start` through signal bindings, `start`
/// included.
fn driven_closure(tree: &SimTree, start: FieldRef) -> Vec<FieldRef> {
    let mut seen = vec![start];
    let mut stack = vec![start];
    while let Some(f) = stack.pop() {
        for &t in tree.signal_targets(f) {
            if !seen.contains(&t) {
                seen.push(t);
                stack.push(t);
            }
        }
    }
    seen
}

impl Wiring {
    fn resolve(tree: &SimTree) -> Result<Self, SimError> {
        let mut w = Wiring::default();
        for (id, c) in tree.iter() {
            for (i, f) in c.sync_processes.iter().enumerate() {
                let key = (id, i);
                let Some(meta) = &f.metadata else { continue };
                if let Some(clock) = &meta.clock {
                    let at = resolve_ref(tree, id, clock)?;
                    w.sync_triggers.entry(at).or_default().push(key);
                }
                if let Some(reset) = &meta.reset {
                    let at = resolve_ref(tree, id, reset)?;
                    w.sync_triggers.entry(at).or_default().push(key);
                    w.sync_resets.insert(key, at);
                }
            }
            for (i, f) in c.comb_processes.iter().enumerate() {
                let exprs = match &f.metadata {
                    Some(meta) if !meta.sensitivity.is_empty() => meta.sensitivity.clone(),
                    _ => derive_sensitivity(&f.body),
                };
                let mut sens = Vec::new();
                for e in &exprs {
                    let at = resolve_ref(tree, id, e)?;
                    if !sens.contains(&at) {
                        sens.push(at);
                    }
                }
                w.comb_sensitivity.push(((id, i), sens));
            }
        }
        w.comb_order = Self::comb_order(tree, &w.comb_sensitivity);
        Ok(w)
    }

    /// Orders comb processes so that writers run before readers.
    fn comb_order(tree: &SimTree, sens: &[(ProcKey, Vec<FieldRef>)]) -> Vec<ProcKey> {
        let declared: Vec<ProcKey> = sens.iter().map(|(k, _)| *k).collect();
        let mut graph: DiGraph<ProcKey, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = declared.iter().map(|k| graph.add_node(*k)).collect();

        for (wi, (key, _)) in sens.iter().enumerate() {
            let (comp, idx) = *key;
            let func = &tree.comp(comp).comb_processes[idx];
            let mut written = Vec::new();
            for path in analyze(&func.body).writes {
                if let Ok(at) = tree.follow(comp, &path) {
                    written.extend(driven_closure(tree, at));
                }
            }
            for (ri, (_, reads)) in sens.iter().enumerate() {
                if reads.iter().any(|r| written.contains(r)) {
                    graph.update_edge(nodes[wi], nodes[ri], ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|n| graph[n]).collect(),
            Err(cycle) => {
                let (comp, idx) = graph[cycle.node_id()];
                let c = tree.comp(comp);
                log::warn!(
                    "combinational loop through {}.{}; using declaration order",
                    c.path,
                    c.comb_processes[idx].name
                );
                declared
            }
        }
    }
}

/// The runtime behind a [`Simulation`].
pub(crate) struct Engine {
    pub(crate) tree: SimTree,
    pub(crate) timebase: Timebase,
    options: SimOptions,
    this: Weak<Engine>,
    tracer: RefCell<Option<Box<dyn SignalTracer>>>,
    sync_triggers: HashMap<FieldRef, Vec<ProcKey>>,
    sync_resets: HashMap<ProcKey, FieldRef>,
    comb_order: Vec<ProcKey>,
    fsm: RefCell<HashMap<ProcKey, FsmState>>,
    pending_sync: RefCell<Vec<ProcKey>>,
    touched: RefCell<BTreeSet<CompId>>,
    in_round: Cell<bool>,
    drive_depth: Cell<usize>,
    comb_depth: Cell<usize>,
    cover_hits: RefCell<BTreeMap<String, u64>>,
    started: Cell<bool>,
}

impl Engine {
    fn new(
        tree: SimTree,
        timebase: Timebase,
        options: SimOptions,
    ) -> Result<Rc<Self>, SimError> {
        let wiring = Wiring::resolve(&tree)?;
        let engine = Rc::new_cyclic(|this| Engine {
            tree,
            timebase,
            options,
            this: this.clone(),
            tracer: RefCell::new(None),
            sync_triggers: wiring.sync_triggers,
            sync_resets: wiring.sync_resets,
            comb_order: wiring.comb_order,
            fsm: RefCell::new(HashMap::new()),
            pending_sync: RefCell::new(Vec::new()),
            touched: RefCell::new(BTreeSet::new()),
            in_round: Cell::new(false),
            drive_depth: Cell::new(0),
            comb_depth: Cell::new(0),
            cover_hits: RefCell::new(BTreeMap::new()),
            started: Cell::new(false),
        });
        engine.install_watchers(&wiring.comb_sensitivity);
        engine.install_event_hookups()?;
        Ok(engine)
    }

    fn install_watchers(&self, sensitivity: &[(ProcKey, Vec<FieldRef>)]) {
        for (key, fields) in sensitivity {
            for &(comp, index) in fields {
                let c = self.tree.comp(comp);
                let slot = &c.fields[index as usize];
                let weak = self.this.clone();
                let key = *key;
                c.state.register_watcher(
                    slot.key,
                    Rc::new(move || match weak.upgrade() {
                        Some(engine) => engine.run_comb(key),
                        None => Ok(()),
                    }),
                );
            }
        }
    }

    fn install_event_hookups(&self) -> Result<(), SimError> {
        for hookup in self.tree.event_hookups() {
            let c = self.tree.comp(hookup.comp);
            let func = c
                .functions
                .get(&hookup.method)
                .ok_or_else(|| SimError::UnknownMethod {
                    target: c.path.clone(),
                    method: hookup.method.clone(),
                })?;
            let weak = self.this.clone();
            let comp = hookup.comp;
            let name = hookup.method.clone();
            let callback = if func.is_async {
                EventCallback::Task(Rc::new(move || -> CallbackFuture {
                    let weak = weak.clone();
                    let name = name.clone();
                    Box::pin(async move {
                        let Some(engine) = weak.upgrade() else {
                            return Ok(());
                        };
                        engine
                            .call_function(comp, &name, Vec::new(), Vec::new(), WriteMode::Immediate)
                            .await?;
                        Ok(())
                    })
                }))
            } else {
                EventCallback::Immediate(Rc::new(move || match weak.upgrade() {
                    Some(engine) => engine.run_now(comp, &name, Vec::new()).map(|_| ()),
                    None => Ok(()),
                }))
            };
            hookup.event.bind_callback(callback)?;
            log::debug!("event callback {}.{} installed", c.path, hookup.method);
        }
        Ok(())
    }

    /// Reads a field of `comp`.
    pub(crate) fn read_field(&self, comp: CompId, index: u32) -> Result<Value, SimError> {
        let slot = self.tree.slot(comp, index)?;
        match &slot.storage {
            Storage::Signal => Ok(self.tree.comp(comp).state.read(slot.key)),
            Storage::Const(v) | Storage::Object(v) => Ok(v.clone()),
            Storage::Component(id) => Ok(Value::Obj(Handle::Component(*id))),
            Storage::Unbound => Err(SimError::UnboundPort {
                component: self.tree.comp(comp).path.clone(),
                port: slot.name.clone(),
            }),
        }
    }

    /// Writes a field of `comp`, staged or immediate.
    pub(crate) fn write_field(
        &self,
        comp: CompId,
        index: u32,
        value: Value,
        mode: WriteMode,
    ) -> Result<(), SimError> {
        let slot = self.tree.slot(comp, index)?;
        let c = self.tree.comp(comp);
        match &slot.storage {
            Storage::Signal => match mode {
                WriteMode::Deferred => {
                    let value = value.mask(slot.width, slot.signed);
                    log::trace!("stage {}.{} <= {value}", c.path, slot.name);
                    c.state.write_deferred(slot.key, value);
                    self.touched.borrow_mut().insert(comp);
                    Ok(())
                }
                WriteMode::Immediate => self.drive_and_settle(comp, index, value),
            },
            Storage::Const(_) => Err(SimError::eval(format!(
                "cannot assign to constant '{}.{}'",
                c.path, slot.name
            ))),
            other => Err(SimError::unsupported(format!(
                "assignment to {} field '{}.{}'",
                match other {
                    Storage::Component(_) => "component",
                    Storage::Unbound => "unbound",
                    _ => "object",
                },
                c.path,
                slot.name
            ))),
        }
    }

    fn drive_and_settle(&self, comp: CompId, index: u32, value: Value) -> Result<(), SimError> {
        self.drive_depth.set(self.drive_depth.get() + 1);
        let driven = self.drive(comp, index, value);
        self.drive_depth.set(self.drive_depth.get() - 1);
        if self.drive_depth.get() > 0 {
            return driven;
        }
        match driven {
            Ok(()) => self.settle(),
            Err(e) => {
                if !self.in_round.get() {
                    self.discard_pending();
                }
                Err(e)
            }
        }
    }

    /// Sets a signal's current value and propagates the change.
    fn drive(&self, comp: CompId, index: u32, value: Value) -> Result<(), SimError> {
        let c = self.tree.comp(comp);
        let slot = self.tree.slot(comp, index)?;
        let value = value.mask(slot.width, slot.signed);
        let old = c.state.read(slot.key);
        if old == value {
            return Ok(());
        }
        c.state.set_value(slot.key, value.clone());
        self.on_change(comp, index, &old, &value)?;
        c.state.notify(slot.key)
    }

    /// Traces a change, records rising edges, and drives bound signals.
    fn on_change(&self, comp: CompId, index: u32, old: &Value, new: &Value) -> Result<(), SimError> {
        let c = self.tree.comp(comp);
        let slot = self.tree.slot(comp, index)?;
        let now = self.timebase.now();
        log::trace!("{now}: {}.{} {old} -> {new}", c.path, slot.name);
        if let Some(tracer) = self.tracer.borrow_mut().as_mut() {
            tracer.signal_change(&c.path, &slot.name, now, old, new, slot.width);
        }
        if !old.truthy() && new.truthy() {
            if let Some(procs) = self.sync_triggers.get(&(comp, index)) {
                let mut pending = self.pending_sync.borrow_mut();
                for p in procs {
                    if !pending.contains(p) {
                        pending.push(*p);
                    }
                }
            }
        }
        for &(tc, ti) in self.tree.signal_targets((comp, index)) {
            self.drive(tc, ti, new.clone())?;
        }
        Ok(())
    }

    /// Runs sync rounds until no edge is pending.
    fn settle(&self) -> Result<(), SimError> {
        if self.in_round.get() {
            return Ok(());
        }
        self.in_round.set(true);
        let result = self.run_rounds();
        self.in_round.set(false);
        if result.is_err() {
            self.discard_pending();
        }
        result
    }

    fn run_rounds(&self) -> Result<(), SimError> {
        loop {
            let batch = std::mem::take(&mut *self.pending_sync.borrow_mut());
            if batch.is_empty() && self.touched.borrow().is_empty() {
                return Ok(());
            }
            log::trace!("sync round: {} processes", batch.len());
            for key in batch {
                self.run_sync(key)?;
            }
            self.commit_all()?;
        }
    }

    fn discard_pending(&self) {
        self.pending_sync.borrow_mut().clear();
        let touched = std::mem::take(&mut *self.touched.borrow_mut());
        for comp in touched {
            self.tree.comp(comp).state.discard_staged();
        }
    }

    /// Applies every staged write in the tree, then propagates the changes.
    fn commit_all(&self) -> Result<(), SimError> {
        let touched = std::mem::take(&mut *self.touched.borrow_mut());
        let mut changes = Vec::new();
        for comp in touched {
            for (key, old, new) in self.tree.comp(comp).state.apply_staged() {
                changes.push((comp, key, old, new));
            }
        }
        for (comp, key, old, new) in changes {
            let c = self.tree.comp(comp);
            let Some(index) = c.field_by_key(key) else {
                continue;
            };
            self.on_change(comp, index, &old, &new)?;
            c.state.notify(key)?;
        }
        Ok(())
    }

    fn run_sync(&self, key: ProcKey) -> Result<(), SimError> {
        let (comp, idx) = key;
        let Some(func) = self.tree.comp(comp).sync_processes.get(idx).cloned() else {
            return Ok(());
        };
        if let Some(&(rc, ri)) = self.sync_resets.get(&key) {
            if self.read_field(rc, ri)?.truthy() {
                self.fsm.borrow_mut().remove(&key);
            }
        }
        let saved = self.fsm.borrow_mut().remove(&key);
        let (start, locals) = match saved {
            Some(mut s) if s.skip > 0 => {
                s.skip -= 1;
                self.fsm.borrow_mut().insert(key, s);
                return Ok(());
            }
            Some(s) => (s.resume, s.locals),
            None => (0, HashMap::new()),
        };

        let mut frame = Frame::new(comp, &func.name, WriteMode::Deferred);
        frame.locals = locals;
        let step = {
            let mut fut = self.exec_sync_body(&mut frame, &func.body, start);
            let polled = poll_once(fut.as_mut());
            polled
        };
        match step {
            None => Err(SimError::IllegalSuspension {
                process: func.name.clone(),
            }),
            Some(Err(e)) => Err(e),
            Some(Ok(SyncStep::Done)) => Ok(()),
            Some(Ok(SyncStep::Pause { resume, cycles })) => {
                self.fsm.borrow_mut().insert(
                    key,
                    FsmState {
                        resume,
                        skip: cycles - 1,
                        locals: frame.locals,
                    },
                );
                Ok(())
            }
        }
    }

    fn run_comb(&self, key: ProcKey) -> Result<(), SimError> {
        let (comp, idx) = key;
        let c = self.tree.comp(comp);
        let Some(func) = c.comb_processes.get(idx).cloned() else {
            return Ok(());
        };
        let depth = self.comb_depth.get() + 1;
        if depth > self.options.max_comb_depth {
            return Err(SimError::CombCycleDetected {
                component: c.path.clone(),
                process: func.name.clone(),
                depth,
            });
        }
        self.comb_depth.set(depth);
        let result = self.run_body(comp, &func);
        self.comb_depth.set(depth - 1);
        result
    }

    /// Runs a body to completion with immediate writes.
    fn run_body(&self, comp: CompId, func: &Function) -> Result<(), SimError> {
        let mut frame = Frame::new(comp, &func.name, WriteMode::Immediate);
        let mut fut = self.exec_block(&mut frame, &func.body);
        let polled = poll_once(fut.as_mut());
        match polled {
            Some(r) => r.map(|_| ()),
            None => Err(SimError::IllegalSuspension {
                process: func.name.clone(),
            }),
        }
    }

    /// Calls a function of `comp` that must not suspend.
    pub(crate) fn run_now(
        &self,
        comp: CompId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, SimError> {
        let mut fut = self.call_function(comp, name, args, Vec::new(), WriteMode::Immediate);
        let polled = poll_once(fut.as_mut());
        polled.unwrap_or_else(|| {
            Err(SimError::IllegalSuspension {
                process: name.to_string(),
            })
        })
    }

    /// Runs `f` with settling held back until it returns.
    fn batch(&self, f: impl FnOnce() -> Result<(), SimError>) -> Result<(), SimError> {
        self.drive_depth.set(self.drive_depth.get() + 1);
        let result = f();
        self.drive_depth.set(self.drive_depth.get() - 1);
        if self.drive_depth.get() > 0 {
            return result;
        }
        match result {
            Ok(()) => self.settle(),
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    fn eval_comb_all(&self) -> Result<(), SimError> {
        self.batch(|| {
            for &key in &self.comb_order {
                self.run_comb(key)?;
            }
            Ok(())
        })
    }

    pub(crate) fn record_cover(&self, key: String) {
        *self.cover_hits.borrow_mut().entry(key).or_insert(0) += 1;
    }

    fn register_signals(&self) {
        let mut tracer = self.tracer.borrow_mut();
        let Some(tracer) = tracer.as_mut() else {
            return;
        };
        for (_, c) in self.tree.iter() {
            for f in c.fields.iter().filter(|f| f.is_signal()) {
                let is_input = f.direction == Some(Direction::Input);
                tracer.register_signal(&c.path, &f.name, f.width, is_input);
            }
        }
    }
}

async fn run_process(engine: Rc<Engine>, comp: CompId, func: Rc<Function>) -> Result<(), SimError> {
    log::debug!("process {}.{} started", engine.tree.comp(comp).path, func.name);
    let mut frame = Frame::new(comp, &func.name, WriteMode::Immediate);
    engine.exec_block(&mut frame, &func.body).await?;
    log::debug!("process {}.{} finished", engine.tree.comp(comp).path, func.name);
    Ok(())
}

async fn clock_task(
    engine: Rc<Engine>,
    at: FieldRef,
    period_fs: u64,
) -> Result<(), SimError> {
    let low = period_fs / 2;
    let high = period_fs - low;
    loop {
        engine.timebase.wait(low).await;
        engine.write_field(at.0, at.1, Value::Int(1), WriteMode::Immediate)?;
        engine.timebase.wait(high).await;
        engine.write_field(at.0, at.1, Value::Int(0), WriteMode::Immediate)?;
    }
}

/// A running simulation of an elaborated tree.
///
/// Dropping the simulation drops every task still parked on its timebase.
pub struct Simulation {
    engine: Rc<Engine>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tree", &self.engine.tree)
            .field("now", &self.engine.timebase.now())
            .finish()
    }
}

impl Simulation {
    /// Wires the processes of `tree`. Nothing runs until [`Simulation::start`].
    pub fn new(tree: SimTree, timebase: Timebase, options: SimOptions) -> Result<Self, SimError> {
        let trace = options.trace;
        let engine = Engine::new(tree, timebase, options)?;
        if trace {
            *engine.tracer.borrow_mut() = Some(Box::new(LogTracer));
        }
        Ok(Self { engine })
    }

    /// Installs a tracer, replacing any previous one. Call before
    /// [`Simulation::start`] so that signals get registered.
    pub fn set_tracer(&self, tracer: impl SignalTracer + 'static) {
        *self.engine.tracer.borrow_mut() = Some(Box::new(tracer));
    }

    /// Registers signals with the tracer, evaluates every comb process once in
    /// dependency order, spawns the free-running processes and lets them run
    /// up to their first suspension. Calling it again does nothing.
    pub fn start(&self) -> Result<(), SimError> {
        let engine = &self.engine;
        if engine.started.replace(true) {
            return Ok(());
        }
        engine.register_signals();
        engine.eval_comb_all()?;
        let mut spawned = 0;
        for (id, c) in engine.tree.iter() {
            for func in &c.processes {
                engine
                    .timebase
                    .spawn(run_process(Rc::clone(engine), id, Rc::clone(func)));
                spawned += 1;
            }
        }
        log::debug!(
            "simulation started: {} instances, {} comb, {spawned} tasks",
            engine.tree.len(),
            engine.comb_order.len()
        );
        engine.timebase.run_ready()
    }

    /// Drives a signal, given as a dotted path from the root.
    pub fn set_input(&self, path: &str, value: impl Into<Value>) -> Result<(), SimError> {
        let (comp, index) = self.engine.tree.resolve_field(path)?;
        self.engine
            .write_field(comp, index, value.into(), WriteMode::Immediate)
    }

    /// Reads a field of the root instance.
    pub fn get_output(&self, name: &str) -> Result<Value, SimError> {
        self.field_value(self.engine.tree.root(), name)
    }

    /// Reads a field given as a dotted path from the root.
    pub fn read_path(&self, path: &str) -> Result<Value, SimError> {
        let (comp, index) = self.engine.tree.resolve_field(path)?;
        self.engine.read_field(comp, index)
    }

    /// Reads a named field of an instance.
    pub fn field_value(&self, comp: CompId, name: &str) -> Result<Value, SimError> {
        let c = self.engine.tree.comp(comp);
        let index = c.field_index(name).ok_or_else(|| SimError::UnknownField {
            component: c.path.clone(),
            field: name.to_string(),
        })?;
        self.engine.read_field(comp, index)
    }

    /// The instance at a dotted path.
    pub fn find(&self, path: &str) -> Result<CompId, SimError> {
        self.engine
            .tree
            .find(path)
            .ok_or_else(|| SimError::NoSuchComponent(path.to_string()))
    }

    /// Calls a function of the instance at `path`. The function must not
    /// suspend.
    pub fn call(&self, path: &str, method: &str, args: Vec<Value>) -> Result<Value, SimError> {
        let comp = self.find(path)?;
        self.engine.run_now(comp, method, args)
    }

    /// Applies one full clock pulse (0, 1, 0) to a signal.
    pub fn clock_edge(&self, path: &str) -> Result<(), SimError> {
        let (comp, index) = self.engine.tree.resolve_field(path)?;
        for level in [0, 1, 0] {
            self.engine
                .write_field(comp, index, Value::Int(level), WriteMode::Immediate)?;
        }
        Ok(())
    }

    /// Re-runs every comb process in dependency order.
    pub fn eval_comb(&self) -> Result<(), SimError> {
        self.engine.eval_comb_all()
    }

    /// Spawns a task toggling `path` with the given period, low for the
    /// first half.
    pub fn drive_clock(&self, path: &str, period_fs: u64) -> Result<TaskHandle, SimError> {
        if period_fs < 2 {
            return Err(SimError::eval(format!(
                "clock period of {period_fs} fs is too short"
            )));
        }
        let at = self.engine.tree.resolve_field(path)?;
        log::debug!("clock {path}: period {period_fs} fs");
        Ok(self
            .engine
            .timebase
            .spawn(clock_task(Rc::clone(&self.engine), at, period_fs)))
    }

    /// Runs the next batch of scheduled entries. Returns whether more remain.
    pub fn advance(&self) -> Result<bool, SimError> {
        self.engine.timebase.advance()
    }

    /// Runs until `end_fs`.
    pub fn run_until(&self, end_fs: u64) -> Result<(), SimError> {
        self.engine.timebase.run_until(end_fs)
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.engine.timebase.now()
    }

    /// The scheduler.
    pub fn timebase(&self) -> &Timebase {
        &self.engine.timebase
    }

    /// The elaborated tree.
    pub fn tree(&self) -> &SimTree {
        &self.engine.tree
    }

    /// How often each cover point held, keyed by message or process path.
    pub fn cover_hits(&self) -> BTreeMap<String, u64> {
        self.engine.cover_hits.borrow().clone()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.engine.timebase.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::MemoryTracer;
    use crate::tree::{CompInstance, FieldSlot};
    use crate::time::FS_PER_NS;
    use hwsim_common::Interner;
    use hwsim_ir::{BinOp, Builtin, FieldKind, ProcessKind, ProcessMeta, Stmt};

    const CLOCK: u32 = 0;
    const A: u32 = 1;
    const B: u32 = 2;
    const SUM: u32 = 3;
    const COUNT: u32 = 4;

    fn signal(tree: &SimTree, name: &str, width: u32, direction: Option<Direction>) -> FieldSlot {
        FieldSlot {
            name: name.into(),
            key: tree.key(name),
            kind: FieldKind::Field,
            direction,
            width,
            signed: false,
            storage: Storage::Signal,
        }
    }

    fn process(name: &str, kind: ProcessKind, body: Vec<Stmt>) -> Rc<Function> {
        let mut f = Function::new(name);
        f.body = body;
        f.is_async = kind == ProcessKind::Process;
        f.metadata = Some(ProcessMeta {
            kind,
            clock: (kind == ProcessKind::Sync).then(|| Expr::field(CLOCK)),
            reset: None,
            sensitivity: Vec::new(),
        });
        Rc::new(f)
    }

    /// `clock`, `a`, `b`, `sum = a + b` (comb), `count` (2 bits).
    fn adder_tree(sync_body: Vec<Stmt>) -> SimTree {
        let mut tree = SimTree::new(Rc::new(Interner::new()));
        let root = tree.alloc(CompInstance::new("Top", "Top", "Top", None));
        let fields = vec![
            signal(&tree, "clock", 1, Some(Direction::Input)),
            signal(&tree, "a", 8, None),
            signal(&tree, "b", 8, None),
            signal(&tree, "sum", 9, Some(Direction::Output)),
            signal(&tree, "count", 2, None),
        ];
        let c = tree.comp_mut(root);
        c.fields = fields;
        c.sync_processes
            .push(process("update", ProcessKind::Sync, sync_body));
        c.comb_processes.push(process(
            "add",
            ProcessKind::Comb,
            vec![Stmt::assign(
                Expr::field(SUM),
                Expr::bin(Expr::field(A), BinOp::Add, Expr::field(B)),
            )],
        ));
        tree
    }

    fn sim(tree: SimTree) -> Simulation {
        let sim = Simulation::new(tree, Timebase::new(), SimOptions::default()).unwrap();
        sim.start().unwrap();
        sim
    }

    #[test]
    fn comb_follows_committed_registers() {
        let sim = sim(adder_tree(vec![
            Stmt::assign(Expr::field(A), Expr::int(3)),
            Stmt::assign(Expr::field(B), Expr::int(4)),
        ]));
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(0)));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(7)));
    }

    #[test]
    fn sync_reads_pre_edge_values() {
        // a = b + 1; b = a  -> both read the old state
        let sim = sim(adder_tree(vec![
            Stmt::assign(
                Expr::field(A),
                Expr::bin(Expr::field(B), BinOp::Add, Expr::int(1)),
            ),
            Stmt::assign(Expr::field(B), Expr::field(A)),
        ]));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(1)));
        assert_eq!(sim.get_output("b"), Ok(Value::Int(0)));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(1)));
        assert_eq!(sim.get_output("b"), Ok(Value::Int(1)));
    }

    #[test]
    fn writes_are_masked_to_width() {
        let sim = sim(adder_tree(vec![Stmt::aug_assign(
            Expr::field(COUNT),
            hwsim_ir::AugOp::Add,
            Expr::int(1),
        )]));
        for _ in 0..5 {
            sim.clock_edge("clock").unwrap();
        }
        assert_eq!(sim.get_output("count"), Ok(Value::Int(1)));
    }

    #[test]
    fn cycles_marker_spans_edges() {
        let sim = sim(adder_tree(vec![
            Stmt::assign(Expr::field(A), Expr::int(1)),
            Stmt::expr(Expr::awaited(Expr::builtin(
                Builtin::Cycles,
                vec![Expr::int(2)],
            ))),
            Stmt::assign(Expr::field(A), Expr::int(2)),
        ]));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(1)));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(1)));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(2)));
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.get_output("a"), Ok(Value::Int(1)));
    }

    #[test]
    fn immediate_write_runs_watchers_before_returning() {
        let sim = sim(adder_tree(Vec::new()));
        sim.set_input("a", 5).unwrap();
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(5)));
        sim.set_input("b", 6).unwrap();
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(11)));
    }

    #[test]
    fn comb_cycle_is_reported() {
        let mut tree = adder_tree(Vec::new());
        let root = tree.root();
        // b = sum + 1 closes a loop through `add`
        tree.comp_mut(root).comb_processes.push(process(
            "feedback",
            ProcessKind::Comb,
            vec![Stmt::assign(
                Expr::field(B),
                Expr::bin(Expr::field(SUM), BinOp::Add, Expr::int(1)),
            )],
        ));
        let options = SimOptions {
            max_comb_depth: 16,
            trace: false,
        };
        let sim = Simulation::new(tree, Timebase::new(), options).unwrap();
        assert!(matches!(
            sim.start(),
            Err(SimError::CombCycleDetected { depth: 17, .. })
        ));
    }

    #[test]
    fn tracer_sees_changes() {
        let tree = adder_tree(vec![Stmt::assign(Expr::field(A), Expr::int(2))]);
        let sim = Simulation::new(tree, Timebase::new(), SimOptions::default()).unwrap();
        let tracer = MemoryTracer::new();
        sim.set_tracer(tracer.clone());
        sim.start().unwrap();
        sim.clock_edge("clock").unwrap();
        assert_eq!(tracer.signals().len(), 5);
        assert!(tracer.signals()[0].is_input);
        let sums = tracer.changes_of("Top.sum");
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].new, Value::Int(2));
        assert_eq!(tracer.changes_of("Top.clock").len(), 2);
    }

    #[test]
    fn clock_task_drives_edges() {
        let sim = sim(adder_tree(vec![Stmt::aug_assign(
            Expr::field(A),
            hwsim_ir::AugOp::Add,
            Expr::int(1),
        )]));
        sim.drive_clock("clock", 10 * FS_PER_NS).unwrap();
        sim.run_until(32 * FS_PER_NS).unwrap();
        // rising edges at 5, 15 and 25 ns
        assert_eq!(sim.get_output("a"), Ok(Value::Int(3)));
        assert_eq!(sim.now().fs, 32 * FS_PER_NS);
    }

    #[test]
    fn process_waits_on_timebase() {
        let mut tree = adder_tree(Vec::new());
        let root = tree.root();
        tree.comp_mut(root).processes.push(process(
            "driver",
            ProcessKind::Process,
            vec![
                Stmt::expr(Expr::awaited(Expr::method_call(
                    Expr::RefSelf,
                    "wait",
                    vec![Expr::int(4)],
                ))),
                Stmt::assign(Expr::field(A), Expr::int(9)),
            ],
        ));
        let sim = sim(tree);
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(0)));
        sim.run_until(10 * FS_PER_NS).unwrap();
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(9)));
    }

    #[test]
    fn suspension_in_comb_is_illegal() {
        let mut tree = adder_tree(Vec::new());
        let root = tree.root();
        tree.comp_mut(root).comb_processes.push(process(
            "sleepy",
            ProcessKind::Comb,
            vec![Stmt::expr(Expr::awaited(Expr::method_call(
                Expr::RefSelf,
                "wait",
                vec![Expr::int(1)],
            )))],
        ));
        let sim = Simulation::new(tree, Timebase::new(), SimOptions::default()).unwrap();
        assert_eq!(
            sim.start(),
            Err(SimError::IllegalSuspension {
                process: "sleepy".into()
            })
        );
    }

    #[test]
    fn assertion_failure_carries_time() {
        let sim = sim(adder_tree(vec![Stmt::assert(Expr::compare(
            Expr::field(A),
            hwsim_ir::CmpOp::Gt,
            Expr::int(0),
        ))]));
        assert!(matches!(
            sim.clock_edge("clock"),
            Err(SimError::AssertionFailed { time_fs: 0, .. })
        ));
    }

    #[test]
    fn failed_round_leaves_registers_untouched() {
        let sim = sim(adder_tree(vec![
            Stmt::assign(Expr::field(A), Expr::int(5)),
            Stmt::assert(Expr::compare(
                Expr::field(A),
                hwsim_ir::CmpOp::Gt,
                Expr::int(100),
            )),
        ]));
        assert!(sim.clock_edge("clock").is_err());
        assert_eq!(sim.get_output("a"), Ok(Value::Int(0)));
        assert_eq!(sim.get_output("sum"), Ok(Value::Int(0)));
        assert!(!sim.tree().comp(sim.tree().root()).state.has_pending());
    }

    #[test]
    fn cover_hits_are_counted() {
        let sim = sim(adder_tree(vec![Stmt::cover(Expr::bool(true))]));
        sim.clock_edge("clock").unwrap();
        sim.clock_edge("clock").unwrap();
        assert_eq!(sim.cover_hits().get("Top.update"), Some(&2));
    }

    #[test]
    fn unknown_paths_are_errors() {
        let sim = sim(adder_tree(Vec::new()));
        assert!(matches!(
            sim.get_output("nope"),
            Err(SimError::UnknownField { .. })
        ));
        assert!(matches!(
            sim.find("Top.nope"),
            Err(SimError::NoSuchComponent(_))
        ));
    }
}
