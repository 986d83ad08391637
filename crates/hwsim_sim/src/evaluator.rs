//! Statement executor and expression evaluator.
//!
//! One interpreter serves every execution discipline. It is written as
//! boxed futures so that process bodies can suspend on channels, locks,
//! events and waits. Sync and comb bodies are polled exactly once by the
//! engine; a body that tries to suspend there is reported as
//! [`SimError::IllegalSuspension`].
//!
//! Field writes go through [`Engine::write_field`], which either stages the
//! value ([`WriteMode::Deferred`]) or drives it at once
//! ([`WriteMode::Immediate`]).

use crate::engine::Engine;
use crate::error::SimError;
use crate::ops;
use crate::time::FS_PER_NS;
use crate::tree::CompId;
use crate::value::{Handle, Value};
use hwsim_ir::{AssertionKind, BoolOp, Builtin, Expr, Function, Keyword, Pattern, Stmt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// A boxed, non-`Send` future borrowing for `'a`.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// How field writes take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Staged until the end of the sync round.
    Deferred,
    /// Applied at once, firing watchers before the write returns.
    Immediate,
}

/// Activation record of one function or process body.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) comp: CompId,
    pub(crate) process: String,
    pub(crate) mode: WriteMode,
    pub(crate) params: Vec<Value>,
    pub(crate) locals: HashMap<String, Value>,
}

impl Frame {
    pub(crate) fn new(comp: CompId, process: &str, mode: WriteMode) -> Self {
        Self {
            comp,
            process: process.to_string(),
            mode,
            params: Vec::new(),
            locals: HashMap::new(),
        }
    }
}

/// Control flow out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Where a sync body stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncStep {
    /// Ran to the end (or returned).
    Done,
    /// Hit a top-level `cycles(n)` marker.
    Pause {
        /// Statement index to resume at.
        resume: usize,
        /// Edges the marker lasts.
        cycles: u64,
    },
}

/// The arguments of a top-level `cycles(...)` marker statement.
fn cycles_marker(stmt: &Stmt) -> Option<&[Expr]> {
    let Stmt::Expr(e) = stmt else {
        return None;
    };
    let inner = match e {
        Expr::Await { value } => value.as_ref(),
        other => other,
    };
    match inner {
        Expr::Call { func, args, .. } if matches!(func.as_ref(), Expr::Builtin(Builtin::Cycles)) => {
            Some(args)
        }
        _ => None,
    }
}

fn expr_kind(e: &Expr) -> &'static str {
    match e {
        Expr::Constant(_) => "constant",
        Expr::RefSelf => "self",
        Expr::RefField { .. } => "field reference",
        Expr::RefParam { .. } => "parameter",
        Expr::RefLocal { .. } => "local",
        Expr::Builtin(_) => "builtin",
        Expr::Bin { .. } => "binary expression",
        Expr::Unary { .. } => "unary expression",
        Expr::Bool { .. } => "boolean expression",
        Expr::Compare { .. } => "comparison",
        Expr::Attribute { .. } => "attribute",
        Expr::Subscript { .. } => "subscript",
        Expr::Call { .. } => "call",
        Expr::IfExp { .. } => "conditional expression",
        Expr::Await { .. } => "await",
        Expr::Tuple { .. } => "tuple",
    }
}

fn tuple_index(len: usize, index: i128) -> Result<usize, SimError> {
    let len_i = len as i128;
    let i = if index < 0 { index + len_i } else { index };
    if (0..len_i).contains(&i) {
        Ok(i as usize)
    } else {
        Err(SimError::IndexOutOfBounds {
            index,
            size: len as u64,
        })
    }
}

/// Longest tuple `range()` will build.
const MAX_RANGE_LEN: usize = 1 << 20;

fn range_items(start: i128, stop: i128, step: i128) -> Result<Vec<Value>, SimError> {
    if step == 0 {
        return Err(SimError::eval("range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut next = Some(start);
    while let Some(i) = next {
        if !((step > 0 && i < stop) || (step < 0 && i > stop)) {
            break;
        }
        if items.len() == MAX_RANGE_LEN {
            return Err(SimError::eval(format!(
                "range() is longer than {MAX_RANGE_LEN} items"
            )));
        }
        items.push(Value::Int(i));
        next = i.checked_add(step);
    }
    Ok(items)
}

fn arg(args: &[Value], i: usize, method: &str) -> Result<Value, SimError> {
    args.get(i)
        .cloned()
        .ok_or_else(|| SimError::eval(format!("{method}() missing argument {}", i + 1)))
}

fn access_size(v: &Value) -> Result<u32, SimError> {
    let n = v.as_int()?;
    u32::try_from(n).map_err(|_| SimError::InvalidAccessSize(u32::MAX))
}

/// Matches positional and keyword arguments to the parameters of `func`.
fn bind_args(
    func: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<Value>, SimError> {
    if args.len() > func.params.len() {
        return Err(SimError::eval(format!(
            "{}() takes {} arguments, {} given",
            func.name,
            func.params.len(),
            args.len()
        )));
    }
    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(func.params.len(), None);
    for (name, value) in kwargs {
        let i = func.param_index(&name).ok_or_else(|| {
            SimError::eval(format!("{}() has no parameter '{name}'", func.name))
        })?;
        slots[i] = Some(value);
    }
    slots
        .into_iter()
        .zip(&func.params)
        .map(|(v, p)| {
            v.ok_or_else(|| {
                SimError::eval(format!("{}() missing argument '{}'", func.name, p.name))
            })
        })
        .collect()
}

impl Engine {
    /// Evaluates an expression.
    pub(crate) fn eval<'a>(
        &'a self,
        frame: &'a mut Frame,
        expr: &'a Expr,
    ) -> LocalBoxFuture<'a, Result<Value, SimError>> {
        Box::pin(async move {
            match expr {
                Expr::Constant(c) => Ok(match c {
                    hwsim_ir::ConstValue::None => Value::None,
                    hwsim_ir::ConstValue::Bool(b) => Value::Bool(*b),
                    hwsim_ir::ConstValue::Int(v) => Value::Int(*v),
                    hwsim_ir::ConstValue::Str(s) => Value::Str(s.clone()),
                }),
                Expr::RefSelf => Ok(Value::Obj(Handle::Component(frame.comp))),
                Expr::RefField { base, index } => {
                    let comp = self.eval(frame, base).await?.as_component()?;
                    self.read_field(comp, *index)
                }
                Expr::RefParam { name, index } => {
                    frame.params.get(*index as usize).cloned().ok_or_else(|| {
                        SimError::eval(format!("no argument for parameter '{name}'"))
                    })
                }
                Expr::RefLocal { name } => frame
                    .locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SimError::eval(format!("local '{name}' read before assignment"))),
                Expr::Builtin(b) => Ok(Value::Obj(Handle::Builtin(*b))),
                Expr::Bin { lhs, op, rhs } => {
                    let l = self.eval(frame, lhs).await?;
                    let r = self.eval(frame, rhs).await?;
                    ops::binary(*op, &l, &r)
                }
                Expr::Unary { op, operand } => {
                    let v = self.eval(frame, operand).await?;
                    ops::unary(*op, &v)
                }
                Expr::Bool { op, values } => {
                    let mut last = Value::Bool(matches!(op, BoolOp::And));
                    for e in values {
                        last = self.eval(frame, e).await?;
                        let decided = match op {
                            BoolOp::And => !last.truthy(),
                            BoolOp::Or => last.truthy(),
                        };
                        if decided {
                            break;
                        }
                    }
                    Ok(last)
                }
                Expr::Compare {
                    left,
                    ops: cmp_ops,
                    comparators,
                } => {
                    let mut l = self.eval(frame, left).await?;
                    for (op, e) in cmp_ops.iter().zip(comparators) {
                        let r = self.eval(frame, e).await?;
                        if !ops::compare(*op, &l, &r)? {
                            return Ok(Value::Bool(false));
                        }
                        l = r;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::Attribute { value, attr } => {
                    let obj = self.eval(frame, value).await?;
                    self.attribute(obj, attr)
                }
                Expr::Subscript { value, index } => {
                    let container = self.eval(frame, value).await?;
                    let i = self.eval(frame, index).await?;
                    self.subscript(&container, &i)
                }
                Expr::Call {
                    func,
                    args,
                    keywords,
                } => {
                    let mut argv = Vec::with_capacity(args.len());
                    if let Expr::Builtin(b) = func.as_ref() {
                        for a in args {
                            argv.push(self.eval(frame, a).await?);
                        }
                        return self.call_builtin(*b, argv);
                    }
                    let callee = self.eval(frame, func).await?;
                    for a in args {
                        argv.push(self.eval(frame, a).await?);
                    }
                    let kwargs = self.eval_keywords(frame, keywords).await?;
                    self.call_value(callee, argv, kwargs, frame.mode).await
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval(frame, test).await?.truthy() {
                        self.eval(frame, body).await
                    } else {
                        self.eval(frame, orelse).await
                    }
                }
                Expr::Await { value } => self.eval(frame, value).await,
                Expr::Tuple { elts } => {
                    let mut items = Vec::with_capacity(elts.len());
                    for e in elts {
                        items.push(self.eval(frame, e).await?);
                    }
                    Ok(Value::Tuple(items))
                }
            }
        })
    }

    async fn eval_keywords(
        &self,
        frame: &mut Frame,
        keywords: &[Keyword],
    ) -> Result<Vec<(String, Value)>, SimError> {
        let mut out = Vec::with_capacity(keywords.len());
        for kw in keywords {
            out.push((kw.arg.clone(), self.eval(frame, &kw.value).await?));
        }
        Ok(out)
    }

    fn attribute(&self, obj: Value, attr: &str) -> Result<Value, SimError> {
        match &obj {
            Value::Obj(Handle::Component(id)) => {
                let c = self.tree.comp(*id);
                if let Some(index) = c.field_index(attr) {
                    return self.read_field(*id, index);
                }
                if c.functions.contains_key(attr) {
                    return Ok(Value::Obj(Handle::Method {
                        comp: *id,
                        name: attr.to_string(),
                    }));
                }
                if matches!(attr, "wait" | "time") {
                    return Ok(Value::Obj(Handle::BoundMethod {
                        target: Box::new(obj),
                        name: attr.to_string(),
                    }));
                }
                Err(SimError::UnknownField {
                    component: c.path.clone(),
                    field: attr.to_string(),
                })
            }
            Value::Obj(Handle::Interface(methods)) => {
                methods
                    .get(attr)
                    .cloned()
                    .ok_or_else(|| SimError::UnknownMethod {
                        target: "interface".into(),
                        method: attr.to_string(),
                    })
            }
            Value::Obj(_) => Ok(Value::Obj(Handle::BoundMethod {
                target: Box::new(obj),
                name: attr.to_string(),
            })),
            other => Err(SimError::eval(format!(
                "{} has no attribute '{attr}'",
                other.type_name()
            ))),
        }
    }

    fn subscript(&self, container: &Value, index: &Value) -> Result<Value, SimError> {
        match container {
            Value::Tuple(items) => Ok(items[tuple_index(items.len(), index.as_int()?)?].clone()),
            Value::Int(v) => {
                let bit = index.as_u64()?;
                Ok(Value::Int(if bit >= 128 { i128::from(*v < 0) } else { (v >> bit) & 1 }))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = tuple_index(chars.len(), index.as_int()?)?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Obj(Handle::Memory(m)) => Ok(Value::Int(m.borrow().read(index.as_int()?)?)),
            Value::Obj(Handle::RegFile(r)) => Ok(Value::Int(r.borrow().read(index.as_u64()?)?)),
            other => Err(SimError::eval(format!(
                "{} is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// Stores `value` into an assignment target.
    fn assign<'a>(
        &'a self,
        frame: &'a mut Frame,
        target: &'a Expr,
        value: Value,
    ) -> LocalBoxFuture<'a, Result<(), SimError>> {
        Box::pin(async move {
            match target {
                Expr::RefLocal { name } => {
                    frame.locals.insert(name.clone(), value);
                    Ok(())
                }
                Expr::RefParam { index, name } => match frame.params.get_mut(*index as usize) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(SimError::eval(format!("no parameter '{name}'"))),
                },
                Expr::RefField { base, index } => {
                    let comp = self.eval(frame, base).await?.as_component()?;
                    self.write_field(comp, *index, value, frame.mode)
                }
                Expr::Attribute { value: base, attr } => {
                    let comp = self.eval(frame, base).await?.as_component()?;
                    let c = self.tree.comp(comp);
                    let index = c.field_index(attr).ok_or_else(|| SimError::UnknownField {
                        component: c.path.clone(),
                        field: attr.clone(),
                    })?;
                    self.write_field(comp, index, value, frame.mode)
                }
                Expr::Tuple { elts } => {
                    let items = value.as_tuple()?.to_vec();
                    if items.len() != elts.len() {
                        return Err(SimError::eval(format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            elts.len()
                        )));
                    }
                    for (t, v) in elts.iter().zip(items) {
                        self.assign(frame, t, v).await?;
                    }
                    Ok(())
                }
                Expr::Subscript {
                    value: container_expr,
                    index,
                } => {
                    let container = self.eval(frame, container_expr).await?;
                    let i = self.eval(frame, index).await?;
                    match container {
                        Value::Obj(Handle::Memory(m)) => {
                            m.borrow_mut().write(i.as_int()?, value.as_int()?)
                        }
                        Value::Obj(Handle::RegFile(r)) => {
                            r.borrow_mut().write(i.as_u64()?, value.as_int()?)
                        }
                        Value::Int(v) => {
                            let bit = i.as_u64()?;
                            if bit >= 128 {
                                return Err(SimError::IndexOutOfBounds {
                                    index: i.as_int()?,
                                    size: 128,
                                });
                            }
                            let updated = if value.truthy() {
                                v | (1i128 << bit)
                            } else {
                                v & !(1i128 << bit)
                            };
                            self.assign(frame, container_expr, Value::Int(updated)).await
                        }
                        Value::Tuple(mut items) => {
                            let k = tuple_index(items.len(), i.as_int()?)?;
                            items[k] = value;
                            self.assign(frame, container_expr, Value::Tuple(items)).await
                        }
                        other => Err(SimError::eval(format!(
                            "{} does not support item assignment",
                            other.type_name()
                        ))),
                    }
                }
                other => Err(SimError::unsupported(format!(
                    "assignment to {}",
                    expr_kind(other)
                ))),
            }
        })
    }

    /// Executes statements in order until one leaves the block.
    pub(crate) fn exec_block<'a>(
        &'a self,
        frame: &'a mut Frame,
        body: &'a [Stmt],
    ) -> LocalBoxFuture<'a, Result<Flow, SimError>> {
        Box::pin(async move {
            for stmt in body {
                let flow = self.exec_stmt(frame, stmt).await?;
                if flow != Flow::Normal {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        })
    }

    /// Executes a sync body from statement `start`, stopping at a top-level
    /// `cycles(n)` marker.
    pub(crate) fn exec_sync_body<'a>(
        &'a self,
        frame: &'a mut Frame,
        body: &'a [Stmt],
        start: usize,
    ) -> LocalBoxFuture<'a, Result<SyncStep, SimError>> {
        Box::pin(async move {
            for (i, stmt) in body.iter().enumerate().skip(start) {
                if let Some(args) = cycles_marker(stmt) {
                    let n = match args.first() {
                        Some(e) => self.eval(frame, e).await?.as_int()?,
                        None => 1,
                    };
                    return Ok(SyncStep::Pause {
                        resume: i + 1,
                        cycles: u64::try_from(n.max(1)).unwrap_or(1),
                    });
                }
                match self.exec_stmt(frame, stmt).await? {
                    Flow::Normal => {}
                    Flow::Return(_) => return Ok(SyncStep::Done),
                    Flow::Break | Flow::Continue => {
                        return Err(SimError::eval("'break' or 'continue' outside a loop"))
                    }
                }
            }
            Ok(SyncStep::Done)
        })
    }

    fn exec_stmt<'a>(
        &'a self,
        frame: &'a mut Frame,
        stmt: &'a Stmt,
    ) -> LocalBoxFuture<'a, Result<Flow, SimError>> {
        Box::pin(async move {
            match stmt {
                Stmt::Assign { targets, value } => {
                    let v = self.eval(frame, value).await?;
                    for t in targets {
                        self.assign(frame, t, v.clone()).await?;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::AugAssign { target, op, value } => {
                    let cur = self.eval(frame, target).await?;
                    let rhs = self.eval(frame, value).await?;
                    let updated = match op.bin_op() {
                        Some(bin) => ops::binary(bin, &cur, &rhs)?,
                        None => ops::pow(&cur, &rhs)?,
                    };
                    self.assign(frame, target, updated).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Return(value) => {
                    let v = match value {
                        Some(e) => self.eval(frame, e).await?,
                        None => Value::None,
                    };
                    Ok(Flow::Return(v))
                }
                Stmt::If { test, body, orelse } => {
                    if self.eval(frame, test).await?.truthy() {
                        self.exec_block(frame, body).await
                    } else {
                        self.exec_block(frame, orelse).await
                    }
                }
                Stmt::For {
                    target,
                    iter,
                    body,
                    orelse,
                } => {
                    let items = match self.eval(frame, iter).await? {
                        Value::Tuple(items) => items,
                        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                        other => {
                            return Err(SimError::eval(format!(
                                "cannot iterate over {}",
                                other.type_name()
                            )))
                        }
                    };
                    for item in items {
                        self.assign(frame, target, item).await?;
                        match self.exec_block(frame, body).await? {
                            Flow::Break => return Ok(Flow::Normal),
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    self.exec_block(frame, orelse).await
                }
                Stmt::While { test, body, orelse } => {
                    while self.eval(frame, test).await?.truthy() {
                        match self.exec_block(frame, body).await? {
                            Flow::Break => return Ok(Flow::Normal),
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    self.exec_block(frame, orelse).await
                }
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
                Stmt::Pass => Ok(Flow::Normal),
                Stmt::Assertion { kind, test, msg } => {
                    let holds = self.eval(frame, test).await?.truthy();
                    let message = match msg {
                        Some(e) => Some(self.eval(frame, e).await?.to_string()),
                        None => None,
                    };
                    let path = &self.tree.comp(frame.comp).path;
                    match kind {
                        AssertionKind::Cover => {
                            if holds {
                                let key = message
                                    .unwrap_or_else(|| format!("{path}.{}", frame.process));
                                self.record_cover(key);
                            }
                            Ok(Flow::Normal)
                        }
                        AssertionKind::Assert | AssertionKind::Assume if !holds => {
                            let what = if *kind == AssertionKind::Assert {
                                "assertion"
                            } else {
                                "assumption"
                            };
                            Err(SimError::AssertionFailed {
                                time_fs: self.timebase.now().fs,
                                message: message.unwrap_or_else(|| {
                                    format!("{what} in {path}.{} does not hold", frame.process)
                                }),
                            })
                        }
                        AssertionKind::Assert | AssertionKind::Assume => Ok(Flow::Normal),
                    }
                }
                Stmt::Match { subject, cases } => {
                    let v = self.eval(frame, subject).await?;
                    for case in cases {
                        if !self.match_pattern(frame, &case.pattern, &v).await? {
                            continue;
                        }
                        if let Some(guard) = &case.guard {
                            if !self.eval(frame, guard).await?.truthy() {
                                continue;
                            }
                        }
                        return self.exec_block(frame, &case.body).await;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Expr(e) => {
                    if cycles_marker(stmt).is_some() {
                        return Err(SimError::unsupported(
                            "cycles() outside the top level of a sync process",
                        ));
                    }
                    self.eval(frame, e).await?;
                    Ok(Flow::Normal)
                }
            }
        })
    }

    fn match_pattern<'a>(
        &'a self,
        frame: &'a mut Frame,
        pattern: &'a Pattern,
        subject: &'a Value,
    ) -> LocalBoxFuture<'a, Result<bool, SimError>> {
        Box::pin(async move {
            match pattern {
                Pattern::Value(None) => Ok(true),
                Pattern::Value(Some(e)) => Ok(self.eval(frame, e).await? == *subject),
                Pattern::As { pattern, name } => {
                    let matched = match pattern {
                        Some(inner) => self.match_pattern(frame, inner, subject).await?,
                        None => true,
                    };
                    if matched {
                        frame.locals.insert(name.clone(), subject.clone());
                    }
                    Ok(matched)
                }
                Pattern::Or(alternatives) => {
                    for alt in alternatives {
                        if self.match_pattern(frame, alt, subject).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        })
    }

    /// Calls a callable value.
    pub(crate) fn call_value(
        &self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        mode: WriteMode,
    ) -> LocalBoxFuture<'_, Result<Value, SimError>> {
        Box::pin(async move {
            match callee {
                Value::Obj(Handle::Method { comp, name }) => {
                    self.call_function(comp, &name, args, kwargs, mode).await
                }
                Value::Obj(Handle::BoundMethod { target, name }) => {
                    if !kwargs.is_empty() {
                        return Err(SimError::eval(format!(
                            "{name}() takes no keyword arguments"
                        )));
                    }
                    self.call_method(*target, name, args).await
                }
                Value::Obj(Handle::Builtin(b)) => self.call_builtin(b, args),
                other => Err(SimError::eval(format!(
                    "{} is not callable",
                    other.type_name()
                ))),
            }
        })
    }

    /// Calls a function of a component instance.
    pub(crate) fn call_function<'a>(
        &'a self,
        comp: CompId,
        name: &'a str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        mode: WriteMode,
    ) -> LocalBoxFuture<'a, Result<Value, SimError>> {
        Box::pin(async move {
            let c = self.tree.comp(comp);
            let func = c
                .functions
                .get(name)
                .cloned()
                .ok_or_else(|| SimError::UnknownMethod {
                    target: c.path.clone(),
                    method: name.to_string(),
                })?;
            let mut frame = Frame::new(comp, &func.name, mode);
            frame.params = bind_args(&func, args, kwargs)?;
            match self.exec_block(&mut frame, &func.body).await? {
                Flow::Return(v) => Ok(v),
                _ => Ok(Value::None),
            }
        })
    }

    /// Calls a built-in method of a runtime object.
    fn call_method(
        &self,
        target: Value,
        name: String,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'_, Result<Value, SimError>> {
        Box::pin(async move {
            let m = name.as_str();
            let Value::Obj(handle) = &target else {
                return Err(SimError::eval(format!("{} has no methods", target.type_name())));
            };
            let unknown = || SimError::UnknownMethod {
                target: handle.kind().to_string(),
                method: name.clone(),
            };
            match handle {
                Handle::Component(_) => match m {
                    "wait" => {
                        let ns = match args.first() {
                            Some(v) => v.as_u64()?,
                            None => 0,
                        };
                        self.timebase.wait(ns.saturating_mul(FS_PER_NS)).await;
                        Ok(Value::None)
                    }
                    "time" => Ok(Value::Int(i128::from(self.timebase.now().to_ns()))),
                    _ => Err(unknown()),
                },
                Handle::Channel(ch) => match m {
                    "get" => Ok(ch.get().await),
                    "put" => {
                        ch.put(arg(&args, 0, m)?).await;
                        Ok(Value::None)
                    }
                    "try_get" => Ok(ch.try_get().unwrap_or(Value::None)),
                    "try_put" => Ok(Value::Bool(ch.try_put(arg(&args, 0, m)?).is_ok())),
                    "can_get" => Ok(Value::Bool(ch.can_get())),
                    "can_put" => Ok(Value::Bool(ch.can_put())),
                    "len" => Ok(Value::Int(ch.len() as i128)),
                    _ => Err(unknown()),
                },
                Handle::GetPort(end) => match m {
                    "get" => Ok(end.get().await),
                    "try_get" => Ok(end.try_get().unwrap_or(Value::None)),
                    "can_get" => Ok(Value::Bool(end.can_get())),
                    _ => Err(unknown()),
                },
                Handle::PutPort(end) => match m {
                    "put" => {
                        end.put(arg(&args, 0, m)?).await;
                        Ok(Value::None)
                    }
                    "try_put" => Ok(Value::Bool(end.try_put(arg(&args, 0, m)?).is_ok())),
                    "can_put" => Ok(Value::Bool(end.can_put())),
                    _ => Err(unknown()),
                },
                Handle::Lock(lock) => match m {
                    "acquire" => {
                        lock.acquire().await;
                        Ok(Value::None)
                    }
                    "release" => {
                        lock.release()?;
                        Ok(Value::None)
                    }
                    "try_acquire" => Ok(Value::Bool(lock.try_acquire())),
                    "is_locked" => Ok(Value::Bool(lock.is_locked())),
                    _ => Err(unknown()),
                },
                Handle::Event(ev) => match m {
                    "set" => {
                        ev.set()?;
                        Ok(Value::None)
                    }
                    "clear" => {
                        ev.clear();
                        Ok(Value::None)
                    }
                    "is_set" => Ok(Value::Bool(ev.is_set())),
                    "wait" => {
                        ev.wait().await;
                        Ok(Value::None)
                    }
                    _ => Err(unknown()),
                },
                Handle::Memory(mem) => match m {
                    "read" => Ok(Value::Int(mem.borrow().read(arg(&args, 0, m)?.as_int()?)?)),
                    "write" => {
                        let index = arg(&args, 0, m)?.as_int()?;
                        let value = arg(&args, 1, m)?.as_int()?;
                        mem.borrow_mut().write(index, value)?;
                        Ok(Value::None)
                    }
                    "size" => Ok(Value::Int(i128::from(mem.borrow().size()))),
                    _ => Err(unknown()),
                },
                Handle::RegFile(rf) => match m {
                    "read" => Ok(Value::Int(rf.borrow().read(arg(&args, 0, m)?.as_u64()?)?)),
                    "write" => {
                        let offset = arg(&args, 0, m)?.as_u64()?;
                        let value = arg(&args, 1, m)?.as_int()?;
                        rf.borrow_mut().write(offset, value)?;
                        Ok(Value::None)
                    }
                    _ => Err(unknown()),
                },
                Handle::AddressSpace(space) => match m {
                    "read" => {
                        let addr = arg(&args, 0, m)?.as_u64()?;
                        let size = access_size(&arg(&args, 1, m)?)?;
                        Ok(Value::Int(i128::from(space.borrow().read(addr, size)?)))
                    }
                    "write" => {
                        let addr = arg(&args, 0, m)?.as_u64()?;
                        let value = arg(&args, 1, m)?.as_int()? as u64;
                        let size = access_size(&arg(&args, 2, m)?)?;
                        space.borrow().write(addr, value, size)?;
                        Ok(Value::None)
                    }
                    _ => Err(unknown()),
                },
                Handle::AddrHandle(h) => {
                    let offset = arg(&args, 0, m)?.as_u64()?;
                    let value = || -> Result<u64, SimError> { Ok(arg(&args, 1, m)?.as_int()? as u64) };
                    let read = |v: u64| -> Result<Value, SimError> { Ok(Value::Int(i128::from(v))) };
                    match m {
                        "read" => read(h.read(offset, access_size(&arg(&args, 1, m)?)?)?),
                        "write" => {
                            let size = access_size(&arg(&args, 2, m)?)?;
                            h.write(offset, value()?, size).map(|_| Value::None)
                        }
                        "read8" => read(h.read8(offset)?),
                        "read16" => read(h.read16(offset)?),
                        "read32" => read(h.read32(offset)?),
                        "read64" => read(h.read64(offset)?),
                        "write8" => h.write8(offset, value()?).map(|_| Value::None),
                        "write16" => h.write16(offset, value()?).map(|_| Value::None),
                        "write32" => h.write32(offset, value()?).map(|_| Value::None),
                        "write64" => h.write64(offset, value()?).map(|_| Value::None),
                        "offset" => Ok(Value::Obj(Handle::AddrHandle(h.offset(offset)))),
                        _ => Err(unknown()),
                    }
                }
                Handle::Method { .. }
                | Handle::BoundMethod { .. }
                | Handle::Builtin(_)
                | Handle::Interface(_) => Err(unknown()),
            }
        })
    }

    /// Evaluates a built-in helper.
    fn call_builtin(&self, builtin: Builtin, args: Vec<Value>) -> Result<Value, SimError> {
        match builtin {
            Builtin::Cycles => Err(SimError::unsupported(
                "cycles() outside the top level of a sync process",
            )),
            Builtin::At => Err(SimError::unsupported("at() outside an address-space bind")),
            Builtin::Range => {
                let ints = args
                    .iter()
                    .map(Value::as_int)
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(SimError::eval("range() takes 1 to 3 arguments")),
                };
                range_items(start, stop, step).map(Value::Tuple)
            }
            Builtin::Len => match args.first() {
                Some(Value::Tuple(items)) => Ok(Value::Int(items.len() as i128)),
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i128)),
                Some(Value::Obj(Handle::Channel(ch))) => Ok(Value::Int(ch.len() as i128)),
                Some(other) => Err(SimError::eval(format!(
                    "len() of {}",
                    other.type_name()
                ))),
                None => Err(SimError::eval("len() takes one argument")),
            },
            Builtin::Print => {
                let text = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                log::info!("[{}] {text}", self.timebase.now());
                Ok(Value::None)
            }
            Builtin::Min | Builtin::Max => {
                let items = match args.as_slice() {
                    [Value::Tuple(items)] => items.clone(),
                    _ => args,
                };
                let mut best: Option<i128> = None;
                for v in &items {
                    let v = v.as_int()?;
                    best = Some(match best {
                        None => v,
                        Some(b) if builtin == Builtin::Min => b.min(v),
                        Some(b) => b.max(v),
                    });
                }
                best.map(Value::Int)
                    .ok_or_else(|| SimError::eval(format!("{}() of nothing", builtin.name())))
            }
            Builtin::Abs => Ok(Value::Int(
                args.first()
                    .ok_or_else(|| SimError::eval("abs() takes one argument"))?
                    .as_int()?
                    .wrapping_abs(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_ir::{Param, Stmt};

    #[test]
    fn cycles_marker_detection() {
        let awaited = Stmt::expr(Expr::awaited(Expr::builtin(Builtin::Cycles, vec![Expr::int(2)])));
        assert_eq!(cycles_marker(&awaited).map(<[Expr]>::len), Some(1));
        let bare = Stmt::expr(Expr::builtin(Builtin::Cycles, vec![]));
        assert_eq!(cycles_marker(&bare).map(<[Expr]>::len), Some(0));
        assert!(cycles_marker(&Stmt::Pass).is_none());
    }

    #[test]
    fn tuple_index_supports_negative() {
        assert_eq!(tuple_index(3, -1), Ok(2));
        assert_eq!(tuple_index(3, 0), Ok(0));
        assert!(tuple_index(3, 3).is_err());
        assert!(tuple_index(3, -4).is_err());
    }

    #[test]
    fn range_stops_at_the_integer_limit() {
        let ints = |v: Vec<Value>| v.iter().map(|x| x.as_int().unwrap()).collect::<Vec<_>>();
        assert_eq!(ints(range_items(0, 4, 1).unwrap()), [0, 1, 2, 3]);
        assert_eq!(ints(range_items(3, 0, -2).unwrap()), [3, 1]);
        assert_eq!(
            ints(range_items(i128::MAX - 1, i128::MAX, 5).unwrap()),
            [i128::MAX - 1]
        );
        assert_eq!(
            ints(range_items(i128::MIN + 1, i128::MIN, -3).unwrap()),
            [i128::MIN + 1]
        );
        assert!(range_items(0, 4, 0).is_err());
    }

    #[test]
    fn huge_range_is_an_error() {
        let err = range_items(0, i128::MAX, 1).unwrap_err();
        assert!(err.to_string().contains("range()"), "{err}");
        assert_eq!(range_items(0, MAX_RANGE_LEN as i128, 1).unwrap().len(), MAX_RANGE_LEN);
    }

    #[test]
    fn bind_args_by_keyword() {
        let mut f = Function::new("f");
        f.params.push(Param { name: "a".into(), datatype: None });
        f.params.push(Param { name: "b".into(), datatype: None });
        let bound = bind_args(&f, vec![Value::Int(1)], vec![("b".into(), Value::Int(2))]).unwrap();
        assert_eq!(bound, vec![Value::Int(1), Value::Int(2)]);
        assert!(bind_args(&f, vec![Value::Int(1)], vec![]).is_err());
        assert!(bind_args(&f, vec![], vec![("c".into(), Value::Int(0))]).is_err());
        assert!(bind_args(&f, vec![Value::None; 3], vec![]).is_err());
    }
}
