//! The register-machine execution loop.
//!
//! A function executes block by block: instructions run linearly, then the
//! terminator picks the next block (with one-step goto threading and fused
//! compare-and-branch). Exceptions route through the function's try/catch
//! ranges before unwinding to the caller.

use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    errors::{ExcKind, RunError, RunResult},
    interp::Interpreter,
    mir::{
        CollKind, Cond, Frame, Inst, MirClass, MirFnKind, MirFunction, MirModule, Terminator,
    },
    ops::{self, BinOp, RawResult},
    types::{
        Args, ArrayValue, Callable, ClassValue, ConstructorDef, EnumEntry, FieldDef, MethodDef, MirClosure,
        ObjectValue, ParamDef,
    },
    value::Value,
};

impl Interpreter {
    /// Registers and executes a MIR module; returns `main`'s value (or unit).
    pub(crate) fn execute_mir_module(&mut self, module: &Arc<MirModule>) -> RunResult<Value> {
        self.mir_module = Some(module.clone());
        self.register_mir_module(module)?;
        match module.function("main") {
            Some(main) => {
                let mir = Arc::new(MirClosure {
                    module: module.clone(),
                    func: main.clone(),
                });
                self.call_mir_function(&mir, None, SmallVec::new())
            }
            None => Ok(Value::Unit),
        }
    }

    /// Registers classes, extensions, and imports, then runs static
    /// initializer functions in declaration order.
    pub(crate) fn register_mir_module(&mut self, module: &Arc<MirModule>) -> RunResult<()> {
        for import in &module.imports {
            if let crate::mir::MirImport::Wildcard(pkg) = import {
                self.runtime().foreign().add_common_package(pkg.to_string());
            }
        }

        // Classes may reference earlier classes as supertypes; a bounded
        // deferral loop handles forward-independent ordering.
        let mut pending: Vec<&MirClass> = module.classes.iter().collect();
        let mut passes = 0;
        while !pending.is_empty() {
            passes += 1;
            if passes > module.classes.len() + 1 {
                let name = pending[0].superclass.clone().unwrap_or_default();
                return Err(RunError::exc(
                    ExcKind::ClassNotFound,
                    format!("unresolved supertype: {name}"),
                ));
            }
            let mut deferred = Vec::new();
            for decl in pending {
                if self.mir_class_ready(decl) {
                    self.register_mir_class(module, decl)?;
                } else {
                    deferred.push(decl);
                }
            }
            pending = deferred;
        }

        for ext in &module.extension_fns {
            if let Some(func) = module.function(&ext.function) {
                let callable = Value::Func(Callable::Mir(Arc::new(MirClosure {
                    module: module.clone(),
                    func: func.clone(),
                })));
                self.runtime()
                    .register_extension_fn(ext.target.clone(), ext.name.clone(), callable);
            }
        }
        for ext in &module.extension_props {
            if let Some(func) = module.function(&ext.function) {
                let getter = Value::Func(Callable::Mir(Arc::new(MirClosure {
                    module: module.clone(),
                    func: func.clone(),
                })));
                self.runtime()
                    .register_extension_prop(ext.target.clone(), ext.name.clone(), getter);
            }
        }

        let inits: Vec<Arc<MirFunction>> = module
            .functions
            .values()
            .filter(|f| f.kind == MirFnKind::StaticInit)
            .cloned()
            .collect();
        for init in inits {
            let mir = Arc::new(MirClosure {
                module: module.clone(),
                func: init,
            });
            self.call_mir_function(&mir, None, SmallVec::new())?;
        }
        Ok(())
    }

    fn mir_class_ready(&self, decl: &MirClass) -> bool {
        let known = |name: &Arc<str>| self.runtime().class_by_name(name).is_some();
        decl.superclass.as_ref().is_none_or(|s| {
            known(s) || {
                // Foreign supertypes never enter the class table.
                self.runtime()
                    .resolve_foreign_class(s, self.policy())
                    .ok()
                    .flatten()
                    .is_some()
            }
        }) && decl.interfaces.iter().all(known)
    }

    fn register_mir_class(&mut self, module: &Arc<MirModule>, decl: &MirClass) -> RunResult<()> {
        let superclass = decl.superclass.as_ref().and_then(|s| self.runtime().class_by_name(s));
        let foreign_super = match (&decl.superclass, &superclass) {
            (Some(name), None) => self.runtime().resolve_foreign_class(name, self.policy())?,
            _ => None,
        };
        let mut interfaces = Vec::with_capacity(decl.interfaces.len());
        for name in &decl.interfaces {
            if let Some(iface) = self.runtime().class_by_name(name) {
                interfaces.push(iface);
            }
        }

        let id = self.runtime().next_class_id();
        let mut class = ClassValue::new(
            id,
            decl.name.clone(),
            superclass,
            interfaces,
            decl.kind,
            decl.is_abstract,
            decl.is_sealed,
            decl.is_data,
        );
        class.foreign_super = foreign_super;
        class.annotations = decl.annotations.clone();
        class.data_fields = decl.data_fields.clone();
        for field in &decl.fields {
            class.fields.push(FieldDef {
                name: field.name.clone(),
                mutable: field.mutable,
                visibility: field.visibility,
            });
        }
        for method in &decl.methods {
            let Some(func) = module.function(&method.function) else {
                return Err(RunError::internal(format!(
                    "class {} references missing function {}",
                    decl.name, method.function
                )));
            };
            class.methods.insert(
                method.name.clone(),
                MethodDef {
                    name: method.name.clone(),
                    callable: Callable::Mir(Arc::new(MirClosure {
                        module: module.clone(),
                        func: func.clone(),
                    })),
                    visibility: method.visibility,
                    is_static: method.is_static,
                    is_abstract: method.is_abstract,
                    is_default: method.is_default,
                },
            );
        }
        for ctor_name in &decl.constructors {
            let Some(func) = module.function(ctor_name) else {
                return Err(RunError::internal(format!(
                    "class {} references missing constructor {ctor_name}",
                    decl.name
                )));
            };
            let params = func
                .params
                .iter()
                .skip(usize::from(func.has_this))
                .map(|name| ParamDef {
                    name: name.clone(),
                    has_default: false,
                })
                .collect();
            class.constructors.push(ConstructorDef {
                params,
                callable: Callable::Mir(Arc::new(MirClosure {
                    module: module.clone(),
                    func: func.clone(),
                })),
                visibility: crate::types::Visibility::Public,
            });
        }

        let class = Arc::new(class);
        self.runtime().register_class(class.clone());

        for (ordinal, entry_name) in decl.enum_entries.iter().enumerate() {
            let entry = Arc::new(EnumEntry {
                owner: Arc::downgrade(&class),
                owner_name: class.name.clone(),
                name: entry_name.clone(),
                ordinal: ordinal as u32,
                fields: parking_lot::RwLock::new(AHashMap::new()),
                overrides: AHashMap::new(),
            });
            class.enum_entries.write().push(entry);
        }

        self.run_annotation_processors(&class)
    }

    /// Calls a MIR function through the pooled-frame fast path.
    pub(crate) fn call_mir_function(
        &mut self,
        mir: &Arc<MirClosure>,
        this: Option<Value>,
        args: Args,
    ) -> RunResult<Value> {
        self.call_mir_with_reified(mir, this, args, None)
    }

    pub(crate) fn call_mir_with_reified(
        &mut self,
        mir: &Arc<MirClosure>,
        this: Option<Value>,
        args: Args,
        type_args: Option<Vec<Arc<str>>>,
    ) -> RunResult<Value> {
        let func = mir.func.clone();
        let module = mir.module.clone();
        if args.len() != func.arity() {
            return Err(RunError::arity(&func.name, func.arity(), args.len()));
        }

        let mut frame = self.frame_pool.acquire(func.frame_size.max(func.params.len() as u16));
        let mut slot = 0u16;
        if func.has_this {
            frame.set(0, this.unwrap_or(Value::Null));
            slot = 1;
        }
        for arg in args {
            frame.set(slot, arg);
            slot += 1;
        }
        if let Some(actuals) = type_args {
            let map: AHashMap<Arc<str>, Arc<str>> =
                func.reified.iter().cloned().zip(actuals).collect();
            if !map.is_empty() {
                frame.reified = Some(map);
            }
        }

        self.enter_call(&func.name, None)?;
        let result = self.exec_mir(&module, &func, &mut frame);
        self.pop_call();
        self.frame_pool.release(frame);
        result
    }

    fn exec_mir(&mut self, module: &Arc<MirModule>, func: &Arc<MirFunction>, frame: &mut Frame) -> RunResult<Value> {
        'blocks: loop {
            let block = func
                .blocks
                .get(frame.block as usize)
                .ok_or_else(|| RunError::internal("block id out of range"))?;

            while frame.pc < block.insts.len() {
                let idx = frame.pc;
                frame.pc += 1;
                let inst = &block.insts[idx];
                if let Err(err) = self.exec_inst(module, func, frame, inst) {
                    self.handle_mir_exc(func, frame, err)?;
                    continue 'blocks;
                }
            }

            match &block.term {
                Terminator::Goto(bb) => {
                    let target = match self.thread_goto(func, *bb, frame) {
                        Ok(target) => target,
                        Err(err) => {
                            self.handle_mir_exc(func, frame, err)?;
                            continue 'blocks;
                        }
                    };
                    frame.block = target;
                    frame.pc = 0;
                }
                Terminator::Branch { cond, then_bb, else_bb } => match self.eval_cond(frame, cond) {
                    Ok(taken) => {
                        frame.block = if taken { *then_bb } else { *else_bb };
                        frame.pc = 0;
                    }
                    Err(err) => {
                        self.handle_mir_exc(func, frame, err)?;
                        continue 'blocks;
                    }
                },
                Terminator::Return(reg) => {
                    return Ok(match reg {
                        Some(r) => frame.boxed(*r),
                        None => Value::Unit,
                    });
                }
                Terminator::TailCall { args } => {
                    if let Err(err) = self.exec_tail_call(func, frame, args) {
                        self.handle_mir_exc(func, frame, err)?;
                        continue 'blocks;
                    }
                }
                Terminator::Switch { src, keys, default } => {
                    let scrutinee = frame.boxed(*src);
                    frame.block = switch_target(&scrutinee, keys, *default);
                    frame.pc = 0;
                }
                Terminator::Throw(r) => {
                    let value = frame.boxed(*r);
                    let err = self.raise_thrown(value);
                    self.handle_mir_exc(func, frame, err)?;
                    continue 'blocks;
                }
                Terminator::Unreachable => {
                    return Err(RunError::internal(format!(
                        "reached unreachable terminator in {}",
                        func.name
                    )));
                }
            }
        }
    }

    /// One-step goto threading: a goto into an empty block falls through its
    /// goto or branch terminator without a dispatch round-trip.
    fn thread_goto(&mut self, func: &MirFunction, bb: u32, frame: &Frame) -> RunResult<u32> {
        let target = &func.blocks[bb as usize];
        if !target.insts.is_empty() {
            return Ok(bb);
        }
        match &target.term {
            Terminator::Goto(next) => Ok(*next),
            Terminator::Branch { cond, then_bb, else_bb } => {
                if self.eval_cond(frame, cond)? {
                    Ok(*then_bb)
                } else {
                    Ok(*else_bb)
                }
            }
            _ => Ok(bb),
        }
    }

    /// Self tail call: rebind parameter locals in the current frame, jump to
    /// the entry block, and count the fold against the recursion cap.
    fn exec_tail_call(&mut self, func: &Arc<MirFunction>, frame: &mut Frame, args: &[crate::mir::Reg]) -> RunResult<()> {
        if args.len() != func.arity() {
            return Err(RunError::arity(&func.name, func.arity(), args.len()));
        }
        // Snapshot first: argument registers may alias parameter slots.
        enum Slot {
            Raw(i64),
            Val(Value),
        }
        let snapshot: SmallVec<[Slot; 8]> = args
            .iter()
            .map(|&r| {
                if frame.is_raw(r) {
                    Slot::Raw(frame.raw(r))
                } else {
                    Slot::Val(frame.boxed(r))
                }
            })
            .collect();
        let base = u16::from(func.has_this);
        for (i, slot) in snapshot.into_iter().enumerate() {
            let dst = base + i as u16;
            match slot {
                Slot::Raw(v) => frame.set_raw(dst, v),
                Slot::Val(v) => frame.set(dst, v),
            }
        }
        frame.tail_calls += 1;
        self.fold_tail_call()?;
        self.check_back_edge()?;
        frame.block = 0;
        frame.pc = 0;
        Ok(())
    }

    /// Routes an exception to the innermost matching try/catch range, or
    /// propagates it to the caller.
    fn handle_mir_exc(&mut self, func: &Arc<MirFunction>, frame: &mut Frame, err: RunError) -> RunResult<()> {
        self.tracer_handle().on_throw(err.kind().into());
        if !err.is_catchable() {
            return Err(err);
        }
        let current = frame.block;
        let Some(entry) = func
            .try_catch
            .iter()
            .find(|e| e.try_start_block <= current && current <= e.try_end_block)
        else {
            return Err(err);
        };

        let RunError::Exc(mut raise) = err else {
            return Err(err);
        };
        let bound = match raise.exc.take_payload() {
            Some(payload) => payload,
            None => self
                .runtime()
                .make_exception_value(raise.exc.kind(), raise.exc.message().unwrap_or_default()),
        };
        frame.set(entry.exception_local, bound);
        frame.block = entry.handler_block;
        frame.pc = 0;
        Ok(())
    }

    fn eval_cond(&mut self, frame: &Frame, cond: &Cond) -> RunResult<bool> {
        match cond {
            Cond::Reg(r) => Ok(frame.boxed(*r).is_truthy()),
            // Fused compare-and-branch: raw operands never materialize a Bool.
            Cond::Cmp { op, lhs, rhs } => {
                if frame.is_raw(*lhs) && frame.is_raw(*rhs) {
                    return match ops::raw_binary(*op, frame.raw(*lhs), frame.raw(*rhs))? {
                        RawResult::Bool(b) => Ok(b),
                        RawResult::Raw(v) => Ok(v != 0),
                    };
                }
                let l = frame.boxed(*lhs);
                let r = frame.boxed(*rhs);
                // The raw-vs-null rule: a raw int never equals null.
                Ok(ops::binary_op(self, *op, l, r)?.is_truthy())
            }
        }
    }

    fn exec_inst(
        &mut self,
        module: &Arc<MirModule>,
        _func: &Arc<MirFunction>,
        frame: &mut Frame,
        inst: &Inst,
    ) -> RunResult<()> {
        match inst {
            Inst::ConstInt { dst, value } => frame.set_raw(*dst, *value),
            Inst::ConstLong { dst, value } => frame.set(*dst, Value::Long(*value)),
            Inst::ConstDouble { dst, value } => frame.set(*dst, Value::Double(*value)),
            Inst::ConstFloat { dst, value } => frame.set(*dst, Value::Double(f64::from(*value))),
            Inst::ConstString { dst, value } => frame.set(*dst, Value::Str(value.clone())),
            Inst::ConstBool { dst, value } => frame.set(*dst, Value::Bool(*value)),
            Inst::ConstChar { dst, value } => frame.set(*dst, Value::Char(*value)),
            Inst::ConstNull { dst } => frame.set(*dst, Value::Null),
            Inst::ConstClass { dst, name } => {
                let name = frame.substitute_type(name).to_owned();
                let value = self.class_literal(&name)?;
                frame.set(*dst, value);
            }
            Inst::Move { dst, src } => frame.copy(*dst, *src),

            Inst::Binary { dst, op, lhs, rhs } => self.exec_binary(frame, *dst, *op, *lhs, *rhs)?,
            Inst::Unary { dst, op, src } => {
                if frame.is_raw(*src)
                    && let Some(raw) = ops::raw_unary(*op, frame.raw(*src))
                {
                    frame.set_raw(*dst, raw);
                } else {
                    let v = frame.boxed(*src);
                    let result = ops::unary_op(self, *op, v)?;
                    frame.set(*dst, result);
                }
            }

            Inst::NewObject { dst, owner } => {
                let class = self
                    .runtime()
                    .class_by_name(owner)
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {owner}")))?;
                frame.set(*dst, Value::Object(Arc::new(ObjectValue::new(class))));
            }
            Inst::GetField { dst, obj, name } => {
                let target = frame.boxed(*obj);
                let value = self.get_field_value(&target, name)?;
                frame.set(*dst, value);
            }
            Inst::SetField { obj, name, src } => {
                let target = frame.boxed(*obj);
                let value = frame.boxed(*src);
                self.set_member(&target, name, value)?;
            }
            Inst::GetStatic { dst, owner, name } => {
                let value = self.get_static(owner, name)?;
                frame.set(*dst, value);
            }
            Inst::SetStatic { owner, name, src } => {
                let value = frame.boxed(*src);
                let class = self
                    .runtime()
                    .class_by_name(owner)
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {owner}")))?;
                class.statics.write().insert(name.clone(), value);
            }

            Inst::InvokeVirtual {
                dst,
                recv,
                method,
                args,
                named,
                cache,
            } => {
                let receiver = frame.boxed(*recv);
                let argv = collect_args(frame, args);
                let result = self.invoke_virtual_cached(&receiver, method, argv, named.as_deref(), Some(cache), frame)?;
                if let Some(dst) = dst {
                    frame.set(*dst, result);
                }
            }
            Inst::InvokeInterface {
                dst,
                recv,
                method,
                args,
                named,
            } => {
                let receiver = frame.boxed(*recv);
                let argv = collect_args(frame, args);
                let result = self.invoke_virtual_cached(&receiver, method, argv, named.as_deref(), None, frame)?;
                if let Some(dst) = dst {
                    frame.set(*dst, result);
                }
            }
            Inst::InvokeSpecial {
                dst,
                recv,
                owner,
                method,
                args,
                named,
            } => {
                let receiver = frame.boxed(*recv);
                let argv = collect_args(frame, args);
                let result = self.invoke_special(owner, &receiver, method, argv, named.as_deref())?;
                if let Some(dst) = dst {
                    frame.set(*dst, result);
                }
            }
            Inst::InvokeStatic {
                dst,
                owner,
                method,
                args,
                named,
                cache,
            } => {
                let argv = collect_args(frame, args);
                let result = self.invoke_static(module, owner, method, argv, named.as_deref(), cache, frame)?;
                if let Some(dst) = dst {
                    frame.set(*dst, result);
                }
            }

            Inst::IndexGet { dst, recv, index } => {
                let target = frame.boxed(*recv);
                let idx = frame.boxed(*index);
                let result = self.index_get(&target, &idx)?;
                // List reads of ints stay raw: the common `xs[i] + 1` pattern
                // then never boxes.
                match (&target, &result) {
                    (Value::List(_), Value::Int(v)) => frame.set_raw(*dst, *v),
                    _ => frame.set(*dst, result),
                }
            }
            Inst::IndexSet { recv, index, src } => {
                let target = frame.boxed(*recv);
                let idx = frame.boxed(*index);
                // A raw source writes straight into a primitive int array.
                if frame.is_raw(*src)
                    && let Value::Array(arr) = &target
                    && matches!(arr.elem_type(), crate::types::ElemType::Int | crate::types::ElemType::Long)
                {
                    arr.set_raw_int(idx.as_index()?, frame.raw(*src))?;
                } else {
                    let value = frame.boxed(*src);
                    self.index_set(&target, &idx, value)?;
                }
            }
            Inst::NewArray { dst, elem, len } => {
                let len = frame.boxed(*len).as_index()?;
                let len = usize::try_from(len)
                    .map_err(|_| RunError::type_mismatch("array length must be non-negative"))?;
                frame.set(*dst, Value::Array(Arc::new(ArrayValue::new(*elem, len))));
            }
            Inst::NewCollection { dst, kind, items } => {
                let value = match kind {
                    CollKind::List => Value::list_of(items.iter().map(|&r| frame.boxed(r)).collect()),
                    CollKind::Map => {
                        let map = Value::map_new();
                        if let Value::Map(m) = &map {
                            let mut guard = m.write();
                            for chunk in items.chunks_exact(2) {
                                guard.insert(frame.boxed(chunk[0]), frame.boxed(chunk[1]));
                            }
                        }
                        map
                    }
                    CollKind::Pair => {
                        if items.len() != 2 {
                            return Err(RunError::internal("pair literal needs exactly two operands"));
                        }
                        Value::pair(frame.boxed(items[0]), frame.boxed(items[1]))
                    }
                };
                frame.set(*dst, value);
            }

            Inst::TypeCheck { dst, src, name } => {
                let target = frame.boxed(*src);
                let ty = frame.substitute_type(name).to_owned();
                frame.set(*dst, Value::Bool(self.type_check(&target, &ty)));
            }
            Inst::TypeCast { dst, src, name } => {
                let (safe, ty) = match name.strip_prefix("?|") {
                    Some(rest) => (true, rest),
                    None => (false, &**name),
                };
                let ty = frame.substitute_type(ty).to_owned();
                let target = frame.boxed(*src);
                let result = self.type_cast(target, &ty, safe)?;
                frame.set(*dst, result);
            }

            Inst::Closure { .. } => {
                return Err(RunError::internal("CLOSURE is reserved and cannot be executed"));
            }
        }
        Ok(())
    }

    /// `BINARY` with the raw-int specialization rules.
    fn exec_binary(
        &mut self,
        frame: &mut Frame,
        dst: crate::mir::Reg,
        op: BinOp,
        lhs: crate::mir::Reg,
        rhs: crate::mir::Reg,
    ) -> RunResult<()> {
        let lhs_raw = frame.is_raw(lhs);
        let rhs_raw = frame.is_raw(rhs);

        if lhs_raw && rhs_raw {
            match ops::raw_binary(op, frame.raw(lhs), frame.raw(rhs))? {
                RawResult::Raw(v) => frame.set_raw(dst, v),
                RawResult::Bool(b) => frame.set(dst, Value::Bool(b)),
            }
            return Ok(());
        }

        // Mixed raw + boxed integer transparently unboxes.
        if lhs_raw || rhs_raw {
            let other = if lhs_raw { &frame.locals[rhs as usize] } else { &frame.locals[lhs as usize] };
            match other {
                Value::Int(v) | Value::Long(v) => {
                    let (a, b) = if lhs_raw {
                        (frame.raw(lhs), *v)
                    } else {
                        (*v, frame.raw(rhs))
                    };
                    match ops::raw_binary(op, a, b)? {
                        RawResult::Raw(v) => frame.set_raw(dst, v),
                        RawResult::Bool(b) => frame.set(dst, Value::Bool(b)),
                    }
                    return Ok(());
                }
                // A raw int compared against null is always not-equal.
                Value::Null if op == BinOp::Eq => {
                    frame.set(dst, Value::Bool(false));
                    return Ok(());
                }
                Value::Null if op == BinOp::Ne => {
                    frame.set(dst, Value::Bool(true));
                    return Ok(());
                }
                _ => {}
            }
        }

        let l = frame.boxed(lhs);
        let r = frame.boxed(rhs);
        let result = ops::binary_op(self, op, l, r)?;
        frame.set(dst, result);
        Ok(())
    }

    /// `T::class` lowering: engine classes and foreign classes are first
    /// class; builtin type literals are represented by their type name.
    fn class_literal(&mut self, name: &str) -> RunResult<Value> {
        if let Some(class) = self.runtime().class_by_name(name) {
            return Ok(Value::Class(class));
        }
        let policy = self.policy().clone();
        if let Some(foreign) = self.runtime().foreign().resolve(name, &policy)? {
            return Ok(Value::ForeignClass(foreign));
        }
        Ok(Value::str(name.to_owned()))
    }
}

fn collect_args(frame: &Frame, regs: &[crate::mir::Reg]) -> Args {
    regs.iter().map(|&r| frame.boxed(r)).collect()
}

fn switch_target(scrutinee: &Value, keys: &[(crate::mir::SwitchKey, u32)], default: u32) -> u32 {
    use crate::mir::SwitchKey;
    for (key, target) in keys {
        let hit = match (key, scrutinee) {
            (SwitchKey::Int(k), Value::Int(v) | Value::Long(v)) => k == v,
            (SwitchKey::Str(k), Value::Str(v)) => **k == **v,
            (SwitchKey::Str(k), Value::Char(v)) => k.chars().next() == Some(*v) && k.chars().count() == 1,
            (SwitchKey::Enum(k), Value::EnumEntry(entry)) => **k == *entry.name,
            _ => false,
        };
        if hit {
            return *target;
        }
    }
    default
}
