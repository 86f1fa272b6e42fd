//! Mid-level IR: register-based instructions grouped into basic blocks with
//! explicit terminators.
//!
//! The engine assumes a well-formed module from the lowering pipeline (out of
//! scope here): register indices below `frame_size`, block ids in range, and
//! every register written before it is read. Instructions carry their own
//! inline-cache cells so call sites stay monomorphic-fast across repeated
//! executions; the cells are lock-guarded because child task interpreters
//! share the module.

pub mod dispatch;
pub mod frame;
pub mod interp;

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

pub use frame::{Frame, FramePool};

use crate::{
    ops::{BinOp, UnOp},
    types::{Callable, ClassId, ClassKind, ElemType, Visibility},
};

/// Register index within a frame.
pub type Reg = u16;

/// Basic-block index within a function.
pub type BlockId = u32;

/// Owner string marking same-module static calls; these resolve to a module
/// function once and cache the callable on the instruction.
pub const MODULE_OWNER: &str = "$MODULE";

/// A complete MIR program unit.
#[derive(Debug, Default)]
pub struct MirModule {
    pub name: Arc<str>,
    pub file: Option<Arc<str>>,
    pub functions: IndexMap<Arc<str>, Arc<MirFunction>>,
    pub classes: Vec<MirClass>,
    pub extension_fns: Vec<MirExtension>,
    pub extension_props: Vec<MirExtension>,
    pub imports: Vec<MirImport>,
}

impl MirModule {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_function(&mut self, function: MirFunction) {
        self.functions.insert(function.name.clone(), Arc::new(function));
    }

    pub fn function(&self, name: &str) -> Option<&Arc<MirFunction>> {
        self.functions.get(name)
    }
}

/// An extension function/property contributed by the module: the named
/// module function becomes a member of `target`.
#[derive(Debug, Clone)]
pub struct MirExtension {
    pub target: Arc<str>,
    pub name: Arc<str>,
    pub function: Arc<str>,
}

/// Import directives carried by the module.
#[derive(Debug, Clone)]
pub enum MirImport {
    ForeignClass(Arc<str>),
    ForeignStatic { class: Arc<str>, member: Arc<str> },
    /// Wildcard package import; feeds simple-name foreign resolution.
    Wildcard(Arc<str>),
    LanguageModule(Arc<str>),
}

/// A class declared by a MIR module. Methods reference module functions by
/// name; `<init>` functions double as constructors.
#[derive(Debug, Clone)]
pub struct MirClass {
    pub name: Arc<str>,
    pub kind: ClassKind,
    pub superclass: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_data: bool,
    pub fields: Vec<MirField>,
    pub methods: Vec<MirMethodRef>,
    pub constructors: Vec<Arc<str>>,
    /// Primary-constructor field order for data-class synthesis.
    pub data_fields: Vec<Arc<str>>,
    pub annotations: Vec<Arc<str>>,
    pub enum_entries: Vec<Arc<str>>,
}

#[derive(Debug, Clone)]
pub struct MirField {
    pub name: Arc<str>,
    pub mutable: bool,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct MirMethodRef {
    pub name: Arc<str>,
    /// Name of the module function holding the body.
    pub function: Arc<str>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_default: bool,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirFnKind {
    Normal,
    Constructor,
    StaticInit,
}

/// One MIR function: a block array indexed by block id, entry at block 0.
#[derive(Debug)]
pub struct MirFunction {
    pub name: Arc<str>,
    /// Parameter names; when `has_this` is set, slot 0 is the receiver.
    pub params: Vec<Arc<str>>,
    pub has_this: bool,
    pub kind: MirFnKind,
    pub frame_size: u16,
    pub blocks: Vec<MirBlock>,
    pub try_catch: Vec<TryCatchEntry>,
    /// Declared reified type parameters, bound from the call-site manifest.
    pub reified: Vec<Arc<str>>,
}

impl MirFunction {
    /// Positional arity excluding the receiver slot.
    pub fn arity(&self) -> usize {
        self.params.len() - usize::from(self.has_this)
    }
}

#[derive(Debug, Default)]
pub struct MirBlock {
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

/// One try/catch range: an exception thrown while the current block id is in
/// `[try_start_block, try_end_block]` transfers to `handler_block` with the
/// exception value written to `exception_local`.
#[derive(Debug, Clone)]
pub struct TryCatchEntry {
    pub try_start_block: BlockId,
    pub try_end_block: BlockId,
    pub handler_block: BlockId,
    pub exception_local: Reg,
}

/// Per-site inline cache for `INVOKE_VIRTUAL`: the last receiver class and
/// the method it resolved to (visibility already checked).
#[derive(Debug, Default)]
pub struct VirtualCache(Mutex<Option<VCacheEntry>>);

#[derive(Debug, Clone)]
pub struct VCacheEntry {
    pub class: ClassId,
    pub method: Callable,
}

impl VirtualCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, class: ClassId) -> Option<Callable> {
        self.0
            .lock()
            .as_ref()
            .filter(|entry| entry.class == class)
            .map(|entry| entry.method.clone())
    }

    pub fn store(&self, class: ClassId, method: Callable) {
        *self.0.lock() = Some(VCacheEntry { class, method });
    }
}

/// Per-site cache for same-module `INVOKE_STATIC`: the resolved callable.
#[derive(Debug, Default)]
pub struct StaticCache(Mutex<Option<Callable>>);

impl StaticCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Callable> {
        self.0.lock().clone()
    }

    pub fn store(&self, callable: Callable) {
        *self.0.lock() = Some(callable);
    }
}

/// Names of the trailing arguments of a call, for named-argument reordering.
pub type NamedArgs = Arc<[Arc<str>]>;

/// Collection literal kinds served by `NEW_COLLECTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollKind {
    List,
    Map,
    Pair,
}

#[derive(Debug)]
pub enum Inst {
    // Constants. `ConstInt` defers boxing: the value lands in `raw_locals`.
    ConstInt { dst: Reg, value: i64 },
    ConstLong { dst: Reg, value: i64 },
    ConstDouble { dst: Reg, value: f64 },
    ConstFloat { dst: Reg, value: f32 },
    ConstString { dst: Reg, value: Arc<str> },
    ConstBool { dst: Reg, value: bool },
    ConstChar { dst: Reg, value: char },
    ConstNull { dst: Reg },
    /// Class-literal reference (`T::class`); consults the reified map.
    ConstClass { dst: Reg, name: Arc<str> },

    Move { dst: Reg, src: Reg },

    Binary { dst: Reg, op: BinOp, lhs: Reg, rhs: Reg },
    Unary { dst: Reg, op: UnOp, src: Reg },

    NewObject { dst: Reg, owner: Arc<str> },
    GetField { dst: Reg, obj: Reg, name: Arc<str> },
    SetField { obj: Reg, name: Arc<str>, src: Reg },
    GetStatic { dst: Reg, owner: Arc<str>, name: Arc<str> },
    SetStatic { owner: Arc<str>, name: Arc<str>, src: Reg },

    InvokeVirtual {
        dst: Option<Reg>,
        recv: Reg,
        method: Arc<str>,
        args: Vec<Reg>,
        named: Option<NamedArgs>,
        cache: VirtualCache,
    },
    /// Same dispatch path as `InvokeVirtual`; kept distinct to mirror the
    /// instruction set (interface call sites are megamorphic, no cache).
    InvokeInterface {
        dst: Option<Reg>,
        recv: Reg,
        method: Arc<str>,
        args: Vec<Reg>,
        named: Option<NamedArgs>,
    },
    /// Non-virtual dispatch: constructors and super calls on a known owner.
    InvokeSpecial {
        dst: Option<Reg>,
        recv: Reg,
        owner: Arc<str>,
        method: Arc<str>,
        args: Vec<Reg>,
        named: Option<NamedArgs>,
    },
    InvokeStatic {
        dst: Option<Reg>,
        owner: Arc<str>,
        method: Arc<str>,
        args: Vec<Reg>,
        named: Option<NamedArgs>,
        cache: StaticCache,
    },

    IndexGet { dst: Reg, recv: Reg, index: Reg },
    IndexSet { recv: Reg, index: Reg, src: Reg },
    NewArray { dst: Reg, elem: ElemType, len: Reg },
    NewCollection { dst: Reg, kind: CollKind, items: Vec<Reg> },

    /// `is` check; `name` is substituted through the reified map.
    TypeCheck { dst: Reg, src: Reg, name: Arc<str> },
    /// `as` cast; a `?|` prefix on `name` marks the safe form.
    TypeCast { dst: Reg, src: Reg, name: Arc<str> },

    /// Reserved for closure lowering; executing it is an engine error.
    Closure { dst: Reg },
}

/// Branch condition: a register truth test, or a fused compare that never
/// materializes the intermediate `Bool`.
#[derive(Debug, Clone)]
pub enum Cond {
    Reg(Reg),
    Cmp { op: BinOp, lhs: Reg, rhs: Reg },
}

#[derive(Debug, Clone)]
pub enum SwitchKey {
    Int(i64),
    Str(Arc<str>),
    /// Matches an enum entry by name.
    Enum(Arc<str>),
}

#[derive(Debug)]
pub enum Terminator {
    Branch { cond: Cond, then_bb: BlockId, else_bb: BlockId },
    Goto(BlockId),
    Return(Option<Reg>),
    /// Self tail call: rebinds parameter locals and jumps to the entry block
    /// within the current frame.
    TailCall { args: Vec<Reg> },
    Switch { src: Reg, keys: Vec<(SwitchKey, BlockId)>, default: BlockId },
    Throw(Reg),
    Unreachable,
}

impl Default for Terminator {
    fn default() -> Self {
        Self::Unreachable
    }
}
