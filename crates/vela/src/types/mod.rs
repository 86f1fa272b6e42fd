//! Runtime value kinds beyond the immediate primitives.

pub mod array;
pub mod class;
pub mod enums;
pub mod func;
pub mod iter;
pub mod range;
pub mod result;

pub use array::{ArrayValue, ElemType};
pub use class::{
    ClassId, ClassKind, ClassValue, ConstructorDef, FieldDef, MethodDef, ObjectValue, ParamDef, ReflectInfo,
    Visibility, check_visibility,
};
pub use enums::EnumEntry;
pub use func::{Args, BoundMethod, Callable, Closure, MirClosure, NativeFn, PartialApp};
pub use iter::{IterValue, ValueIter};
pub use range::Range;
pub use result::ResultValue;
