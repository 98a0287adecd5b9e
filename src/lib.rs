//! A small Lisp: reader, evaluator with lexically scoped closures, and a
//! fixed-capacity arena managed by a mark-and-sweep collector.

pub mod env;
pub mod error;
pub mod eval;
pub mod heap;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod roots;
pub mod symbol;
pub mod value;

pub use error::{LispError, LispResult, ReadError};
pub use eval::{Interp, InterpConfig};
pub use heap::{GcPhase, GcStats, Heap, HeapConfig};
pub use roots::{Pin, PinMark};
pub use value::{Kind, Object, Value};
