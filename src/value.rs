use std::fmt;

use crate::error::LispResult;
use crate::heap::Heap;

/// Index of a slot in the arena. This is the GC handle.
/// Two `Value`s are the same object exactly when they name the same slot,
/// so `==` on `Value` is identity (Lisp `eq`), never structural equality.
///
/// A `Value` is only meaningful to the `Heap` that issued it. Handing it to
/// another heap reads an unrelated slot, or panics if the index is out of
/// that heap's range.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub(crate) u32);

impl Value {
    /// Slot index of this value in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.0)
    }
}

/// A native procedure. Receives the evaluated argument list.
pub type PrimitiveFn = fn(&mut Heap, Value) -> LispResult<Value>;

#[derive(Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub func: PrimitiveFn,
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Primitive({})", self.name)
    }
}

/// The payload held by one arena slot.
#[derive(Debug)]
pub enum Object {
    /// Shell held by every slot in the free set.
    Free,
    Nil,
    Fixnum(i64),
    Str(String),
    Symbol(String),
    Cell { head: Value, tail: Value },
    Primitive(Primitive),
    Closure { params: Value, body: Value, env: Value },
}

/// Discriminant of an `Object`, without the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Free,
    Nil,
    Fixnum,
    Str,
    Symbol,
    Cell,
    Primitive,
    Closure,
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Free => Kind::Free,
            Object::Nil => Kind::Nil,
            Object::Fixnum(_) => Kind::Fixnum,
            Object::Str(_) => Kind::Str,
            Object::Symbol(_) => Kind::Symbol,
            Object::Cell { .. } => Kind::Cell,
            Object::Primitive(_) => Kind::Primitive,
            Object::Closure { .. } => Kind::Closure,
        }
    }

    /// Call `f` on every value this object references directly.
    /// Leaves (fixnums, strings, symbols, primitives) have none.
    pub fn for_each_child(&self, mut f: impl FnMut(Value)) {
        match *self {
            Object::Cell { head, tail } => {
                f(head);
                f(tail);
            }
            Object::Closure { params, body, env } => {
                f(params);
                f(body);
                f(env);
            }
            _ => {}
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Object::Free)
    }
}

impl Kind {
    /// Name used in type errors.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Free => "free slot",
            Kind::Nil => "nil",
            Kind::Fixnum => "fixnum",
            Kind::Str => "string",
            Kind::Symbol => "symbol",
            Kind::Cell => "cell",
            Kind::Primitive => "primitive",
            Kind::Closure => "closure",
        }
    }
}
