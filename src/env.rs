//! Environments are cell chains of frames, innermost first. A frame is a
//! cell chain of `(symbol . value)` bindings. The global environment is a
//! single-frame chain whose cell identity never changes, so closures that
//! captured it by reference see bindings added later.

use crate::error::{LispError, LispResult};
use crate::heap::Heap;
use crate::value::{Kind, Value};

/// Create an environment with one empty frame.
pub fn new_global(heap: &mut Heap) -> LispResult<Value> {
    let nil = heap.nil();
    heap.cons(nil, nil)
}

/// Find the `(symbol . value)` binding for `name`, scanning frames from the
/// innermost outwards. Symbols compare by identity.
pub fn assoc(heap: &Heap, name: Value, env: Value) -> Option<Value> {
    let mut frames = env;
    while let Some((frame, outer)) = heap.as_cell(frames) {
        let mut bindings = frame;
        while let Some((binding, rest)) = heap.as_cell(bindings) {
            if let Some((sym, _)) = heap.as_cell(binding) {
                if sym == name {
                    return Some(binding);
                }
            }
            bindings = rest;
        }
        frames = outer;
    }
    None
}

/// Value bound to `name`, if any.
pub fn lookup(heap: &Heap, name: Value, env: Value) -> Option<Value> {
    assoc(heap, name, env).and_then(|binding| heap.as_cell(binding).map(|(_, v)| v))
}

/// Prepend a new `(name . value)` binding to the first frame of `env`.
pub fn bind_in_first_frame(heap: &mut Heap, env: Value, name: Value, value: Value) -> LispResult<()> {
    let binding = heap.cons(name, value)?;
    // `binding` is protected as the head of this cons; the old frame is
    // still reachable from `env`.
    let frame = heap.car(env)?;
    let frame = heap.cons(binding, frame)?;
    heap.set_head(env, frame)
}

/// Overwrite an existing binding, or add one to the global frame.
pub fn define(heap: &mut Heap, global: Value, env: Value, name: Value, value: Value) -> LispResult<()> {
    match assoc(heap, name, env) {
        Some(binding) => heap.set_tail(binding, value),
        None => bind_in_first_frame(heap, global, name, value),
    }
}

/// Overwrite an existing binding; fails if `name` is unbound.
pub fn set(heap: &mut Heap, env: Value, name: Value, value: Value) -> LispResult<()> {
    match assoc(heap, name, env) {
        Some(binding) => heap.set_tail(binding, value),
        None => Err(LispError::UnboundAssignment(
            heap.symbol_name(name).unwrap_or("?").to_string(),
        )),
    }
}

/// Push a frame binding each parameter symbol to the matching argument.
///
/// `params` and `args` must be reachable from a root for the duration of
/// the call; the frame under construction is pinned here.
pub fn extend(heap: &mut Heap, env: Value, params: Value, args: Value) -> LispResult<Value> {
    let names = heap
        .list_to_vec(params)
        .ok_or(LispError::MalformedForm("lambda"))?;
    if names.iter().any(|&p| heap.kind(p) != Kind::Symbol) {
        return Err(LispError::MalformedForm("lambda"));
    }
    let values = heap
        .list_to_vec(args)
        .ok_or_else(|| LispError::TypeError("argument list is not a proper list".into()))?;
    if names.len() != values.len() {
        return Err(LispError::ArityMismatch {
            expected: names.len(),
            got: values.len(),
        });
    }

    heap.scoped(|heap| {
        let nil = heap.nil();
        let frame_pin = heap.pin(nil);
        let mut frame = nil;
        for (&name, &value) in names.iter().zip(&values) {
            let binding = heap.cons(name, value)?;
            frame = heap.cons(binding, frame)?;
            heap.repin(frame_pin, frame)?;
        }
        heap.cons(frame, env)
    })
}
