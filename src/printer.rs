use std::collections::HashSet;

use crate::heap::Heap;
use crate::value::{Object, Value};

/// Nesting depth past which the printer elides with `...`.
const MAX_DEPTH: usize = 512;

/// Print a value to a string. Read-only: never allocates on the heap.
pub fn print_value(heap: &Heap, val: Value) -> String {
    let mut out = String::new();
    print_inner(heap, val, &mut out, 0);
    out
}

fn print_inner(heap: &Heap, val: Value, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }

    match heap.get(val) {
        Object::Nil => out.push_str("nil"),
        Object::Fixnum(n) => out.push_str(&n.to_string()),
        Object::Str(text) => print_string(text, out),
        Object::Symbol(name) => out.push_str(name),
        Object::Primitive(prim) => {
            out.push_str("#<primitive ");
            out.push_str(prim.name);
            out.push('>');
        }
        Object::Closure { .. } => out.push_str("#<closure>"),
        Object::Free => out.push_str("#<free>"),
        Object::Cell { head, tail } => {
            // (quote x) -> 'x
            if heap.symbol_name(*head) == Some("quote") {
                if let Some((quoted, rest)) = heap.as_cell(*tail) {
                    if heap.is_nil(rest) {
                        out.push('\'');
                        print_inner(heap, quoted, out, depth + 1);
                        return;
                    }
                }
            }
            print_list(heap, val, out, depth);
        }
    }
}

/// Print a cell chain, stopping at the first cell seen twice.
fn print_list(heap: &Heap, list: Value, out: &mut String, depth: usize) {
    out.push('(');
    let mut seen = HashSet::new();
    let mut current = list;
    let mut first = true;
    loop {
        match heap.get(current) {
            Object::Nil => break,
            Object::Cell { head, tail } => {
                if !seen.insert(current) {
                    out.push_str(" . #<circular>");
                    break;
                }
                if !first {
                    out.push(' ');
                }
                first = false;
                print_inner(heap, *head, out, depth + 1);
                current = *tail;
            }
            _ => {
                out.push_str(" . ");
                print_inner(heap, current, out, depth + 1);
                break;
            }
        }
    }
    out.push(')');
}

fn print_string(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}
