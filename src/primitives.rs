use crate::env;
use crate::error::{LispError, LispResult};
use crate::heap::Heap;
use crate::printer;
use crate::value::{Kind, Primitive, Value};

/// Every native procedure, installed into the global frame at startup.
const PRIMITIVES: &[Primitive] = &[
    Primitive { name: "+", func: prim_add },
    Primitive { name: "-", func: prim_sub },
    Primitive { name: "*", func: prim_mul },
    Primitive { name: "/", func: prim_div },
    Primitive { name: "=", func: prim_num_eq },
    Primitive { name: "<", func: prim_lt },
    Primitive { name: ">", func: prim_gt },
    Primitive { name: "cons", func: prim_cons },
    Primitive { name: "car", func: prim_car },
    Primitive { name: "cdr", func: prim_cdr },
    Primitive { name: "list", func: prim_list },
    Primitive { name: "eq?", func: prim_eq },
    Primitive { name: "null?", func: prim_null },
    Primitive { name: "pair?", func: prim_pair },
    Primitive { name: "symbol?", func: prim_symbol },
    Primitive { name: "number?", func: prim_number },
    Primitive { name: "string?", func: prim_string },
    Primitive { name: "print", func: prim_print },
    Primitive { name: "gc", func: prim_gc },
];

/// Bind every primitive in the first frame of `global`.
pub fn install(heap: &mut Heap, global: Value) -> LispResult<()> {
    for &prim in PRIMITIVES {
        let name = heap.intern(prim.name)?;
        let proc_val = heap.make_primitive(prim)?;
        heap.scoped(|heap| {
            heap.pin(proc_val);
            env::bind_in_first_frame(heap, global, name, proc_val)
        })?;
    }
    Ok(())
}

/// Collect the argument list, requiring exactly `n` arguments.
fn exact_args(heap: &Heap, args: Value, n: usize) -> LispResult<Vec<Value>> {
    let values = all_args(heap, args)?;
    if values.len() != n {
        return Err(LispError::ArityMismatch {
            expected: n,
            got: values.len(),
        });
    }
    Ok(values)
}

fn all_args(heap: &Heap, args: Value) -> LispResult<Vec<Value>> {
    heap.list_to_vec(args)
        .ok_or_else(|| LispError::TypeError("argument list is not a proper list".into()))
}

fn fixnum_arg(heap: &Heap, v: Value, op: &str) -> LispResult<i64> {
    heap.fixnum(v).ok_or_else(|| {
        LispError::TypeError(format!(
            "{} expects fixnums, got {}",
            op,
            heap.kind(v).name()
        ))
    })
}

fn fixnum_args(heap: &Heap, args: Value, op: &str) -> LispResult<Vec<i64>> {
    all_args(heap, args)?
        .into_iter()
        .map(|v| fixnum_arg(heap, v, op))
        .collect()
}

/// `t` or `nil`.
fn truth(heap: &mut Heap, b: bool) -> LispResult<Value> {
    if b {
        heap.intern("t")
    } else {
        Ok(heap.nil())
    }
}

fn fold(
    heap: &mut Heap,
    args: Value,
    name: &'static str,
    init: i64,
    op: fn(i64, i64) -> Option<i64>,
) -> LispResult<Value> {
    let nums = fixnum_args(heap, args, name)?;
    let mut acc = init;
    for n in nums {
        acc = op(acc, n).ok_or(LispError::FixnumOverflow(name))?;
    }
    heap.make_fixnum(acc)
}

/// (+ n...)
fn prim_add(heap: &mut Heap, args: Value) -> LispResult<Value> {
    fold(heap, args, "+", 0, i64::checked_add)
}

/// (* n...)
fn prim_mul(heap: &mut Heap, args: Value) -> LispResult<Value> {
    fold(heap, args, "*", 1, i64::checked_mul)
}

/// (- n) negates; (- a b...) subtracts left to right.
fn prim_sub(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let nums = fixnum_args(heap, args, "-")?;
    let result = match nums.split_first() {
        None => return Err(LispError::ArityMismatch { expected: 1, got: 0 }),
        Some((&only, [])) => only.checked_neg(),
        Some((&first, rest)) => rest
            .iter()
            .try_fold(first, |acc, &n| acc.checked_sub(n)),
    };
    heap.make_fixnum(result.ok_or(LispError::FixnumOverflow("-"))?)
}

/// (/ a b...) truncating division, left to right.
fn prim_div(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let nums = fixnum_args(heap, args, "/")?;
    let Some((&first, rest)) = nums.split_first() else {
        return Err(LispError::ArityMismatch { expected: 2, got: 0 });
    };
    if rest.is_empty() {
        return Err(LispError::ArityMismatch { expected: 2, got: 1 });
    }
    let mut acc = first;
    for &n in rest {
        if n == 0 {
            return Err(LispError::DivisionByZero);
        }
        acc = acc.checked_div(n).ok_or(LispError::FixnumOverflow("/"))?;
    }
    heap.make_fixnum(acc)
}

fn compare(
    heap: &mut Heap,
    args: Value,
    name: &'static str,
    ok: fn(i64, i64) -> bool,
) -> LispResult<Value> {
    let nums = fixnum_args(heap, args, name)?;
    if nums.len() < 2 {
        return Err(LispError::ArityMismatch {
            expected: 2,
            got: nums.len(),
        });
    }
    let holds = nums.windows(2).all(|w| ok(w[0], w[1]));
    truth(heap, holds)
}

/// (= a b...)
fn prim_num_eq(heap: &mut Heap, args: Value) -> LispResult<Value> {
    compare(heap, args, "=", |a, b| a == b)
}

fn prim_lt(heap: &mut Heap, args: Value) -> LispResult<Value> {
    compare(heap, args, "<", |a, b| a < b)
}

fn prim_gt(heap: &mut Heap, args: Value) -> LispResult<Value> {
    compare(heap, args, ">", |a, b| a > b)
}

fn prim_cons(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let a = exact_args(heap, args, 2)?;
    heap.cons(a[0], a[1])
}

fn prim_car(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let a = exact_args(heap, args, 1)?;
    heap.car(a[0])
}

fn prim_cdr(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let a = exact_args(heap, args, 1)?;
    heap.cdr(a[0])
}

/// The evaluator builds a fresh list for every call, so it can be returned as is.
fn prim_list(_heap: &mut Heap, args: Value) -> LispResult<Value> {
    Ok(args)
}

/// (eq? a b) compares identity.
fn prim_eq(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let a = exact_args(heap, args, 2)?;
    truth(heap, a[0] == a[1])
}

fn kind_test(heap: &mut Heap, args: Value, kind: Kind) -> LispResult<Value> {
    let a = exact_args(heap, args, 1)?;
    let holds = heap.kind(a[0]) == kind;
    truth(heap, holds)
}

fn prim_null(heap: &mut Heap, args: Value) -> LispResult<Value> {
    kind_test(heap, args, Kind::Nil)
}

fn prim_pair(heap: &mut Heap, args: Value) -> LispResult<Value> {
    kind_test(heap, args, Kind::Cell)
}

fn prim_symbol(heap: &mut Heap, args: Value) -> LispResult<Value> {
    kind_test(heap, args, Kind::Symbol)
}

fn prim_number(heap: &mut Heap, args: Value) -> LispResult<Value> {
    kind_test(heap, args, Kind::Fixnum)
}

fn prim_string(heap: &mut Heap, args: Value) -> LispResult<Value> {
    kind_test(heap, args, Kind::Str)
}

/// (print x) writes x and a newline to stdout and returns x.
fn prim_print(heap: &mut Heap, args: Value) -> LispResult<Value> {
    let a = exact_args(heap, args, 1)?;
    println!("{}", printer::print_value(heap, a[0]));
    Ok(a[0])
}

/// (gc) runs a collection and returns the number of slots reclaimed.
fn prim_gc(heap: &mut Heap, args: Value) -> LispResult<Value> {
    exact_args(heap, args, 0)?;
    let reclaimed = heap.collect();
    heap.make_fixnum(reclaimed as i64)
}
