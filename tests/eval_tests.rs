//! End-to-end evaluation tests
//!
//! Source text goes through the reader, the evaluator and the printer, with
//! small arenas so that collections happen in the middle of evaluation.

use std::thread;

use jcm_lisp::eval::DEFAULT_MAX_DEPTH;
use jcm_lisp::{HeapConfig, Interp, InterpConfig, LispError};

fn small_interp(capacity: usize) -> Interp {
    Interp::with_config(InterpConfig {
        heap: HeapConfig { capacity },
        ..InterpConfig::default()
    })
    .unwrap()
}

fn eval_print(interp: &mut Interp, src: &str) -> String {
    let v = interp.eval_str(src).unwrap();
    interp.print(v)
}

#[test]
fn test_define_then_setq() {
    let mut interp = Interp::new().unwrap();
    assert_eq!(eval_print(&mut interp, "(define x 5)"), "x");
    assert_eq!(eval_print(&mut interp, "(setq x (+ x 1))"), "6");
    assert_eq!(eval_print(&mut interp, "x"), "6");
}

#[test]
fn test_quoted_list_holds_interned_symbols() {
    let mut interp = Interp::new().unwrap();
    let v = interp.eval_str("(quote (a b c))").unwrap();
    let items = interp.heap.list_to_vec(v).unwrap();
    let expected: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| interp.heap.find_symbol(name).unwrap())
        .collect();
    assert_eq!(items, expected);
    assert_eq!(interp.print(v), "(a b c)");
}

#[test]
fn test_lambda_squares() {
    let mut interp = Interp::new().unwrap();
    assert_eq!(eval_print(&mut interp, "((lambda (x) (* x x)) 7)"), "49");
}

#[test]
fn test_undefined_symbol() {
    let mut interp = Interp::new().unwrap();
    assert_eq!(
        interp.eval_str("y"),
        Err(LispError::UndefinedSymbol("y".into()))
    );
    // The session continues after an error.
    assert_eq!(eval_print(&mut interp, "(+ 1 2)"), "3");
}

#[test]
fn test_closures_capture_their_environment() {
    let mut interp = Interp::new().unwrap();
    let src = "
        (define make-adder (lambda (n) (lambda (x) (+ x n))))
        (define add3 (make-adder 3))
        (define add10 (make-adder 10))
        (list (add3 1) (add10 1))";
    assert_eq!(eval_print(&mut interp, src), "(4 11)");
}

#[test]
fn test_recursion_under_collection_pressure() {
    let mut interp = small_interp(512);
    interp
        .eval_str(
            "(define fact (lambda (n) (if (< n 2) 1 (* n (fact (- n 1))))))
             (define count (lambda (n acc) (if (= n 0) acc (count (- n 1) (+ acc 1)))))",
        )
        .unwrap();

    for _ in 0..20 {
        assert_eq!(eval_print(&mut interp, "(fact 20)"), "2432902008176640000");
        assert_eq!(eval_print(&mut interp, "(count 20 0)"), "20");
        assert_eq!(interp.heap.pinned_count(), 0);
        assert!(interp.heap.check_conservation());
    }
    assert!(interp.heap.stats().collections > 0);
}

#[test]
fn test_list_building_under_collection_pressure() {
    let mut interp = small_interp(512);
    interp
        .eval_str("(define build (lambda (n) (if (= n 0) nil (cons n (build (- n 1))))))")
        .unwrap();
    for _ in 0..10 {
        assert_eq!(
            eval_print(&mut interp, "(build 10)"),
            "(10 9 8 7 6 5 4 3 2 1)"
        );
    }
    assert!(interp.heap.stats().collections > 0);
}

#[test]
fn test_out_of_memory_is_recoverable() {
    let mut interp = small_interp(256);
    interp
        .eval_str("(define build (lambda (n) (if (= n 0) nil (cons n (build (- n 1))))))")
        .unwrap();
    assert_eq!(
        interp.eval_str("(build 1000)"),
        Err(LispError::OutOfMemory { capacity: 256 })
    );
    assert_eq!(interp.heap.pinned_count(), 0);
    assert!(interp.heap.check_conservation());
    assert_eq!(eval_print(&mut interp, "(build 3)"), "(3 2 1)");
}

#[test]
fn test_gc_primitive_keeps_globals() {
    let mut interp = Interp::new().unwrap();
    interp.eval_str("(define keep (list 1 2 3))").unwrap();
    interp.eval_str("(list 4 5 6) (gc)").unwrap();
    assert_eq!(eval_print(&mut interp, "keep"), "(1 2 3)");
    assert!(interp.heap.check_conservation());
}

#[test]
fn test_truth_values() {
    let mut interp = Interp::new().unwrap();
    assert_eq!(eval_print(&mut interp, "t"), "t");
    assert_eq!(eval_print(&mut interp, "(if (null? nil) 'yes 'no)"), "yes");
    assert_eq!(eval_print(&mut interp, "(eq? 'a 'b)"), "nil");
}

#[test]
fn test_default_depth_limit_fits_a_default_thread_stack() {
    let outcome = thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let mut interp = Interp::new().unwrap();
            let err = interp
                .eval_str("(define loop (lambda (n) (+ 1 (loop n)))) (loop 1)")
                .unwrap_err();
            let recovered = eval_print(&mut interp, "(+ 1 2)");
            (err, recovered)
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(outcome.0, LispError::DepthExceeded(DEFAULT_MAX_DEPTH));
    assert_eq!(outcome.1, "3");
}

#[test]
fn test_deeply_nested_source_is_a_read_error() {
    let mut interp = Interp::new().unwrap();
    let src = "(".repeat(200_000) + &")".repeat(200_000);
    assert!(matches!(
        interp.eval_str(&src),
        Err(LispError::Read(jcm_lisp::ReadError::TooDeep { .. }))
    ));
    assert_eq!(interp.heap.pinned_count(), 0);
}
