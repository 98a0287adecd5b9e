use log::debug;

use crate::env;
use crate::error::{LispError, LispResult};
use crate::heap::{Heap, HeapConfig};
use crate::primitives;
use crate::printer;
use crate::reader;
use crate::symbol::Builtins;
use crate::value::{Kind, Object, Value};

/// Default `max_depth`. Stays well inside the 2 MiB stack of a default
/// `std::thread`, even in an unoptimized build.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Native stack to budget per level of `max_depth`. A host that raises
/// `max_depth` should run the interpreter on a thread with at least
/// `max_depth * STACK_PER_DEPTH` bytes of stack.
pub const STACK_PER_DEPTH: usize = 16 * 1024;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct InterpConfig {
    pub heap: HeapConfig,
    /// Maximum nesting of `eval` calls. Evaluation recurses on the native
    /// stack, so this bounds Lisp-level recursion depth and must stay
    /// within the stack of the calling thread; see `STACK_PER_DEPTH`.
    pub max_depth: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// The interpreter. All state lives here so the collector can find roots:
/// the heap roots nil and the symbol list itself, and the global
/// environment is registered as a permanent root.
pub struct Interp {
    pub heap: Heap,
    global_env: Value,
    builtins: Builtins,
    depth: usize,
    max_depth: usize,
}

impl Interp {
    pub fn new() -> LispResult<Self> {
        Self::with_config(InterpConfig::default())
    }

    pub fn with_config(config: InterpConfig) -> LispResult<Self> {
        let mut heap = Heap::new(config.heap)?;
        let builtins = Builtins::intern_all(&mut heap)?;
        let global_env = env::new_global(&mut heap)?;
        heap.add_root(global_env);

        env::bind_in_first_frame(&mut heap, global_env, builtins.t, builtins.t)?;
        primitives::install(&mut heap, global_env)?;

        debug!(
            "interpreter ready: {} symbols, {}/{} slots active",
            heap.symbol_count(),
            heap.active_count(),
            heap.capacity()
        );

        Ok(Interp {
            heap,
            global_env,
            builtins,
            depth: 0,
            max_depth: config.max_depth,
        })
    }

    pub fn global_env(&self) -> Value {
        self.global_env
    }

    pub fn intern(&mut self, name: &str) -> LispResult<Value> {
        self.heap.intern(name)
    }

    /// Value bound to `name` in the global environment.
    pub fn global(&self, name: &str) -> Option<Value> {
        let sym = self.heap.find_symbol(name)?;
        env::lookup(&self.heap, sym, self.global_env)
    }

    /// Render a value with the printer.
    pub fn print(&self, v: Value) -> String {
        printer::print_value(&self.heap, v)
    }

    /// Read and evaluate every form in `input` against the global
    /// environment. Returns the value of the last form, or nil if there
    /// were none.
    pub fn eval_str(&mut self, input: &str) -> LispResult<Value> {
        self.scoped(|interp| {
            let nil = interp.heap.nil();
            let last = interp.heap.pin(nil);
            let mut pos = 0;
            while let Some((expr, next)) = reader::read_one_at(input, pos, &mut interp.heap)? {
                pos = next;
                let value = interp.eval_global(expr)?;
                interp.heap.repin(last, value)?;
            }
            Ok(interp.heap.pinned(last).unwrap_or(nil))
        })
    }

    pub fn eval_global(&mut self, expr: Value) -> LispResult<Value> {
        self.eval(expr, self.global_env)
    }

    /// Evaluate `expr` in `env`. Both are pinned for the duration.
    pub fn eval(&mut self, expr: Value, env: Value) -> LispResult<Value> {
        if self.depth >= self.max_depth {
            return Err(LispError::DepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let result = self.scoped(|interp| {
            interp.heap.pin(expr);
            interp.heap.pin(env);
            interp.eval_inner(expr, env)
        });
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: Value, env: Value) -> LispResult<Value> {
        match self.heap.get(expr) {
            Object::Symbol(name) => env::lookup(&self.heap, expr, env)
                .ok_or_else(|| LispError::UndefinedSymbol(name.clone())),
            Object::Cell { head, tail } => {
                let (head, args) = (*head, *tail);
                if head == self.builtins.quote {
                    self.eval_quote(args)
                } else if head == self.builtins.define {
                    self.eval_define(args, env)
                } else if head == self.builtins.setq {
                    self.eval_setq(args, env)
                } else if head == self.builtins.if_ {
                    self.eval_if(args, env)
                } else if head == self.builtins.lambda {
                    self.eval_lambda(args, env)
                } else {
                    self.eval_call(head, args, env)
                }
            }
            Object::Free => Err(LispError::Internal(format!(
                "evaluated a free slot {:?}",
                expr
            ))),
            _ => Ok(expr),
        }
    }

    /// Split a special form's argument list, requiring between `min` and
    /// `max` elements.
    fn form_args(
        &self,
        args: Value,
        min: usize,
        max: usize,
        form: &'static str,
    ) -> LispResult<Vec<Value>> {
        match self.heap.list_to_vec(args) {
            Some(v) if v.len() >= min && v.len() <= max => Ok(v),
            _ => Err(LispError::MalformedForm(form)),
        }
    }

    /// (quote x)
    fn eval_quote(&mut self, args: Value) -> LispResult<Value> {
        let parts = self.form_args(args, 1, 1, "quote")?;
        Ok(parts[0])
    }

    /// (define name expr). Rebinds in place when `name` is visible from
    /// `env`, otherwise binds it in the global frame. Returns `name`.
    fn eval_define(&mut self, args: Value, env: Value) -> LispResult<Value> {
        let parts = self.form_args(args, 2, 2, "define")?;
        let name = parts[0];
        if self.heap.kind(name) != Kind::Symbol {
            return Err(LispError::MalformedForm("define"));
        }
        let value = self.eval(parts[1], env)?;
        self.scoped(|interp| {
            interp.heap.pin(value);
            env::define(&mut interp.heap, interp.global_env, env, name, value)
        })?;
        Ok(name)
    }

    /// (setq name expr). Returns the new value.
    fn eval_setq(&mut self, args: Value, env: Value) -> LispResult<Value> {
        let parts = self.form_args(args, 2, 2, "setq")?;
        let name = parts[0];
        if self.heap.kind(name) != Kind::Symbol {
            return Err(LispError::MalformedForm("setq"));
        }
        let value = self.eval(parts[1], env)?;
        env::set(&mut self.heap, env, name, value)?;
        Ok(value)
    }

    /// (if cond then [else]). Only the selected branch is evaluated; a
    /// missing else branch yields nil.
    fn eval_if(&mut self, args: Value, env: Value) -> LispResult<Value> {
        let parts = self.form_args(args, 2, 3, "if")?;
        let cond = self.eval(parts[0], env)?;
        if !self.heap.is_nil(cond) {
            self.eval(parts[1], env)
        } else if let Some(&alt) = parts.get(2) {
            self.eval(alt, env)
        } else {
            Ok(self.heap.nil())
        }
    }

    /// (lambda (params...) body...). Captures `env` by reference.
    fn eval_lambda(&mut self, args: Value, env: Value) -> LispResult<Value> {
        let (params, body) = self
            .heap
            .as_cell(args)
            .ok_or(LispError::MalformedForm("lambda"))?;
        let well_formed = self
            .heap
            .list_to_vec(params)
            .is_some_and(|ps| ps.iter().all(|&p| self.heap.kind(p) == Kind::Symbol));
        let body_len = self.heap.list_to_vec(body).map_or(0, |b| b.len());
        if !well_formed || body_len == 0 {
            return Err(LispError::MalformedForm("lambda"));
        }
        // params and body hang off the pinned form; env is pinned by eval.
        self.heap.make_closure(params, body, env)
    }

    /// (f args...): evaluate the operator, then each argument left to right.
    fn eval_call(&mut self, head: Value, args: Value, env: Value) -> LispResult<Value> {
        let exprs = self
            .heap
            .list_to_vec(args)
            .ok_or(LispError::MalformedForm("call"))?;
        self.scoped(|interp| {
            let f = interp.eval(head, env)?;
            interp.heap.pin(f);
            let mut values = Vec::with_capacity(exprs.len());
            for &e in &exprs {
                let v = interp.eval(e, env)?;
                interp.heap.pin(v);
                values.push(v);
            }
            let arg_list = interp.heap.list(&values)?;
            interp.apply(f, arg_list)
        })
    }

    /// Apply a primitive or closure to an evaluated argument list.
    pub fn apply(&mut self, f: Value, args: Value) -> LispResult<Value> {
        self.scoped(|interp| {
            interp.heap.pin(f);
            interp.heap.pin(args);
            match interp.heap.get(f) {
                Object::Primitive(prim) => {
                    let prim = *prim;
                    (prim.func)(&mut interp.heap, args)
                }
                Object::Closure { params, body, env } => {
                    let (params, body, env) = (*params, *body, *env);
                    let frame = env::extend(&mut interp.heap, env, params, args)?;
                    interp.heap.pin(frame);
                    interp.progn(body, frame)
                }
                _ => Err(LispError::BadApplication(interp.print(f))),
            }
        })
    }

    /// Evaluate each form of `body` in order and return the last value.
    fn progn(&mut self, body: Value, env: Value) -> LispResult<Value> {
        let forms = self
            .heap
            .list_to_vec(body)
            .filter(|forms| !forms.is_empty())
            .ok_or(LispError::MalformedForm("lambda"))?;
        let mut result = self.heap.nil();
        for form in forms {
            result = self.eval(form, env)?;
        }
        Ok(result)
    }

    /// Run `f` inside a pin scope; see `Heap::scoped`.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Interp) -> LispResult<T>) -> LispResult<T> {
        let mark = self.heap.pin_mark();
        let out = f(self);
        self.heap.release_pins(mark);
        out
    }
}
