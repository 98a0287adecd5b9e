use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Instant;

use jcm_lisp::eval::STACK_PER_DEPTH;
use jcm_lisp::reader;
use jcm_lisp::{HeapConfig, Interp, InterpConfig};

/// Floor for the interpreter thread's stack, matching a typical main thread.
const MIN_STACK_SIZE: usize = 8 * 1024 * 1024;

struct Options {
    capacity: usize,
    max_depth: usize,
    load: Vec<PathBuf>,
    gc_stats: bool,
    script: Option<PathBuf>,
}

fn print_help() {
    println!("Usage: jcm-lisp [OPTIONS] [FILE]");
    println!();
    println!("Runs FILE and exits, or starts a REPL when no FILE is given.");
    println!();
    println!("Options:");
    println!("  --capacity <n>   Number of value slots in the arena (default: 65536)");
    println!("  --max-depth <n>  Maximum evaluation nesting depth (default: 256)");
    println!("  --load <file>    Load a source file before starting (repeatable)");
    println!("  --gc-stats       Print collector statistics on exit");
    println!("  -h, --help       Show this help message");
    println!();
    println!("Environment variables:");
    println!("  RUST_LOG=debug   Log every collection; RUST_LOG=trace for each reclaimed string");
}

fn parse_args() -> Result<Options, pico_args::Error> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        print_help();
        process::exit(0);
    }

    let defaults = InterpConfig::default();
    let capacity = args
        .opt_value_from_str("--capacity")?
        .unwrap_or(defaults.heap.capacity);
    let max_depth = args
        .opt_value_from_str("--max-depth")?
        .unwrap_or(defaults.max_depth);
    let load = args.values_from_str("--load")?;
    let gc_stats = args.contains("--gc-stats");
    let script = args.opt_free_from_str()?;

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(pico_args::Error::ArgumentParsingFailed {
            cause: format!("unexpected arguments: {:?}", rest),
        });
    }

    Ok(Options {
        capacity,
        max_depth,
        load,
        gc_stats,
        script,
    })
}

fn main() {
    env_logger::init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Try 'jcm-lisp --help' for usage information.");
            process::exit(1);
        }
    };

    // Evaluation recurses on the native stack, so size the interpreter
    // thread for the configured depth.
    let stack_size = options
        .max_depth
        .saturating_mul(STACK_PER_DEPTH)
        .max(MIN_STACK_SIZE);
    let spawned = thread::Builder::new()
        .name("jcm-lisp".into())
        .stack_size(stack_size)
        .spawn(move || run(options));
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start interpreter thread: {}", e);
            process::exit(1);
        }
    };
    if handle.join().is_err() {
        process::exit(101);
    }
}

fn run(options: Options) {
    let config = InterpConfig {
        heap: HeapConfig {
            capacity: options.capacity,
        },
        max_depth: options.max_depth,
    };
    let mut interp = match Interp::with_config(config) {
        Ok(interp) => interp,
        Err(e) => {
            eprintln!("Failed to initialize interpreter: {}", e);
            process::exit(1);
        }
    };

    for path in &options.load {
        load_file(&mut interp, path);
    }

    if let Some(script) = &options.script {
        load_file(&mut interp, script);
    } else if io::stdin().is_terminal() {
        println!("Welcome to JCM-LISP. Use ctrl-d to exit.");
        println!(
            "  Heap: {}/{} slots used, Symbols: {} interned",
            interp.heap.active_count(),
            interp.heap.capacity(),
            interp.heap.symbol_count()
        );
        run_interactive(&mut interp);
    } else {
        run_piped(&mut interp);
    }

    if options.gc_stats {
        let stats = interp.heap.stats();
        eprintln!(
            "gc: {} collections, {} slots reclaimed, {}/{} slots active",
            stats.collections,
            stats.reclaimed,
            interp.heap.active_count(),
            interp.heap.capacity()
        );
    }
}

/// Load a source file, evaluating each form in turn. Any error is fatal.
fn load_file(interp: &mut Interp, path: &Path) {
    let input = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading {}: {}", path.display(), e);
            process::exit(1);
        }
    };

    let start = Instant::now();
    let mut pos = 0;
    let mut count = 0;
    loop {
        match reader::read_one_at(&input, pos, &mut interp.heap) {
            Ok(Some((expr, new_pos))) => {
                pos = new_pos;
                count += 1;
                if let Err(e) = interp.eval_global(expr) {
                    eprintln!("{}: error at expression {}: {}", path.display(), count, e);
                    process::exit(1);
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("{}: {} (at offset {})", path.display(), e, pos);
                process::exit(1);
            }
        }
    }

    log::debug!(
        "loaded {} expressions from {} in {:.2}s",
        count,
        path.display(),
        start.elapsed().as_secs_f64()
    );
}

/// Open-paren count over REPL input, carried across lines. Parens inside
/// string literals and `;` comments do not count.
#[derive(Debug, Default)]
struct Balance {
    depth: i32,
    in_string: bool,
    escaped: bool,
}

impl Balance {
    fn feed(&mut self, line: &str) {
        for ch in line.chars() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => self.in_string = true,
                ';' => break,
                '(' => self.depth += 1,
                ')' => self.depth -= 1,
                _ => {}
            }
        }
    }

    /// True once every list and string opened so far has been closed.
    /// A stray `)` also completes the input so the reader can report it.
    fn is_complete(&self) -> bool {
        self.depth <= 0 && !self.in_string
    }
}

/// Interactive REPL: accumulate lines until the input is balanced.
fn run_interactive(interp: &mut Interp) {
    let stdin = io::stdin();
    let mut buf = String::new();
    let mut balance = Balance::default();

    loop {
        print!("{}", if buf.is_empty() { "> " } else { "  " });
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }

        balance.feed(&line);
        buf.push_str(&line);
        if !balance.is_complete() {
            continue;
        }

        let input = std::mem::take(&mut buf);
        balance = Balance::default();
        if !input.trim().is_empty() {
            eval_and_print(&input, interp);
        }
    }
    println!();
}

/// Piped mode: read all input, then evaluate one expression at a time.
fn run_piped(interp: &mut Interp) {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("Read error: {}", e);
        process::exit(1);
    }
    eval_and_print(&input, interp);
}

/// Evaluate one or more expressions in a string and print results.
/// Evaluation errors are reported and the session continues.
fn eval_and_print(input: &str, interp: &mut Interp) {
    let mut pos = 0;
    loop {
        match reader::read_one_at(input, pos, &mut interp.heap) {
            Ok(Some((expr, new_pos))) => {
                pos = new_pos;
                match interp.eval_global(expr) {
                    Ok(val) => println!("{}", interp.print(val)),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}
