use std::path::PathBuf;

use cellar::literal::{self, LiteralError};
use cellar::natives;
use cellar_runtime::{CallArgs, Heap, HeapConfig, Kind, Value};
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Bytes of allocation between automatic collections.
    #[arg(long, global = true)]
    ballast: Option<usize>,

    /// Gray queue entries before marking falls back to rescans.
    #[arg(long, global = true)]
    mark_limit: Option<usize>,

    /// Only collect when `recycle` is called.
    #[arg(long, global = true)]
    no_gc: bool,

    /// Multiplies the number of units in every pool segment.
    #[arg(long, global = true, default_value_t = 1.0)]
    segment_scale: f64,

    /// Logs at debug level unless CELLAR_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invokes a native with literal arguments, e.g. `cellar call add 1 2`. Refinements are
    /// given as `/name=value`.
    Call {
        native: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Prints the pool table and collector statistics.
    Stats,

    /// Lists the registered natives.
    Natives,

    /// Starts a session where every line is a call.
    Repl,
}

#[derive(Error, miette::Diagnostic, Debug)]
enum CliError {
    #[error("there is no native named '{0}'")]
    #[diagnostic(code(cellar::cli::unknown), help("`cellar natives` lists them"))]
    UnknownNative(String),

    #[error("'{0}' is not an action")]
    #[diagnostic(code(cellar::cli::not_action))]
    NotAction(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Literal(#[from] LiteralError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] cellar_runtime::RuntimeError),
}

impl Cli {
    fn heap_config(&self) -> HeapConfig {
        let mut config = HeapConfig::default().scale_segments(self.segment_scale);

        if let Some(ballast) = self.ballast {
            config.ballast = ballast;
        }

        if let Some(limit) = self.mark_limit {
            config.mark_queue_limit = limit;
        }

        config.gc_enabled = !self.no_gc;
        config
    }
}

fn main() -> miette::Result<()> {
    // Install the panic handler.
    bupropion::install(bupropion::BupropionHandlerOpts::new).into_diagnostic()?;

    // Parse the command line arguments.
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CELLAR_LOG").unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut heap = Heap::new(cli.heap_config());
    natives::register(&mut heap)?;

    match cli.command {
        Command::Call { native, args } => {
            let out = call(&mut heap, &native, &args)?;
            println!("{}", heap.mold(&out));
        }
        Command::Stats => stats(&heap),
        Command::Natives => {
            let lib = heap.lib();
            for name in heap.field_names(&lib)? {
                println!("{name}");
            }
        }
        Command::Repl => repl(&mut heap),
    }

    Ok(())
}

fn call(heap: &mut Heap, native: &str, args: &[String]) -> Result<Value, CliError> {
    let action = heap
        .lib_get(native)
        .ok_or_else(|| CliError::UnknownNative(native.to_string()))?;

    if action.datatype() != Kind::Action {
        return Err(CliError::NotAction(native.to_string()));
    }

    let mut positional = Vec::new();
    let mut named = Vec::new();

    for arg in args {
        match arg.strip_prefix('/').and_then(|arg| arg.split_once('=')) {
            Some((name, source)) => named.push((name, literal::parse(heap, source)?)),
            None => positional.push(literal::parse(heap, arg)?),
        }
    }

    // Nothing collects before the call has the arguments in its frame.
    let out = heap.invoke_with(
        &action,
        CallArgs {
            positional: &positional,
            named: &named,
        },
    )?;

    Ok(out)
}

fn stats(heap: &Heap) {
    println!("{:>8} {:>9} {:>8} {:>8} {:>8}", "width", "segments", "carved", "free", "in use");

    for pool in heap.pool_stats() {
        println!(
            "{:>8} {:>9} {:>8} {:>8} {:>8}",
            pool.width, pool.segments, pool.carved, pool.free, pool.in_use
        );
    }

    let gc = heap.gc_stats();
    println!();
    println!("live nodes:      {}", heap.live_nodes());
    println!("oversized bytes: {}", heap.oversized_bytes());
    println!("collections:     {}", gc.collections);
    println!("freed in total:  {}", gc.freed_total);
    println!("overflowed:      {}", gc.overflow_fallbacks);
}

fn get_history_path() -> Option<PathBuf> {
    let home_env = std::env::var("HOME").ok()?;
    let path = format!("{home_env}/.cellar.history");
    Some(PathBuf::from(path))
}

fn eval_line(heap: &mut Heap, line: &str) -> Result<Option<Value>, CliError> {
    let words = literal::split(line)?;

    match words.split_first() {
        Some((native, args)) => call(heap, native, args).map(Some),
        None => Ok(None),
    }
}

fn repl(heap: &mut Heap) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("cannot start a session: {err}");
            return;
        }
    };

    let path = get_history_path();

    if let Some(path) = path.clone() {
        if rl.load_history(&path).is_err() {
            println!("No previous history.");
        }
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match eval_line(heap, &line) {
                    Ok(Some(value)) => println!("== {}", heap.mold(&value)),
                    Ok(None) => {}
                    Err(err) => println!("{:?}", miette::Report::new(err)),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Some(path) = path {
        let _ = rl.append_history(&path);
    }
}
