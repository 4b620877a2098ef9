use std::path::PathBuf;
use std::process;
use std::thread;

use clap::Parser;
use crossterm::style::Stylize;
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use renc::interpreter::core::Config;
use renc::interpreter::{self, Interpreter};

/// Deep evaluation nests Rust frames; run on a thread with room for them.
const EVAL_STACK_BYTES: usize = 256 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ren-C style evaluator")]
struct Cli {
    /// Script file to run
    file: Option<PathBuf>,

    /// Evaluate code given on the command line
    #[arg(short, long)]
    eval: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[arg(long, env = "RENC_LOG", default_value = "warn")]
    log_level: String,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Evaluator steps between signal checks
    #[arg(long, env = "RENC_EVAL_DOSE", default_value_t = 10_000)]
    eval_dose: i64,

    /// Bytes of allocation between automatic recycles
    #[arg(long, default_value_t = 3_000_000)]
    ballast: isize,
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());
    match cli.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "renc.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_timer(timer).with_writer(writer).with_ansi(false).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).with_timer(timer).with_writer(std::io::stderr).init();
            None
        }
    }
}

fn report(result: Result<String, String>) -> bool {
    match result {
        Ok(out) => {
            if !out.is_empty() {
                println!("== {}", out);
            }
            true
        }
        Err(e) => {
            eprintln!("{}", e.red());
            false
        }
    }
}

fn repl(interp: &mut Interpreter) {
    println!("renc {}", env!("CARGO_PKG_VERSION"));
    println!("Ctrl-D to exit.");
    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::new(DefaultPromptSegment::Basic("renc".to_string()), DefaultPromptSegment::Empty);
    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let line = buffer.trim();
                if line.is_empty() {
                    continue;
                }
                report(interp.execute(line));
            }
            Ok(_) => break,
            Err(e) => {
                error!(%e, "line editor failed");
                break;
            }
        }
    }
}

fn run(cli: Cli) -> i32 {
    let config = Config::default()
        .eval_dose(cli.eval_dose)
        .ballast(cli.ballast)
        .max_depth(EVAL_STACK_BYTES / 4096)
        .stack_bytes(EVAL_STACK_BYTES - EVAL_STACK_BYTES / 8);
    let mut interp = match interpreter::new(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("{}", e.red());
            return 2;
        }
    };
    interp.set_json(cli.json);

    if let Some(ref path) = cli.file {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{}", format!("cannot read {}: {}", path.display(), e).red());
                return 2;
            }
        };
        info!(file = %path.display(), "running script");
        if !report(interp.execute(&source)) {
            return 1;
        }
    }
    if let Some(ref code) = cli.eval {
        if !report(interp.execute(code)) {
            return 1;
        }
    }
    if cli.file.is_none() && cli.eval.is_none() {
        repl(&mut interp);
    }
    0
}

fn main() {
    let cli = Cli::parse();
    let guard = init_logging(&cli);
    let worker = thread::Builder::new().name("eval".to_string()).stack_size(EVAL_STACK_BYTES).spawn(move || run(cli));
    let code = match worker {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            eprintln!("{}", "evaluator thread panicked".red());
            3
        }),
        Err(e) => {
            eprintln!("{}", format!("cannot start evaluator thread: {}", e).red());
            3
        }
    };
    drop(guard);
    process::exit(code);
}
