use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use fluid_compiler::{compile, disassemble, parse, print_chunk, CompileError, CompileOptions};
use log::LevelFilter;
use rustyline::error::ReadlineError;

/// Compile Fluid source and print its AST, its source or its bytecode.
#[derive(Parser, Debug)]
#[command(name = "fluidc", author, version, about, long_about = None)]
struct Cli {
    /// Script to compile; `-` or no script reads stdin.
    script: Option<PathBuf>,

    /// Compile a chunk given on the command line.
    #[arg(short = 'e', long = "execute", value_name = "CHUNK", conflicts_with = "script")]
    chunk: Option<String>,

    /// What to print for each compiled chunk.
    #[arg(long, value_enum, default_value_t = Emit::Bytecode)]
    emit: Emit,

    /// Report every syntax error instead of stopping at the first one.
    #[arg(short = 'a', long, value_name = "MAX", num_args = 0..=1, default_missing_value = "32")]
    accumulate: Option<usize>,

    /// Emit arithmetic and presence checks on constants as written.
    #[arg(long)]
    no_fold: bool,

    /// Start an interactive session after compiling any input.
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Increase log verbosity (-v debug, -vv trace with per-instruction output).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The parsed syntax tree.
    Ast,
    /// Source printed back from the syntax tree.
    Source,
    /// `luac -l` style listing.
    Bytecode,
}

impl Cli {
    fn options(&self, chunk_name: &str) -> CompileOptions {
        let mut options = CompileOptions::new()
            .with_chunk_name(chunk_name)
            .with_constant_folding(!self.no_fold)
            .with_trace_emission(self.verbose >= 2);
        if let Some(max) = self.accumulate {
            options = options.accumulate(max);
        }
        options
    }

    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Compile one chunk and render it as requested.
fn render(source: &[u8], options: &CompileOptions, emit: Emit) -> Result<String, CompileError> {
    Ok(match emit {
        Emit::Ast => format!("{:#?}", parse(source, options)?),
        Emit::Source => print_chunk(&parse(source, options)?),
        Emit::Bytecode => disassemble(&compile(source, options)?),
    })
}

fn run_chunk(cli: &Cli, source: &[u8], chunk_name: &str) -> Result<()> {
    match render(source, &cli.options(chunk_name), cli.emit) {
        Ok(out) => {
            println!("{out}");
            Ok(())
        }
        Err(e) => bail!("{e}"),
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("cannot read stdin")?;
    Ok(buf)
}

/// Whether a failure only means the input stops early.
fn is_incomplete(err: &CompileError) -> bool {
    err.first().is_some_and(|e| {
        e.message.contains("<eof>") || e.message.contains("unfinished long")
    })
}

fn run_repl(cli: &Cli) -> Result<()> {
    let config = rustyline::config::Config::builder()
        .auto_add_history(true)
        .build();
    let mut rl = rustyline::DefaultEditor::with_config(config).context("cannot initialize REPL")?;
    let options = cli.options("stdin");

    loop {
        let mut input = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if input.trim().is_empty() {
            continue;
        }

        // An expression is shown as the chunk returning it.
        let as_expr = format!("return {input}");
        if let Ok(out) = render(as_expr.as_bytes(), &options, cli.emit) {
            println!("{out}");
            continue;
        }
        loop {
            match render(input.as_bytes(), &options, cli.emit) {
                Ok(out) => println!("{out}"),
                Err(e) if is_incomplete(&e) => match rl.readline(">> ") {
                    Ok(more) => {
                        input.push('\n');
                        input.push_str(&more);
                        continue;
                    }
                    Err(_) => eprintln!("{e}"),
                },
                Err(e) => eprintln!("{e}"),
            }
            break;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level())
        .env()
        .init()
        .context("cannot install logger")?;

    if let Some(chunk) = &cli.chunk {
        run_chunk(&cli, chunk.as_bytes(), "(command line)")?;
    } else if let Some(path) = cli.script.as_ref().filter(|p| p.as_os_str() != "-") {
        let source = std::fs::read(path).with_context(|| format!("cannot open {}", path.display()))?;
        run_chunk(&cli, &source, &path.display().to_string())?;
    } else if !cli.interactive {
        run_chunk(&cli, &read_stdin()?, "stdin")?;
    }

    if cli.interactive {
        run_repl(&cli)?;
    }
    Ok(())
}
