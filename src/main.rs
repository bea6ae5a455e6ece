use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use pith::bytecode::disasm;
use pith::config::Config;
use pith::diagnostic::{ansi::AnsiRenderer, json, registry, Diagnostic};
use pith::vm::Vm;

/// Compile and run a pith program.
#[derive(Parser, Debug)]
#[command(name = "pith", version, about)]
struct Cli {
    /// Source file to run
    #[arg(required_unless_present = "explain")]
    file: Option<PathBuf>,

    /// Print the syntax tree as JSON
    #[arg(long)]
    ast: bool,

    /// Print the disassembled program
    #[arg(long)]
    bytecode: bool,

    /// Stop after compiling
    #[arg(long)]
    no_run: bool,

    /// Report errors as one JSON object per line
    #[arg(long)]
    json: bool,

    /// JSON file with `compiler` and `vm` sections
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    gc_threshold: Option<usize>,

    #[arg(long, value_name = "N")]
    stack_capacity: Option<usize>,

    #[arg(long, value_name = "N")]
    heap_capacity: Option<usize>,

    /// Explain an error code, e.g. PITH-R002
    #[arg(long, value_name = "CODE", conflicts_with = "file")]
    explain: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(code) = &cli.explain {
        return match registry::lookup(code) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                report(&cli, &Diagnostic::error(format!("unknown error code '{code}'")), None);
                ExitCode::FAILURE
            }
        };
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            report(&cli, &d, cli.file.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, Diagnostic> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| Diagnostic::from(&e))?,
        None => Config::default(),
    };
    if let Some(n) = cli.gc_threshold {
        config.vm.gc_threshold = n;
    }
    if let Some(n) = cli.stack_capacity {
        config.vm.stack_capacity = n;
    }
    if let Some(n) = cli.heap_capacity {
        config.vm.heap_capacity = n;
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), Diagnostic> {
    let config = load_config(cli)?;
    let Some(path) = &cli.file else {
        return Err(Diagnostic::error("no source file given"));
    };
    let source = std::fs::read_to_string(path)
        .map_err(|e| Diagnostic::error(format!("cannot read {}: {e}", path.display())))?;

    let tree = pith::parse_source(&source)?;
    if cli.ast {
        let text = serde_json::to_string_pretty(&tree)
            .map_err(|e| Diagnostic::error(format!("cannot serialize syntax tree: {e}")))?;
        println!("{text}");
    }

    let program = pith::compiler::compile_with(tree.as_deref(), &config.compiler)
        .map_err(|e| Diagnostic::from(&e).with_source(source.as_str()))?;
    drop(tree);
    if cli.bytecode {
        let listing = disasm::disassemble(&program).map_err(|e| Diagnostic::from(&e))?;
        print!("{listing}");
    }
    if cli.no_run {
        return Ok(());
    }

    let mut vm = Vm::new(&program, config.vm);
    let result = vm.run().map_err(|e| Diagnostic::from(&e))?;
    log::debug!(
        "finished with {result:?}; stack={} heap={} gc={:?}",
        vm.stack_size(),
        vm.heap().live(),
        vm.heap().stats()
    );
    Ok(())
}

fn report(cli: &Cli, d: &Diagnostic, path: Option<&PathBuf>) {
    if cli.json {
        eprintln!("{}", json::render(d));
        return;
    }
    let stderr = std::io::stderr();
    let renderer = AnsiRenderer {
        use_color: stderr.is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        path: path.map(|p| p.display().to_string()),
    };
    eprint!("{}", renderer.render(d));
}
