//! CLI front end: `truth-table`, `test`, and `parse` subcommands over the
//! `sv_sim` library (SPEC_FULL.md §2 "Configuration / CLI"). Thin
//! presentation layer — all simulation logic lives in the library crate.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sv_sim::driver::{load_vector_file, truth_table, vector};

#[derive(Parser)]
#[command(name = "sv_sim", version, about = "Structural SystemVerilog subset simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enumerate every input combination of a combinational module and
    /// print the resulting truth table.
    TruthTable {
        file: PathBuf,
        #[arg(long, default_value_t = 1024)]
        max_combinations: u64,
    },
    /// Run a JSON vector file against a module and report pass/fail.
    Test {
        file: PathBuf,
        vectors: PathBuf,
        /// Print each vector's author-supplied description alongside failures.
        #[arg(long)]
        descriptions: bool,
    },
    /// Parse a module and dump its elaborated IR.
    Parse { file: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::TruthTable { file, max_combinations } => run_truth_table(&file, max_combinations).map(|()| true),
        Command::Test { file, vectors, descriptions } => run_test(&file, &vectors, descriptions),
        Command::Parse { file } => run_parse(&file).map(|()| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_top(file: &std::path::Path) -> sv_sim::error::Result<(std::rc::Rc<sv_sim::ir::ModuleIr>, std::rc::Rc<sv_sim::cache::ModuleCache>)> {
    let source = std::fs::read_to_string(file)?;
    let ir = sv_sim::parse(&source)?;
    let cache = sv_sim::default_cache(file);
    let ir = cache.insert(ir);
    Ok((ir, cache))
}

fn run_truth_table(file: &std::path::Path, max_combinations: u64) -> sv_sim::error::Result<()> {
    let (ir, cache) = load_top(file)?;
    let table = truth_table::run(&ir, &cache, max_combinations)?;

    if table.truncated {
        log::warn!("truth table truncated at {} rows", table.rows.len());
    }

    let header: Vec<&str> = table
        .input_names
        .iter()
        .chain(table.output_names.iter())
        .map(String::as_str)
        .collect();
    println!("{}", header.join("\t"));
    for row in &table.rows {
        let fields: Vec<String> = table
            .input_names
            .iter()
            .map(|n| row.inputs.get(n).copied().unwrap_or(0).to_string())
            .chain(
                table
                    .output_names
                    .iter()
                    .map(|n| row.outputs.get(n).map(u64::to_string).unwrap_or_else(|| "?".to_string())),
            )
            .collect();
        println!("{}", fields.join("\t"));
    }
    Ok(())
}

fn run_test(file: &std::path::Path, vectors: &std::path::Path, descriptions: bool) -> sv_sim::error::Result<bool> {
    let (ir, cache) = load_top(file)?;
    let (root, vectors_dir) = load_vector_file(vectors)?;
    let report = vector::run(&ir, &cache, &root, &vectors_dir)?;

    for failure in &report.failures {
        print!("FAILED {}: {}", failure.label, failure.message);
        if descriptions {
            if let Some(desc) = &failure.description {
                print!(" ({desc})");
            }
        }
        println!();
    }
    println!("{}/{} passed", report.passed, report.total);
    Ok(report.all_passed())
}

fn run_parse(file: &std::path::Path) -> sv_sim::error::Result<()> {
    let (ir, _cache) = load_top(file)?;
    println!("module {}", ir.name);
    println!("  inputs:  {:?}", ir.inputs);
    println!("  outputs: {:?}", ir.outputs);
    println!("  signals: {}", ir.signals.len());
    println!("  assigns: {}", ir.assigns.len());
    println!("  instances: {}", ir.instances.len());
    println!("  sequential blocks: {}", ir.sequential_blocks.len());
    println!("  memories: {}", ir.memories.len());
    Ok(())
}
