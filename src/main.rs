//! FlowForge CLI Entry Point
//!
//! Runs workflows natively, checks them, exports them, and serves as the
//! generic entrypoint exported pipelines call back into.
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow natively
//! flowforge run workflow.yml --workers 4
//!
//! # Report missing root inputs without running anything
//! flowforge dryrun workflow.yml
//!
//! # Translate to an external engine
//! flowforge export workflow.yml --format snakemake --out Snakefile
//! flowforge export workflow.yml --format cwl --out pipeline.cwl
//!
//! # Run one registered method instance (the exported-pipeline contract)
//! flowforge clip_region -i src=data/r1.geojson -o dst=model/r1/x.inp -p res=0.5
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info, warn};

use flowforge::workflow::method::{Method, PathInput};
use flowforge::workflow::schema::{Kwarg, Kwargs, ParamValue};
use flowforge::{methods, Workflow, WorkflowError, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    verbose: bool,
}

#[derive(Debug)]
enum Command {
    Run {
        workflow: String,
        root: Option<PathBuf>,
        workers: usize,
    },
    Dryrun {
        workflow: String,
        root: Option<PathBuf>,
    },
    Export {
        workflow: String,
        root: Option<PathBuf>,
        format: String,
        out: PathBuf,
    },
    /// Any other first argument names a registered method to run once.
    Method {
        name: String,
        inputs: Vec<(String, String)>,
        outputs: Vec<(String, String)>,
        params: Vec<(String, String)>,
    },
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Composition and Translation Engine");
    println!();
}

fn print_usage() {
    println!("Usage: flowforge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run <WORKFLOW_FILE>      Run the workflow natively");
    println!("  dryrun <WORKFLOW_FILE>   Report missing root inputs, run nothing");
    println!("  export <WORKFLOW_FILE>   Translate to an external pipeline engine");
    println!("  <METHOD_NAME>            Run one registered method instance");
    println!();
    println!("Options:");
    println!("  --root DIR               Resolve relative paths under DIR");
    println!("  --workers N              Parallel instances per rule (default: CPU count)");
    println!("  --format snakemake|cwl   Export target (export only)");
    println!("  --out PATH               Export destination (export only)");
    println!("  -i k=v  -o k=v  -p k=v   Method inputs, outputs, params (method only)");
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  flowforge run flood.yml --workers 8");
    println!("  flowforge export flood.yml --format snakemake --out Snakefile");
    println!("  flowforge clip_region -i src=data/r1.geojson -o dst=model/r1/x.inp");
}

/// Splits `key=value`, keeping any `=` inside the value.
fn split_pair(arg: &str, flag: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("{flag} expects key=value, got '{arg}'")),
    }
}

fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut verbose = false;
    let mut positionals: Vec<String> = Vec::new();
    let mut root: Option<PathBuf> = None;
    let mut workers: Option<usize> = None;
    let mut format: Option<String> = None;
    let mut out: Option<PathBuf> = None;
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut params = Vec::new();

    let mut i = 1; // skip program name
    while i < args.len() {
        let arg = &args[i];
        let mut take = |flag: &str| -> Result<String, String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires an argument"))
        };

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => verbose = true,
            "--root" => root = Some(PathBuf::from(take("--root")?)),
            "--workers" => {
                let value = take("--workers")?;
                workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {value}"))?,
                );
            }
            "--format" => format = Some(take("--format")?),
            "--out" => out = Some(PathBuf::from(take("--out")?)),
            "-i" => inputs.push(split_pair(&take("-i")?, "-i")?),
            "-o" => outputs.push(split_pair(&take("-o")?, "-o")?),
            "-p" => params.push(split_pair(&take("-p")?, "-p")?),
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {other}"));
            }
            _ => positionals.push(arg.clone()),
        }
        i += 1;
    }

    let Some(first) = positionals.first().cloned() else {
        return Err("No command or method name given".to_string());
    };

    let command = match first.as_str() {
        "run" | "dryrun" | "export" => {
            let workflow = positionals
                .get(1)
                .cloned()
                .ok_or_else(|| format!("'{first}' requires a workflow file"))?;
            if positionals.len() > 2 {
                return Err(format!("Unexpected argument: {}", positionals[2]));
            }
            match first.as_str() {
                "run" => Command::Run {
                    workflow,
                    root,
                    workers: workers.unwrap_or_else(num_cpus::get),
                },
                "dryrun" => Command::Dryrun { workflow, root },
                _ => Command::Export {
                    workflow,
                    root,
                    format: format.ok_or("export requires --format snakemake|cwl")?,
                    out: out.ok_or("export requires --out PATH")?,
                },
            }
        }
        _ => {
            if positionals.len() > 1 {
                return Err(format!("Unexpected argument: {}", positionals[1]));
            }
            Command::Method {
                name: first,
                inputs,
                outputs,
                params,
            }
        }
    };

    Ok(Config { command, verbose })
}

/// Parses a CLI value as YAML so numbers and booleans keep their type.
fn parse_value(raw: &str) -> ParamValue {
    serde_yaml::from_str(raw).unwrap_or_else(|_| ParamValue::Str(raw.to_string()))
}

/// Splits a comma-separated list value into its entries. A value without
/// commas stays a single path, spaces included.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

/// Runs one registered method instance from serialized kwargs. Input
/// values holding comma-separated lists become aggregates, matching the
/// join convention of exported pipelines.
fn run_method(
    name: &str,
    inputs: &[(String, String)],
    outputs: &[(String, String)],
    params: &[(String, String)],
) -> Result<(), WorkflowError> {
    let imp = methods::get(name)?;

    let mut kwargs = Kwargs::new();
    let mut aggregates: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (field, value) in inputs {
        let paths = split_list(value);
        match paths.as_slice() {
            [] => {
                kwargs.insert(field.clone(), Kwarg::from(value.as_str()));
            }
            [single] => {
                kwargs.insert(field.clone(), Kwarg::from(single.as_str()));
            }
            _ => {
                kwargs.insert(field.clone(), Kwarg::from(paths[0].as_str()));
                aggregates.insert(field.clone(), paths);
            }
        }
    }
    for (field, value) in outputs {
        kwargs.insert(field.clone(), Kwarg::from(value.as_str()));
    }
    for (field, value) in params {
        kwargs.insert(field.clone(), Kwarg::Value(parse_value(value)));
    }

    let mut method = Method::validate(imp, &kwargs)?;
    for (field, paths) in aggregates {
        method.set_aggregate_input(&field, paths);
    }

    info!("Running method '{}'", name);
    for (field, slot) in method.input() {
        if let PathInput::Aggregate(paths) = slot {
            info!("  {}: {} aggregated paths", field, paths.len());
        }
    }
    method.run_with_checks(Path::new("."))
}

/// Moves into the requested root so method runs and existence checks agree
/// on what relative paths mean.
fn enter_root(root: &Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = root {
        if !dir.is_dir() {
            return Err(format!("Root directory does not exist: {}", dir.display()).into());
        }
        env::set_current_dir(dir)?;
    }
    info!("Working directory: {}", env::current_dir()?.display());
    Ok(())
}

fn load(workflow: &str) -> Result<Workflow, WorkflowError> {
    info!("Loading workflow: {}", workflow);
    let registry = methods::snapshot();
    Workflow::from_yaml(Path::new(workflow), ".", &registry)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    match config.command {
        Command::Run {
            workflow,
            root,
            workers,
        } => {
            print_banner();
            enter_root(&root)?;
            let wf = load(&workflow)?;
            let missing = wf.dryrun();
            for path in &missing {
                warn!("Missing root input: {}", path);
            }
            if !missing.is_empty() {
                return Err(format!("{} root input(s) missing", missing.len()).into());
            }
            wf.run(workers)?;
        }
        Command::Dryrun { workflow, root } => {
            print_banner();
            enter_root(&root)?;
            let wf = load(&workflow)?;
            let missing = wf.dryrun();
            if missing.is_empty() {
                info!("All root inputs present ({} rules)", wf.rules().len());
            } else {
                for path in &missing {
                    warn!("Missing root input: {}", path);
                }
            }
        }
        Command::Export {
            workflow,
            root,
            format,
            out,
        } => {
            print_banner();
            enter_root(&root)?;
            let wf = load(&workflow)?;
            match format.as_str() {
                "snakemake" => wf.to_snakemake(&out)?,
                "cwl" => wf.to_cwl(&out)?,
                other => return Err(format!("Unknown export format: {other}").into()),
            }
        }
        Command::Method {
            name,
            inputs,
            outputs,
            params,
        } => {
            run_method(&name, &inputs, &outputs, &params).map_err(|e| {
                error!("Method '{}' failed: {}", name, e);
                e
            })?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_on_commas_only() {
        assert_eq!(split_list("a.csv,b.csv"), vec!["a.csv", "b.csv"]);
        assert_eq!(split_list("a.csv, b.csv"), vec!["a.csv", "b.csv"]);
        // a single path containing spaces is not an aggregate
        assert_eq!(split_list("my data/in file.txt"), vec!["my data/in file.txt"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_split_pair_keeps_value_equals() {
        let (key, value) = split_pair("src=a=b.txt", "-i").unwrap();
        assert_eq!(key, "src");
        assert_eq!(value, "a=b.txt");
        assert!(split_pair("noequals", "-i").is_err());
    }
}
