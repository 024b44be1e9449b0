use parking_lot::Mutex;
use std::error::Error;
use std::io;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rusty_board::console::{run_console, ConsoleConfig};
use rusty_board::debug::{DebugConfig, DebugSession};
use rusty_board::engine::{Engine, EngineConfig};
use rusty_board::system_config::{SystemConfig, SystemFactory};
use rusty_board::systems::{build_demo_board, countdown_program};

const USAGE: &str = "usage: rusty_board [project.json] [--ticks N] [--save out.json] [--console]";

#[derive(Debug, Default)]
struct Options {
    project: Option<String>,
    ticks: Option<u64>,
    save: Option<String>,
    console: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ticks" => {
                let value = args.next().ok_or("--ticks needs a value")?;
                let ticks = value
                    .parse()
                    .map_err(|_| format!("invalid tick count '{}'", value))?;
                options.ticks = Some(ticks);
            }
            "--save" => options.save = Some(args.next().ok_or("--save needs a path")?),
            "--console" => options.console = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option '{}'\n{}", flag, USAGE)),
            path if options.project.is_none() => options.project = Some(path.to_string()),
            extra => return Err(format!("unexpected argument '{}'\n{}", extra, USAGE)),
        }
    }
    Ok(options)
}

fn load_engine(options: &Options) -> Result<(String, Engine), Box<dyn Error>> {
    match &options.project {
        Some(path) => {
            let config = SystemConfig::load_json(path)?;
            let engine = SystemFactory::new().create(&config)?;
            Ok((config.name, engine))
        }
        None => {
            let mut engine = Engine::new(EngineConfig::default());
            build_demo_board(&mut engine, &countdown_program(5))?;
            Ok(("demo".to_string(), engine))
        }
    }
}

fn run_headless(name: &str, engine: &mut Engine, ticks: u64) -> Result<(), Box<dyn Error>> {
    let session = DebugSession::attach(engine, DebugConfig::default());
    let latches: Vec<_> = engine
        .components()
        .filter(|c| c.descriptor.model == "output_latch")
        .filter_map(|c| c.pin("Q"))
        .collect();
    for pin in &latches {
        session.watch(*pin);
    }

    for issue in engine.validate() {
        println!("warning: {}", issue.message);
    }

    println!("Running '{}' for {} ticks", name, ticks);
    let result = engine.step(ticks);

    for entry in session.debugger().recent_traces(usize::MAX) {
        println!("tick {:>6}  {}  {}", entry.tick, entry.pin, entry.to);
    }
    for component in engine.components() {
        println!("{:<10} {}", component.name(), component.describe());
    }
    let stats = engine.stats();
    println!(
        "tick={} state={:?} evaluations={} warnings={} nets={}",
        stats.tick, stats.state, stats.evaluations, stats.warnings, stats.connections.nets
    );
    session.detach(engine);

    if let Err(err) = result {
        println!("halted: {}", err);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    let options = parse_args(std::env::args().skip(1))?;
    let (name, mut engine) = load_engine(&options)?;
    info!(project = %name, components = engine.components().count(), "loaded board");

    let engine = if options.console {
        let shared = Arc::new(Mutex::new(engine));
        run_console(shared.clone(), ConsoleConfig::default())?;
        Arc::try_unwrap(shared)
            .map(Mutex::into_inner)
            .map_err(|_| "engine still shared after console exit")?
    } else {
        run_headless(&name, &mut engine, options.ticks.unwrap_or(64))?;
        engine
    };

    if let Some(path) = &options.save {
        SystemConfig::capture(&engine, &name).save_json(path)?;
        println!("Saved project to {}", path);
    }
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(args(&["board.json", "--ticks", "100", "--save", "out.json"])).unwrap();
        assert_eq!(options.project.as_deref(), Some("board.json"));
        assert_eq!(options.ticks, Some(100));
        assert_eq!(options.save.as_deref(), Some("out.json"));
        assert!(!options.console);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(args(&["--ticks"])).is_err());
        assert!(parse_args(args(&["--ticks", "many"])).is_err());
        assert!(parse_args(args(&["a.json", "b.json"])).is_err());
        assert!(parse_args(args(&["--fast"])).is_err());
    }
}
