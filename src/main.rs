use anyhow::Context;
use clap::Parser;
use gdbengine::{Command, GdbEngine, LaunchConfig, SequenceCounter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Drive GDB over its machine interface. Commands are read from stdin,
/// one per line; events are printed as JSON, one per line.
#[derive(Parser, Debug)]
#[command(name = "gdbfront", version)]
struct Cli {
    /// Debugger executable
    #[arg(long, env = "GDBFRONT_GDB")]
    gdb: Option<String>,

    /// JSON launch configuration
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: log::LevelFilter,

    /// Program to debug
    program: Option<String>,

    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn parse_level(text: &str) -> Result<log::LevelFilter, String> {
    text.parse()
        .map_err(|_| format!("unknown log level {:?}", text))
}

fn launch_config(cli: &Cli) -> anyhow::Result<LaunchConfig> {
    let mut config = match &cli.config {
        Some(path) => LaunchConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LaunchConfig::default(),
    };
    if let Some(gdb) = &cli.gdb {
        config.gdb_path = gdb.clone();
    }
    if let Some(program) = &cli.program {
        config.program = Some(program.clone());
        config.program_args = cli.args.clone();
    }
    config.validate()?;
    Ok(config)
}

/// `interrupt` and `choose N...` are handled here, everything else goes
/// to GDB as typed
fn handle_line(engine: &mut GdbEngine, line: &str) -> gdbengine::Result<()> {
    let mut words = line.split_whitespace();
    match words.next() {
        None => Ok(()),
        Some("interrupt") => engine.interrupt(),
        Some("choose") => {
            let choices: Vec<usize> = words.filter_map(|w| w.parse().ok()).collect();
            engine.choose_function_overloads(&choices)
        }
        Some(_) => engine.queue_command(Command::new(line)),
    }
}

fn print_events(engine: &GdbEngine) -> anyhow::Result<()> {
    while let Some(event) = engine.try_recv_event() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("gdbengine", cli.log_level)
        .with_module_level("gdbfront", cli.log_level)
        .init()?;

    log::info!("gdbfront starting...");

    let config = launch_config(&cli)?;
    let mut engine = GdbEngine::new(config, Arc::new(SequenceCounter::new()));
    engine.launch().await.context("failed to launch GDB")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if let Err(e) = handle_line(&mut engine, line.trim()) {
                        log::error!("{}: {}", line.trim(), e);
                    }
                }
                None => {
                    log::debug!("stdin closed, asking GDB to exit");
                    stdin_open = false;
                    if let Err(e) = engine.exit_engine() {
                        log::debug!("exit: {}", e);
                    }
                }
            },
            alive = engine.process_next() => {
                if !alive {
                    print_events(&engine)?;
                    break;
                }
            }
        }
        print_events(&engine)?;
    }

    engine.shutdown().await?;
    log::info!("gdbfront exited");
    Ok(())
}
