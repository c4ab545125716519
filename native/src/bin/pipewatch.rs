// pipewatch - list and watch the named pipes of a host.

use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, warn};
use pipe_watch::{
    enumerate_pipes, logging, PipeError, PipeSnapshot, PipeWatcher, Result, WatchBatch,
    WatchConfig, WatchEvent,
};
use serde::Serialize;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;
use uuid::Uuid;

/// List named pipes and report the ones that appear, change or disappear.
#[derive(Parser, Debug)]
#[command(name = "pipewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enumerate the pipes of a host once
    List(ListArgs),

    /// Print the current pipes, then stream changes until Ctrl-C
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Host to query; "." is the local machine
    #[arg(long, env = "PIPEWATCH_HOST", default_value = ".")]
    host: String,

    /// Read owner, group and access rules of every pipe
    #[arg(long, env = "PIPEWATCH_READ_ACLS")]
    acls: bool,

    /// Print one JSON document per line
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    target: TargetArgs,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Polling period in milliseconds
    #[arg(long, env = "PIPEWATCH_INTERVAL_MS", default_value_t = 3000)]
    interval_ms: u64,
}

impl WatchArgs {
    fn config(&self) -> WatchConfig {
        WatchConfig::default()
            .with_host(&self.target.host)
            .with_refresh_interval(Duration::from_millis(self.interval_ms))
            .with_read_acls(self.target.acls)
    }
}

/// One line of `--json` watch output.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventLine<'a> {
    timestamp: String,
    session: Uuid,
    tick: u64,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipe: Option<&'a PipeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_pipe(out: &mut impl Write, pipe: &PipeSnapshot, acls: bool) -> io::Result<()> {
    let max = if pipe.is_unlimited() {
        "unlimited".to_string()
    } else {
        pipe.max_connections().to_string()
    };
    writeln!(
        out,
        "{:<60} {:>9} {:>6}  {}",
        pipe.path(),
        max,
        pipe.active_connections(),
        pipe.hint()
    )?;
    if acls {
        let security = pipe.security();
        if !security.owner.is_empty() {
            writeln!(out, "    owner: {}", security.owner)?;
        }
        if !security.group.is_empty() {
            writeln!(out, "    group: {}", security.group)?;
        }
        for rule in &security.rules {
            writeln!(out, "    {}", rule)?;
        }
    }
    Ok(())
}

fn print_listing(pipes: &[PipeSnapshot], target: &TargetArgs) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if target.json {
        for pipe in pipes {
            serde_json::to_writer(&mut out, pipe).map_err(io::Error::from)?;
            writeln!(out)?;
        }
    } else {
        writeln!(
            out,
            "{:<60} {:>9} {:>6}  {}",
            "PIPE", "MAX", "ACTIVE", "HINT"
        )?;
        for pipe in pipes {
            print_pipe(&mut out, pipe, target.acls)?;
        }
        writeln!(out, "{} pipes", pipes.len())?;
    }
    out.flush()?;
    Ok(())
}

fn print_batch(batch: &WatchBatch, target: &TargetArgs) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for event in &batch.events {
        if target.json {
            let line = EventLine {
                timestamp: chrono::Local::now().to_rfc3339(),
                session: batch.session,
                tick: batch.tick,
                action: event.action(),
                pipe: event.pipe(),
                error: match event {
                    WatchEvent::TickFailed { error, .. } => Some(error.to_string()),
                    _ => None,
                },
            };
            serde_json::to_writer(&mut out, &line).map_err(io::Error::from)?;
            writeln!(out)?;
            continue;
        }

        match event {
            WatchEvent::TickFailed { host, error } => {
                writeln!(out, "{} failed   {}: {}", timestamp(), host, error)?;
            }
            _ => {
                if let Some(pipe) = event.pipe() {
                    write!(out, "{} {:<8} ", timestamp(), event.action())?;
                    print_pipe(&mut out, pipe, target.acls)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn run_list(args: &ListArgs) -> Result<()> {
    let pipes = enumerate_pipes(&args.target.host, args.target.acls)?;
    print_listing(&pipes, &args.target)
}

/// Drop creations of the first batch that only repeat the printed listing.
fn without_listed(batch: &WatchBatch, listed: &[PipeSnapshot]) -> WatchBatch {
    let mut batch = batch.clone();
    if batch.is_initial() {
        batch.events.retain(|event| match event {
            WatchEvent::Created(pipe) => !listed.contains(pipe),
            _ => true,
        });
    }
    batch
}

async fn run_watch(args: &WatchArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;

    let listed = match enumerate_pipes(&config.host, config.read_acls) {
        Ok(pipes) => {
            print_listing(&pipes, &args.target)?;
            pipes
        }
        Err(e) if e.is_transient() => {
            warn!("[CLI] Initial listing failed, watching anyway: {}", e);
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let watcher = PipeWatcher::with_config(std::sync::Arc::new(pipe_watch::NativeSource), &config)?;
    let mut batches = watcher.subscribe_channel();
    watcher.start()?;
    info!("[CLI] {}", watcher);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[CLI] Interrupted");
                break;
            }
            batch = batches.recv() => {
                match batch {
                    Some(batch) => print_batch(&without_listed(&batch, &listed), &args.target)?,
                    None => break,
                }
            }
        }
    }

    watcher.dispose();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::List(args) => run_list(&args),
        Commands::Watch(args) => run_watch(&args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load or ignore .env file
    let _ = dotenvy::dotenv();

    logging::init_logger();
    logging::init_crash_logger();
    if logging::init_sentry_from_env() {
        info!("[CLI] Sentry monitoring enabled");
    }

    let cli = Cli::parse();
    debug!("[CLI] {:?}", cli);

    let result = run(cli).await;
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(PipeError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(e) => {
            error!("[CLI] {}", e);
            eprintln!("pipewatch: {}", e);
            if !e.is_transient() {
                logging::log_critical_error("pipewatch", &e.to_string());
            }
            ExitCode::FAILURE
        }
    };

    logging::shutdown_sentry();
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn watch_arguments_build_config() {
        let cli = Cli::try_parse_from([
            "pipewatch",
            "watch",
            "--host",
            r"\\server01",
            "--interval-ms",
            "250",
            "--acls",
        ])
        .unwrap();
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        let config = args.config();
        assert_eq!(config.host, "server01");
        assert_eq!(config.refresh_interval, Duration::from_millis(250));
        assert!(config.read_acls);
    }

    #[test]
    fn zero_interval_fails_validation() {
        let cli = Cli::try_parse_from(["pipewatch", "watch", "--interval-ms", "0"]).unwrap();
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert!(matches!(
            args.config().validate(),
            Err(PipeError::Configuration(_))
        ));
    }

    #[test]
    fn initial_batch_skips_listed_pipes() {
        let foo = PipeSnapshot::new(".", "foo", 1, 0, Default::default());
        let bar = PipeSnapshot::new(".", "bar", 1, 0, Default::default());
        let busy_foo = PipeSnapshot::new(".", "foo", 1, 2, Default::default());
        let batch = WatchBatch {
            session: Uuid::new_v4(),
            tick: 1,
            host: ".".to_string(),
            events: vec![
                WatchEvent::Created(busy_foo.clone()),
                WatchEvent::Created(bar.clone()),
            ],
        };

        let listed = vec![foo.clone(), bar.clone()];
        let shown = without_listed(&batch, &listed);
        assert_eq!(shown.events, vec![WatchEvent::Created(busy_foo.clone())]);

        let later = WatchBatch { tick: 2, ..batch };
        assert_eq!(without_listed(&later, &listed).events.len(), 2);
    }
}
