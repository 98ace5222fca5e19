mod cli;

use std::{
    io::BufRead,
    path::Path,
    process::ExitCode,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::Parser;
use futures::channel::mpsc;
use hostsgate::{
    configuration::{Settings, settings_file_path},
    connection_state::{ConnectionState, ConnectionStateMachine, Notice},
    crash_log,
    fetcher::HttpDocumentClient,
    single_instance::{self, InstanceRole, PrimaryInstance},
    status::{StatusOracle, format_uptime},
    system,
};
use serde::Serialize;

use crate::cli::{Cli, Commands};

const EXIT_FAILURE: u8 = 1;
const EXIT_ALREADY_RUNNING: u8 = 2;
const LOOP_GRANULARITY: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("hostsgate=info"))
        .init();

    log::info!(
        "hostsgate v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: info>".into()),
    );

    crash_log::install(crash_log::default_path());

    let cli = Cli::parse();
    let settings_path = cli.config.clone().unwrap_or_else(settings_file_path);
    log::info!("[startup] settings path: {}", settings_path.display());

    match cli.command {
        Commands::Config { write_default } => config(&settings_path, write_default),
        Commands::Status { json } => status(&Settings::load(&settings_path), json),
        Commands::Connect => one_shot(&Settings::load(&settings_path), Request::Connect),
        Commands::Disconnect => one_shot(&Settings::load(&settings_path), Request::Disconnect),
        Commands::Update => one_shot(&Settings::load(&settings_path), Request::Update),
        Commands::Run => run(&Settings::load(&settings_path)),
    }
}

fn config(path: &Path, write_default: bool) -> ExitCode {
    let settings = if write_default {
        let settings = Settings::default();
        if let Err(error) = settings.save(path) {
            eprintln!("{error}");
            return ExitCode::from(EXIT_FAILURE);
        }
        settings
    } else {
        Settings::load(path)
    };

    match settings.to_toml() {
        Ok(content) => {
            print!("{content}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

#[derive(Serialize)]
struct StatusReport {
    state: ConnectionState,
    active: bool,
    hosts_path: String,
    connected_since: Option<String>,
    uptime: Option<String>,
}

impl StatusReport {
    fn from_oracle(oracle: &StatusOracle) -> Self {
        let active = oracle.is_active();
        Self {
            state: if active {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            active,
            hosts_path: oracle.path().display().to_string(),
            connected_since: oracle
                .connected_since()
                .map(|since| chrono::DateTime::<chrono::Local>::from(since).to_rfc3339()),
            uptime: oracle.uptime().map(format_uptime),
        }
    }

    fn print_human(&self) {
        println!("{} ({})", self.state.label(), self.hosts_path);
        if let Some(uptime) = &self.uptime {
            println!("uptime: {uptime}");
        }
    }
}

fn status(settings: &Settings, json: bool) -> ExitCode {
    let oracle = StatusOracle::new(settings.hosts_path.clone(), settings.signature.clone());
    let report = StatusReport::from_oracle(&oracle);
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(content) => println!("{content}"),
            Err(error) => {
                eprintln!("{error}");
                return ExitCode::from(EXIT_FAILURE);
            }
        }
    } else {
        report.print_human();
    }
    ExitCode::SUCCESS
}

fn build_machine(settings: &Settings) -> Option<ConnectionStateMachine> {
    let client = match HttpDocumentClient::new(&settings.user_agent, settings.fetch_timeout()) {
        Ok(client) => client,
        Err(error) => {
            log::error!("[startup] failed to build HTTP client: {error}");
            return None;
        }
    };
    Some(ConnectionStateMachine::from_settings(
        settings,
        Arc::new(client),
        system::elevator(),
    ))
}

fn acquire_primary(settings: &Settings) -> Result<PrimaryInstance, ExitCode> {
    match single_instance::acquire(&settings.instance_key) {
        Ok(InstanceRole::Primary(primary)) => Ok(primary),
        Ok(InstanceRole::Secondary) => {
            eprintln!("hostsgate is already running");
            Err(ExitCode::from(EXIT_ALREADY_RUNNING))
        }
        Err(error) => {
            log::error!("[single_instance] {error}");
            Err(ExitCode::from(EXIT_FAILURE))
        }
    }
}

#[derive(Clone, Copy)]
enum Request {
    Connect,
    Disconnect,
    Update,
}

fn one_shot(settings: &Settings, request: Request) -> ExitCode {
    let _primary = match acquire_primary(settings) {
        Ok(primary) => primary,
        Err(code) => return code,
    };
    let Some(mut machine) = build_machine(settings) else {
        return ExitCode::from(EXIT_FAILURE);
    };

    let started = match (request, machine.state()) {
        (Request::Connect, ConnectionState::Connected)
        | (Request::Disconnect, ConnectionState::Disconnected) => {
            println!("{}", machine.state().label());
            return ExitCode::SUCCESS;
        }
        (Request::Connect | Request::Disconnect, _) => machine.toggle(),
        (Request::Update, _) => machine.update(),
    };
    let Some(started) = started else {
        eprintln!("cannot {} while {}", request.verb(), machine.state().label());
        return ExitCode::from(EXIT_FAILURE);
    };
    report(&[started]);

    let failed = report(&machine.wait());
    println!("{}", machine.state().label());
    if failed {
        ExitCode::from(EXIT_FAILURE)
    } else {
        ExitCode::SUCCESS
    }
}

impl Request {
    fn verb(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Update => "update",
        }
    }
}

/// Logs each notice; `true` if an operation failed.
fn report(notices: &[Notice]) -> bool {
    let mut failed = false;
    for notice in notices {
        match notice {
            Notice::Changed { from, to } => {
                log::info!("[ui] {} -> {}", from.label(), to.label());
            }
            Notice::OperationFailed { kind, detail } => {
                log::error!("[ui] {} failed: {detail}", kind.label());
                eprintln!("Operation failed. Check your connection and try again.");
                failed = true;
            }
        }
    }
    failed
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (sender, receiver) = mpsc::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.unbounded_send(line.trim().to_lowercase()).is_err() {
                break;
            }
        }
    });
    receiver
}

fn run(settings: &Settings) -> ExitCode {
    let mut primary = match acquire_primary(settings) {
        Ok(primary) => primary,
        Err(code) => return code,
    };
    let Some(mut machine) = build_machine(settings) else {
        return ExitCode::from(EXIT_FAILURE);
    };

    println!("{} (commands: toggle, update, status, quit)", machine.state().label());
    let mut commands = spawn_stdin_reader();
    let mut last_poll = Instant::now();

    loop {
        loop {
            let command = match commands.try_next() {
                Ok(Some(command)) => command,
                Ok(None) => {
                    log::info!("[run] stdin closed, shutting down");
                    return ExitCode::SUCCESS;
                }
                Err(_empty) => break,
            };
            match command.as_str() {
                "" => {}
                "toggle" => match machine.toggle() {
                    Some(started) => {
                        report(&[started]);
                        println!("{}", machine.state().label());
                    }
                    None => println!("busy: {}", machine.state().label()),
                },
                "update" => match machine.update() {
                    Some(started) => {
                        report(&[started]);
                        println!("{}", machine.state().label());
                    }
                    None => println!("update needs a connected state"),
                },
                "status" => {
                    StatusReport::from_oracle(machine.oracle()).print_human();
                }
                "quit" | "exit" => return ExitCode::SUCCESS,
                other => println!("unknown command: {other}"),
            }
        }

        if primary.take_focus_request() {
            println!("{}", machine.state().label());
        }

        if machine.state().is_busy() || last_poll.elapsed() >= settings.poll_interval() {
            let notices = machine.tick();
            report(&notices);
            if notices
                .iter()
                .any(|notice| matches!(notice, Notice::Changed { .. }))
            {
                println!("{}", machine.state().label());
            }
            last_poll = Instant::now();
        }

        std::thread::sleep(LOOP_GRANULARITY);
    }
}
