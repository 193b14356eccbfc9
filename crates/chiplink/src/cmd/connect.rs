use std::io::BufRead;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chiplink_frame::BitAddress;
use chiplink_session::{
    BitBoard, ConnectionSession, ControlPanel, LinkEvent, ObserverError, OutputObserver,
    SessionConfig,
};

use crate::cmd::{parse_duration, ConnectArgs, ScanArgs};
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, print_status, OutputFormat, Status};

const HELP: &str = "\
commands:
  set <chip> <bit>       switch one output on
  clear <chip> <bit>     switch one output off
  toggle <chip> <bit>    flip one output
  chip <chip> on|off     switch a whole chip
  all | none             switch every output on / off
  send                   send the current outputs now
  auto [on|off]          auto-send after each change (no argument flips it)
  status                 show link state and outputs
  reconnect | disconnect
  quit";

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let host = match (&args.host, args.scan) {
        (Some(host), false) => host.clone(),
        _ => crate::cmd::scan::require_controller(&ScanArgs {
            port: args.port,
            timeout: "10s".to_string(),
            around: None,
        })?,
    };

    let config = SessionConfig {
        io_timeout: parse_duration(&args.io_timeout)?,
        liveness_timeout: parse_duration(&args.liveness_timeout)?,
        ..SessionConfig::default()
    };
    if config.liveness_timeout <= config.keepalive_after {
        return Err(CliError::usage(format!(
            "--liveness-timeout must be longer than the {}s keepalive interval",
            config.keepalive_after.as_secs()
        )));
    }

    let (events, rendered) = mpsc::channel::<LinkEvent>();
    let printer = thread::Builder::new()
        .name("chiplink-print".to_string())
        .spawn(move || {
            for event in rendered {
                print_event(&event, format);
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start printer: {err}")))?;

    let board = BitBoard::default();
    let session = Arc::new(ConnectionSession::new(
        config,
        Arc::new(board.clone()),
        Arc::new(events),
    ));
    let observer = args
        .on_set_exec
        .map(|command| Arc::new(ExecTrigger::new(command)) as Arc<dyn OutputObserver>);
    let panel = ControlPanel::new(Arc::clone(&session), board, observer)
        .map_err(|err| session_error("startup failed", err))?;
    panel.set_auto_send(!args.no_auto_send);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    session
        .connect(&host, args.port)
        .map_err(|err| session_error("connect failed", err))?;

    let lines = spawn_stdin_reader()?;
    let target = Target {
        host: &host,
        port: args.port,
    };
    let outcome = repl(&panel, &target, &lines, &running, format);

    // Dropping the last handles ends the session threads and, with them,
    // every event sender; the printer then drains and exits.
    session.disconnect();
    drop(panel);
    drop(session);
    let _ = printer.join();
    outcome
}

struct Target<'a> {
    host: &'a str,
    port: u16,
}

fn repl(
    panel: &ControlPanel,
    target: &Target<'_>,
    lines: &Receiver<String>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<i32> {
    while running.load(Ordering::SeqCst) {
        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            // stdin closed
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let command = match ReplCommand::parse(&line) {
            Ok(Some(ReplCommand::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };
        if let Err(err) = execute(panel, command, target, format) {
            eprintln!("error: {err}");
        }
    }
    Ok(SUCCESS)
}

fn execute(
    panel: &ControlPanel,
    command: ReplCommand,
    target: &Target<'_>,
    format: OutputFormat,
) -> CliResult<()> {
    let result = match command {
        ReplCommand::Set(addr) => panel.set_bit(addr, true),
        ReplCommand::Clear(addr) => panel.set_bit(addr, false),
        ReplCommand::Toggle(addr) => panel.toggle_bit(addr),
        ReplCommand::Chip(chip, on) => panel.set_chip(chip, on),
        ReplCommand::All(on) => panel.set_all(on),
        ReplCommand::Send => panel.send_now(),
        ReplCommand::Auto(value) => {
            let enabled = value.unwrap_or(!panel.auto_send());
            panel.set_auto_send(enabled);
            print_event(
                &LinkEvent::log(format!("auto-send {}", if enabled { "on" } else { "off" })),
                format,
            );
            Ok(())
        }
        ReplCommand::Status => {
            let session = panel.session();
            print_status(
                &Status {
                    state: session.state(),
                    peer: session.peer(),
                    auto_send: panel.auto_send(),
                    matrix: panel.matrix(),
                    idle_ms: session
                        .last_active()
                        .map(|at| at.elapsed().as_millis() as u64),
                },
                format,
            );
            Ok(())
        }
        ReplCommand::Reconnect => panel
            .session()
            .connect(target.host, target.port)
            .map(|_| ()),
        ReplCommand::Disconnect => {
            panel.session().disconnect();
            Ok(())
        }
        ReplCommand::Help => {
            eprintln!("{HELP}");
            Ok(())
        }
        ReplCommand::Quit => Ok(()),
    };
    result.map_err(|err| session_error("command failed", err))
}

/// One line of operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplCommand {
    Set(BitAddress),
    Clear(BitAddress),
    Toggle(BitAddress),
    Chip(usize, bool),
    All(bool),
    Send,
    Auto(Option<bool>),
    Status,
    Reconnect,
    Disconnect,
    Help,
    Quit,
}

impl ReplCommand {
    /// `Ok(None)` for a blank line.
    fn parse(line: &str) -> CliResult<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            return Ok(None);
        };
        let command = match (verb.to_ascii_lowercase().as_str(), rest) {
            ("set" | "on", [chip, bit]) => Self::Set(parse_address(chip, bit)?),
            ("clear" | "off", [chip, bit]) => Self::Clear(parse_address(chip, bit)?),
            ("toggle" | "t", [chip, bit]) => Self::Toggle(parse_address(chip, bit)?),
            ("chip", [chip, state]) => Self::Chip(parse_index(chip)?, parse_switch(state)?),
            ("all", []) => Self::All(true),
            ("none", []) => Self::All(false),
            ("send", []) => Self::Send,
            ("auto", []) => Self::Auto(None),
            ("auto", [state]) => Self::Auto(Some(parse_switch(state)?)),
            ("status" | "s", []) => Self::Status,
            ("reconnect", []) => Self::Reconnect,
            ("disconnect", []) => Self::Disconnect,
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit" | "q", []) => Self::Quit,
            _ => {
                return Err(CliError::usage(format!(
                    "unrecognised command '{}' (try 'help')",
                    line.trim()
                )))
            }
        };
        Ok(Some(command))
    }
}

fn parse_index(text: &str) -> CliResult<usize> {
    text.parse()
        .map_err(|_| CliError::usage(format!("not an index: {text}")))
}

fn parse_address(chip: &str, bit: &str) -> CliResult<BitAddress> {
    BitAddress::new(parse_index(chip)?, parse_index(bit)?)
        .map_err(|err| CliError::usage(err.to_string()))
}

fn parse_switch(text: &str) -> CliResult<bool> {
    match text.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(CliError::usage(format!("expected on or off, got {text}"))),
    }
}

/// Forward stdin lines to the command loop so ctrl-c is never stuck
/// behind a blocking read.
fn spawn_stdin_reader() -> CliResult<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("chiplink-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("failed to read stdin: {err}")))?;
    Ok(rx)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Runs a shell command whenever an output is switched on.
///
/// The child gets `CHIPLINK_CHIP` and `CHIPLINK_BIT` and is not waited on
/// by the caller; a reaper thread collects its exit status.
pub(crate) struct ExecTrigger {
    command: String,
}

impl ExecTrigger {
    pub(crate) fn new(command: String) -> Self {
        Self { command }
    }

    fn shell(&self) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
    }
}

impl OutputObserver for ExecTrigger {
    fn on_output_set(&self, addr: BitAddress) -> Result<(), ObserverError> {
        let mut child = self
            .shell()
            .env("CHIPLINK_CHIP", addr.chip().to_string())
            .env("CHIPLINK_BIT", addr.bit().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()?;
        tracing::debug!(%addr, pid = child.id(), "output trigger spawned");

        thread::Builder::new()
            .name("chiplink-exec".to_string())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::warn!(%addr, %status, "output trigger exited unsuccessfully");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%addr, error = %err, "output trigger wait failed"),
            })?;
        Ok(())
    }
}
