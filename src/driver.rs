//! The interactive driver: a line-oriented command surface over one engine.
//!
//! The grammar follows the `proc node ...` / `send ...` / `set ...` command
//!  families; `help` prints the full table. Commands are parsed into
//!  [Command] values first, so the grammar is testable without a terminal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;

use crate::engine::TcuEngine;
use crate::error::TcuError;
use crate::logbuf::{parse_level, LogHandle};
use crate::sink::FsSink;

const HISTORY_FILE: &str = ".tcu_history";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPort(u16),
    SetDest(SocketAddr),
    SetFragSize(usize),
    SetWindowSize(u32),
    SetDynamicWindow,
    SetFilePath(PathBuf),
    Connect,
    Disconnect,
    SendText(String),
    SendFile(PathBuf),
    SetLogLevel(LevelFilter),
    ShowLog,
    SetErrorRate(u8),
    SetPacketLossRate(u8),
    SetWindowLossRate(u8),
    Help,
    Exit,
}

pub fn parse(line: &str) -> anyhow::Result<Command> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("proc node ") {
        return parse_proc_node(rest.trim());
    }
    if let Some(text) = line.strip_prefix("send text ") {
        return Ok(Command::SendText(text.to_string()));
    }
    if let Some(path) = line.strip_prefix("send file ") {
        return Ok(Command::SendFile(PathBuf::from(path.trim())));
    }
    if let Some(level) = line.strip_prefix("set log level ") {
        return match parse_level(level.trim()) {
            Some(level) => Ok(Command::SetLogLevel(level)),
            None => Err(anyhow!("unknown log level {}", level.trim())),
        };
    }
    if let Some(rest) = line.strip_prefix("set error rate ") {
        return Ok(Command::SetErrorRate(parse_percent(rest)?));
    }
    if let Some(rest) = line.strip_prefix("set packet loss rate ") {
        return Ok(Command::SetPacketLossRate(parse_percent(rest)?));
    }
    if let Some(rest) = line.strip_prefix("set window loss rate ") {
        return Ok(Command::SetWindowLossRate(parse_percent(rest)?));
    }

    match line {
        "show log" => Ok(Command::ShowLog),
        "help" => Ok(Command::Help),
        "exit" => Ok(Command::Exit),
        _ => Err(anyhow!("unknown command, enter help")),
    }
}

fn parse_proc_node(rest: &str) -> anyhow::Result<Command> {
    if let Some(port) = rest.strip_prefix("port ") {
        let port: u16 = port.trim().parse().map_err(|_| anyhow!("invalid port"))?;
        return Ok(Command::SetPort(port));
    }
    if let Some(dest) = rest.strip_prefix("dest ") {
        let addr = SocketAddr::from_str(dest.trim()).map_err(|_| anyhow!("invalid ip addr format"))?;
        return Ok(Command::SetDest(addr));
    }
    if let Some(size) = rest.strip_prefix("frag size ") {
        let size: usize = size.trim().parse().map_err(|_| anyhow!("invalid fragment size"))?;
        return Ok(Command::SetFragSize(size));
    }
    if let Some(size) = rest.strip_prefix("window size ") {
        let size: u32 = size.trim().parse().map_err(|_| anyhow!("invalid window size"))?;
        return Ok(Command::SetWindowSize(size));
    }
    if let Some(path) = rest.strip_prefix("file path ") {
        return Ok(Command::SetFilePath(PathBuf::from(path.trim())));
    }

    match rest {
        "window dynamic" => Ok(Command::SetDynamicWindow),
        "connect" => Ok(Command::Connect),
        "disconnect" => Ok(Command::Disconnect),
        _ => Err(anyhow!("unknown command, enter help")),
    }
}

fn parse_percent(input: &str) -> anyhow::Result<u8> {
    let percent: u8 = input.trim().parse().map_err(|_| anyhow!("invalid rate"))?;
    if percent > 100 {
        bail!("rate must be between 0 and 100");
    }
    Ok(percent)
}

pub fn help_text() -> &'static str {
    "commands:\n\
     \x20proc node port <port>        - set source node port will listen\n\
     \x20proc node dest <ip>:<port>   - set destination node ip and port\n\
     \x20proc node frag size <n>      - set maximum fragment size\n\
     \x20proc node window size <n>    - set window size manually\n\
     \x20proc node window dynamic     - enable dynamic window sizing\n\
     \x20proc node file path <path>   - directory for received files\n\
     \x20proc node connect            - connect to destination node\n\
     \x20proc node disconnect         - disconnect with destination node\n\
     \x20send text <message>          - send text message\n\
     \x20send file <path>             - send file\n\
     \x20set log level <level>        - set log level (trace, debug, info, warn, error, critical)\n\
     \x20set error rate <percent>     - corrupt outgoing fragments (testing)\n\
     \x20set packet loss rate <percent> - drop outgoing fragments (testing)\n\
     \x20set window loss rate <percent> - drop window tails (testing)\n\
     \x20show log                     - display current logs\n\
     \x20exit                         - exit application"
}

/// Runs the line loop on stdin until `exit` (or end of input). Command
///  history is kept in `.tcu_history` next to the process, loaded at start
///  and persisted on exit.
pub struct Driver {
    engine: TcuEngine,
    sink: Arc<FsSink>,
    log: LogHandle,
    history: Vec<String>,
}

impl Driver {
    pub fn new(engine: TcuEngine, sink: Arc<FsSink>, log: LogHandle) -> Driver {
        let history = std::fs::read_to_string(HISTORY_FILE)
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default();

        Driver {
            engine,
            sink,
            log,
            history,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            {
                use std::io::Write as _;
                print!("> ");
                std::io::stdout().flush().ok();
            }

            let line = match lines.next_line().await? {
                None => break, // end of input counts as a clean exit
                Some(line) => line,
            };
            if line.trim().is_empty() {
                continue;
            }
            self.history.push(line.clone());

            let command = match parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            if command == Command::Exit {
                break;
            }
            if let Err(e) = self.execute(command).await {
                // fatal errors (bind failure) abort the driver with a
                //  nonzero exit code; everything else is user feedback
                self.persist_history();
                return Err(e);
            }
        }

        self.engine.shutdown().await;
        self.persist_history();
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::SetPort(port) => {
                if let Err(e) = self.engine.bind(port).await {
                    return Err(anyhow!("failed to bind port {}: {}", port, e));
                }
            }
            Command::SetDest(addr) => self.engine.set_peer(addr),
            Command::SetFragSize(size) => report(self.engine.set_max_frag(size)),
            Command::SetWindowSize(size) => report(self.engine.set_window_size(size)),
            Command::SetDynamicWindow => self.engine.set_dynamic_window(),
            Command::SetFilePath(path) => self.sink.set_recv_dir(path),
            Command::Connect => report(self.engine.connect().await),
            Command::Disconnect => report(self.engine.disconnect().await),
            Command::SendText(text) => report(self.engine.send_text(&text).await),
            Command::SendFile(path) => report(self.engine.send_file(&path).await),
            Command::SetLogLevel(level) => {
                if let Err(e) = self.log.set_level(level) {
                    warn!("failed to change log level: {}", e);
                }
            }
            Command::ShowLog => println!("{}", self.log.buffer.dump()),
            Command::SetErrorRate(rate) => self.engine.fault().set_error_rate(rate),
            Command::SetPacketLossRate(rate) => self.engine.fault().set_packet_loss_rate(rate),
            Command::SetWindowLossRate(rate) => self.engine.fault().set_window_loss_rate(rate),
            Command::Help => println!("{}", help_text()),
            Command::Exit => {}
        }
        Ok(())
    }

    fn persist_history(&self) {
        let mut content = self.history.join("\n");
        content.push('\n');
        if let Err(e) = std::fs::write(HISTORY_FILE, content) {
            warn!("failed to persist command history: {}", e);
        }
    }
}

/// engine-level errors are user feedback, not driver failures
fn report(result: Result<(), TcuError>) {
    if let Err(e) = result {
        println!("{}", e);
    }
}
