//! Purpose: `fifofile` CLI entry point: push, pull and stat against a queue file.
//! Role: Binary crate root; parses args, runs one command, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All queue access goes through `api::FifoFile`.
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use fifofile::api::{Error, ErrorKind, FifoFile, to_exit_code};

#[derive(Parser)]
#[command(
    name = "fifofile",
    version,
    about = "Durable single-file FIFO queue shared between processes"
)]
struct Cli {
    #[arg(
        long,
        default_value = "warn",
        help = "Log filter used when RUST_LOG is unset (error|warn|info|debug|trace)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Append messages to a queue file",
        long_about = r#"Append messages to a queue file, creating it if needed.

Arguments are appended in order as one batch. With no arguments, each stdin line
becomes one message."#,
        after_help = r#"EXAMPLES
  $ fifofile push jobs.fifo hello world
  $ printf 'a\nb\n' | fifofile push jobs.fifo"#
    )]
    Push {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        messages: Vec<String>,
    },
    #[command(
        about = "Consume messages from a queue file",
        long_about = r#"Print and remove messages, one per line, in arrival order.

Without --follow, exits once the queue is drained. With --follow, waits for writers."#,
        after_help = r#"EXAMPLES
  $ fifofile pull jobs.fifo
  $ fifofile pull jobs.fifo --follow --max 10"#
    )]
    Pull {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Wait for new messages instead of exiting when drained")]
        follow: bool,
        #[arg(long, help = "Stop after this many messages")]
        max: Option<u64>,
    },
    #[command(about = "Report frame counts and integrity without consuming")]
    Stat {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };

    init_tracing(&cli.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;

    runtime.block_on(async move {
        match cli.command {
            Command::Push { path, messages } => push(path, messages).await,
            Command::Pull { path, follow, max } => pull(path, follow, max).await,
            Command::Stat { path } => stat(path).await,
        }
    })?;
    Ok(0)
}

async fn push(path: PathBuf, messages: Vec<String>) -> Result<(), Error> {
    let messages = if messages.is_empty() {
        read_stdin_lines()?
    } else {
        messages
    };
    let queue = FifoFile::open(&path)?;
    let appended = queue.append(messages).await?;
    queue.close();
    emit_json(&json!({
        "path": path.display().to_string(),
        "appended": appended,
    }))
}

async fn pull(path: PathBuf, follow: bool, max: Option<u64>) -> Result<(), Error> {
    let queue = FifoFile::open(&path)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut received = 0u64;

    while max.is_none_or(|max| received < max) {
        // Never take more off the file than this command will print.
        let read_ahead = max.map_or(usize::MAX, |max| {
            usize::try_from(max - received).unwrap_or(usize::MAX)
        });
        let next = if follow {
            queue.recv_bounded(read_ahead).await?
        } else {
            queue.try_recv_bounded(read_ahead).await?
        };
        let Some(message) = next else {
            break;
        };
        received += 1;
        if !write_line(&mut out, &message)? {
            break;
        }
    }

    queue.close();
    tracing::debug!(path = %path.display(), received, "pull finished");
    Ok(())
}

async fn stat(path: PathBuf) -> Result<(), Error> {
    let queue = FifoFile::open(&path)?;
    let report = queue.inspect().await?;
    queue.close();
    let value = serde_json::to_value(&report).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode report")
            .with_source(err)
    })?;
    emit_json(&value)
}

fn read_stdin_lines() -> Result<Vec<String>, Error> {
    io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })
}

/// Returns false once stdout is closed by the consumer.
fn write_line(out: &mut impl Write, message: &Bytes) -> Result<bool, Error> {
    let result = out
        .write_all(message)
        .and_then(|()| out.write_all(b"\n"))
        .and_then(|()| out.flush());
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to write stdout")
            .with_source(err)),
    }
}

fn emit_json(value: &Value) -> Result<(), Error> {
    let json = serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    println!("{json}");
    Ok(())
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Open => "failed to open queue file".to_string(),
        ErrorKind::Lock => "failed to lock queue file".to_string(),
        ErrorKind::Destroyed | ErrorKind::Destroying => "queue handle closed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Encoding => "encoding error".to_string(),
        ErrorKind::Closed => "writer closed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
