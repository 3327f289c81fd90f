// Progress-parsing subprocess runner
//
// Runs one external command, streams its stderr as it arrives and extracts
// `<n> bytes` progress tokens (dd `status=progress`, shred -v and friends
// all print one). The child is started in its own process group so a whole
// helper pipeline can later be signalled at once.

use crate::{StationError, StationResult};
use lazy_static::lazy_static;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use regex::Regex;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

lazy_static! {
    static ref BYTES_TOKEN: Regex = Regex::new(r"(\d+)\s+bytes").expect("valid progress regex");
}

const READ_CHUNK: usize = 4096;

/// First `<integer> bytes` token of a line
pub fn parse_bytes_token(line: &str) -> Option<u64> {
    BYTES_TOKEN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Receives what a running command reports
pub trait OutputObserver: Send {
    /// Called once the child is running
    fn on_spawn(&mut self, _pid: u32) {}

    /// Every non-empty stderr line, before its progress is parsed
    fn on_line(&mut self, line: &str);

    fn on_progress(&mut self, bytes: u64);
}

pub struct ProgressRunner;

impl ProgressRunner {
    /// Run `argv` to completion, returning its exit code.
    ///
    /// A child killed by a signal reports the negated signal number.
    pub async fn run(argv: &[String], observer: &mut (dyn OutputObserver + Send)) -> StationResult<i32> {
        let mut child = spawn_in_group(argv)?;

        if let Some(pid) = child.id() {
            observer.on_spawn(pid);
        }

        match child.stderr.take() {
            Some(stderr) => supervise(child, stderr, observer).await,
            None => Ok(exit_code(child.wait().await?)),
        }
    }
}

/// Start `argv` as the leader of a fresh process group with stderr piped
pub(crate) fn spawn_in_group(argv: &[String]) -> StationResult<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| StationError::Command("empty command line".to_string()))?;

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StationError::Command(format!("{}: {}", program, e)))
}

/// Stream `output` into the observer, then reap `child`.
///
/// If the stream fails the child's whole process group is killed and
/// reaped before the error is returned, so no helper outlives its job.
pub(crate) async fn supervise<R>(
    mut child: Child,
    output: R,
    observer: &mut (dyn OutputObserver + Send),
) -> StationResult<i32>
where
    R: AsyncRead + Unpin,
{
    if let Err(e) = stream_lines(output, observer).await {
        if let Some(pid) = child.id() {
            tracing::warn!(pid, error = %e, "output stream failed, killing helper process group");
            if let Err(errno) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::warn!(pid, error = %errno, "killpg failed");
            }
        }
        if let Err(wait_err) = child.wait().await {
            tracing::error!(error = %wait_err, "failed to reap helper");
        }
        return Err(e);
    }

    let status = child.wait().await?;
    Ok(exit_code(status))
}

/// Split a byte stream into lines on `\n` or `\r` (progress meters redraw
/// with carriage returns) and feed them to the observer as they arrive.
pub(crate) async fn stream_lines<R>(mut reader: R, observer: &mut (dyn OutputObserver + Send)) -> StationResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }

        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut pending, observer);
            } else {
                pending.push(byte);
            }
        }
    }

    emit(&mut pending, observer);
    Ok(())
}

fn emit(pending: &mut Vec<u8>, observer: &mut (dyn OutputObserver + Send)) {
    if pending.is_empty() {
        return;
    }

    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();

    if line.is_empty() {
        return;
    }
    observer.on_line(&line);
    if let Some(bytes) = parse_bytes_token(&line) {
        observer.on_progress(bytes);
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}
