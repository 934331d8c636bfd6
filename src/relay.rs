//! Relay mode: hand the host's status payload to the renderer and pass its
//! output, exit code and termination signals straight back.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};

use tracing::debug;

use crate::StatuslineError;

pub const RENDERER_FILE_NAME: &str = "context-monitor.py";
const PYTHON_INTERPRETER: &str = "python3";
const PUMP_BUFFER_BYTES: usize = 8 * 1024;

/// Concrete argv used to launch the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl RendererCommand {
    /// Python renderers go through `python3`; anything else is executed directly.
    pub fn for_script(script: &Path) -> Self {
        let is_python = script
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("py"))
            .unwrap_or(false);
        if is_python {
            Self {
                program: OsString::from(PYTHON_INTERPRETER),
                args: vec![script.as_os_str().to_owned()],
            }
        } else {
            Self {
                program: script.as_os_str().to_owned(),
                args: Vec::new(),
            }
        }
    }

    /// Shell command line for this argv, as recorded in the host settings.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program.to_string_lossy()));
        parts.extend(self.args.iter().map(|arg| shell_quote(&arg.to_string_lossy())));
        parts.join(" ")
    }
}

fn is_shell_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(ch, '/' | '.' | '_' | '-' | '+' | ':' | '=' | ',' | '@' | '%')
        || (cfg!(windows) && ch == '\\')
}

fn shell_quote(part: &str) -> String {
    if !part.is_empty() && part.chars().all(is_shell_safe) {
        return part.to_string();
    }
    let mut out = String::with_capacity(part.len() + 2);
    out.push('\'');
    for ch in part.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Runs the renderer once and returns the exit code the relay should finish with.
///
/// The whole of `input` is buffered before any of it reaches the renderer. Its
/// stdout and stderr are pumped into `out` and `err` as they arrive. When
/// `forward_signals` is set, SIGINT/SIGTERM received by this process are passed
/// on to the renderer and the relay exits 0 right away.
pub fn run<R, O, E>(
    renderer: &RendererCommand,
    mut input: R,
    out: O,
    err: E,
    forward_signals: bool,
) -> Result<i32, StatuslineError>
where
    R: Read,
    O: Write + Send,
    E: Write + Send,
{
    let command = renderer.render();
    let mut child = Command::new(&renderer.program)
        .args(&renderer.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| StatuslineError::Spawn {
            command: command.clone(),
            source,
        })?;
    let pid = child.id();
    debug!(pid, command = %command, "spawned renderer");

    #[cfg(unix)]
    let _forwarder = if forward_signals {
        Some(SignalForwarder::install(pid)?)
    } else {
        None
    };
    #[cfg(not(unix))]
    let _ = forward_signals;

    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    thread::scope(|scope| -> Result<i32, StatuslineError> {
        let out_pump = child_stdout.map(|stream| scope.spawn(move || pump(stream, out)));
        let err_pump = child_stderr.map(|stream| scope.spawn(move || pump(stream, err)));

        let delivered = deliver_payload(&mut input, child_stdin);
        if delivered.is_err() {
            let _ = child.kill();
        }
        let status = child.wait().map_err(StatuslineError::Forward);
        let out_result = join_pump(out_pump);
        let err_result = join_pump(err_pump);

        let payload_len = delivered?;
        let out_bytes = out_result?;
        let err_bytes = err_result?;
        let status = status?;
        debug!(payload_len, out_bytes, err_bytes, %status, "renderer finished");
        Ok(exit_code(status))
    })
}

fn deliver_payload<R: Read>(
    input: &mut R,
    stdin: Option<ChildStdin>,
) -> Result<usize, StatuslineError> {
    let mut payload = Vec::new();
    input
        .read_to_end(&mut payload)
        .map_err(StatuslineError::Forward)?;
    let Some(mut stdin) = stdin else {
        return Ok(payload.len());
    };
    match stdin.write_all(&payload) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("renderer closed its input before the payload was delivered");
        }
        Err(err) => return Err(StatuslineError::Forward(err)),
    }
    // Dropping the handle closes the pipe, which is the renderer's end-of-input.
    drop(stdin);
    Ok(payload.len())
}

fn pump<R: Read, W: Write>(mut from: R, mut to: W) -> io::Result<u64> {
    let mut buf = [0u8; PUMP_BUFFER_BYTES];
    let mut total = 0u64;
    loop {
        let read = match from.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        to.write_all(&buf[..read])?;
        to.flush()?;
        total += read as u64;
    }
}

fn join_pump(
    handle: Option<ScopedJoinHandle<'_, io::Result<u64>>>,
) -> Result<u64, StatuslineError> {
    let Some(handle) = handle else {
        return Ok(0);
    };
    match handle.join() {
        Ok(result) => result.map_err(StatuslineError::Forward),
        Err(_) => Err(StatuslineError::Forward(io::Error::other(
            "stream pump panicked",
        ))),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        debug!(signal = ?status.signal(), "renderer terminated by signal");
    }
    0
}

#[cfg(unix)]
struct SignalForwarder {
    handle: signal_hook::iterator::Handle,
    thread: Option<thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalForwarder {
    fn install(pid: u32) -> Result<Self, StatuslineError> {
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                debug!(signal, pid, "forwarding termination signal to renderer");
                // SAFETY: kill(2) takes plain integers; the pid belongs to our own child.
                unsafe {
                    libc::kill(pid as libc::pid_t, signal);
                }
                std::process::exit(0);
            }
        });
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
