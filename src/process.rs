use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Result of one subprocess run with stdout and stderr interleaved.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` only when the process had to be killed and its status was lost.
    pub status: Option<ExitStatus>,
    pub output: Vec<u8>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).trim().to_string()
    }

    /// Short status for error messages, e.g. `exit status 1`.
    pub fn status_text(&self) -> String {
        if self.timed_out {
            return "killed after timeout".to_string();
        }
        match self.status.and_then(|s| s.code()) {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs `command` to completion, or until `timeout` elapses, in which case the
/// child and everything it spawned (e.g. the test binary `go test` builds) is
/// killed and the child reaped before returning. On unix the child leads its
/// own process group so the whole tree can be signalled at once. Output goes
/// to an anonymous temp file rather than pipes, so a straggler holding the
/// descriptor can never block us on a pipe EOF.
pub fn run_combined(command: &mut Command, timeout: Option<Duration>) -> io::Result<ProcessOutput> {
    let mut sink = tempfile::tempfile()?;
    let stderr_sink = sink.try_clone()?;
    let stdout_sink = sink.try_clone()?;

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started_at = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_sink))
        .stderr(Stdio::from(stderr_sink))
        .spawn()?;

    let (status, timed_out) = match wait_for_child(&mut child, timeout, started_at) {
        Ok(result) => result,
        Err(err) => {
            kill_tree(&mut child);
            let _ = child.wait();
            return Err(err);
        }
    };
    let elapsed = started_at.elapsed();

    let mut output = Vec::new();
    sink.seek(SeekFrom::Start(0))?;
    sink.read_to_end(&mut output)?;

    Ok(ProcessOutput {
        status,
        output,
        timed_out,
        elapsed,
    })
}

fn wait_for_child(
    child: &mut Child,
    timeout: Option<Duration>,
    started_at: Instant,
) -> io::Result<(Option<ExitStatus>, bool)> {
    let Some(timeout) = timeout else {
        return child.wait().map(|status| (Some(status), false));
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        let elapsed = started_at.elapsed();
        if elapsed >= timeout {
            kill_tree(child);
            let status = child.wait().ok();
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}

/// SIGKILLs the child's process group. Errors are ignored: the group is
/// already gone if every member exited, and `wait` reaps the child either way.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(pid) => {
            if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::debug!(pid, %errno, "killpg failed; killing child only");
                let _ = child.kill();
            }
        }
        Err(_) => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Human-readable rendering of a command line for log and error messages.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
