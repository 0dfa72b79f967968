//! PTY process wrapper using portable-pty.
//!
//! Owns one child process attached to a pseudo-terminal pair. The child is
//! spawned as a session leader with the subordinate side as its controlling
//! terminal. Reads and writes are blocking; callers run them under
//! `spawn_blocking`.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};
use ptyhub_core::{PtyHubError, PtyHubResult, TerminalFlags};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lower bound for a single read request.
const MIN_READ_SIZE: usize = 1000;

/// Bytes requested per terminal cell on each read.
const READ_BYTES_PER_CELL: usize = 5;

/// How long a child gets to exit after SIGHUP before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(250);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Inherited variables stripped from the child environment. A host-specific
/// library path breaks most programs launched from the terminal.
const STRIPPED_ENV: &[&str] = &["LD_LIBRARY_PATH"];

/// Per-session environment adjustments applied on top of the host
/// environment and the standard terminal variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

impl EnvOverrides {
    /// Overrides for a session running `cmdline`.
    pub fn for_session(cmdline: &str, is_shell: bool, flags: TerminalFlags) -> Self {
        let mut set = Vec::new();
        if is_shell {
            set.push(("SHELL".to_string(), cmdline.to_string()));
        }
        if flags.use_display {
            set.push(("DISPLAY".to_string(), ":0".to_string()));
        }
        Self {
            set,
            remove: STRIPPED_ENV.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// A child process running on a pseudo-terminal.
pub struct PtyProcess {
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    /// Controller side; `None` once closed.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// Subordinate side; `None` once closed.
    slave: Mutex<Option<Box<dyn SlavePty + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    tty_name: Option<PathBuf>,
    /// Current geometry as (rows, cols).
    geometry: Mutex<(u16, u16)>,
    exit_code: Mutex<Option<i32>>,
}

/// Split a command line on whitespace into program and arguments.
pub fn split_cmdline(cmdline: &str) -> Vec<String> {
    cmdline.split_whitespace().map(str::to_string).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyProcess {
    /// Allocate a PTY pair of the given size and spawn `argv` on it.
    pub fn start(argv: &[String], rows: u16, cols: u16, env: &EnvOverrides) -> PtyHubResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(PtyHubError::Spawn("empty command".into()));
        };
        if program.trim().is_empty() {
            return Err(PtyHubError::Spawn("empty command".into()));
        }

        let pair = native_pty_system()
            .openpty(pty_size(rows, cols))
            .map_err(|e| PtyHubError::Spawn(format!("failed to open PTY: {e}")))?;

        #[cfg(unix)]
        let tty_name = pair.master.tty_name();
        #[cfg(not(unix))]
        let tty_name: Option<PathBuf> = None;

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(&home);
        for key in &env.remove {
            cmd.env_remove(key);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("PWD", &home);
        if let Some(tty) = &tty_name {
            cmd.env("SSH_TTY", tty);
        }
        cmd.env("LINES", rows.to_string());
        cmd.env("COLUMNS", cols.to_string());
        #[cfg(unix)]
        cmd.env("XDG_RUNTIME_DIR", format!("/run/user/{}", current_uid()));
        for (key, value) in &env.set {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyHubError::Spawn(format!("failed to spawn {program}: {e}")))?;
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyHubError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyHubError::Spawn(format!("failed to take PTY writer: {e}")))?;

        info!(?pid, rows, cols, ?argv, "PTY spawned");

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            master: Mutex::new(Some(pair.master)),
            slave: Mutex::new(Some(pair.slave)),
            child: Mutex::new(child),
            pid,
            tty_name,
            geometry: Mutex::new((rows, cols)),
            exit_code: Mutex::new(None),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Path of the subordinate terminal device.
    pub fn tty_name(&self) -> Option<&PathBuf> {
        self.tty_name.as_ref()
    }

    /// Current geometry as (rows, cols).
    pub fn geometry(&self) -> (u16, u16) {
        *lock(&self.geometry)
    }

    /// Bytes to request per read: five per cell, never below 1000.
    pub fn read_size(&self) -> usize {
        let (rows, cols) = self.geometry();
        (rows as usize * cols as usize * READ_BYTES_PER_CELL).max(MIN_READ_SIZE)
    }

    /// Exit code of the child, `None` while it is running.
    ///
    /// The first call that observes the exit releases the subordinate side,
    /// so the controller reaches end-of-stream once remaining output has been
    /// drained.
    pub fn exit_code(&self) -> Option<i32> {
        let mut exit_code = lock(&self.exit_code);
        if exit_code.is_none() {
            let status = lock(&self.child).try_wait();
            match status {
                Ok(Some(status)) => {
                    let code = i32::try_from(status.exit_code()).unwrap_or(-1);
                    *exit_code = Some(code);
                    info!(pid = ?self.pid, code, "PTY child exited");
                    self.close_subordinate();
                }
                Ok(None) => {}
                Err(e) => debug!(pid = ?self.pid, error = %e, "try_wait failed"),
            }
        }
        *exit_code
    }

    pub fn is_alive(&self) -> bool {
        self.exit_code().is_none()
    }

    /// Read up to `max_bytes` from the controller (blocking).
    ///
    /// An empty result is a transient zero-byte read, not end-of-stream.
    pub fn read(&self, max_bytes: usize) -> PtyHubResult<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = lock(&self.reader).read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write all of `data` to the controller (blocking).
    pub fn write(&self, data: &[u8]) -> PtyHubResult<()> {
        if lock(&self.master).is_none() {
            return Err(PtyHubError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "PTY closed",
            )));
        }
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Resize the terminal. No-op once the child has exited.
    ///
    /// Both sides share one window size, set through the controller. The
    /// foreground process group is signalled with SIGWINCH and an in-band
    /// `ESC[8;rows;colst` report is written for programs that only watch
    /// the stream.
    pub fn resize(&self, rows: u16, cols: u16) -> PtyHubResult<()> {
        if !self.is_alive() {
            debug!(pid = ?self.pid, "resize ignored, process not alive");
            return Ok(());
        }

        *lock(&self.geometry) = (rows, cols);
        {
            let master = lock(&self.master);
            let Some(master) = master.as_ref() else {
                return Ok(());
            };
            master
                .resize(pty_size(rows, cols))
                .map_err(|e| PtyHubError::Other(format!("PTY resize failed: {e}")))?;

            #[cfg(unix)]
            if let Some(pgrp) = master.process_group_leader() {
                signal_group(pgrp, libc::SIGWINCH);
            }
        }

        self.write(format!("\x1b[8;{rows};{cols}t").as_bytes())?;
        debug!(pid = ?self.pid, rows, cols, "PTY resized");
        Ok(())
    }

    /// Terminate the child if it is still running, then close both sides of
    /// the PTY. Safe to call repeatedly; descriptors are closed once.
    pub fn kill(&self) {
        if self.is_alive() {
            // SIGHUP first, the signal a terminal hangup would deliver.
            let mut killer = lock(&self.child).clone_killer();
            if let Err(e) = killer.kill() {
                warn!(pid = ?self.pid, error = %e, "failed to signal PTY child");
            }
            if !self.wait_exit(KILL_GRACE) {
                self.force_kill();
            }
        }
        self.close_subordinate();
        if lock(&self.master).take().is_some() {
            debug!(pid = ?self.pid, "PTY controller closed");
        }
    }

    /// Poll for exit for up to `grace`.
    fn wait_exit(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn force_kill(&self) {
        let Some(pid) = self.pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
            return;
        };
        warn!(pid, "PTY child ignored SIGHUP, sending SIGKILL");
        // SAFETY: kill(2) on the pid of our own unreaped child.
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        self.wait_exit(KILL_GRACE);
    }

    #[cfg(not(unix))]
    fn force_kill(&self) {
        if let Err(e) = lock(&self.child).kill() {
            warn!(pid = ?self.pid, error = %e, "failed to kill PTY child");
        }
    }

    fn close_subordinate(&self) {
        if lock(&self.slave).take().is_some() {
            debug!(pid = ?self.pid, "PTY subordinate closed");
        }
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(unix)]
fn signal_group(pgrp: libc::pid_t, signal: libc::c_int) {
    if pgrp <= 0 {
        return;
    }
    // SAFETY: plain kill(2) on a process group id reported by the kernel.
    let rc = unsafe { libc::kill(-pgrp, signal) };
    if rc != 0 {
        debug!(pgrp, signal, error = %std::io::Error::last_os_error(), "signal delivery failed");
    }
}
