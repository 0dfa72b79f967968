//! One PTY-backed terminal session and its I/O pumps.
//!
//! A session owns its process, an output scrollback buffer, a pending-input
//! queue, the subscription flag and the current title. Once started it runs
//! two tasks: the output pump (PTY -> scrollback -> sink) and the input pump
//! (queue -> PTY). Killing the process is the only way to stop them.

use super::pty::{EnvOverrides, PtyProcess};
use super::ring_buffer::RingBuffer;
use crate::sink::OutputSink;
use ptyhub_core::{
    last_clear_offset, mnemonic, PtyHubError, PtyHubResult, SessionSummary, TerminalFlags,
    TitleScanner,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default scrollback and input queue capacity: one second of output at
/// 38400 baud.
pub const DEFAULT_BUFFER_CAPACITY: usize = 38_400;

pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// How long `shutdown` waits for the output pump after the process is gone.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Tunables shared by every session of a registry.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub output_capacity: usize,
    pub input_capacity: usize,
    pub rows: u16,
    pub cols: u16,
    /// Drop scrollback preceding a clear-screen sequence.
    pub optimize_clears: bool,
    pub title_scanner: TitleScanner,
    /// Cooperative delay between pump iterations.
    pub pump_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_capacity: DEFAULT_BUFFER_CAPACITY,
            input_capacity: DEFAULT_BUFFER_CAPACITY,
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            optimize_clears: true,
            title_scanner: TitleScanner::default(),
            pump_interval: Duration::from_millis(10),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, no process yet.
    Created,
    /// Process running, pumps active.
    Started,
    /// Process exited on its own and all output has been drained.
    Completed,
    /// Shut down by the owner.
    Terminated,
}

impl SessionState {
    pub fn is_finished(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Terminated)
    }
}

/// Mutable session state, guarded by a single mutex.
struct SessionCore {
    title: String,
    output: RingBuffer,
    pending_input: RingBuffer,
    subscribed: bool,
}

/// State shared between the session handle and its pumps.
struct Shared {
    id: String,
    core: Mutex<SessionCore>,
    state: watch::Sender<SessionState>,
    sink: Arc<dyn OutputSink>,
    scanner: TitleScanner,
    optimize_clears: bool,
    pump_interval: Duration,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Record one chunk of process output and forward it if subscribed.
    ///
    /// The title is taken from the raw chunk. The scrollback receives the
    /// chunk from its last clear-screen sequence on (dropping everything
    /// buffered before it); the sink always receives the chunk unmodified.
    fn handle_output(&self, chunk: &[u8]) {
        let subscribed = {
            let mut core = self.core();
            if let Some(title) = self.scanner.scan(chunk) {
                debug!(session_id = %self.id, title = %title, "title updated");
                core.title = title;
            }

            let retained = match last_clear_offset(chunk).filter(|_| self.optimize_clears) {
                Some(offset) => {
                    core.output.clear();
                    &chunk[offset..]
                }
                None => chunk,
            };
            core.output.write(retained);
            core.subscribed
        };

        if subscribed {
            self.broadcast(chunk);
        }
    }

    fn broadcast(&self, data: &[u8]) {
        if let Err(e) = self.sink.broadcast(&self.id, data) {
            warn!(session_id = %self.id, error = %e, "output broadcast failed");
        }
    }
}

struct Pumps {
    output: JoinHandle<()>,
    input: JoinHandle<()>,
}

impl Pumps {
    async fn join(self, session_id: &str) {
        if let Err(e) = self.input.await {
            warn!(session_id, error = %e, "input pump panicked");
        }

        let mut output = self.output;
        match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut output).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id, error = %e, "output pump panicked"),
            Err(_) => {
                // Something else still holds the subordinate side open.
                warn!(session_id, "output pump still blocked after kill, aborting");
                output.abort();
            }
        }
    }
}

/// Process-side state, guarded separately from the output/input state so
/// lifecycle calls never contend with the pumps.
struct Runtime {
    /// Geometry used at spawn; the process tracks it afterwards.
    rows: u16,
    cols: u16,
    process: Option<Arc<PtyProcess>>,
    pumps: Option<Pumps>,
    pid: Option<u32>,
    /// Exit code captured at shutdown, once the process is released.
    final_exit_code: Option<i32>,
}

/// A managed PTY-backed process plus its buffers and subscription state.
///
/// Every operation takes `&self`; a session is shared behind an `Arc` by the
/// registry and stays usable while another caller shuts it down.
pub struct TerminalSession {
    shared: Arc<Shared>,
    argv: Vec<String>,
    cmdline: String,
    is_shell: bool,
    flags: TerminalFlags,
    label: String,
    runtime: Mutex<Runtime>,
}

impl TerminalSession {
    pub fn new(
        id: String,
        argv: Vec<String>,
        is_shell: bool,
        flags: TerminalFlags,
        options: &SessionOptions,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let label = mnemonic(&id);
        let cmdline = argv.join(" ");
        let (state, _) = watch::channel(SessionState::Created);
        let shared = Arc::new(Shared {
            id,
            core: Mutex::new(SessionCore {
                title: String::new(),
                output: RingBuffer::new(options.output_capacity),
                pending_input: RingBuffer::new(options.input_capacity),
                subscribed: false,
            }),
            state,
            sink,
            scanner: options.title_scanner.clone(),
            optimize_clears: options.optimize_clears,
            pump_interval: options.pump_interval,
        });
        info!(session_id = %shared.id, cmdline = %cmdline, "session created");

        Self {
            shared,
            argv,
            cmdline,
            is_shell,
            flags,
            label,
            runtime: Mutex::new(Runtime {
                rows: options.rows,
                cols: options.cols,
                process: None,
                pumps: None,
                pid: None,
                final_exit_code: None,
            }),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process(&self) -> Option<Arc<PtyProcess>> {
        self.runtime().process.clone()
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The command line, for display.
    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn flags(&self) -> TerminalFlags {
        self.flags
    }

    /// Phonetic label derived from the id.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receiver that observes lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Current geometry as (rows, cols).
    pub fn geometry(&self) -> (u16, u16) {
        let runtime = self.runtime();
        match &runtime.process {
            Some(process) => process.geometry(),
            None => (runtime.rows, runtime.cols),
        }
    }

    /// Size of the next output read.
    pub fn read_size(&self) -> usize {
        let runtime = self.runtime();
        match &runtime.process {
            Some(process) => process.read_size(),
            None => (runtime.rows as usize * runtime.cols as usize * 5).max(1000),
        }
    }

    /// Spawn the process and both pumps. A no-op unless the session is in
    /// the Created state.
    ///
    /// On failure the session stays Created and `start` may be retried.
    pub fn start(&self) -> PtyHubResult<()> {
        let mut runtime = self.runtime();
        if self.state() != SessionState::Created {
            debug!(session_id = %self.id(), state = ?self.state(), "start ignored");
            return Ok(());
        }

        let env = EnvOverrides::for_session(&self.cmdline, self.is_shell, self.flags);
        let process = Arc::new(PtyProcess::start(&self.argv, runtime.rows, runtime.cols, &env)?);
        info!(
            session_id = %self.id(),
            cmdline = %self.cmdline,
            pid = ?process.pid(),
            tty = ?process.tty_name(),
            "session started"
        );

        runtime.pid = process.pid();
        self.shared.state.send_replace(SessionState::Started);
        runtime.pumps = Some(Pumps {
            output: tokio::spawn(output_pump(self.shared.clone(), process.clone())),
            input: tokio::spawn(input_pump(self.shared.clone(), process.clone())),
        });
        runtime.process = Some(process);
        Ok(())
    }

    /// Kill the process, stop both pumps and release the PTY.
    ///
    /// Safe to call concurrently and repeatedly; only the first call waits
    /// for the pumps.
    pub async fn shutdown(&self) {
        let (process, pumps) = {
            let mut runtime = self.runtime();
            self.shared.state.send_replace(SessionState::Terminated);
            (runtime.process.clone(), runtime.pumps.take())
        };
        let Some(process) = process else {
            debug!(session_id = %self.id(), "session terminated without a process");
            return;
        };

        let killer = process.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || killer.kill()).await {
            warn!(session_id = %self.id(), error = %e, "kill task failed");
        }
        if let Some(pumps) = pumps {
            pumps.join(&self.shared.id).await;
        }

        let exit_code = process.exit_code();
        {
            let mut runtime = self.runtime();
            runtime.final_exit_code = exit_code;
            runtime.process = None;
        }
        info!(session_id = %self.id(), ?exit_code, "session terminated");
    }

    /// Queue bytes for the input pump. Under sustained overflow the oldest
    /// unflushed input is dropped.
    pub fn enqueue_input(&self, data: &[u8]) {
        self.shared.core().pending_input.write(data);
    }

    pub fn subscribe(&self) {
        self.shared.core().subscribed = true;
        debug!(session_id = %self.id(), "subscribed");
    }

    pub fn unsubscribe(&self) {
        self.shared.core().subscribed = false;
        debug!(session_id = %self.id(), "unsubscribed");
    }

    pub fn title(&self) -> String {
        self.shared.core().title.clone()
    }

    /// Overwrite the title unconditionally.
    pub fn set_title(&self, title: impl Into<String>) {
        self.shared.core().title = title.into();
    }

    /// Buffered scrollback, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        self.shared.core().output.read_all()
    }

    /// Send the buffered scrollback to the sink, for a viewer that just
    /// attached. Returns whether anything was sent.
    pub fn replay(&self) -> bool {
        let data = {
            let core = self.shared.core();
            if !core.subscribed {
                return false;
            }
            core.output.read_all()
        };
        if data.is_empty() {
            return false;
        }
        self.shared.broadcast(&data);
        true
    }

    /// Change the terminal size.
    ///
    /// Before start this only records the geometry to spawn with; once the
    /// process has exited it is a no-op.
    pub fn resize(&self, rows: u16, cols: u16) -> PtyHubResult<()> {
        if rows == 0 || cols == 0 {
            return Err(PtyHubError::Other(format!("invalid terminal size {rows}x{cols}")));
        }
        let process = {
            let mut runtime = self.runtime();
            if runtime.process.is_none() && self.state() == SessionState::Created {
                runtime.rows = rows;
                runtime.cols = cols;
                return Ok(());
            }
            runtime.process.clone()
        };
        match process {
            Some(process) => process.resize(rows, cols),
            None => Ok(()),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        let (pid, exit_code) = {
            let runtime = self.runtime();
            let exit_code = match &runtime.process {
                Some(process) => process.exit_code(),
                None => runtime.final_exit_code,
            };
            (runtime.pid, exit_code)
        };
        SessionSummary {
            id: self.id().to_string(),
            is_started: state != SessionState::Created,
            is_completed: exit_code.is_some(),
            pid,
            exit_code,
            title: SessionSummary::export_title(&self.title()),
            label: self.label.clone(),
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let runtime = self.runtime.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(process) = runtime.process.take() else {
            return;
        };
        self.shared.state.send_replace(SessionState::Terminated);
        // kill() may sleep through the hangup grace; keep it off async workers.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || process.kill());
            }
            Err(_) => process.kill(),
        }
    }
}

/// PTY -> scrollback -> sink.
///
/// Keeps reading after the process has died so trailing output is not lost;
/// stops once a read fails or comes back empty with the process gone.
async fn output_pump(shared: Arc<Shared>, process: Arc<PtyProcess>) {
    loop {
        let reader = process.clone();
        let size = process.read_size();
        let result = match tokio::task::spawn_blocking(move || reader.read(size)).await {
            Ok(result) => result,
            Err(e) => Err(PtyHubError::Other(format!("read task failed: {e}"))),
        };

        match result {
            Ok(chunk) if !chunk.is_empty() => shared.handle_output(&chunk),
            Ok(_) => {
                if !process.is_alive() {
                    break;
                }
            }
            Err(e) => {
                if !process.is_alive() || shared.state() == SessionState::Terminated {
                    break;
                }
                warn!(session_id = %shared.id, error = %e, "PTY read failed");
            }
        }

        tokio::time::sleep(shared.pump_interval).await;
    }

    let exit_code = process.exit_code();
    let completed = shared.state.send_if_modified(|state| {
        if *state == SessionState::Started {
            *state = SessionState::Completed;
            true
        } else {
            false
        }
    });
    if completed {
        info!(session_id = %shared.id, ?exit_code, "session completed");
    }
    debug!(session_id = %shared.id, "output pump stopped");
}

/// Pending input queue -> PTY.
///
/// Its liveness polling is also what observes the child's exit and releases
/// the subordinate side, unblocking the output pump's final read.
async fn input_pump(shared: Arc<Shared>, process: Arc<PtyProcess>) {
    while process.is_alive() && shared.state() != SessionState::Terminated {
        let pending = shared.core().pending_input.drain_all();
        if pending.is_empty() {
            tokio::time::sleep(shared.pump_interval).await;
            continue;
        }

        let writer = process.clone();
        let len = pending.len();
        match tokio::task::spawn_blocking(move || writer.write(&pending)).await {
            Ok(Ok(())) => debug!(session_id = %shared.id, bytes = len, "input flushed"),
            Ok(Err(e)) => warn!(session_id = %shared.id, error = %e, "PTY write failed"),
            Err(e) => warn!(session_id = %shared.id, error = %e, "write task failed"),
        }
        tokio::task::yield_now().await;
    }
    debug!(session_id = %shared.id, "input pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::pty::split_cmdline;
    use crate::sink::{ChannelSink, NullSink};
    use std::time::Instant;

    fn session(cmdline: &str, sink: Arc<dyn OutputSink>) -> TerminalSession {
        TerminalSession::new(
            "a4b9test".into(),
            split_cmdline(cmdline),
            false,
            TerminalFlags::default(),
            &SessionOptions::default(),
            sink,
        )
    }

    async fn wait_finished(session: &TerminalSession) {
        let mut rx = session.watch_state();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| s.is_finished()))
            .await
            .expect("session did not finish")
            .expect("state channel closed");
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn new_session_is_created() {
        let s = session("/bin/cat", Arc::new(NullSink));
        assert_eq!(s.state(), SessionState::Created);
        assert_eq!(s.geometry(), (24, 80));
        assert_eq!(s.label(), "Alfa Four Bravo Niner");

        let summary = s.summary();
        assert!(!summary.is_started);
        assert!(!summary.is_completed);
        assert_eq!(summary.pid, None);
        assert_eq!(summary.title, None);
    }

    #[test]
    fn title_scan_and_clear_compaction() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.shared.handle_output(b"old output ");
        s.shared.handle_output(b"\x21]1;hello\x07junk\x1b[2Jfresh");
        assert_eq!(s.title(), "hello");
        assert_eq!(s.snapshot(), b"\x1b[2Jfresh");
    }

    #[test]
    fn clear_positions_keep_latest() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.shared.handle_output(b"previous");
        let mut chunk = b"01234\x1b[3J0123456789a".to_vec();
        chunk.extend_from_slice(b"\x1b[2Jnow");
        s.shared.handle_output(&chunk);
        assert_eq!(s.snapshot(), &chunk[20..]);
    }

    #[test]
    fn malformed_sequences_leave_state_intact() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.set_title("kept");
        for chunk in [&b"\x21]9;bad\x07"[..], b"\x1b]1;unterminated", b"\x1b]", b"\x1b[2"] {
            s.shared.handle_output(chunk);
        }
        assert_eq!(s.title(), "kept");
        assert_eq!(
            s.snapshot(),
            b"\x21]9;bad\x07\x1b]1;unterminated\x1b]\x1b[2".to_vec()
        );
    }

    #[test]
    fn clear_compaction_can_be_disabled() {
        let options = SessionOptions {
            optimize_clears: false,
            ..SessionOptions::default()
        };
        let s = TerminalSession::new(
            "x".into(),
            vec!["/bin/cat".into()],
            false,
            TerminalFlags::default(),
            &options,
            Arc::new(NullSink),
        );
        s.shared.handle_output(b"a\x1b[2Jb");
        assert_eq!(s.snapshot(), b"a\x1b[2Jb");
    }

    #[test]
    fn subscription_gates_broadcast() {
        let (sink, mut rx) = ChannelSink::channel();
        let s = session("/bin/cat", Arc::new(sink));

        s.shared.handle_output(b"before");
        assert!(rx.try_recv().is_err());

        s.subscribe();
        s.shared.handle_output(b"\x1b[2Jafter");
        let event = rx.try_recv().unwrap();
        // The sink sees the unmodified chunk, not a retroactive replay.
        assert_eq!(event.data, b"\x1b[2Jafter");
        assert!(rx.try_recv().is_err());

        s.unsubscribe();
        s.shared.handle_output(b"quiet");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn replay_sends_buffer_when_subscribed() {
        let (sink, mut rx) = ChannelSink::channel();
        let s = session("/bin/cat", Arc::new(sink));
        s.shared.handle_output(b"scrollback");
        assert!(!s.replay());

        s.subscribe();
        assert!(s.replay());
        assert_eq!(rx.try_recv().unwrap().data, b"scrollback");
    }

    #[test]
    fn resize_before_start_sets_spawn_geometry() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.resize(40, 120).unwrap();
        assert_eq!(s.geometry(), (40, 120));
        assert_eq!(s.read_size(), 24000);
        assert!(s.resize(0, 10).is_err());
    }

    #[tokio::test]
    async fn echo_runs_to_completion() {
        let s = session("/bin/echo hi", Arc::new(NullSink));
        s.start().unwrap();
        assert_eq!(s.state(), SessionState::Started);
        wait_finished(&s).await;

        assert_eq!(s.state(), SessionState::Completed);
        let summary = s.summary();
        assert!(summary.is_started);
        assert!(summary.is_completed);
        assert_eq!(summary.exit_code, Some(0));
        assert!(summary.pid.is_some());
        assert!(String::from_utf8_lossy(&s.snapshot()).contains("hi"));

        s.shutdown().await;
        assert_eq!(s.state(), SessionState::Terminated);
        assert_eq!(s.summary().exit_code, Some(0));
    }

    #[tokio::test]
    async fn input_reaches_process() {
        let (sink, mut rx) = ChannelSink::channel();
        let s = session("/bin/cat", Arc::new(sink));
        s.subscribe();
        s.start().unwrap();
        s.enqueue_input(b"marco\n");

        let mut seen = Vec::new();
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                seen.extend_from_slice(&event.data);
                if String::from_utf8_lossy(&seen).contains("marco") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found);

        s.shutdown().await;
        assert_eq!(s.state(), SessionState::Terminated);
        assert!(s.summary().is_completed);
    }

    #[tokio::test]
    async fn live_resize_updates_read_size() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.start().unwrap();
        s.resize(40, 120).unwrap();
        assert_eq!(s.read_size(), 24000);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn shell_title_is_tracked() {
        let s = session("/bin/sh", Arc::new(NullSink));
        s.start().unwrap();
        s.enqueue_input(b"printf '\\033]2;from-shell\\007'; exit 3\n");
        wait_finished(&s).await;

        assert!(wait_until(|| s.title() == "from-shell").await);
        assert_eq!(s.summary().exit_code, Some(3));
        s.shutdown().await;
    }

    #[tokio::test]
    async fn failed_start_stays_created() {
        let s = session("/nonexistent/ptyhub-test", Arc::new(NullSink));
        assert!(matches!(s.start(), Err(PtyHubError::Spawn(_))));
        assert_eq!(s.state(), SessionState::Created);
        assert!(!s.summary().is_started);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.start().unwrap();
        s.shutdown().await;
        s.shutdown().await;
        assert_eq!(s.state(), SessionState::Terminated);
        // A terminated session cannot be restarted.
        s.start().unwrap();
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn concurrent_shutdown_through_shared_handle() {
        let s = Arc::new(session("/bin/cat", Arc::new(NullSink)));
        s.start().unwrap();
        // A second start on a running session changes nothing.
        s.start().unwrap();
        let pid = s.summary().pid;
        assert!(pid.is_some());

        let other = s.clone();
        let first = tokio::spawn(async move { other.shutdown().await });
        s.shutdown().await;
        first.await.unwrap();

        assert_eq!(s.state(), SessionState::Terminated);
        let summary = s.summary();
        assert_eq!(summary.pid, pid);
        assert!(summary.is_completed);
    }

    #[tokio::test]
    async fn argv_is_passed_unsplit() {
        let s = TerminalSession::new(
            "argv".into(),
            vec!["/bin/sh".into(), "-c".into(), "exit 7".into()],
            false,
            TerminalFlags::default(),
            &SessionOptions::default(),
            Arc::new(NullSink),
        );
        assert_eq!(s.cmdline(), "/bin/sh -c exit 7");
        s.start().unwrap();
        wait_finished(&s).await;
        assert_eq!(s.summary().exit_code, Some(7));
        s.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_running_session_kills_process() {
        let s = session("/bin/cat", Arc::new(NullSink));
        s.start().unwrap();
        let pid = s.summary().pid.unwrap() as libc::pid_t;
        drop(s);
        // SAFETY: signal 0 only checks that the pid still exists.
        assert!(wait_until(|| unsafe { libc::kill(pid, 0) } != 0).await);
    }
}
