//! Session registry: the engine's control surface.
//!
//! Owns every terminal session keyed by id. Creation is idempotent,
//! removal always completes, and lookups never create. Operations on an
//! unknown id report `false`/`None` instead of failing.

use super::pty::split_cmdline;
use super::terminal::{SessionOptions, SessionState, TerminalSession};
use crate::shells::{ShellLister, FALLBACK_SHELL};
use crate::sink::OutputSink;
use crate::store::ConfigStore;
use ptyhub_core::settings::{self, DEFAULT_SHELL_KEY};
use ptyhub_core::{PtyHubResult, SessionSummary, SettingsDocument, TerminalFlags};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Parameters for [`SessionRegistry::create`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub id: Option<String>,
    /// Program and arguments; resolved to the default shell when absent.
    pub argv: Option<Vec<String>>,
    /// Whether the command is an interactive shell (exports `SHELL`).
    pub is_shell: bool,
    /// Spawn the process right away instead of on first activation.
    pub start: bool,
    /// Environment flags; read from the settings document when absent.
    pub flags: Option<TerminalFlags>,
}

impl Default for CreateRequest {
    fn default() -> Self {
        Self {
            id: None,
            argv: None,
            is_shell: true,
            start: false,
            flags: None,
        }
    }
}

impl CreateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Command line, split on whitespace.
    pub fn cmdline(mut self, cmdline: &str) -> Self {
        self.argv = Some(split_cmdline(cmdline));
        self
    }

    /// Program and arguments, passed through unsplit.
    pub fn argv(mut self, argv: Vec<String>) -> Self {
        self.argv = Some(argv);
        self
    }

    pub fn is_shell(mut self, is_shell: bool) -> Self {
        self.is_shell = is_shell;
        self
    }

    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn flags(mut self, flags: TerminalFlags) -> Self {
        self.flags = Some(flags);
        self
    }
}

/// Manages all terminal sessions.
///
/// The map lock is only held to look up, insert or delete an entry. Sessions
/// are shared out as `Arc`s and every slow operation (spawn, shutdown) runs
/// after the guard is released.
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<TerminalSession>>>>,
    options: SessionOptions,
    store: Arc<dyn ConfigStore>,
    shells: Arc<dyn ShellLister>,
    sink: Arc<dyn OutputSink>,
}

impl SessionRegistry {
    pub fn new(
        options: SessionOptions,
        store: Arc<dyn ConfigStore>,
        shells: Arc<dyn ShellLister>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            options,
            store,
            shells,
            sink,
        }
    }

    async fn session(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Register a session and return its id.
    ///
    /// An existing session with the same id is left untouched. With
    /// `request.start` the process is spawned immediately; a spawn failure
    /// is returned but the session stays registered in the Created state.
    pub async fn create(&self, request: CreateRequest) -> PtyHubResult<String> {
        let id = request.id.unwrap_or_else(generate_session_id);
        let session = {
            let mut sessions = self.sessions.write().await;
            match sessions.entry(id.clone()) {
                Entry::Occupied(entry) => {
                    debug!(session_id = %id, "session already exists");
                    entry.get().clone()
                }
                Entry::Vacant(entry) => {
                    let doc = self.store.get();
                    let argv = match request.argv.filter(|a| !a.is_empty()) {
                        Some(argv) => argv,
                        None => split_cmdline(&self.resolve_default_shell(&doc)),
                    };
                    let flags = request
                        .flags
                        .unwrap_or_else(|| TerminalFlags::from_document(&doc));
                    entry
                        .insert(Arc::new(TerminalSession::new(
                            id.clone(),
                            argv,
                            request.is_shell,
                            flags,
                            &self.options,
                            self.sink.clone(),
                        )))
                        .clone()
                }
            }
        };

        if request.start {
            session.start()?;
        }
        Ok(id)
    }

    /// Spawn a Created session's process. No-op for any other state.
    pub async fn start(&self, id: &str) -> PtyHubResult<bool> {
        match self.session(id).await {
            Some(session) => {
                session.start()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shut a session down and forget it. Returns whether it existed.
    ///
    /// Both pumps are stopped before the entry is removed. Other sessions
    /// stay reachable while this one shuts down.
    pub async fn remove(&self, id: &str) -> bool {
        let Some(session) = self.session(id).await else {
            debug!(session_id = %id, "remove: session not found");
            return false;
        };
        session.shutdown().await;
        self.forget(id, &session).await;
        info!(session_id = %id, "session removed");
        true
    }

    /// Delete the entry for `id` if it still holds `session`.
    async fn forget(&self, id: &str, session: &Arc<TerminalSession>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(id).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(id);
        }
    }

    /// Shut down and remove every session. Sessions are shut down
    /// concurrently.
    pub async fn shutdown_all(&self) -> usize {
        let snapshot: Vec<(String, Arc<TerminalSession>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();
        let count = snapshot.len();

        let mut tasks = JoinSet::new();
        for (_, session) in &snapshot {
            let session = session.clone();
            tasks.spawn(async move { session.shutdown().await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "session shutdown task failed");
            }
        }

        for (id, session) in &snapshot {
            self.forget(id, session).await;
        }
        if count > 0 {
            info!(count, "all sessions shut down");
        }
        count
    }

    pub async fn get(&self, id: &str) -> Option<SessionSummary> {
        self.with_session(id, TerminalSession::summary).await
    }

    /// Summaries of every session, ordered by id.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<TerminalSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut summaries: Vec<SessionSummary> =
            sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Wait until a session has completed or been terminated and return its
    /// final summary. `None` if the id is unknown or the session was removed
    /// while waiting.
    pub async fn wait(&self, id: &str) -> Option<SessionSummary> {
        let mut state = self.session(id).await?.watch_state();
        if let Err(e) = state.wait_for(|s| s.is_finished()).await {
            debug!(session_id = %id, error = %e, "state channel closed while waiting");
        }
        self.get(id).await
    }

    /// Buffered scrollback of a session.
    pub async fn snapshot(&self, id: &str) -> Option<Vec<u8>> {
        self.with_session(id, TerminalSession::snapshot).await
    }

    /// Broadcast a session's scrollback to the sink. Returns whether
    /// anything was sent.
    pub async fn replay(&self, id: &str) -> bool {
        self.with_session(id, TerminalSession::replay)
            .await
            .unwrap_or(false)
    }

    pub async fn set_title(&self, id: &str, title: &str) -> bool {
        self.with_session(id, |s| s.set_title(title)).await.is_some()
    }

    pub async fn resize(&self, id: &str, rows: u16, cols: u16) -> bool {
        match self.with_session(id, |s| s.resize(rows, cols)).await {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(session_id = %id, error = %e, "resize failed");
                false
            }
            None => false,
        }
    }

    /// Start forwarding live output to the sink, starting the session if it
    /// has not run yet.
    pub async fn subscribe(&self, id: &str) -> bool {
        self.activate(id, TerminalSession::subscribe).await
    }

    pub async fn unsubscribe(&self, id: &str) -> bool {
        self.with_session(id, TerminalSession::unsubscribe)
            .await
            .is_some()
    }

    /// Queue input for a session, starting it if it has not run yet.
    pub async fn enqueue_input(&self, id: &str, data: &[u8]) -> bool {
        self.activate(id, |s| s.enqueue_input(data)).await
    }

    /// Run `f` on a session, then spawn its process if it is still in the
    /// Created state.
    async fn activate<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&TerminalSession),
    {
        let Some(session) = self.session(id).await else {
            return false;
        };
        f(session.as_ref());
        if session.state() == SessionState::Created {
            if let Err(e) = session.start() {
                warn!(session_id = %id, error = %e, "failed to start session");
                return false;
            }
        }
        true
    }

    /// Access a session by reference, outside the map lock.
    pub async fn with_session<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&TerminalSession) -> R,
    {
        let session = self.session(id).await?;
        Some(f(session.as_ref()))
    }

    /// Current settings document.
    pub fn settings(&self) -> SettingsDocument {
        self.store.get()
    }

    /// Merge a partial document into the settings.
    pub fn merge_settings(&self, partial: SettingsDocument) -> bool {
        self.store.merge(partial)
    }

    /// Shell used when a session is created without a command line.
    pub fn default_shell(&self) -> String {
        self.resolve_default_shell(&self.store.get())
    }

    pub fn set_default_shell(&self, shell: &str) -> bool {
        let mut partial = SettingsDocument::new();
        partial.insert(DEFAULT_SHELL_KEY.to_string(), Value::from(shell));
        self.store.merge(partial)
    }

    /// Shells available on the host, most preferred first.
    pub fn shells(&self) -> Vec<String> {
        self.shells.list()
    }

    fn resolve_default_shell(&self, doc: &SettingsDocument) -> String {
        settings::default_shell(doc)
            .or_else(|| self.shells.list().into_iter().next())
            .unwrap_or_else(|| FALLBACK_SHELL.to_string())
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
