//! Drives one engine invocation end to end (spec.md §4.2), mirroring
//! `original_source/src/takopi/runner.py`'s `JsonlSubprocessRunner.run_impl`
//! and `SessionLockMixin`/`BaseRunner.run_locked`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use relay_core::{EngineId, Event, RelayError, ResumeToken, Result};
use relay_session::SessionLockRegistry;

use crate::process::ManagedProcess;
use crate::translator::Translator;

/// Runs a single [`Translator`]'s engine subprocess, streaming translated
/// events out over an unbounded channel as they're produced.
pub struct SubprocessRunner<T: Translator> {
    translator: Arc<T>,
    cwd: Option<PathBuf>,
}

impl<T: Translator> SubprocessRunner<T> {
    pub fn new(translator: Arc<T>, cwd: Option<PathBuf>) -> Self {
        Self { translator, cwd }
    }

    pub fn engine(&self) -> &EngineId {
        self.translator.engine()
    }

    /// Runs the engine once. Always ends by sending exactly one `Completed`
    /// event down `tx` (either produced by the engine or synthesized), per
    /// spec.md §3's stream invariant. Returns once the subprocess has fully
    /// exited. If `cancel` fires mid-run, the subprocess's whole process
    /// group is torn down (SIGTERM, 2s grace, SIGKILL) and a `Completed`
    /// failure event is synthesized (spec.md §4.2, §6's `/cancel`).
    #[instrument(skip(self, tx, cancel), fields(engine = %self.translator.engine()))]
    pub async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        tx: UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut state = self.translator.new_state(resume.as_ref());
        let resume = state.session.clone().or(resume);
        let args = self.translator.build_args(prompt, resume.as_ref());
        let payload = self.translator.stdin_payload(prompt, resume.as_ref());
        let env = self.translator.env();

        info!(
            resume = resume.as_ref().map(|r| r.value.as_str()),
            prompt_len = prompt.len(),
            "runner.start"
        );

        let mut proc = ManagedProcess::spawn(
            self.translator.command(),
            &args,
            env.as_deref(),
            self.cwd.as_deref(),
        )?;
        info!(pid = proc.pid(), "subprocess.spawn");

        match (payload, proc.take_stdin()) {
            (Some(payload), Some(mut stdin)) => {
                if let Err(e) = stdin.write_all(&payload).await {
                    proc.terminate().await;
                    return Err(RelayError::Io(e));
                }
                if let Err(e) = stdin.shutdown().await {
                    proc.terminate().await;
                    return Err(RelayError::Io(e));
                }
            }
            (None, Some(stdin)) => drop(stdin),
            (Some(_), None) => {
                proc.terminate().await;
                return Err(RelayError::State(format!(
                    "{} failed to open subprocess stdin",
                    self.translator.tag()
                )));
            }
            (None, None) => {}
        }

        let tag = self.translator.tag().to_string();
        let stderr_task = proc.take_stderr().map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end();
                            if !line.is_empty() {
                                warn!(tag = %tag, %line, "subprocess.stderr");
                            }
                        }
                    }
                }
            })
        });

        let stdout = match proc.take_stdout() {
            Some(stdout) => stdout,
            None => {
                proc.terminate().await;
                if let Some(task) = stderr_task {
                    let _ = task.await;
                }
                return Err(RelayError::State(format!(
                    "{} failed to open subprocess stdout",
                    self.translator.tag()
                )));
            }
        };
        let mut reader = BufReader::new(stdout);

        let expected_session = resume.clone();
        let mut found_session: Option<ResumeToken> = None;
        let mut did_emit_completed = false;
        let mut buf = Vec::new();

        // Every exit from this loop (cancellation, a malformed stream, or a
        // hard protocol error like a session mismatch) falls through to the
        // teardown below instead of returning early, so the subprocess is
        // never left running.
        let mut was_cancelled = false;
        let mut run_error: Option<RelayError> = None;
        loop {
            buf.clear();
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    0
                }
                n = reader.read_until(b'\n', &mut buf) => {
                    match n {
                        Ok(n) => n,
                        Err(e) => {
                            run_error = Some(RelayError::Io(e));
                            break;
                        }
                    }
                }
            };
            if was_cancelled || n == 0 {
                break;
            }
            if did_emit_completed {
                continue;
            }
            let mut slice = buf.as_slice();
            if slice.last() == Some(&b'\n') {
                slice = &slice[..slice.len() - 1];
            }
            let line_text = String::from_utf8_lossy(slice);
            let trimmed = line_text.trim();
            if trimmed.is_empty() {
                continue;
            }

            let events = match serde_json::from_str::<serde_json::Value>(trimmed) {
                Err(_) => self.translator.invalid_json_events(&mut state, trimmed),
                Ok(data) => self
                    .translator
                    .translate(&data, &mut state, resume.as_ref(), found_session.as_ref()),
            };

            let mut stop = false;
            for evt in events {
                let evt = match evt {
                    Event::Started { engine, resume: started_resume, title, meta } => {
                        match handle_started(&engine, &started_resume, expected_session.as_ref(), found_session.as_ref()) {
                            Ok(StartedOutcome::Emit) => {
                                found_session = Some(started_resume.clone());
                                Some(Event::Started { engine, resume: started_resume, title, meta })
                            }
                            Ok(StartedOutcome::Duplicate) => None,
                            Err(err) => {
                                run_error = Some(err);
                                stop = true;
                                None
                            }
                        }
                    }
                    other => Some(other),
                };
                if stop {
                    break;
                }
                let Some(evt) = evt else { continue };
                let is_completed = evt.is_completed();
                let _ = tx.send(evt);
                if is_completed {
                    did_emit_completed = true;
                    break;
                }
            }
            if stop {
                break;
            }
        }

        if was_cancelled || run_error.is_some() {
            if run_error.is_some() {
                warn!(pid = proc.pid(), "runner.error, terminating subprocess");
            } else {
                warn!(pid = proc.pid(), "runner.cancelled");
            }
            proc.terminate().await;
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
            if let Some(err) = run_error {
                return Err(err);
            }
            if !did_emit_completed {
                let message = format!("{} run was cancelled", self.translator.tag());
                let resume_for_completed = found_session.or(resume);
                let _ = tx.send(Event::Completed {
                    engine: self.translator.engine().clone(),
                    ok: false,
                    answer: String::new(),
                    resume: resume_for_completed,
                    error: Some(message),
                    usage: None,
                });
            }
            return Ok(());
        }

        let rc = proc.wait().await?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        info!(rc, "subprocess.exit");

        if did_emit_completed {
            return Ok(());
        }
        if rc != 0 {
            for evt in self
                .translator
                .process_error_events(&mut state, rc, resume.as_ref(), found_session.as_ref())
            {
                let _ = tx.send(evt);
            }
            return Ok(());
        }
        for evt in self
            .translator
            .stream_end_events(&mut state, resume.as_ref(), found_session.as_ref())
        {
            let _ = tx.send(evt);
        }
        Ok(())
    }
}

impl<T: Translator + 'static> SubprocessRunner<T> {
    /// Serializes this run against any other run on the same session
    /// (spec.md §4.4): holds the lock for the whole run when `resume` is
    /// already known, or acquires it as soon as the engine's own `Started`
    /// event reveals the session id for a brand-new session.
    pub async fn run_locked(
        self: Arc<Self>,
        locks: Arc<SessionLockRegistry>,
        prompt: String,
        resume: Option<ResumeToken>,
        tx: UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if let Some(resume) = resume {
            let _guard = locks.acquire(&resume).await;
            return self.run(&prompt, Some(resume), tx, cancel).await;
        }

        let (inner_tx, mut inner_rx) = tokio::sync::mpsc::unbounded_channel();
        let this = self.clone();
        let task_prompt = prompt;
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { this.run(&task_prompt, None, inner_tx, task_cancel).await });

        let mut guard: Option<OwnedMutexGuard<()>> = None;
        while let Some(evt) = inner_rx.recv().await {
            if guard.is_none() {
                if let Event::Started { resume, .. } = &evt {
                    guard = Some(locks.acquire(resume).await);
                }
            }
            let _ = tx.send(evt);
        }

        handle
            .await
            .map_err(|e| RelayError::State(format!("runner task panicked: {e}")))?
    }
}

enum StartedOutcome {
    Emit,
    Duplicate,
}

/// Validates a `Started` event's session id against what this run already
/// expects or has already seen. A mismatch is treated as a hard error
/// (Open Question in spec.md §9, resolved strict: an engine that changes
/// session id mid-run indicates a bug worth surfacing, not silently
/// tolerating).
fn handle_started(
    engine: &EngineId,
    event_resume: &ResumeToken,
    expected_session: Option<&ResumeToken>,
    found_session: Option<&ResumeToken>,
) -> Result<StartedOutcome> {
    if &event_resume.engine != engine {
        return Err(RelayError::WrongEngine(engine.clone()));
    }
    if let Some(expected) = expected_session {
        if event_resume != expected {
            return Err(RelayError::SessionMismatch {
                engine: engine.to_string(),
                expected: expected.value.clone(),
                got: event_resume.value.clone(),
            });
        }
    }
    match found_session {
        None => Ok(StartedOutcome::Emit),
        Some(found) => {
            if event_resume != found {
                return Err(RelayError::SessionMismatch {
                    engine: engine.to_string(),
                    expected: found.value.clone(),
                    got: event_resume.value.clone(),
                });
            }
            Ok(StartedOutcome::Duplicate)
        }
    }
}
