//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::probe::{Invocation, ProbeError, ProbeFuture, ProbeOutput, ProbeRunner};

type Response = Result<ProbeOutput, ProbeError>;

#[derive(Debug, Default)]
struct Script {
    keyed: Vec<(String, Response)>,
    queued: VecDeque<Response>,
    invocations: Vec<Invocation>,
    delay: Option<Duration>,
}

/// Probe runner that answers from pre-seeded responses instead of spawning
/// interpreters.
///
/// Responses registered with [`Self::respond_to`] are chosen by matching a
/// fragment against the invocation's arguments, which keeps outcomes stable
/// when the harness runs scripts concurrently. Otherwise queued responses are
/// returned in FIFO order, and an empty queue yields a clean exit.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbeRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProbeRunner {
    /// Creates a runner that exits cleanly for every invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<T>(&self, apply: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard)
    }

    /// Answers invocations whose arguments contain `fragment` with `response`.
    pub fn respond_to(&self, fragment: impl Into<String>, response: Response) {
        let key = fragment.into();
        self.with_script(|script| script.keyed.push((key, response)));
    }

    /// Queues a response for the next unmatched invocation.
    pub fn push(&self, response: Response) {
        self.with_script(|script| script.queued.push_back(response));
    }

    /// Queues a clean exit.
    pub fn push_success(&self) {
        self.push(Ok(output(Some(0), "", "")));
    }

    /// Queues a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push(Ok(output(Some(code), "", &stderr.into())));
    }

    /// Sleeps for `delay` before answering each invocation.
    pub fn set_delay(&self, delay: Duration) {
        self.with_script(|script| script.delay = Some(delay));
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.with_script(|script| script.invocations.clone())
    }

    fn answer(&self, invocation: &Invocation) -> (Response, Option<Duration>) {
        self.with_script(|script| {
            script.invocations.push(invocation.clone());
            let keyed = script
                .keyed
                .iter()
                .find(|(fragment, _)| invocation.args.iter().any(|arg| arg.contains(fragment.as_str())))
                .map(|(_, response)| response.clone());
            let response = keyed
                .or_else(|| script.queued.pop_front())
                .unwrap_or_else(|| Ok(output(Some(0), "", "")));
            (response, script.delay)
        })
    }
}

impl ProbeRunner for ScriptedProbeRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> ProbeFuture<'a> {
        Box::pin(async move {
            let (response, delay) = self.answer(invocation);
            if let Some(pause) = delay {
                tokio::time::sleep(pause).await;
            }
            response
        })
    }
}

/// Builds a [`ProbeOutput`] from literals.
#[must_use]
pub fn output(code: Option<i32>, stdout: &str, stderr: &str) -> ProbeOutput {
    ProbeOutput {
        code,
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables for the guard's lifetime, restoring them on drop.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
