use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use calcnode::errors::CalcNodeError;
use calcnode::supervisor::{ConfigurationSource, FetchFuture};

/// One scripted fetch result.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Document(Vec<u8>),
    Unavailable(String),
}

impl FetchOutcome {
    pub fn document(text: &str) -> Self {
        FetchOutcome::Document(text.as_bytes().to_vec())
    }

    /// Mimics an HTTP error status.
    pub fn status(code: u16) -> Self {
        FetchOutcome::Unavailable(format!("HTTP {code}"))
    }
}

/// A configuration source that replays a fixed script.
///
/// Each fetch consumes the next outcome; once the script is exhausted the
/// last outcome is repeated forever.
pub struct ScriptedConfigurationSource {
    script: Mutex<VecDeque<FetchOutcome>>,
    last: Mutex<Option<FetchOutcome>>,
    fetches: AtomicUsize,
}

impl ScriptedConfigurationSource {
    pub fn new(outcomes: impl IntoIterator<Item = FetchOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> FetchOutcome {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last
                .clone()
                .unwrap_or_else(|| FetchOutcome::Unavailable("empty script".to_string())),
        }
    }
}

impl ConfigurationSource for ScriptedConfigurationSource {
    fn fetch<'a>(&'a self, _url: &'a str) -> FetchFuture<'a> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();
        Box::pin(async move {
            match outcome {
                FetchOutcome::Document(bytes) => Ok(bytes),
                FetchOutcome::Unavailable(reason) => Err(CalcNodeError::FetchFailed(reason)),
            }
        })
    }
}
