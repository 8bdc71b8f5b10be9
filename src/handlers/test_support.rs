use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::llm::{GenerationError, GenerationRequest, ImageData, ImageGenerator};
use crate::state::Studio;

pub const TEST_EXPRESSIONS: &[&str] = &["smile", "crying", "angry", "big smile"];

pub fn studio_with<G: ImageGenerator>(generator: G) -> Studio<G> {
    studio_with_timeout(generator, Duration::from_secs(5))
}

pub fn studio_with_timeout<G: ImageGenerator>(generator: G, timeout: Duration) -> Studio<G> {
    Studio::new(generator, TEST_EXPRESSIONS.iter().copied(), timeout)
}

/// Replays queued results in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedGenerator {
    results: Mutex<VecDeque<Result<ImageData, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(results: Vec<Result<ImageData, GenerationError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

impl ImageGenerator for ScriptedGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<ImageData, GenerationError>> + Send {
        self.requests.lock().push(request);
        let result = self
            .results
            .lock()
            .pop_front()
            .unwrap_or(Err(GenerationError::NoImageInResponse));
        async move { result }
    }
}

/// Blocks the first call until the test releases it through the returned sender.
pub struct GatedGenerator {
    gate: Mutex<Option<oneshot::Receiver<Result<ImageData, GenerationError>>>>,
    calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> (Self, oneshot::Sender<Result<ImageData, GenerationError>>) {
        let (sender, receiver) = oneshot::channel();
        let generator = Self {
            gate: Mutex::new(Some(receiver)),
            calls: AtomicUsize::new(0),
        };
        (generator, sender)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageGenerator for GatedGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<ImageData, GenerationError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        async move {
            match gate {
                Some(receiver) => receiver
                    .await
                    .unwrap_or(Err(GenerationError::GenerationFailed(request.label))),
                None => Err(GenerationError::GenerationFailed(request.label)),
            }
        }
    }
}
