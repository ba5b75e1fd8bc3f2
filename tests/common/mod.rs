//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mermaid_fix::api::{ChunkStream, CompletionChunk, CompletionRequest, CompletionService};
use mermaid_fix::error::{ApiError, EngineError};
use mermaid_fix::mermaid::{DiagramEngine, MermaidFixer, Repairer, Validator};
use mermaid_fix::notify::RecordingNotifier;

/// Rejects the listed sources with their message and accepts everything else.
#[derive(Default)]
pub struct FakeEngine {
    invalid: HashMap<String, String>,
    missing: Option<String>,
    calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(mut self, code: &str, message: &str) -> Self {
        self.invalid.insert(code.to_string(), message.to_string());
        self
    }

    /// Fail the availability check, like a CLI engine whose binary is gone.
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.missing = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagramEngine for FakeEngine {
    async fn parse(&self, code: &str) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.invalid.get(code) {
            Some(message) => Err(EngineError::Syntax(message.clone())),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ensure_available(&self) -> Result<(), EngineError> {
        match &self.missing {
            Some(reason) => Err(EngineError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Panics on every parse.
pub struct PanickingEngine;

#[async_trait]
impl DiagramEngine for PanickingEngine {
    async fn parse(&self, _code: &str) -> Result<(), EngineError> {
        panic!("engine blew up");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

/// One scripted answer of [`ScriptedCompletion`].
pub enum Reply {
    /// Stream these text deltas, then end.
    Text(Vec<&'static str>),
    /// The request itself fails.
    RequestError(&'static str),
    /// Stream some deltas, then fail mid-stream.
    BrokenStream(Vec<&'static str>, &'static str),
    /// Never produce anything.
    Hang,
    /// The service itself panics.
    Panic,
}

/// Completion service answering from a queue and recording every request.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::RequestError("no scripted reply left"));

        match reply {
            Reply::Text(parts) => {
                let mut chunks: Vec<Result<CompletionChunk, ApiError>> =
                    vec![Ok(CompletionChunk::default())];
                chunks.extend(parts.into_iter().map(|p| Ok(CompletionChunk::text(p))));
                Ok(futures::stream::iter(chunks).boxed())
            }
            Reply::RequestError(message) => Err(ApiError::Stream(message.to_string())),
            Reply::BrokenStream(parts, message) => {
                let mut chunks: Vec<Result<CompletionChunk, ApiError>> =
                    parts.into_iter().map(|p| Ok(CompletionChunk::text(p))).collect();
                chunks.push(Err(ApiError::Stream(message.to_string())));
                Ok(futures::stream::iter(chunks).boxed())
            }
            Reply::Hang => Ok(futures::stream::pending().boxed()),
            Reply::Panic => panic!("completion backend blew up"),
        }
    }
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub completion: Arc<ScriptedCompletion>,
    pub notifier: Arc<RecordingNotifier>,
    pub fixer: MermaidFixer,
}

pub fn harness(engine: FakeEngine, replies: Vec<Reply>) -> Harness {
    harness_with(engine, replies, |repairer| repairer)
}

pub fn harness_with(
    engine: FakeEngine,
    replies: Vec<Reply>,
    configure: impl FnOnce(Repairer) -> Repairer,
) -> Harness {
    let engine = Arc::new(engine);
    let completion = Arc::new(ScriptedCompletion::new(replies));
    let notifier = Arc::new(RecordingNotifier::new());

    let repairer = configure(Repairer::new(completion.clone(), notifier.clone()));
    let fixer = MermaidFixer::new(Validator::new(engine.clone()), repairer, notifier.clone())
        .with_default_model("default-model");

    Harness {
        engine,
        completion,
        notifier,
        fixer,
    }
}

/// Wrap a diagram body in Mermaid fences.
pub fn mermaid(body: &str) -> String {
    format!("```mermaid\n{}\n```", body)
}

/// Writer whose contents stay readable after an `OutputHandler` took it.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
