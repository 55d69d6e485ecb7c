//! Scripted [`HttpCaller`] used by the unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CallRequest, CallResponse, HttpCaller, LineStream, StreamResponse};
use crate::error::HttpError;

#[derive(Debug, Clone)]
enum Scripted {
    Respond(CallResponse),
    Fail(String),
}

/// One scripted streaming connection.
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    pub status: u16,
    pub lines: Vec<Result<String, String>>,
    /// Keep the connection open after the last line instead of closing it.
    pub hold_open: bool,
}

impl ScriptedStream {
    pub fn ok(lines: &[&str]) -> Self {
        Self { status: 200, lines: lines.iter().map(|line| Ok(line.to_string())).collect(), hold_open: false }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn status(status: u16) -> Self {
        Self { status, lines: Vec::new(), hold_open: false }
    }
}

#[derive(Default)]
struct Script {
    calls: HashMap<String, VecDeque<Scripted>>,
    streams: HashMap<String, VecDeque<ScriptedStream>>,
    requests: Vec<CallRequest>,
}

/// Replays canned responses per URL and records every request.
///
/// The last scripted response for a URL repeats forever. URLs without a script
/// fail like an unreachable host.
#[derive(Clone, Default)]
pub struct ScriptedCaller {
    script: Arc<Mutex<Script>>,
}

impl ScriptedCaller {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
        self.lock()
            .calls
            .entry(url.to_string())
            .or_default()
            .push_back(Scripted::Respond(CallResponse::new(status, body)));
        self
    }

    pub fn fail(&self, url: &str, reason: &str) -> &Self {
        self.lock().calls.entry(url.to_string()).or_default().push_back(Scripted::Fail(reason.to_string()));
        self
    }

    pub fn stream(&self, url: &str, stream: ScriptedStream) -> &Self {
        self.lock().streams.entry(url.to_string()).or_default().push_back(stream);
        self
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<CallRequest> {
        self.lock().requests.clone()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.lock().requests.iter().map(|request| request.url.clone()).collect()
    }

    pub fn count(&self, url: &str) -> usize {
        self.lock().requests.iter().filter(|request| request.url == url).count()
    }
}

#[async_trait]
impl HttpCaller for ScriptedCaller {
    async fn do_call(&self, request: &CallRequest) -> Result<CallResponse, HttpError> {
        let mut script = self.lock();
        script.requests.push(request.clone());

        let next = match script.calls.get_mut(&request.url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(reason)) => Err(HttpError::Connection { url: request.url.clone(), reason }),
            None => Err(HttpError::Connection {
                url: request.url.clone(),
                reason: "no scripted response".to_string(),
            }),
        }
    }

    async fn open_stream(&self, request: &CallRequest) -> Result<StreamResponse, HttpError> {
        let mut script = self.lock();
        script.requests.push(request.clone());

        let stream = script.streams.get_mut(&request.url).and_then(|queue| queue.pop_front());
        match stream {
            Some(stream) => Ok(StreamResponse {
                status: stream.status,
                lines: Box::new(ScriptedLines {
                    lines: stream.lines.into_iter().collect(),
                    hold_open: stream.hold_open,
                    url: request.url.clone(),
                }),
            }),
            None => Err(HttpError::Connection {
                url: request.url.clone(),
                reason: "no scripted stream".to_string(),
            }),
        }
    }
}

struct ScriptedLines {
    lines: VecDeque<Result<String, String>>,
    hold_open: bool,
    url: String,
}

#[async_trait]
impl LineStream for ScriptedLines {
    async fn next_line(&mut self) -> Result<Option<String>, HttpError> {
        match self.lines.pop_front() {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(reason)) => Err(HttpError::Connection { url: self.url.clone(), reason }),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }
}
