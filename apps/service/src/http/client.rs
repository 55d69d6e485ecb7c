use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{CallRequest, CallResponse, HttpCaller, LineStream, StreamResponse};
use crate::error::HttpError;

/// [`HttpCaller`] backed by `reqwest`.
pub struct ReqwestCaller {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    retries: u32,
}

impl ReqwestCaller {
    /// Plain calls time out after `timeout_seconds`; streams only bound the connect phase.
    pub fn new(timeout_seconds: u64, retries: u32, user_agent: &str) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(user_agent)
            .build()
            .map_err(HttpError::Client)?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_seconds))
            .user_agent(user_agent)
            .build()
            .map_err(HttpError::Client)?;

        Ok(Self { client, stream_client, retries })
    }

    fn build(&self, client: &reqwest::Client, request: &CallRequest) -> reqwest::RequestBuilder {
        let mut builder = client.get(&request.url);

        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder
    }
}

#[async_trait]
impl HttpCaller for ReqwestCaller {
    async fn do_call(&self, request: &CallRequest) -> Result<CallResponse, HttpError> {
        let mut attempt = 0;
        loop {
            let sent = self.build(&self.client, request).send().await;
            let result = match sent {
                Ok(response) => {
                    let status = response.status().as_u16();
                    response
                        .bytes()
                        .await
                        .map(|body| CallResponse { status, body: body.to_vec() })
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(source) if attempt < self.retries => {
                    attempt += 1;
                    debug!(url = %request.url, attempt, "Retrying request after error: {}", source);
                }
                Err(source) => {
                    return Err(HttpError::Transport { url: request.url.clone(), source });
                }
            }
        }
    }

    async fn open_stream(&self, request: &CallRequest) -> Result<StreamResponse, HttpError> {
        let response = self
            .build(&self.stream_client, request)
            .send()
            .await
            .map_err(|source| HttpError::Transport { url: request.url.clone(), source })?;

        Ok(StreamResponse {
            status: response.status().as_u16(),
            lines: Box::new(ResponseLines::new(request.url.clone(), response)),
        })
    }
}

/// Splits a chunked response body into lines.
struct ResponseLines {
    url: String,
    response: reqwest::Response,
    buffer: Vec<u8>,
    finished: bool,
}

impl ResponseLines {
    fn new(url: String, response: reqwest::Response) -> Self {
        Self { url, response, buffer: Vec::new(), finished: false }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl LineStream for ResponseLines {
    async fn next_line(&mut self) -> Result<Option<String>, HttpError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }

            match self.response.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.finished = true,
                Err(err) => {
                    return Err(HttpError::Connection {
                        url: self.url.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
