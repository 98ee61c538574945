use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

/// Status and raw body of a completed exchange. Non-2xx statuses are
/// responses, not errors; callers decide what they expected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP seam between the REST destination and the network.
pub trait Transport {
    /// # Errors
    /// Returns an error only when no response was received at all.
    fn send(&self, request: &Request) -> Result<HttpResponse>;
}

/// Per-request timeout when `--timeout-secs` is not given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { agent: ureq::AgentBuilder::new().timeout(timeout).build() }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &Request) -> Result<HttpResponse> {
        let mut call = self.agent.request(request.method.as_str(), &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let outcome = match &request.body {
            Body::Empty => call.call(),
            Body::Json(payload) => call.send_json(payload),
            Body::Form(pairs) => {
                let pairs =
                    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>();
                call.send_form(&pairs)
            }
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .with_context(|| format!("failed to read response body from {}", request.url))?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = rejected_body(&request.url, response.into_string());
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Transport(err)) => {
                Err(anyhow!("{} {} failed: {err}", request.method.as_str(), request.url))
            }
        }
    }
}

/// Body of a non-2xx response. A failed read is logged and reported in
/// place of the body.
fn rejected_body(url: &str, read: io::Result<String>) -> String {
    read.unwrap_or_else(|err| {
        warn!(url, error = %err, "failed to read body of rejected request");
        format!("<unreadable body: {err}>")
    })
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::{HttpResponse, Request, Result, Transport};

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: RefCell<VecDeque<HttpResponse>>,
        pub(crate) requests: RefCell<Vec<Request>>,
    }

    impl ScriptedTransport {
        pub(crate) fn respond(self, status: u16, body: &str) -> Self {
            self.responses.borrow_mut().push_back(HttpResponse { status, body: body.to_string() });
            self
        }

        pub(crate) fn request(&self, index: usize) -> Request {
            self.requests.borrow()[index].clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &Request) -> Result<HttpResponse> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted response for {}", request.url))
        }
    }
}
