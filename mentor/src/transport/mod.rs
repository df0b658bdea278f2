//! Stream transport: one outgoing message becomes a lazy, ordered, finite
//! sequence of typed response frames read from a single request.

pub mod credentials;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{CannotCloneRequestError, Event, EventSource};
use shared_types::{SendMessageRequest, StreamFrame, KNOWN_FRAME_TYPES};

pub use credentials::{CredentialError, EnvToken, StaticToken, TokenSource};

/// Payload of the SSE event that closes a response.
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chat endpoint responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream error: {0}")]
    Frame(String),

    #[error("malformed frame: {0}")]
    Decode(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Unrepeatable(#[from] CannotCloneRequestError),
}

/// Non-restartable frame sequence. Ends after the first terminal frame or
/// error.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, TransportError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open one request. Resolves once response headers arrive; a
    /// non-success status fails here rather than in the stream.
    async fn open(&self, request: SendMessageRequest) -> Result<FrameStream, TransportError>;
}

/// SSE-over-HTTP transport.
pub struct HttpChatTransport {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpChatTransport {
    pub fn new(
        url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            tokens,
        })
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, request: SendMessageRequest) -> Result<FrameStream, TransportError> {
        let token = self.tokens.bearer_token().await?;
        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            thread_id = %request.id,
            greeting = request.greeting,
            url = %self.url,
            "Opening chat stream"
        );
        let mut source = EventSource::new(builder)?;
        source.set_retry_policy(Box::new(Never));

        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                return Err(TransportError::Decode(
                    "event received before the stream opened".to_string(),
                ));
            }
            Some(Err(e)) => {
                source.close();
                let error = rejection(e).await;
                tracing::warn!(thread_id = %request.id, error = %error, "Chat stream rejected");
                return Err(error);
            }
            None => {
                return Err(TransportError::Frame(
                    "stream closed before opening".to_string(),
                ));
            }
        }

        Ok(event_frames(source))
    }
}

/// Error for a request that failed before any event arrived. A non-success
/// response keeps its status and body.
async fn rejection(error: reqwest_eventsource::Error) -> TransportError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            TransportError::Status {
                status: status.as_u16(),
                body,
            }
        }
        other => stream_error(other),
    }
}

fn stream_error(error: reqwest_eventsource::Error) -> TransportError {
    match error {
        reqwest_eventsource::Error::Transport(e) => TransportError::Request(e),
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => TransportError::Status {
            status: status.as_u16(),
            body: String::new(),
        },
        other => TransportError::Decode(other.to_string()),
    }
}

/// Turn SSE events into frames, stopping after the first terminal frame,
/// `[DONE]`, the end of the body, or an error.
pub fn event_frames<S>(events: S) -> FrameStream
where
    S: Stream<Item = Result<Event, reqwest_eventsource::Error>> + Send + 'static,
{
    let events = Box::pin(events);
    Box::pin(futures_util::stream::unfold(
        (events, false),
        |(mut events, finished)| async move {
            if finished {
                return None;
            }
            loop {
                let item = match events.next().await? {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == DONE_MARKER {
                            return None;
                        }
                        match decode_frame(&message.data) {
                            Ok(None) => continue,
                            Ok(Some(StreamFrame::Error { error_text })) => {
                                Err(TransportError::Frame(error_text))
                            }
                            Ok(Some(frame)) => Ok(frame),
                            Err(e) => Err(e),
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => return None,
                    Err(e) => Err(stream_error(e)),
                };
                let finished = match &item {
                    Ok(frame) => frame.is_terminal(),
                    Err(_) => true,
                };
                return Some((item, (events, finished)));
            }
        },
    ))
}

/// Decode one frame payload. Unknown frame types yield `Ok(None)`.
pub fn decode_frame(raw: &str) -> Result<Option<StreamFrame>, TransportError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| TransportError::Decode(e.to_string()))?;
    let frame_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    let known = KNOWN_FRAME_TYPES.contains(&frame_type.as_str());
    let is_data = frame_type.starts_with("data-");
    if !known && !is_data {
        tracing::debug!(frame_type = %frame_type, "Skipping unknown frame");
        return Ok(None);
    }

    serde_json::from_value::<StreamFrame>(value)
        .map(Some)
        .map_err(|e| TransportError::Decode(format!("{frame_type}: {e}")))
}
