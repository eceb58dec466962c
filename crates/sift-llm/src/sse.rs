use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::ChatStream;

/// What a single `data:` payload of a chat completion stream carries.
#[derive(Debug, PartialEq)]
enum Frame {
    Text(String),
    /// Role announcements, finish markers and other content-free deltas.
    Empty,
    Done,
}

/// Map an `OpenAI` streaming response onto a token stream. The stream ends
/// at `[DONE]` even if the server keeps the connection open.
pub(crate) fn openai_sse_to_stream(response: reqwest::Response) -> ChatStream {
    let frames = response
        .bytes_stream()
        .eventsource()
        .map(|event| match event {
            Ok(event) => parse_frame(&event.data),
            Err(e) => Err(LlmError::SseParse(e.to_string())),
        })
        .take_while(|frame| !matches!(frame, Ok(Frame::Done)))
        .filter_map(|frame| match frame {
            Ok(Frame::Text(text)) => Some(Ok(text)),
            Ok(Frame::Empty | Frame::Done) => None,
            Err(e) => Some(Err(e)),
        });
    Box::pin(frames)
}

fn parse_frame(data: &str) -> Result<Frame, LlmError> {
    if data.trim() == "[DONE]" {
        return Ok(Frame::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::SseParse(format!("failed to parse SSE data: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(LlmError::SseParse(format!("stream error: {}", err.message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map_or(Frame::Empty, Frame::Text))
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}
