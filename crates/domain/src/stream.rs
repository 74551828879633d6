use std::pin::Pin;

/// A boxed async stream, used for chat backend streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One unit yielded by a backend's streamed run.
///
/// Backends speak several wire dialects; each adapter maps its native
/// events onto this sum type so the heterogeneity never leaks past the
/// adapter boundary. The agent runner consumes chunks exclusively through
/// [`StreamChunk::extract`].
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A plain text delta.
    Text(String),
    /// A structured delta payload (string, or `{text}` / `{content}`).
    Delta(DeltaPayload),
    /// A batch of messages streamed in one event.
    Messages(Vec<ChunkMessage>),
    /// A full response snapshot. Not a delta: the runner caches its text
    /// and uses it only when the stream produced no deltas at all.
    Response(ResponsePayload),
    /// An unrecognized mapping; probed for `delta` / `text` / `content`.
    Raw(serde_json::Value),
}

/// Structured delta carried by [`StreamChunk::Delta`].
#[derive(Debug, Clone, Default)]
pub struct DeltaPayload {
    pub text: Option<String>,
    pub content: Option<String>,
}

/// One message inside a `Messages` batch or a `Response` snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChunkMessage {
    pub text: Option<String>,
    pub content: Option<String>,
}

impl ChunkMessage {
    fn best_text(&self) -> Option<&str> {
        pick(self.text.as_deref()).or_else(|| pick(self.content.as_deref()))
    }
}

/// Full-response snapshot carried by [`StreamChunk::Response`].
#[derive(Debug, Clone, Default)]
pub struct ResponsePayload {
    pub result: Option<String>,
    pub messages: Vec<ChunkMessage>,
}

/// What [`StreamChunk::extract`] found in a single chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkText {
    /// Text deltas to publish, in order. Never contains empty strings.
    pub deltas: Vec<String>,
    /// Full-response text to cache as a fallback (from `Response` chunks).
    pub response_text: Option<String>,
}

impl StreamChunk {
    /// Pull text out of a chunk.
    ///
    /// Precedence follows the loosest consumer we have to interoperate
    /// with: `text`, then `delta` (string or `.text`/`.content`), then
    /// `messages[*]`, then `response` (`result`, else messages joined with
    /// newlines — cached, not emitted), then raw-mapping probing.
    /// Whitespace-only strings are dropped everywhere.
    pub fn extract(&self) -> ChunkText {
        let mut out = ChunkText::default();
        match self {
            StreamChunk::Text(s) => {
                if let Some(s) = pick(Some(s)) {
                    out.deltas.push(s.to_owned());
                }
            }
            StreamChunk::Delta(d) => {
                if let Some(s) = pick(d.text.as_deref()).or_else(|| pick(d.content.as_deref())) {
                    out.deltas.push(s.to_owned());
                }
            }
            StreamChunk::Messages(msgs) => {
                for msg in msgs {
                    if let Some(s) = msg.best_text() {
                        out.deltas.push(s.to_owned());
                    }
                }
            }
            StreamChunk::Response(resp) => {
                if let Some(s) = pick(resp.result.as_deref()) {
                    out.response_text = Some(s.to_owned());
                } else {
                    let collected: Vec<&str> =
                        resp.messages.iter().filter_map(|m| m.best_text()).collect();
                    if !collected.is_empty() {
                        out.response_text = Some(collected.join("\n"));
                    }
                }
            }
            StreamChunk::Raw(value) => {
                let candidate = value
                    .get("delta")
                    .and_then(|v| v.as_str())
                    .or_else(|| value.get("text").and_then(|v| v.as_str()))
                    .or_else(|| value.get("content").and_then(|v| v.as_str()));
                if let Some(s) = pick(candidate) {
                    out.deltas.push(s.to_owned());
                }
            }
        }
        out
    }
}

/// Treat empty and whitespace-only strings as absent.
fn pick(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
