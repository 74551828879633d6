//! Shared SSE plumbing for streaming adapters.
//!
//! Remote backends stream over server-sent events: the response body
//! arrives in arbitrary byte chunks, events are delimited by `\n\n`, and
//! only `data:` lines carry payloads. [`drain_data_lines`] pulls complete
//! payloads out of a rolling buffer; [`sse_chunk_stream`] turns a
//! `reqwest::Response` plus a per-backend payload parser into the
//! [`StreamChunk`] stream the agent runner consumes.

use crate::util::from_reqwest;
use bp_domain::error::Result;
use bp_domain::stream::{BoxStream, StreamChunk};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Everything up to the last event delimiter is complete and can leave
/// the buffer in one cut; whatever follows is a partial event and stays
/// for the next call. Within the completed region only `data:` lines
/// matter — event boundaries carry no information once a payload line
/// is whole — so a flat line scan suffices. `event:`/`id:`/`retry:`
/// lines and blank payloads are discarded.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let Some(last_delim) = buffer.rfind("\n\n") else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..last_delim + 2).collect();

    complete
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Build a chunk stream from an SSE response and a payload parser.
///
/// The parser maps one `data:` payload to zero or more chunks; it is
/// `FnMut` so adapters can keep state across events. The stream flushes
/// any partial trailing event when the body closes, and a transport error
/// is yielded as a final `Err` item rather than swallowed.
pub(crate) fn sse_chunk_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamChunk>>
where
    F: FnMut(&str) -> Vec<StreamChunk> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_lines(&mut buffer) {
                        for chunk in parse_payload(&payload) {
                            yield Ok(chunk);
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in drain_data_lines(&mut buffer) {
                            for chunk in parse_payload(&payload) {
                                yield Ok(chunk);
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_without_a_delimiter_is_left_untouched() {
        let mut buf = String::from("data: {\"delta\":{\"text\":\"hub vn");
        assert!(drain_data_lines(&mut buf).is_empty());
        assert_eq!(buf, "data: {\"delta\":{\"text\":\"hub vn");
    }

    #[test]
    fn data_in_the_partial_tail_is_withheld_until_its_delimiter_arrives() {
        // A network chunk can end anywhere, including between a complete
        // payload line and its event delimiter.
        let mut buf = String::from("data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"text\":\"a\"}"]);
        assert_eq!(buf, "data: {\"text\":\"b\"}\n");

        buf.push('\n');
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"text\":\"b\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn chunk_boundary_inside_the_data_keyword_reassembles() {
        let mut buf = String::from("da");
        assert!(drain_data_lines(&mut buf).is_empty());
        buf.push_str("ta: {\"messages\":[{\"text\":\"spoke\"}]}\n\n");
        assert_eq!(
            drain_data_lines(&mut buf),
            vec!["{\"messages\":[{\"text\":\"spoke\"}]}"]
        );
    }

    #[test]
    fn one_event_may_carry_several_data_lines() {
        // Each data line is its own payload; the runner treats every
        // extracted string as an independent delta.
        let mut buf = String::from("event: message\ndata: first half\ndata: second half\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first half", "second half"]);
    }

    #[test]
    fn crlf_framing_from_proxies_is_tolerated() {
        let mut buf = String::from("data: {\"response\":{\"result\":\"ok\"}}\r\n\ndata: tail");
        assert_eq!(
            drain_data_lines(&mut buf),
            vec!["{\"response\":{\"result\":\"ok\"}}"]
        );
        assert_eq!(buf, "data: tail");
    }

    #[test]
    fn metadata_and_blank_data_lines_produce_no_payloads() {
        let mut buf =
            String::from("event: heartbeat\nid: 12\nretry: 5000\ndata:\n\ndata: survivor\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["survivor"]);
        assert!(buf.is_empty());
    }
}
