//! Server-sent-events plumbing shared by the HTTP provider clients.
//!
//! Bytes are buffered until a blank line closes an event, then every
//! `data:` payload is handed to a provider-specific parser.

use crate::util::from_reqwest;
use ag_domain::error::Result;
use ag_domain::stream::{BoxStream, StreamEvent};

/// Pull complete `data:` payloads out of `buffer`, leaving any trailing
/// partial event in place.
///
/// Works on raw bytes so a multi-byte character split across network
/// chunks is only decoded once the event is complete. CRLF line endings
/// are accepted.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut out = Vec::new();

    while let Some((end, delim_len)) = find_event_end(buffer) {
        let block: Vec<u8> = buffer.drain(..end + delim_len).take(end).collect();
        let block = String::from_utf8_lossy(&block);

        for line in block.lines() {
            if let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
    }

    out
}

fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Turn an SSE response into a [`BoxStream`] of events.
///
/// `parse_data` maps one payload to zero or more events and may keep
/// state between calls. The stream ends after the first `Done` or error;
/// if the body closes without a `Done`, one is synthesized.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        while !finished {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    drain_data_lines(&mut buffer)
                }
                Ok(None) => {
                    finished = true;
                    if buffer.iter().all(u8::is_ascii_whitespace) {
                        Vec::new()
                    } else {
                        buffer.extend_from_slice(b"\n\n");
                        drain_data_lines(&mut buffer)
                    }
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };

            for data in payloads {
                for event in parse_data(&data) {
                    let terminal = !matches!(event, Ok(StreamEvent::Token { .. }));
                    yield event;
                    if terminal {
                        return;
                    }
                }
            }
        }

        yield Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        });
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
