//! SSE plumbing shared by streaming adapters.
//!
//! Buffers response chunks, splits on the `\n\n` event delimiter, extracts
//! `data:` payloads, and feeds each payload to an adapter-specific parser
//! that returns zero or more [`ModelEvent`]s.

use parley_domain::stream::{BoxStream, ModelEvent, StopReason};
use parley_domain::Result;

use crate::from_reqwest;

/// Pull complete `data:` payloads out of an SSE buffer.
///
/// The buffer is drained in place; a trailing partial event stays behind for
/// the next call. Lines other than `data:` (`event:`, `id:`, `retry:`) are
/// ignored.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Build a fragment stream from an SSE `reqwest::Response` and a parser
/// closure. The closure is `FnMut` because adapters keep assembly state
/// across payloads.
///
/// If the body closes without the parser ever producing a `TurnEnd`, a
/// fallback `TurnEnd { EndTurn }` is emitted so callers always see a turn
/// boundary.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<ModelEvent>>
where
    F: FnMut(&str) -> Vec<Result<ModelEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut turn_ended = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            if matches!(&event, Ok(ModelEvent::TurnEnd { .. })) {
                                turn_ended = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed — flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                if matches!(&event, Ok(ModelEvent::TurnEnd { .. })) {
                                    turn_ended = true;
                                }
                                yield event;
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

        if !turn_ended {
            yield Ok(ModelEvent::TurnEnd {
                stop_reason: StopReason::EndTurn,
                usage: None,
            });
        }
    };

    Box::pin(stream)
}
