//! Answer stream parsing.
//!
//! The service answers `POST api/conversation` with a line-oriented stream:
//! blank keepalive lines, `data: {...}` lines carrying the cumulative answer,
//! and a final `data: [DONE]`.  [`parse_line`] classifies one line into a
//! [`LineOutcome`]; [`parse_events`] folds a whole line stream into a stream of
//! [`StreamEvent`]s that ends at `[DONE]`, at the end of the body, or after the
//! first fatal error.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::logger::SessionLogger;
use crate::observability::{STREAM_ERRORS, STREAM_SKIPPED_LINES};
use crate::types::{ConversationId, MessageId, StreamEvent};

const DATA_PREFIX: &str = "data: ";
const DONE: &str = "[DONE]";
const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// What a single stream line means for the stream as a whole.
#[derive(Debug)]
pub enum LineOutcome {
    /// Nothing to report; keep reading.
    Skip(Skip),
    /// A decoded answer snapshot.
    Event(StreamEvent),
    /// The answer is complete.
    Done,
    /// The answer cannot continue.
    Fail(Error),
}

/// Why a line produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Blank or framing-only line.
    Blank,
    /// The line is not JSON, even after unescaping.  Carries the parse error.
    NotJson(String),
}

/// Classify one line of the answer stream.
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();
    if line.is_empty() {
        return LineOutcome::Skip(Skip::Blank);
    }
    if line == DONE {
        return LineOutcome::Done;
    }
    if line == INTERNAL_SERVER_ERROR {
        return LineOutcome::Fail(Error::upstream(500, line));
    }
    let (value, line) = match decode(line) {
        Ok(decoded) => decoded,
        Err(reason) => return LineOutcome::Skip(Skip::NotJson(reason)),
    };
    match extract_event(&value, &line) {
        Ok(event) => LineOutcome::Event(event),
        Err(err) => LineOutcome::Fail(err),
    }
}

/// Turn a stream of body lines into a stream of answer snapshots.
///
/// The returned stream ends without error on `[DONE]` or when `lines` ends.
/// A fatal line or a transport error is yielded once, then the stream ends.
/// Lines that are not JSON are reported to `logger` and dropped.
pub fn parse_events<S>(
    lines: S,
    logger: Arc<dyn SessionLogger>,
) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = Result<String>> + Send + Unpin,
{
    stream::unfold(Some(lines), move |lines| {
        let logger = Arc::clone(&logger);
        async move {
            let mut lines = lines?;
            loop {
                let line = match lines.next().await {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(err), None));
                    }
                    None => return None,
                };
                match parse_line(&line) {
                    LineOutcome::Skip(Skip::Blank) => {}
                    LineOutcome::Skip(Skip::NotJson(reason)) => {
                        STREAM_SKIPPED_LINES.click();
                        logger.skipped_line(&line, &reason);
                    }
                    LineOutcome::Event(event) => return Some((Ok(event), Some(lines))),
                    LineOutcome::Done => return None,
                    LineOutcome::Fail(err) => {
                        STREAM_ERRORS.click();
                        return Some((Err(err), None));
                    }
                }
            }
        }
    })
}

/// Parse `line` as JSON, retrying once with the service's extra escaping
/// undone.  Returns the value and the text that parsed.
fn decode(line: &str) -> std::result::Result<(Value, String), String> {
    match serde_json::from_str::<MergedValue>(line) {
        Ok(MergedValue(value)) => Ok((value, line.to_string())),
        Err(err) if !line.contains('\\') => Err(err.to_string()),
        Err(_) => {
            let unescaped = unescape(line);
            match serde_json::from_str::<MergedValue>(&unescaped) {
                Ok(MergedValue(value)) => Ok((value, unescaped)),
                Err(err) => Err(err.to_string()),
            }
        }
    }
}

/// Undo one level of backslash escaping of quotes and backslashes.
fn unescape(line: &str) -> String {
    line.replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

fn extract_event(value: &Value, line: &str) -> Result<StreamEvent> {
    let message = value
        .get("message")
        .ok_or_else(|| Error::malformed_event("missing field `message`", line))?;
    let content = message
        .get("content")
        .filter(|content| content.is_object())
        .ok_or_else(|| Error::malformed_event("missing field `message.content`", line))?;
    let message_text = content
        .get("parts")
        .and_then(|parts| parts.get(0))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let conversation_id = value
        .get("conversation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed_event("missing field `conversation_id`", line))?;
    let parent_id = message
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed_event("missing field `message.id`", line))?;
    Ok(StreamEvent::new(
        message_text,
        ConversationId::new(conversation_id),
        MessageId::new(parent_id),
    ))
}

/// A JSON value whose objects merge repeated keys instead of keeping the last.
///
/// Events split one object across two occurrences of the same key, e.g.
/// `{"message":{"content":..},"conversation_id":..,"message":{"id":..}}`.
struct MergedValue(Value);

impl<'de> Deserialize<'de> for MergedValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MergedVisitor)
    }
}

struct MergedVisitor;

impl<'de> Visitor<'de> for MergedVisitor {
    type Value = MergedValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::String(v.to_string())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::String(v)))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::Null))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<MergedValue, E> {
        Ok(MergedValue(Value::Null))
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<MergedValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        MergedValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<MergedValue, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(MergedValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(MergedValue(Value::Array(items)))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<MergedValue, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Map::new();
        while let Some((key, MergedValue(value))) = map.next_entry::<String, MergedValue>()? {
            merge_entry(&mut object, key, value);
        }
        Ok(MergedValue(Value::Object(object)))
    }
}

fn merge_entry(object: &mut Map<String, Value>, key: String, value: Value) {
    match value {
        Value::Object(incoming) => {
            if let Some(Value::Object(existing)) = object.get_mut(&key) {
                for (k, v) in incoming {
                    merge_entry(existing, k, v);
                }
            } else {
                object.insert(key, Value::Object(incoming));
            }
        }
        other => {
            object.insert(key, other);
        }
    }
}
