//! Incremental decoding of JSON array bodies.
//!
//! Query result sets can be far larger than memory, so rows are decoded one
//! element at a time as body chunks arrive.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;
use sfpipe_client::BodyStream;

use crate::error::{Error, ErrorKind, Result};
use crate::types::Record;

/// A stream of decoded records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Start,
    /// Just after `[`.
    First,
    /// Just after `,`.
    Next,
    /// After an element, expecting `,` or `]`.
    AfterValue,
    Done,
    /// Body is an object (error payload); collected until the end.
    Envelope,
}

/// Push-based decoder yielding the elements of a top-level JSON array.
#[derive(Debug, Default)]
pub(crate) struct JsonArrayDecoder {
    buf: Vec<u8>,
    pos: usize,
    phase: Phase,
    scanning: bool,
    scan: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonArrayDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete element, or `None` if more input is needed.
    pub(crate) fn next_value(&mut self) -> Result<Option<Value>> {
        loop {
            match self.phase {
                Phase::Start => {
                    self.skip_whitespace();
                    let Some(&b) = self.buf.get(self.pos) else {
                        return Ok(None);
                    };
                    match b {
                        b'[' => {
                            self.pos += 1;
                            self.phase = Phase::First;
                        }
                        b'{' => self.phase = Phase::Envelope,
                        other => {
                            return Err(decode_error(format!(
                                "expected a JSON array, found '{}'",
                                other as char
                            )))
                        }
                    }
                }
                Phase::First | Phase::Next => {
                    self.skip_whitespace();
                    let Some(&b) = self.buf.get(self.pos) else {
                        return Ok(None);
                    };
                    if b == b']' && self.phase == Phase::First {
                        self.pos += 1;
                        self.phase = Phase::Done;
                        continue;
                    }
                    let Some(end) = self.scan_element() else {
                        return Ok(None);
                    };
                    let value = serde_json::from_slice(&self.buf[self.pos..end])?;
                    self.pos = end;
                    self.phase = Phase::AfterValue;
                    self.compact();
                    return Ok(Some(value));
                }
                Phase::AfterValue => {
                    self.skip_whitespace();
                    let Some(&b) = self.buf.get(self.pos) else {
                        return Ok(None);
                    };
                    self.pos += 1;
                    self.phase = match b {
                        b',' => Phase::Next,
                        b']' => Phase::Done,
                        other => {
                            return Err(decode_error(format!(
                                "expected ',' or ']', found '{}'",
                                other as char
                            )))
                        }
                    };
                }
                Phase::Done => {
                    self.skip_whitespace();
                    if self.pos < self.buf.len() {
                        return Err(decode_error("trailing data after JSON array".to_string()));
                    }
                    return Ok(None);
                }
                Phase::Envelope => return Ok(None),
            }
        }
    }

    /// Signal end of input.
    pub(crate) fn finish(&mut self) -> Result<()> {
        match self.phase {
            Phase::Done => Ok(()),
            Phase::Envelope => {
                let value: Value = serde_json::from_slice(&self.buf[self.pos..])?;
                Err(envelope_error(&value))
            }
            Phase::Start if self.buf[self.pos..].iter().all(u8::is_ascii_whitespace) => {
                Err(decode_error("empty response body".to_string()))
            }
            _ => Err(decode_error("truncated JSON array".to_string())),
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .buf
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    /// Scan forward from `pos` for the end of one element. Scanning state is
    /// kept across calls so each byte is looked at once.
    fn scan_element(&mut self) -> Option<usize> {
        if !self.scanning {
            self.scanning = true;
            self.scan = self.pos;
            self.depth = 0;
            self.in_string = false;
            self.escaped = false;
        }

        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.scan + 1);
                    }
                }
                self.scan += 1;
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    if self.depth == 0 {
                        // scalar element closed by the outer array
                        return Some(self.scan);
                    }
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(self.scan + 1);
                    }
                }
                b',' if self.depth == 0 => return Some(self.scan),
                b if b.is_ascii_whitespace() && self.depth == 0 && self.scan > self.pos => {
                    return Some(self.scan)
                }
                _ => {}
            }
            self.scan += 1;
        }
        None
    }

    fn compact(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.scanning = false;
    }
}

fn decode_error(message: String) -> Error {
    Error::new(ErrorKind::Decode(message))
}

/// Map a non-array body: an `exceptionCode` payload becomes a remote error.
fn envelope_error(value: &Value) -> Error {
    match value.get("exceptionCode").and_then(Value::as_str) {
        Some(code) => Error::new(ErrorKind::Remote {
            code: code.to_string(),
            message: value
                .get("exceptionMessage")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => decode_error("expected a JSON array, found an object".to_string()),
    }
}

/// Convert one decoded element to a record, dropping the `attributes`
/// envelope the API adds to query rows.
pub(crate) fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(mut map) => {
            map.shift_remove("attributes");
            Ok(map)
        }
        other => Err(decode_error(format!(
            "expected a record object, found {other}"
        ))),
    }
}

struct StreamState {
    body: BodyStream,
    decoder: JsonArrayDecoder,
    done: bool,
}

/// Decode a response body holding a JSON array of records.
///
/// A decoding or transport failure yields one `Err` item and ends the stream.
pub(crate) fn record_stream(body: BodyStream) -> RecordStream {
    let state = StreamState {
        body,
        decoder: JsonArrayDecoder::default(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut s| async move {
        if s.done {
            return None;
        }
        loop {
            match s.decoder.next_value() {
                Ok(Some(value)) => {
                    let record = into_record(value);
                    s.done = record.is_err();
                    return Some((record, s));
                }
                Ok(None) => {}
                Err(e) => {
                    s.done = true;
                    return Some((Err(e), s));
                }
            }

            match s.body.next().await {
                Some(Ok(chunk)) => s.decoder.push(&chunk),
                Some(Err(e)) => {
                    s.done = true;
                    return Some((Err(e.into()), s));
                }
                None => {
                    s.done = true;
                    return match s.decoder.finish() {
                        Ok(()) => None,
                        Err(e) => Some((Err(e), s)),
                    };
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::TryStreamExt;

    fn decode_all(chunks: &[&str]) -> Result<Vec<Value>> {
        let mut decoder = JsonArrayDecoder::default();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.push(chunk.as_bytes());
            while let Some(v) = decoder.next_value()? {
                out.push(v);
            }
        }
        decoder.finish()?;
        Ok(out)
    }

    fn body(chunks: Vec<&'static str>) -> BodyStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, sfpipe_client::Error>(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[test]
    fn test_decode_single_chunk() {
        let values = decode_all(&[r#"[{"Id":"001"},{"Id":"002"}]"#]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["Id"], "002");
    }

    #[test]
    fn test_decode_split_everywhere() {
        let json = r#" [ {"Name":"a \"quoted\" ]} name","Nested":{"x":[1,2]}} , {"Id":"002"} ] "#;
        let expected = decode_all(&[json]).unwrap();
        for split in 0..json.len() {
            let (a, b) = json.split_at(split);
            assert_eq!(decode_all(&[a, b]).unwrap(), expected, "split at {split}");
        }
    }

    #[test]
    fn test_decode_scalars_and_empty() {
        assert!(decode_all(&["[]"]).unwrap().is_empty());
        assert_eq!(
            decode_all(&["[1, \"two\", null,true]"]).unwrap(),
            vec![
                Value::from(1),
                Value::from("two"),
                Value::Null,
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = decode_all(&[r#"[{"Id":"001"}"#]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Decode(ref m) if m.contains("truncated")));

        let err = decode_all(&["garbage"]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Decode(_)));

        let err = decode_all(&[""]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Decode(ref m) if m.contains("empty")));
    }

    #[test]
    fn test_decode_exception_envelope() {
        let err = decode_all(&[
            r#"{"exceptionCode":"InvalidBatch","#,
            r#""exceptionMessage":"Records not found"}"#,
        ])
        .unwrap_err();
        assert!(
            matches!(err.kind, ErrorKind::Remote { ref code, .. } if code == "InvalidBatch")
        );
    }

    #[test]
    fn test_into_record_strips_attributes_keeps_order() {
        let value = serde_json::json!({
            "attributes": {"type": "Account", "url": "/services/data/v62.0/sobjects/Account/001"},
            "Id": "001",
            "Name": "Acme",
            "Industry": null
        });
        let record = into_record(value).unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Id", "Name", "Industry"]);

        assert!(into_record(Value::from(3)).is_err());
    }

    #[tokio::test]
    async fn test_record_stream() {
        let stream = record_stream(body(vec![
            r#"[{"attributes":{"type":"Account"},"Id":"0"#,
            r#"01"},{"attributes":{"type":"Account"},"Id":"002"}]"#,
        ]));
        let records: Vec<Record> = stream.try_collect().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Id"], "001");
        assert!(!records[1].contains_key("attributes"));
    }

    #[tokio::test]
    async fn test_record_stream_ends_after_error() {
        let mut stream = record_stream(body(vec![r#"[{"Id":"001"}, 7, {"Id":"003"}]"#]));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
