//! Incremental consumer for the `/api/query` response stream.
//!
//! The backend streams newline-delimited JSON records, one object per line:
//! `{"response": "..."}` or `{"error": "..."}`. Chunk boundaries are
//! arbitrary, so both a multi-byte UTF-8 character and a JSON line can be
//! split across reads. `StreamState` carries that partial state explicitly
//! so the line parsing is testable without a transport behind it.

use anyhow::Result;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

/// One decoded record from the wire. Lines that are blank, malformed, or
/// carry neither field produce no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    Response(String),
    ServerError(String),
}

#[derive(Deserialize)]
struct WireRecord {
    response: Option<String>,
    error: Option<String>,
}

/// Decode state carried across reads: undecoded trailing bytes of a partial
/// UTF-8 sequence, plus the text of a line not yet terminated by `\n`.
#[derive(Debug, Default)]
pub struct StreamState {
    residual: Vec<u8>,
    pending: String,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning every record completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        self.residual.extend_from_slice(chunk);
        let decoded = drain_decoded(&mut self.residual);
        self.pending.push_str(&decoded);

        let mut records = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(record) = parse_line(line.trim()) {
                records.push(record);
            }
        }
        records
    }

    /// Flush state at end of stream: a trailing line without a newline is
    /// still a record, and a dangling partial UTF-8 tail decodes lossily.
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        if !self.residual.is_empty() {
            let tail = String::from_utf8_lossy(&self.residual).into_owned();
            self.pending.push_str(&tail);
            self.residual.clear();
        }
        let line = std::mem::take(&mut self.pending);
        parse_line(line.trim()).into_iter().collect()
    }
}

/// Decode the longest valid UTF-8 prefix of `residual`, leaving an
/// incomplete trailing sequence in place for the next read. Invalid bytes in
/// the middle of the buffer are replaced rather than stalling the stream.
fn drain_decoded(residual: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut buf = std::mem::take(residual);
    loop {
        match std::str::from_utf8(&buf) {
            Ok(text) => {
                out.push_str(text);
                buf.clear();
                break;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        out.push('\u{FFFD}');
                        buf.drain(..valid + bad);
                    }
                    None => {
                        // Incomplete sequence at the end; keep for next chunk
                        buf.drain(..valid);
                        break;
                    }
                }
            }
        }
    }
    *residual = buf;
    out
}

fn parse_line(line: &str) -> Option<StreamRecord> {
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<WireRecord>(line) {
        Ok(record) => {
            if let Some(error) = record.error {
                Some(StreamRecord::ServerError(error))
            } else if let Some(response) = record.response {
                Some(StreamRecord::Response(response))
            } else {
                tracing::debug!(line, "stream record has neither response nor error");
                None
            }
        }
        Err(err) => {
            tracing::warn!(%err, line, "skipping malformed stream line");
            None
        }
    }
}

/// Fold a batch of records into the accumulated response text. Server-side
/// errors are annotated inline rather than terminating the stream; the
/// backend may keep sending data after one. Returns whether the batch was
/// non-empty.
fn apply_records(accumulated: &mut String, records: Vec<StreamRecord>) -> bool {
    let got_any = !records.is_empty();
    for record in records {
        match record {
            StreamRecord::Response(text) => accumulated.push_str(&text),
            StreamRecord::ServerError(message) => {
                accumulated.push_str("\n**Error:** ");
                accumulated.push_str(&message);
            }
        }
    }
    got_any
}

/// Drive a byte stream to completion, invoking `on_fragment` with the full
/// accumulated text after every read that completed at least one record.
///
/// Only a transport-level read failure is an error; malformed lines are
/// skipped and server-signaled errors are folded into the text. Dropping the
/// future (e.g. aborting the task that drives it) stops the read loop at the
/// current await point, so no reads continue after cancellation.
pub async fn consume<S, B, E>(stream: S, mut on_fragment: impl FnMut(&str)) -> Result<String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut state = StreamState::new();
    let mut accumulated = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => anyhow::bail!("response stream failed: {err}"),
        };
        if apply_records(&mut accumulated, state.push_chunk(chunk.as_ref())) {
            on_fragment(&accumulated);
        }
    }

    if apply_records(&mut accumulated, state.finish()) {
        on_fragment(&accumulated);
    }
    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn ok_chunks(chunks: Vec<&[u8]>) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        stream::iter(chunks.into_iter().map(|c| Ok(c.to_vec())).collect::<Vec<_>>())
    }

    #[test]
    fn records_concatenate_in_arrival_order() {
        let mut state = StreamState::new();
        let records = state.push_chunk(b"{\"response\":\"po\"}\n{\"response\":\"d1\"}\n");
        assert_eq!(
            records,
            vec![
                StreamRecord::Response("po".to_string()),
                StreamRecord::Response("d1".to_string()),
            ]
        );
    }

    #[test]
    fn line_split_across_chunks_parses_once_complete() {
        let mut state = StreamState::new();
        assert!(state.push_chunk(b"{\"response\":\"he").is_empty());
        let records = state.push_chunk(b"llo\"}\n");
        assert_eq!(records, vec![StreamRecord::Response("hello".to_string())]);
    }

    #[test]
    fn multibyte_char_split_across_chunks_decodes_intact() {
        // "é" is 0xC3 0xA9; split between the two bytes
        let mut state = StreamState::new();
        assert!(state.push_chunk(b"{\"response\":\"caf\xc3").is_empty());
        let records = state.push_chunk(b"\xa9\"}\n");
        assert_eq!(records, vec![StreamRecord::Response("café".to_string())]);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let mut state = StreamState::new();
        let records =
            state.push_chunk(b"{\"response\":\"a\"}\nnot json at all\n{\"response\":\"b\"}\n");
        assert_eq!(
            records,
            vec![
                StreamRecord::Response("a".to_string()),
                StreamRecord::Response("b".to_string()),
            ]
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut state = StreamState::new();
        let records = state.push_chunk(b"\n\n{\"response\":\"x\"}\n\n");
        assert_eq!(records, vec![StreamRecord::Response("x".to_string())]);
    }

    #[test]
    fn record_without_known_fields_is_ignored() {
        let mut state = StreamState::new();
        assert!(state.push_chunk(b"{\"status\":\"ok\"}\n").is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_trailing_line() {
        let mut state = StreamState::new();
        assert!(state.push_chunk(b"{\"response\":\"tail\"}").is_empty());
        let records = state.finish();
        assert_eq!(records, vec![StreamRecord::Response("tail".to_string())]);
    }

    #[tokio::test]
    async fn consume_accumulates_all_responses() {
        let chunks = ok_chunks(vec![b"{\"response\":\"po\"}\n", b"{\"response\":\"d1\"}\n"]);
        let mut fragments = Vec::new();
        let text = consume(chunks, |t| fragments.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "pod1");
        assert_eq!(fragments, vec!["po".to_string(), "pod1".to_string()]);
    }

    #[tokio::test]
    async fn consume_batches_fragments_per_read_not_per_line() {
        let chunks = ok_chunks(vec![b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n"]);
        let mut fragments = Vec::new();
        consume(chunks, |t| fragments.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(fragments, vec!["ab".to_string()]);
    }

    #[tokio::test]
    async fn consume_skips_malformed_line_and_keeps_streaming() {
        let chunks = ok_chunks(vec![
            b"{\"response\":\"a\"}\n",
            b"garbage\n",
            b"{\"response\":\"b\"}\n",
        ]);
        let text = consume(chunks, |_| {}).await.unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn server_error_record_annotates_and_resolves() {
        let chunks = ok_chunks(vec![b"{\"error\":\"X\"}\n"]);
        let mut fragments = Vec::new();
        let text = consume(chunks, |t| fragments.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "\n**Error:** X");
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn server_error_does_not_stop_later_responses() {
        let chunks = ok_chunks(vec![b"{\"response\":\"a\"}\n{\"error\":\"e\"}\n{\"response\":\"b\"}\n"]);
        let text = consume(chunks, |_| {}).await.unwrap();
        assert_eq!(text, "a\n**Error:** eb");
    }

    #[tokio::test]
    async fn transport_error_rejects_with_description() {
        let chunks = stream::iter(vec![
            Ok(b"{\"response\":\"a\"}\n".to_vec()),
            Err("connection reset".to_string()),
        ]);
        let err = consume(chunks, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn split_delivery_matches_unsplit_delivery() {
        let whole = ok_chunks(vec!["{\"response\":\"naïve £5\"}\n".as_bytes()]);
        let bytes = "{\"response\":\"naïve £5\"}\n".as_bytes();
        // 16 falls between the two bytes of "ï"
        let split = ok_chunks(vec![&bytes[..16], &bytes[16..]]);
        let a = consume(whole, |_| {}).await.unwrap();
        let b = consume(split, |_| {}).await.unwrap();
        assert_eq!(a, b);
    }
}
