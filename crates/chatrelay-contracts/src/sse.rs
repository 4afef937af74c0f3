//! Server-Sent-Events framing.
//!
//! The relay writes one `data: <json>\n\n` frame per [`StreamEvent`]. Readers
//! receive those bytes in arbitrary chunks, so decoding is incremental: bytes
//! go through [`Utf8ChunkDecoder`] first, then the text is split on blank
//! lines by [`SseDecoder`]. Both the upstream OpenAI parsers and the client
//! consumer use the same decoder.

use crate::wire::StreamEvent;

const FRAME_DELIMITER: &str = "\n\n";
const REPLACEMENT: char = '\u{FFFD}';

/// Encode an event as a single SSE data frame.
pub fn encode_data_frame(event: &StreamEvent) -> String {
    let json = serde_json::to_string(event)
        .unwrap_or_else(|_| r#"{"type":"error","error":"unserializable event"}"#.to_string());
    format!("data: {}{}", json, FRAME_DELIMITER)
}

/// Parse the JSON payload of a data frame.
///
/// Returns `None` for frames that carry no data (comments, bare `event:` lines).
pub fn parse_event_frame(frame: &SseFrame) -> Option<Result<StreamEvent, serde_json::Error>> {
    if frame.data.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&frame.data))
}

/// Stateful UTF-8 decoder that holds back incomplete trailing sequences.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk. Bytes of a character that straddles the chunk
    /// boundary are kept until the rest of the character arrives.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut offset = 0;

        while offset < self.pending.len() {
            match std::str::from_utf8(&self.pending[offset..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    offset = self.pending.len();
                }
                Err(err) => {
                    let valid_end = offset + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[offset..valid_end]));
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(REPLACEMENT);
                            offset = valid_end + invalid_len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            offset = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..offset);
        out
    }

    /// Number of bytes held back from the last chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush at end of input. A dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        REPLACEMENT.to_string()
    }
}

/// One complete SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    fn parse(block: &str) -> Option<Self> {
        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "data" => data_lines.push(value),
                "event" => event = Some(value.to_string()),
                _ => {}
            }
        }

        if event.is_none() && data_lines.is_empty() {
            return None;
        }

        Some(Self {
            event,
            data: data_lines.join("\n"),
        })
    }
}

/// Incremental SSE frame splitter.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8ChunkDecoder,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let block: String = self.buffer.drain(..pos + FRAME_DELIMITER.len()).collect();
            if let Some(frame) = SseFrame::parse(&block[..pos]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Text received after the last complete frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Parse whatever is left when the byte stream ends without a final blank
    /// line. Upstream parsers use this for providers that drop the last
    /// delimiter; the client consumer never force-flushes.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        let block = std::mem::take(&mut self.buffer);
        SseFrame::parse(block.trim_end_matches('\n'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::content("Hi"),
            StreamEvent::content(" thére 🌍"),
            StreamEvent::content("日本語\n改行"),
            StreamEvent::Done,
        ]
    }

    fn encode_all(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .map(encode_data_frame)
            .collect::<String>()
            .into_bytes()
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = SseDecoder::new();
        chunks
            .iter()
            .flat_map(|chunk| decoder.push(chunk))
            .filter_map(|frame| parse_event_frame(&frame))
            .map(|parsed| parsed.unwrap())
            .collect()
    }

    #[test]
    fn test_encode_data_frame_wire_format() {
        assert_eq!(
            encode_data_frame(&StreamEvent::content("Hi")),
            "data: {\"type\":\"content\",\"content\":\"Hi\"}\n\n"
        );
        assert_eq!(
            encode_data_frame(&StreamEvent::Done),
            "data: {\"type\":\"done\"}\n\n"
        );
    }

    #[test]
    fn test_encoded_newlines_stay_on_one_line() {
        let frame = encode_data_frame(&StreamEvent::content("a\nb"));
        assert_eq!(frame.matches('\n').count(), 2);
    }

    #[test]
    fn test_every_two_way_split_decodes_identically() {
        let events = sample_events();
        let bytes = encode_all(&events);

        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[head, tail]), events, "split at {}", split);
        }
    }

    #[test]
    fn test_single_byte_chunks_decode_identically() {
        let events = sample_events();
        let bytes = encode_all(&events);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), events);
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {\"type\":\"done\"}\n\ndata: {\"type\":");
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.buffered(), "data: {\"type\":");

        let frames = decoder.push(b"\"done\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn test_crlf_delimiters_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"done\"}\r\n\r").is_empty());
        let frames = decoder.push(b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"done\"}");
    }

    #[test]
    fn test_event_name_comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(
            b": keepalive\n\nevent: thread.message.delta\ndata: line one\ndata:line two\n\n",
        );
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("thread.message.delta".to_string()),
                data: "line one\nline two".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_event_frame_skips_empty_and_reports_malformed() {
        assert!(parse_event_frame(&SseFrame::default()).is_none());

        let malformed = SseFrame {
            event: None,
            data: "{not json".to_string(),
        };
        assert!(parse_event_frame(&malformed).unwrap().is_err());
    }

    #[test]
    fn test_utf8_decoder_holds_split_character() {
        let mut decoder = Utf8ChunkDecoder::new();
        let bytes = "é".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(&bytes[1..]), "é");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");

        assert_eq!(decoder.decode(&[0xe6, 0x97]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_finish_parses_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "[DONE]");
        assert!(decoder.finish().is_none());
    }
}
