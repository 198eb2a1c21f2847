/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes arrive in arbitrary network chunks: a multi-byte character or an
/// event can be split anywhere. The decoder buffers until an event is
/// complete (blank line) and yields the `data:` payloads it contained.
#[derive(Debug, Default)]
pub struct SseDecoder {
    byte_buf: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);

        // Decode as much valid UTF-8 as possible, keeping a split
        // character's leading bytes for the next call.
        let decoded = match std::str::from_utf8(&self.byte_buf) {
            Ok(s) => {
                let s = s.to_string();
                self.byte_buf.clear();
                s
            }
            Err(e) if e.error_len().is_none() => {
                let valid_up_to = e.valid_up_to();
                let s = String::from_utf8_lossy(&self.byte_buf[..valid_up_to]).into_owned();
                self.byte_buf.drain(..valid_up_to);
                s
            }
            Err(_) => {
                let s = String::from_utf8_lossy(&self.byte_buf).into_owned();
                self.byte_buf.clear();
                s
            }
        };

        // Normalize the whole buffer: a CRLF pair can straddle two pushes.
        self.buffer.push_str(&decoded);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(event_end) = self.buffer.find("\n\n") {
            let event_text: String = self.buffer.drain(..event_end + 2).collect();
            payloads.extend(data_lines(&event_text));
        }
        payloads
    }

    /// Flush a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.byte_buf.clear();
        data_lines(&rest)
    }
}

fn data_lines(event_text: &str) -> Vec<String> {
    event_text
        .lines()
        .filter_map(|line| {
            line.strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "data: {\"a\":\"héllo\"}\r\n\r\n: keepalive\n\ndata: [DONE]\n\n";

    #[test]
    fn whole_body_yields_each_payload() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(BODY.as_bytes());
        assert_eq!(payloads, vec!["{\"a\":\"héllo\"}", "[DONE]"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn any_byte_split_yields_the_same_payloads() {
        let bytes = BODY.as_bytes();
        for split in 1..bytes.len() {
            let mut decoder = SseDecoder::new();
            let mut payloads = decoder.push(&bytes[..split]);
            payloads.extend(decoder.push(&bytes[split..]));
            assert_eq!(
                payloads,
                vec!["{\"a\":\"héllo\"}", "[DONE]"],
                "split at byte {}",
                split
            );
        }
    }

    #[test]
    fn unterminated_trailing_event_is_flushed() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data:{\"x\":1}").is_empty());
        assert_eq!(decoder.finish(), vec!["{\"x\":1}"]);
    }
}
