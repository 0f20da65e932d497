//! Output text decoding and code-page state.
//!
//! The pseudo-console re-encodes the child's console output into a UTF-8
//! VT byte stream, so decoding is streaming UTF-8 with a carry buffer for
//! multi-byte sequences split across chunk boundaries. The assumed code page
//! tracks what the child's console subsystem reports (`chcp`); it is advisory
//! state driving encoding negotiation, not an OS resource.

/// UTF-8 code page identifier (`chcp 65001`).
pub const CP_UTF8: u32 = 65001;

/// Streaming decoder for pseudo-console output.
#[derive(Debug)]
pub struct OutputDecoder {
    code_page: u32,
    pending: Vec<u8>,
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self {
            code_page: CP_UTF8,
            pending: Vec::new(),
        }
    }
}

impl OutputDecoder {
    /// The code page the child console is assumed to use.
    pub fn code_page(&self) -> u32 {
        self.code_page
    }

    /// Record the child console's code page.
    pub fn set_code_page(&mut self, code_page: u32) {
        self.code_page = code_page;
    }

    /// Decode one output chunk into text.
    ///
    /// An incomplete UTF-8 sequence at the end of the chunk is carried over
    /// to the next call; invalid bytes decode to U+FFFD.
    pub fn decode(&mut self, input: &[u8]) -> String {
        let carried;
        let data: &[u8] = if self.pending.is_empty() {
            input
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(input);
            carried = joined;
            &carried
        };

        let mut out = String::with_capacity(data.len());
        let mut rest = data;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees well-formed UTF-8 up to the split
                    out.push_str(unsafe { std::str::from_utf8_unchecked(valid) });

                    match err.error_len() {
                        Some(len) => {
                            out.push('\u{FFFD}');
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete trailing sequence, wait for more bytes
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ascii() {
        let mut decoder = OutputDecoder::default();
        assert_eq!(decoder.decode(b"hello\r\n"), "hello\r\n");
    }

    #[test]
    fn test_decode_split_sequence() {
        let mut decoder = OutputDecoder::default();
        let bytes = "日本語".as_bytes();
        let first = decoder.decode(&bytes[..4]);
        let second = decoder.decode(&bytes[4..]);
        assert_eq!(format!("{first}{second}"), "日本語");
    }

    #[test]
    fn test_decode_invalid_byte() {
        let mut decoder = OutputDecoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_incomplete_tail_not_flushed_early() {
        let mut decoder = OutputDecoder::default();
        let bytes = "é".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..]), "é");
    }

    #[test]
    fn test_code_page_state() {
        let mut decoder = OutputDecoder::default();
        assert_eq!(decoder.code_page(), CP_UTF8);
        decoder.set_code_page(932);
        assert_eq!(decoder.code_page(), 932);
    }
}
