//! Message codec: framing for the wire protocol.
//!
//! Peers write JSON objects back to back with no length prefix or delimiter.
//! [`JsonStreamDecoder`] recovers object boundaries by counting braces outside
//! string literals, and keeps an incomplete trailing object buffered until the
//! rest of it arrives.

use serde_json::Value;

use crate::ProtocolError;

/// Maximum message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a message for transmission.
pub fn encode(message: &Value) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Incremental splitter for a stream of concatenated JSON objects.
///
/// Bytes between objects that cannot start an object (whitespace, stray
/// garbage) are discarded.
#[derive(Debug)]
pub struct JsonStreamDecoder {
    buf: Vec<u8>,
    /// Scan position inside `buf`; everything before it has been classified.
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    max_size: usize,
}

impl Default for JsonStreamDecoder {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl JsonStreamDecoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            max_size,
        }
    }

    /// Append bytes received from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held for an object that has not been completed yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete object out of the buffer.
    ///
    /// Returns `None` when more input is needed. A complete but unparsable
    /// object yields `Some(Err(Malformed))` and is consumed, so the caller can
    /// log it and keep decoding. An object that grows past the size limit
    /// yields `Some(Err(MessageTooLarge))` and the buffer is reset.
    pub fn next_message(&mut self) -> Option<Result<Value, ProtocolError>> {
        if self.depth == 0 {
            match self.buf.iter().position(|&b| b == b'{') {
                Some(start) => {
                    self.buf.drain(..start);
                    self.pos = 0;
                }
                None => {
                    self.buf.clear();
                    self.pos = 0;
                    return None;
                }
            }
        }

        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let frame: Vec<u8> = self.buf.drain(..self.pos).collect();
                        self.pos = 0;
                        return Some(parse_frame(&frame, self.max_size));
                    }
                }
                _ => {}
            }
        }

        if self.buf.len() > self.max_size {
            let size = self.buf.len();
            self.reset();
            return Some(Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_size,
            }));
        }
        None
    }

    /// Feed `data` and collect every object it completes.
    pub fn decode(&mut self, data: &[u8]) -> Vec<Result<Value, ProtocolError>> {
        self.extend(data);
        let mut out = Vec::new();
        while let Some(item) = self.next_message() {
            out.push(item);
        }
        out
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

fn parse_frame(frame: &[u8], max_size: usize) -> Result<Value, ProtocolError> {
    if frame.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: frame.len(),
            max: max_size,
        });
    }
    serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
