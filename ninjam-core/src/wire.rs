//! Framing: 1 byte type + 4 bytes LE payload length, then the payload.
//! `MessageReader`/`MessageWriter` are the cursor codecs every payload is built with.

/// Size of the fixed message header (type + length).
pub const HEADER_SIZE: usize = 5;

/// Largest payload accepted from the stream. Interval chunks are far below this.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One complete message as it came off the stream: type code and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Encode a frame: type byte, payload length (u32 LE), payload.
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u32::MAX as usize);
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.push(msg_type);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// Nothing is consumed on `NeedMore`; the caller keeps the bytes and retries with more data.
/// A header declaring more than `MAX_FRAME_LEN` payload bytes is `TooLarge`.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg_type = bytes[0];
    let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge { msg_type, len });
    }
    if bytes.len() - HEADER_SIZE < len {
        return Err(FrameDecodeError::NeedMore);
    }
    let payload = bytes[HEADER_SIZE..HEADER_SIZE + len].to_vec();
    Ok((Frame { msg_type, payload }, HEADER_SIZE + len))
}

/// Error decoding a frame header/payload from a partial buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("0x{msg_type:02x} frame declares {len} payload bytes, over the frame limit")]
    TooLarge { msg_type: u8, len: usize },
}

/// Error reading a field from a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("read past end of payload (wanted {wanted} bytes at offset {offset}, {available} left)")]
    UnexpectedEnd {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    #[error("string at offset {0} is missing its NUL terminator")]
    Unterminated(usize),
}

/// Sequential little-endian reader over one payload.
pub struct MessageReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let available = self.remaining();
        if available < n {
            return Err(ReadError::UnexpectedEnd {
                offset: self.offset,
                wanted: n,
                available,
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ReadError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, ReadError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, ReadError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ReadError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, ReadError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Next `N` bytes as a fixed array (GUIDs, fourCCs, nonces).
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Next `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        self.take(n)
    }

    /// Everything left in the payload.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.offset..];
        self.offset = self.data.len();
        out
    }

    /// Exactly `len` bytes as a string; no terminator is consumed.
    pub fn fixed_string(&mut self, len: usize) -> Result<String, ReadError> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// String up to the next NUL byte. The NUL is consumed and not returned.
    pub fn cstring(&mut self) -> Result<String, ReadError> {
        let start = self.offset;
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(ReadError::Unterminated(start))?;
        let s = String::from_utf8_lossy(&self.data[start..start + nul]).into_owned();
        self.offset = start + nul + 1;
        Ok(s)
    }

    pub fn has_more(&self) -> bool {
        self.offset < self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn position(&self) -> usize {
        self.offset
    }
}

/// Fixed-size little-endian writer. The size is set up front; writing past it is a bug
/// in the caller's size computation and panics.
pub struct MessageWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl MessageWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        assert!(
            self.buf.len() + bytes.len() <= self.capacity,
            "message writer overflow: {} + {} > {}",
            self.buf.len(),
            bytes.len(),
            self.capacity
        );
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn put_i8(&mut self, v: i8) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i16(&mut self, v: i16) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    pub fn put_zeros(&mut self, count: usize) {
        for _ in 0..count {
            self.put_u8(0);
        }
    }

    /// Exactly `len` bytes of `s`, zero-padded if shorter; no terminator.
    pub fn put_fixed_string(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(len);
        self.put(&bytes[..n]);
        self.put_zeros(len - n);
    }

    /// `s` up to its first NUL, then a NUL byte. Takes `cstring_len(s)` bytes.
    pub fn put_cstring(&mut self, s: &str) {
        self.put(cstring_bytes(s));
        self.put_u8(0);
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn into_inner(self) -> Vec<u8> {
        debug_assert!(self.is_full(), "message writer not filled");
        self.buf
    }
}

/// Encoded size of a NUL-terminated string.
pub fn cstring_len(s: &str) -> usize {
    cstring_bytes(s).len() + 1
}

/// An interior NUL would end the field early on the receiving side, so it ends it here.
fn cstring_bytes(s: &str) -> &[u8] {
    let bytes = s.as_bytes();
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
