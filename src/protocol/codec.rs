//! Frame Reader / Writer
//!
//! State machine untuk partial I/O di atas non-blocking socket.
//! Setiap kali socket siap, pipeline melanjutkan dari posisi terakhir:
//!
//! - Read:  Header -> Body -> (pesan lengkap) -> Header -> ...
//! - Write: Idle -> Header -> Body -> Idle
//!
//! Keduanya generic atas `Read` / `Write`, jadi bisa ditest tanpa socket.

use std::io::{self, Read, Write};
use std::mem;

use zerocopy::{FromBytes, IntoBytes};

use super::message::{Message, MessageHeader, MessageKind, RawHeader, HEADER_SIZE};

/// Encode satu frame utuh (header + body) ke buffer baru
pub fn encode_frame<T: MessageKind>(message: &Message<T>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + message.size());
    frame.extend_from_slice(message.header().to_raw().as_bytes());
    frame.extend_from_slice(message.body());
    frame
}

enum ReadState<T> {
    Header {
        buf: [u8; HEADER_SIZE],
        filled: usize,
    },
    Body {
        header: MessageHeader<T>,
        body: Vec<u8>,
        filled: usize,
    },
}

impl<T> ReadState<T> {
    const fn header() -> Self {
        Self::Header {
            buf: [0u8; HEADER_SIZE],
            filled: 0,
        }
    }
}

/// Read pipeline: header dulu, lalu tepat `size` bytes body
pub struct FrameReader<T> {
    state: ReadState<T>,
    max_body_size: usize,
}

impl<T: MessageKind> FrameReader<T> {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            state: ReadState::header(),
            max_body_size,
        }
    }

    /// Lanjutkan membaca dari `src`.
    ///
    /// Returns `Ok(Some(msg))` saat satu frame lengkap, `Ok(None)` saat
    /// source `WouldBlock`. EOF di tengah stream dan header yang tidak valid
    /// dilaporkan sebagai error; keduanya terminal untuk connection.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> io::Result<Option<Message<T>>> {
        loop {
            match &mut self.state {
                ReadState::Header { buf, filled } => {
                    match read_some(src, &mut buf[*filled..])? {
                        Some(n) => *filled += n,
                        None => return Ok(None),
                    }
                    if *filled < HEADER_SIZE {
                        continue;
                    }

                    let raw = RawHeader::read_from_bytes(&buf[..])
                        .map_err(|_| invalid_data("malformed header"))?;
                    let header = MessageHeader::<T>::from_raw(raw)
                        .ok_or_else(|| invalid_data(format!("unknown message kind {}", raw.kind)))?;
                    let size = header.size as usize;
                    if size > self.max_body_size {
                        return Err(invalid_data(format!(
                            "body of {} bytes exceeds limit of {}",
                            size, self.max_body_size
                        )));
                    }

                    if size == 0 {
                        self.state = ReadState::header();
                        return Ok(Some(Message::from_parts(header, Vec::new())));
                    }
                    self.state = ReadState::Body {
                        header,
                        body: vec![0u8; size],
                        filled: 0,
                    };
                }
                ReadState::Body {
                    header,
                    body,
                    filled,
                } => {
                    match read_some(src, &mut body[*filled..])? {
                        Some(n) => *filled += n,
                        None => return Ok(None),
                    }
                    if *filled < body.len() {
                        continue;
                    }

                    let message = Message::from_parts(*header, mem::take(body));
                    self.state = ReadState::header();
                    return Ok(Some(message));
                }
            }
        }
    }

    /// True jika tidak sedang di tengah frame
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadState::Header { filled: 0, .. })
    }
}

/// Satu kali `read`, dengan `Interrupted` di-retry dan EOF jadi error
fn read_some<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        match src.read(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(n) => return Ok(Some(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

enum WriteState<T> {
    Idle,
    Header {
        message: Message<T>,
        header: [u8; HEADER_SIZE],
        written: usize,
    },
    Body {
        message: Message<T>,
        written: usize,
    },
}

/// Write pipeline: satu frame aktif dalam satu waktu
///
/// Karena hanya ada satu frame in-flight, frame dari pengirim berbeda
/// tidak pernah saling interleave di wire.
pub struct FrameWriter<T> {
    state: WriteState<T>,
}

impl<T: MessageKind> Default for FrameWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> FrameWriter<T> {
    pub fn new() -> Self {
        Self {
            state: WriteState::Idle,
        }
    }

    #[inline(always)]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, WriteState::Idle)
    }

    /// Mulai frame baru. Frame sebelumnya harus sudah selesai.
    pub fn start(&mut self, message: Message<T>) {
        debug_assert!(self.is_idle(), "frame already in flight");
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(message.header().to_raw().as_bytes());
        self.state = WriteState::Header {
            message,
            header,
            written: 0,
        };
    }

    /// Tulis sebanyak yang diterima `dst`.
    ///
    /// Returns `Ok(true)` saat frame selesai (writer kembali Idle),
    /// `Ok(false)` saat `dst` `WouldBlock` di tengah frame.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<bool> {
        loop {
            match &mut self.state {
                WriteState::Idle => return Ok(true),
                WriteState::Header {
                    header, written, ..
                } => {
                    match write_some(dst, &header[*written..])? {
                        Some(n) => *written += n,
                        None => return Ok(false),
                    }
                    if *written < HEADER_SIZE {
                        continue;
                    }
                    let WriteState::Header { message, .. } =
                        mem::replace(&mut self.state, WriteState::Idle)
                    else {
                        unreachable!()
                    };
                    if message.size() > 0 {
                        self.state = WriteState::Body {
                            message,
                            written: 0,
                        };
                    }
                }
                WriteState::Body { message, written } => {
                    match write_some(dst, &message.body()[*written..])? {
                        Some(n) => *written += n,
                        None => return Ok(false),
                    }
                    if *written == message.size() {
                        self.state = WriteState::Idle;
                    }
                }
            }
        }
    }
}

fn write_some<W: Write>(dst: &mut W, buf: &[u8]) -> io::Result<Option<usize>> {
    loop {
        match dst.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write frame to socket",
                ))
            }
            Ok(n) => return Ok(Some(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Source yang memberi data dalam potongan kecil, diselingi WouldBlock
    struct Trickle {
        data: VecDeque<u8>,
        chunk: usize,
        block_next: bool,
    }

    impl Trickle {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data: data.into(),
                chunk,
                block_next: false,
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.block_next || self.data.is_empty() {
                self.block_next = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.block_next = true;
            let n = self.chunk.min(buf.len()).min(self.data.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.data.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    /// Sink yang menerima sedikit bytes per call, lalu WouldBlock
    struct Narrow {
        out: Vec<u8>,
        chunk: usize,
        block_next: bool,
        fail_after: Option<usize>,
    }

    impl Write for Narrow {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_after {
                if self.out.len() >= limit {
                    return Err(io::ErrorKind::BrokenPipe.into());
                }
            }
            if self.block_next {
                self.block_next = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.block_next = true;
            let n = self.chunk.min(buf.len());
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn read_all(reader: &mut FrameReader<u32>, src: &mut Trickle) -> Vec<Message<u32>> {
        let mut out = Vec::new();
        // Setiap WouldBlock = tunggu readiness berikutnya
        for _ in 0..10_000 {
            match reader.read_from(src) {
                Ok(Some(msg)) => out.push(msg),
                Ok(None) if src.data.is_empty() => break,
                Ok(None) => {}
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
        out
    }

    #[test]
    fn test_reader_reassembles_chunked_frames() {
        let first = Message::with_body(42u32, vec![1, 2, 3]);
        let empty = Message::new(7u32);
        let mut big = Message::new(9u32);
        big.push(&[0xABu8; 100]);

        let mut wire = encode_frame(&first);
        wire.extend(encode_frame(&empty));
        wire.extend(encode_frame(&big));

        let mut src = Trickle::new(wire, 3);
        let mut reader = FrameReader::new(1024);
        let got = read_all(&mut reader, &mut src);

        assert_eq!(got, vec![first, empty, big]);
        assert!(reader.is_idle());
    }

    #[test]
    fn test_reader_rejects_oversized_body() {
        let msg = Message::with_body(1u32, vec![0u8; 64]);
        let mut src = Trickle::new(encode_frame(&msg), 64);
        let mut reader = FrameReader::<u32>::new(16);

        let err = reader.read_from(&mut src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_reader_eof_mid_frame_is_error() {
        let msg = Message::with_body(1u32, vec![1, 2, 3, 4]);
        let wire = encode_frame(&msg);
        let mut src = &wire[..HEADER_SIZE + 2];
        let mut reader = FrameReader::<u32>::new(1024);

        let err = reader.read_from(&mut src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_reader_unknown_kind_is_error() {
        #[derive(Debug, Clone, Copy)]
        struct OnlyZero;
        impl MessageKind for OnlyZero {
            fn to_raw(self) -> u32 {
                0
            }
            fn from_raw(raw: u32) -> Option<Self> {
                (raw == 0).then_some(OnlyZero)
            }
        }

        let wire = encode_frame(&Message::new(5u32));
        let mut src = &wire[..];
        let mut reader = FrameReader::<OnlyZero>::new(1024);
        let err = reader.read_from(&mut src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_writer_resumes_after_would_block() {
        let mut msg = Message::new(3u32);
        msg.push(&1234u32).push(&[9u8; 20]);
        let expected = encode_frame(&msg);

        let mut sink = Narrow {
            out: Vec::new(),
            chunk: 5,
            block_next: false,
            fail_after: None,
        };
        let mut writer = FrameWriter::new();
        writer.start(msg);

        let mut rounds = 0;
        while !writer.write_to(&mut sink).unwrap() {
            rounds += 1;
            assert!(rounds < 100);
        }
        assert!(writer.is_idle());
        assert!(rounds > 1);
        assert_eq!(sink.out, expected);
    }

    #[test]
    fn test_writer_header_only_frame() {
        let mut sink: Vec<u8> = Vec::new();
        let mut writer = FrameWriter::new();
        writer.start(Message::new(11u32));

        assert!(writer.write_to(&mut sink).unwrap());
        assert_eq!(sink.len(), HEADER_SIZE);
        assert!(writer.is_idle());
    }

    #[test]
    fn test_writer_error_mid_frame() {
        let msg = Message::with_body(1u32, vec![0u8; 32]);
        let mut sink = Narrow {
            out: Vec::new(),
            chunk: 4,
            block_next: false,
            fail_after: Some(12),
        };
        let mut writer = FrameWriter::new();
        writer.start(msg);

        let mut result = writer.write_to(&mut sink);
        while let Ok(false) = result {
            result = writer.write_to(&mut sink);
        }
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert!(!writer.is_idle());
    }
}
