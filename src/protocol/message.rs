//! Message Format
//!
//! Layout di wire:
//! ┌─────────────────────────────────────────────────────┐
//! │ Header (8 bytes, fixed): kind u32 | size u32        │
//! ├─────────────────────────────────────────────────────┤
//! │ Body (tepat `size` bytes)                           │
//! └─────────────────────────────────────────────────────┘
//!
//! Tidak ada magic number, delimiter, atau checksum. Integer header memakai
//! byte order native host, jadi kedua peer harus satu arsitektur.
//!
//! Body adalah stack: `push` menambah value di ujung, `pop` mengambil value
//! yang terakhir di-push (LIFO). Receiver harus pop dengan urutan kebalikan
//! dari urutan push di sender.

use std::fmt;
use std::mem;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Mapping antara tipe pesan aplikasi dan nilai 32-bit di wire
///
/// Biasanya diimplementasikan untuk `#[repr(u32)]` enum milik aplikasi.
pub trait MessageKind: Copy + Send + Sync + fmt::Debug + 'static {
    fn to_raw(self) -> u32;

    /// `None` untuk nilai yang tidak dikenal; frame seperti itu
    /// dianggap desync dan connection di-teardown.
    fn from_raw(raw: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    #[inline(always)]
    fn to_raw(self) -> u32 {
        self
    }

    #[inline(always)]
    fn from_raw(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Header persis seperti di wire
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawHeader {
    pub kind: u32,
    pub size: u32,
}

pub const HEADER_SIZE: usize = mem::size_of::<RawHeader>();

/// Header dengan kind yang sudah di-decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    pub kind: T,
    /// Panjang body dalam bytes
    pub size: u32,
}

impl<T: MessageKind> MessageHeader<T> {
    #[inline(always)]
    pub fn to_raw(&self) -> RawHeader {
        RawHeader {
            kind: self.kind.to_raw(),
            size: self.size,
        }
    }

    #[inline(always)]
    pub fn from_raw(raw: RawHeader) -> Option<Self> {
        Some(Self {
            kind: T::from_raw(raw.kind)?,
            size: raw.size,
        })
    }
}

/// Satu pesan: header + body
///
/// Invariant: `header.size == body.len()`. Semua mutasi body lewat method
/// di sini supaya invariant itu terjaga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    header: MessageHeader<T>,
    body: Vec<u8>,
}

impl<T: MessageKind> Message<T> {
    /// Pesan kosong dengan kind tertentu
    pub fn new(kind: T) -> Self {
        Self {
            header: MessageHeader { kind, size: 0 },
            body: Vec::new(),
        }
    }

    /// Pesan dengan body raw yang sudah jadi
    ///
    /// # Panics
    ///
    /// Jika `body` lebih dari `u32::MAX` bytes (tidak muat di header).
    pub fn with_body(kind: T, body: Vec<u8>) -> Self {
        Self {
            header: MessageHeader {
                kind,
                size: wire_size(body.len()),
            },
            body,
        }
    }

    pub(crate) fn from_parts(header: MessageHeader<T>, body: Vec<u8>) -> Self {
        debug_assert_eq!(header.size as usize, body.len());
        Self { header, body }
    }

    #[inline(always)]
    pub fn kind(&self) -> T {
        self.header.kind
    }

    pub fn set_kind(&mut self, kind: T) {
        self.header.kind = kind;
    }

    #[inline(always)]
    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    /// Panjang body dalam bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Append fixed-layout value ke ujung body
    ///
    /// ```
    /// use iris::protocol::Message;
    ///
    /// let mut msg = Message::new(1u32);
    /// msg.push(&7u16).push(&[1u8, 2, 3]);
    /// assert_eq!(msg.size(), 5);
    /// ```
    ///
    /// # Panics
    ///
    /// Jika body akan melebihi `u32::MAX` bytes; body tidak diubah.
    pub fn push<V>(&mut self, value: &V) -> &mut Self
    where
        V: IntoBytes + Immutable + ?Sized,
    {
        let bytes = value.as_bytes();
        let size = wire_size(self.body.len().saturating_add(bytes.len()));
        self.body.extend_from_slice(bytes);
        self.header.size = size;
        self
    }

    /// Ambil value yang terakhir di-push (LIFO)
    ///
    /// Returns `None` jika body lebih pendek dari `size_of::<V>()`;
    /// dalam kasus itu body tidak berubah.
    pub fn pop<V: FromBytes>(&mut self) -> Option<V> {
        let start = self.body.len().checked_sub(mem::size_of::<V>())?;
        let value = V::read_from_bytes(&self.body[start..]).ok()?;
        self.body.truncate(start);
        self.header.size = start as u32;
        Some(value)
    }
}

/// Panjang body sebagai field `size` header, tidak pernah dipotong
fn wire_size(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(size) => size,
        Err(_) => panic!("message body of {len} bytes exceeds the u32 size field"),
    }
}

impl<T: MessageKind> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind: {:?} size: {}", self.header.kind, self.header.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Ping,
        Data,
    }

    impl MessageKind for Kind {
        fn to_raw(self) -> u32 {
            self as u32
        }

        fn from_raw(raw: u32) -> Option<Self> {
            match raw {
                0 => Some(Self::Ping),
                1 => Some(Self::Data),
                _ => None,
            }
        }
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable)]
    struct Point {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 8);
    }

    #[test]
    fn test_header_kind_mapping() {
        let header = MessageHeader {
            kind: Kind::Data,
            size: 12,
        };
        let raw = header.to_raw();
        assert_eq!(raw, RawHeader { kind: 1, size: 12 });
        assert_eq!(MessageHeader::<Kind>::from_raw(raw), Some(header));
        assert_eq!(MessageHeader::<Kind>::from_raw(RawHeader { kind: 9, size: 0 }), None);
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let mut msg = Message::new(Kind::Data);
        let point = Point { x: 1.5, y: -2.0 };

        msg.push(&42u8).push(&point).push(&0xDEAD_BEEFu32).push(&3.25f64);
        assert_eq!(msg.size(), 1 + 8 + 4 + 8);
        assert_eq!(msg.header().size as usize, msg.size());

        assert_eq!(msg.pop::<f64>(), Some(3.25));
        assert_eq!(msg.pop::<u32>(), Some(0xDEAD_BEEF));
        assert_eq!(msg.pop::<Point>(), Some(point));
        assert_eq!(msg.pop::<u8>(), Some(42));
        assert_eq!(msg.size(), 0);
        assert_eq!(msg.header().size, 0);
    }

    #[test]
    fn test_pop_too_large_leaves_body() {
        let mut msg = Message::new(Kind::Ping);
        msg.push(&7u16);

        assert_eq!(msg.pop::<u64>(), None);
        assert_eq!(msg.size(), 2);
        assert_eq!(msg.pop::<u16>(), Some(7));
        assert_eq!(msg.pop::<u8>(), None);
    }

    #[test]
    fn test_with_body_and_display() {
        let msg = Message::with_body(42u32, vec![1, 2, 3]);
        assert_eq!(msg.kind(), 42);
        assert_eq!(msg.header().size, 3);
        assert_eq!(msg.body(), &[1, 2, 3]);
        assert_eq!(msg.to_string(), "kind: 42 size: 3");
    }

    #[test]
    fn test_wire_size_at_limit() {
        assert_eq!(wire_size(0), 0);
        assert_eq!(wire_size(u32::MAX as usize), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    #[should_panic(expected = "exceeds the u32 size field")]
    fn test_wire_size_rejects_oversized_body() {
        wire_size(u32::MAX as usize + 1);
    }
}
