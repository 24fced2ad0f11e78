//! Protocol Layer: Binary Framing
//!
//! Prinsip desain:
//! - Fixed-size header: kind + panjang body, tanpa magic/checksum
//! - Body sebagai stack value fixed-layout (push/pop LIFO)
//! - Partial I/O: reader/writer melanjutkan frame dari posisi terakhir

mod codec;
mod message;

pub use codec::{encode_frame, FrameReader, FrameWriter};
pub use message::{Message, MessageHeader, MessageKind, RawHeader, HEADER_SIZE};
