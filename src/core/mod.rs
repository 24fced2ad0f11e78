//! Core module: concurrency primitives
//!
//! Satu-satunya titik sinkronisasi antara execution thread (socket I/O)
//! dan application thread adalah `TsQueue`.

mod queue;

pub use queue::TsQueue;
