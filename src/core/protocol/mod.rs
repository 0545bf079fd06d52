// src/core/protocol/mod.rs

pub mod frame_reader;
pub mod resp_value;

pub use frame_reader::{FrameReader, frame_len};
pub use resp_value::{RespValue, RespValueCodec, parse_value};
