//! Framed, length-prefixed TCP stream codec shared by the DTL server and
//! client: opcodes, primitive field encoding, and the cork/uncork framing
//! discipline of spec.md §4.1/§6.

mod buf;
mod codec;
mod error;
mod opcode;

pub use buf::{FrameReader, FrameWriter};
pub use codec::{Codec, Transport};
pub use error::WireError;
pub use opcode::Opcode;
