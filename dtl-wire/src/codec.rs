use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use dtl_core::ClusterLocation;
use log::trace;

use crate::buf::{FrameReader, FrameWriter};
use crate::error::WireError;
use crate::opcode::Opcode;

/// What the codec needs from the underlying stream beyond plain `Read + Write`:
/// the ability to size its own deadlines from `set_request_timeout`
/// (spec.md §5), and to tear the connection down on protocol failure.
pub trait Transport: Read + Write {
    fn set_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(dur)?;
        self.set_write_timeout(dur)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// The only thing that touches the socket (spec.md §4.1): a length-prefixed,
/// opcode-tagged framed stream codec, with read-ahead buffering of a whole
/// "cork" so that field reads don't each cost a syscall.
pub struct Codec<S> {
    stream: S,
    out: Option<FrameWriter>,
    in_buf: Vec<u8>,
    in_pos: usize,
}

impl<S: Transport> Codec<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            out: None,
            in_buf: Vec::new(),
            in_pos: 0,
        }
    }

    /// Advertise `seconds` as this side's maximum acceptable idle time
    /// between messages on this connection, and apply it to the underlying
    /// transport's own read/write deadlines immediately (spec.md §5, Open
    /// Question 3).
    pub fn set_request_timeout(&mut self, seconds: u32) -> Result<(), WireError> {
        let dur = (seconds > 0).then(|| Duration::from_secs(u64::from(seconds)));
        self.stream.set_timeout(dur)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), WireError> {
        self.stream.shutdown()?;
        Ok(())
    }

    /// Begin accumulating fields for one framing boundary.
    pub fn cork(&mut self) {
        self.out = Some(FrameWriter::new());
    }

    /// Finish the current framing boundary: write a `u32` size prefix
    /// followed by the accumulated bytes as a single network write.
    pub fn uncork(&mut self) -> Result<(), WireError> {
        let writer = self.out.take().ok_or(WireError::NoActiveFrame)?;
        let bytes = writer.into_bytes();
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| WireError::LengthOutOfRange(bytes.len() as i64))?;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        trace!("uncorked {len} bytes");
        Ok(())
    }

    /// Read the next boundary's `u32` length prefix and buffer exactly that
    /// many bytes (TCP transport only, per spec.md §4.1), satisfying
    /// subsequent field reads from that buffer.
    pub fn get_cork(&mut self) -> Result<(), WireError> {
        let mut len_buf = [0u8; 4];
        self.read_exact_or_short(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.read_exact_or_short(&mut buf)?;
        self.in_buf = buf;
        self.in_pos = 0;
        Ok(())
    }

    fn read_exact_or_short(&mut self, buf: &mut [u8]) -> Result<(), WireError> {
        let mut read = 0;
        while read < buf.len() {
            match self.stream.read(&mut buf[read..]) {
                Ok(0) => {
                    return Err(WireError::ShortRead {
                        expected: buf.len(),
                        actual: read,
                    })
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn with_reader<T>(&mut self, f: impl FnOnce(&mut FrameReader) -> Result<T, WireError>) -> Result<T, WireError> {
        let mut reader = FrameReader::new(&self.in_buf[self.in_pos..]);
        let result = f(&mut reader)?;
        self.in_pos += reader.pos();
        Ok(result)
    }

    fn writer_mut(&mut self) -> Result<&mut FrameWriter, WireError> {
        self.out.as_mut().ok_or(WireError::NoActiveFrame)
    }

    // -- write side --------------------------------------------------------

    pub fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.writer_mut()?.put_u8(v);
        Ok(())
    }

    pub fn put_bool(&mut self, v: bool) -> Result<(), WireError> {
        self.writer_mut()?.put_bool(v);
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.writer_mut()?.put_u16(v);
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.writer_mut()?.put_u32(v);
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), WireError> {
        self.writer_mut()?.put_u64(v);
        Ok(())
    }

    pub fn put_location(&mut self, loc: ClusterLocation) -> Result<(), WireError> {
        self.writer_mut()?.put_location(loc);
        Ok(())
    }

    pub fn put_string(&mut self, v: Option<&str>) -> Result<(), WireError> {
        self.writer_mut()?.put_string(v);
        Ok(())
    }

    pub fn put_bytes(&mut self, v: Option<&[u8]>) -> Result<(), WireError> {
        self.writer_mut()?.put_bytes(v);
        Ok(())
    }

    pub fn put_opcode(&mut self, op: Opcode) -> Result<(), WireError> {
        self.put_u32(op.as_u32())
    }

    /// Cork, write the opcode, uncork: the common case of a fixed-shape
    /// request/response with no body.
    pub fn send_opcode(&mut self, op: Opcode) -> Result<(), WireError> {
        self.cork();
        self.put_opcode(op)?;
        self.uncork()
    }

    // -- read side -----------------------------------------------------------

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        self.with_reader(|r| r.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        self.with_reader(|r| r.get_bool())
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.with_reader(|r| r.get_u16())
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.with_reader(|r| r.get_u32())
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        self.with_reader(|r| r.get_u64())
    }

    pub fn get_location(&mut self) -> Result<ClusterLocation, WireError> {
        self.with_reader(|r| r.get_location())
    }

    pub fn get_string(&mut self) -> Result<Option<String>, WireError> {
        self.with_reader(|r| r.get_string())
    }

    pub fn get_bytes(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        self.with_reader(|r| r.get_bytes())
    }

    /// Read the next cork and decode it as an opcode (the first field of
    /// every request, per spec.md §4.4).
    pub fn recv_opcode(&mut self) -> Result<Opcode, WireError> {
        self.get_cork()?;
        let raw = self.get_u32()?;
        Opcode::try_from(raw)
    }
}
