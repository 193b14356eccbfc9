use std::io::{ErrorKind, Write};
use std::time::Duration;

use chiplink_transport::LinkStream;
use tracing::trace;

use crate::codec::Packet;
use crate::error::{FrameError, Result};

/// Writes complete packets to any `Write` stream.
///
/// A packet is either written in full or the call fails; the protocol has
/// no way to resume a half-written packet.
pub struct PacketWriter<T> {
    inner: T,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Write one packet (blocking).
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.as_bytes();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        trace!(size = bytes.len(), "packet written");

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

impl PacketWriter<LinkStream> {
    /// Create a packet writer for `LinkStream` with a bounded write timeout.
    pub fn with_timeout(inner: LinkStream, timeout: Duration) -> Result<Self> {
        inner
            .set_write_timeout(Some(timeout))
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}

fn transport_to_frame_error(err: chiplink_transport::TransportError) -> FrameError {
    match err {
        chiplink_transport::TransportError::Io(io) => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::new(other.io_kind(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{encode, PACKET_SIZE};
    use crate::matrix::BitMatrix;

    #[test]
    fn write_single_packet() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let packet = encode(&BitMatrix::all_set());

        writer.send(&packet).unwrap();

        let wire = writer.get_ref().get_ref();
        assert_eq!(wire.len(), PACKET_SIZE);
        assert_eq!(Packet::decode(wire).unwrap(), packet);
    }

    #[test]
    fn partial_writes_are_completed() {
        let sink = OneByteWriter::default();
        let mut writer = PacketWriter::new(sink);
        let packet = encode(&BitMatrix::from_chip_bytes([1, 2, 3, 4, 5, 6]));

        writer.send(&packet).unwrap();

        assert_eq!(writer.get_ref().bytes.as_slice(), packet.as_ref());
    }

    #[test]
    fn zero_write_is_connection_closed() {
        let mut writer = PacketWriter::new(ClosedWriter);
        let err = writer.send(&encode(&BitMatrix::new())).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn write_error_propagates() {
        let mut writer = PacketWriter::new(BrokenWriter);
        let err = writer.send(&encode(&BitMatrix::new())).unwrap_err();
        match err {
            FrameError::Io(io) => assert_eq!(io.kind(), ErrorKind::BrokenPipe),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);

        writer.send(&encode(&BitMatrix::new())).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[derive(Default)]
    struct OneByteWriter {
        bytes: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(byte) => {
                    self.bytes.push(*byte);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "pipe gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
