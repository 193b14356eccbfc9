use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chiplink_frame::{FrameError, Packet, ACK, PACKET_SIZE, SYNC};
use chiplink_transport::{DeviceListener, LinkStream};

use crate::cmd::DeviceArgs;
use crate::exit::{io_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let listener =
        DeviceListener::bind(args.bind).map_err(|err| transport_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(addr = %listener.local_addr(), ack = !args.no_ack, "device simulator listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut received = 0usize;
    while running.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.io_kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL);
                continue;
            }
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        tracing::info!(%peer, "controller link opened");

        let mut link = DeviceLink {
            stream,
            peer,
            ack: !args.no_ack,
            buf: Vec::with_capacity(PACKET_SIZE * 4),
        };
        let done = link.serve(&running, format, |_| {
            received += 1;
            args.count.is_some_and(|count| received >= count)
        })?;
        tracing::info!(%peer, received, "controller link closed");
        if done {
            return Ok(SUCCESS);
        }
    }

    Ok(SUCCESS)
}

/// One accepted link.
struct DeviceLink {
    stream: LinkStream,
    peer: std::net::SocketAddr,
    ack: bool,
    buf: Vec<u8>,
}

impl DeviceLink {
    /// Serve until the peer leaves or `on_packet` asks to stop.
    /// Returns true when stopped by `on_packet`.
    fn serve(
        &mut self,
        running: &AtomicBool,
        format: OutputFormat,
        mut on_packet: impl FnMut(&Packet) -> bool,
    ) -> CliResult<bool> {
        self.stream
            .set_read_timeout(Some(POLL))
            .map_err(|err| transport_error("link setup failed", err))?;

        let mut chunk = [0u8; 256];
        while running.load(Ordering::SeqCst) {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Some platforms hand out accepted sockets non-blocking.
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => return Ok(false),
                Err(err) => return Err(io_error("receive failed", err)),
            };
            self.buf.extend_from_slice(&chunk[..n]);

            while let Some(decoded) = next_packet(&mut self.buf) {
                let packet = match decoded {
                    Ok(packet) => packet,
                    Err(err) => {
                        tracing::warn!(peer = %self.peer, error = %err, "dropping corrupt packet");
                        continue;
                    }
                };
                print_packet(&packet, self.peer, format);
                if self.ack {
                    if let Err(err) = self.stream.write_all(&[ACK]) {
                        tracing::warn!(peer = %self.peer, error = %err, "ACK write failed");
                        return Ok(false);
                    }
                }
                if on_packet(&packet) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Pull the next packet off the front of `buf`.
///
/// Bytes before a sync pair are skipped. A packet with a bad checksum is
/// consumed and reported so the stream resynchronises on the next one.
fn next_packet(buf: &mut Vec<u8>) -> Option<Result<Packet, FrameError>> {
    let start = buf.windows(2).position(|pair| pair == SYNC);
    match start {
        Some(start) => {
            buf.drain(..start);
        }
        None => {
            // Keep a trailing 0xAA; it may start the next packet.
            let keep = usize::from(buf.last() == Some(&SYNC[0]));
            let cut = buf.len() - keep;
            buf.drain(..cut);
            return None;
        }
    }
    if buf.len() < PACKET_SIZE {
        return None;
    }
    let decoded = Packet::decode(&buf[..PACKET_SIZE]);
    let consumed = if decoded.is_ok() { PACKET_SIZE } else { SYNC.len() };
    buf.drain(..consumed);
    Some(decoded)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chiplink_frame::{encode, BitAddress, BitMatrix};

    fn packet_bytes(chip: usize, bit: usize) -> Vec<u8> {
        let mut matrix = BitMatrix::new();
        matrix.set(BitAddress::new(chip, bit).unwrap(), true);
        encode(&matrix).as_bytes().to_vec()
    }

    #[test]
    fn extracts_back_to_back_packets() {
        let mut buf = packet_bytes(0, 0);
        buf.extend(packet_bytes(5, 7));

        let first = next_packet(&mut buf).unwrap().unwrap();
        let second = next_packet(&mut buf).unwrap().unwrap();
        assert_eq!(first.frame().bytes(), &[0x01, 0, 0, 0, 0, 0]);
        assert_eq!(second.frame().bytes(), &[0, 0, 0, 0, 0, 0x80]);
        assert!(next_packet(&mut buf).is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_the_rest_of_a_split_packet() {
        let full = packet_bytes(1, 1);
        let mut buf = full[..4].to_vec();
        assert!(next_packet(&mut buf).is_none());
        assert_eq!(buf.len(), 4);
        buf.extend_from_slice(&full[4..]);
        assert!(next_packet(&mut buf).unwrap().is_ok());
    }

    #[test]
    fn skips_leading_garbage() {
        let mut buf = vec![0x00, 0x13, 0x37];
        buf.extend(packet_bytes(2, 3));
        assert!(next_packet(&mut buf).unwrap().is_ok());
    }

    #[test]
    fn corrupt_packet_is_reported_then_resynced() {
        let mut bad = packet_bytes(0, 0);
        bad[9] ^= 0xFF;
        let mut buf = bad;
        buf.extend(packet_bytes(3, 3));

        assert!(matches!(
            next_packet(&mut buf),
            Some(Err(FrameError::ChecksumMismatch { .. }))
        ));
        let good = next_packet(&mut buf).unwrap().unwrap();
        assert_eq!(good.frame().bytes()[3], 0x08);
    }

    #[test]
    fn trailing_sync_byte_is_kept() {
        let mut buf = vec![0x01, 0x02, 0xAA];
        assert!(next_packet(&mut buf).is_none());
        assert_eq!(buf, vec![0xAA]);
    }
}
