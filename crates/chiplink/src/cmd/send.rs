use std::io::{self, Read};
use std::time::{Duration, Instant};

use chiplink_frame::{
    classify, hex_dump, Inbound, OutputFrame, Packet, PacketWriter, CHIP_COUNT, CMD_SET_OUTPUTS,
};
use chiplink_session::LinkEvent;
use chiplink_transport::TcpTransport;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    frame_error, io_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT,
    TRANSPORT_ERROR,
};
use crate::output::{print_event, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = parse_frame_hex(&args.data)?;
    let timeout = parse_duration(&args.timeout)?;

    let stream = TcpTransport::connect_host(&args.host, args.port, timeout)
        .map_err(|err| transport_error("connect failed", err))?;
    let mut reader = stream
        .try_clone()
        .map_err(|err| transport_error("connect failed", err))?;
    let mut writer = PacketWriter::with_timeout(stream, timeout)
        .map_err(|err| frame_error("connect failed", err))?;

    let packet = Packet::new(CMD_SET_OUTPUTS, frame);
    writer
        .send(&packet)
        .map_err(|err| frame_error("send failed", err))?;
    print_event(
        &LinkEvent::log(format!("sent {}", hex_dump(packet.as_bytes()))),
        format,
    );

    if args.wait_ack {
        wait_for_ack(&mut reader, timeout)?;
        print_event(&LinkEvent::Ack, format);
    }

    let _ = writer.get_ref().shutdown();
    Ok(SUCCESS)
}

/// Parse six chip bytes from 12 hex digits. Spaces are ignored.
fn parse_frame_hex(input: &str) -> CliResult<OutputFrame> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() != CHIP_COUNT * 2 {
        return Err(CliError::usage(format!(
            "--data needs {} hex digits, got {}",
            CHIP_COUNT * 2,
            digits.len()
        )));
    }

    let mut bytes = [0u8; CHIP_COUNT];
    for (byte, pair) in bytes.iter_mut().zip(digits.chunks(2)) {
        let text = std::str::from_utf8(pair).unwrap_or("");
        *byte = u8::from_str_radix(text, 16)
            .map_err(|_| CliError::usage(format!("--data is not hex: {input}")))?;
    }
    Ok(OutputFrame::from_bytes(bytes))
}

/// Read until a chunk classifies as an ACK or `timeout` passes.
fn wait_for_ack<R: Read>(reader: &mut R, timeout: Duration) -> CliResult<()> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        match reader.read(&mut buf) {
            Ok(0) => {
                return Err(CliError::new(
                    TRANSPORT_ERROR,
                    "controller closed the connection before acknowledging",
                ))
            }
            Ok(n) => match classify(&buf[..n]) {
                Inbound::Ack => return Ok(()),
                Inbound::Data(data) => {
                    tracing::debug!(data = %hex_dump(&data), "ignoring non-ACK reply");
                }
            },
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                break
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }
    Err(CliError::new(
        TIMEOUT,
        format!("no ACK within {}ms", timeout.as_millis()),
    ))
}
