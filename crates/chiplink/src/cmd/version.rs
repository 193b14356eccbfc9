use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("chiplink {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("CHIPLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("os/arch: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
    println!("transport: {}", chiplink_transport::TcpTransport::transport_name());
    println!(
        "protocol: {}-byte packets, {} outputs, default port {}",
        chiplink_frame::PACKET_SIZE,
        chiplink_frame::OUTPUT_COUNT,
        chiplink_session::DEFAULT_PORT
    );
    println!("features: scan={}, cli=true", cfg!(feature = "scan"));

    Ok(SUCCESS)
}
