use clap::Parser;
use wcnss_mux::MuxBuilder;

/// Bluetooth/ANT UART packet multiplexer daemon.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// UART device to open.
    #[arg(long, default_value = wcnss_mux::config::DEFAULT_DEVICE)]
    device: String,

    /// Abstract-namespace socket name for the Bluetooth endpoint.
    #[arg(long, default_value = wcnss_mux::config::DEFAULT_BT_SOCK)]
    bt_socket: String,

    /// Abstract-namespace socket name for the ANT endpoint.
    #[arg(long, default_value = wcnss_mux::config::DEFAULT_ANT_SOCK)]
    ant_socket: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Socket names are handed to the endpoints as `&'static str`: they
    // live for the lifetime of the process, so leaking the owned String
    // from argument parsing is the simplest correct way to get there.
    let bt_socket: &'static str = Box::leak(args.bt_socket.into_boxed_str());
    let ant_socket: &'static str = Box::leak(args.ant_socket.into_boxed_str());

    let mux = MuxBuilder::new()
        .device(args.device)
        .bt_socket(bt_socket)
        .ant_socket(ant_socket)
        .open()?
        .build();

    mux.run()?;
    Ok(())
}
