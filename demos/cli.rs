/*!
A small demonstration binary exercising the `rssdp` library end to end:
search once, or publish a single synthetic root device until interrupted.
Uses `structopt` for argument parsing, `human_panic` for crash reports, and
`tracing_subscriber` for log configuration. Not part of the library's
public API.
*/

use rssdp::common::interface::enumerate_ipv4_interfaces;
use rssdp::common::uri::URL;
use rssdp::device::{Device, RootDevice};
use rssdp::locator::{Locator, LocatorOptions};
use rssdp::publisher::{Publisher, PublisherOptions};
use rssdp::transport::UdpCommunicationsServer;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

#[derive(StructOpt, Debug)]
#[structopt(name = "rssdp-cli")]
struct Cli {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Issue one M-SEARCH and print whatever responds within `wait` seconds.
    Search {
        #[structopt(long, default_value = "3")]
        wait: u64,
    },
    /// Advertise one synthetic root device until Ctrl-C.
    Publish,
}

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::from_args();
    let interfaces = enumerate_ipv4_interfaces();
    if interfaces.is_empty() {
        tracing::error!("no usable IPv4 interfaces found");
        return;
    }

    match args.command {
        Command::Search { wait } => do_search(&interfaces, wait).await,
        Command::Publish => do_publish(&interfaces).await,
    }
}

async fn do_search(interfaces: &[rssdp::common::interface::LocalInterface], wait: u64) {
    let server = Arc::new(UdpCommunicationsServer::bind(interfaces, 4, false).expect("bind communications server"));
    let locator = Locator::new(server, LocatorOptions::new("Linux", "unknown")).expect("construct locator");
    locator.start_listening_for_notifications().await.expect("start listening");
    let mut events = locator.subscribe();
    locator
        .search("ssdp:all", Duration::from_secs(wait), &CancellationToken::new())
        .await
        .expect("send search");

    let deadline = tokio::time::sleep(Duration::from_secs(wait));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Ok(event) = events.recv() => println!("{:?}", event),
        }
    }
}

async fn do_publish(interfaces: &[rssdp::common::interface::LocalInterface]) {
    let server = Arc::new(UdpCommunicationsServer::bind(interfaces, 4, false).expect("bind communications server"));
    let publisher = Publisher::new(server, PublisherOptions::new("Linux", "unknown")).await.expect("construct publisher");
    publisher.start_sending_alive_notifications(Duration::from_secs(900));

    let address = interfaces[0].ipv4;
    let device = Arc::new(RootDevice::new(
        Device::new(uuid::Uuid::new_v4().to_string(), "schemas-upnp-org", "MediaServer", "1"),
        URL::parse("http://localhost/description.xml").expect("static location"),
        Duration::from_secs(1800),
        IpAddr::V4(address),
    ));
    publisher.add_device(device).await.expect("add device");

    tokio::signal::ctrl_c().await.expect("wait for ctrl-c");
    publisher.dispose().await.expect("dispose publisher");
}
