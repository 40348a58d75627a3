//! Command-line interface.
//!
//! Argument parsing is delegated to clap; the only hand-rolled piece is the
//! `--listen` specification, which distinguishes a bare TCP port, an
//! ADDR:PORT pair, and an absolute Unix socket path.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::codec::Framing;
use crate::config;
use crate::tap::{MacAddr, TapConfig};

/// Where to wait for the single client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenSpec {
    Tcp { address: Option<String>, port: u16 },
    Unix(PathBuf),
}

impl FromStr for ListenSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("--listen must be an addr:port, port, or unix socket path".into());
        }
        if s.starts_with('/') {
            return Ok(ListenSpec::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            None => {
                let port = s
                    .parse::<u16>()
                    .map_err(|_| format!("'{s}' is not a valid TCP port"))?;
                Ok(ListenSpec::Tcp {
                    address: None,
                    port,
                })
            }
            Some((address, port)) => {
                if address.is_empty() || address.contains(':') {
                    return Err(
                        "--listen must be an addr:port, port, or unix socket path".into(),
                    );
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("'{port}' is not a valid TCP port"))?;
                Ok(ListenSpec::Tcp {
                    address: Some(address.to_string()),
                    port,
                })
            }
        }
    }
}

/// Bridge a stream socket to a virtual Ethernet interface.
///
/// The connected client receives a stream of Ethernet frames captured from
/// the interface, and injects frames onto it by writing to the socket — the
/// same contract a Unix tap device gives a local process, but over a socket.
#[derive(Debug, Parser)]
#[command(name = "tapserver", version, about)]
pub struct Args {
    /// Device number for the host-side network interface. Usually this
    /// number doesn't matter much; it just has to not already exist.
    #[arg(long, value_name = "N", default_value_t = config::DEFAULT_NETWORK_DEVICE_NUMBER)]
    pub network_device_number: u32,

    /// Device number for the client-side (injection/capture) interface.
    #[arg(long, value_name = "N", default_value_t = config::DEFAULT_IO_DEVICE_NUMBER)]
    pub io_device_number: u32,

    /// MAC address for the host-side network interface.
    #[arg(long, value_name = "XX:XX:XX:XX:XX:XX", default_value = config::DEFAULT_MAC_ADDRESS)]
    pub mac_address: MacAddr,

    /// IPv4 address for the host-side network interface.
    #[arg(long, value_name = "A.B.C.D", default_value = config::DEFAULT_IP_ADDRESS)]
    pub ip_address: Ipv4Addr,

    /// Maximum transmission unit of the host-side interface, in bytes.
    #[arg(long, value_name = "N", default_value_t = config::DEFAULT_MTU)]
    pub mtu: u32,

    /// Interface metric of the host-side interface.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub metric: u32,

    /// Disable IPv6 neighbor unreachability detection on the interface.
    #[arg(long)]
    pub disable_nud: bool,

    /// Listen for IPv6 router advertisements on the interface.
    #[arg(long)]
    pub enable_router_advertisements: bool,

    /// Command to run instead of the default ifconfig binary.
    #[arg(long, value_name = "CMD", default_value = "ifconfig")]
    pub ifconfig_command: String,

    /// Wait for the client on a TCP port, an ADDR:PORT pair, or an absolute
    /// Unix socket path.
    #[arg(long, value_name = "PORT | ADDR:PORT | /PATH")]
    pub listen: ListenSpec,

    /// Print a hex/ASCII dump of every frame forwarded in either direction.
    #[arg(long)]
    pub show_data: bool,

    /// Print a hex/ASCII dump of frames whose size this program would
    /// compute incorrectly. Useful to determine whether a new use case
    /// needs the framed protocol.
    #[arg(long)]
    pub show_size_warnings: bool,

    /// Prepend each frame on the client socket with a 2-byte,
    /// native-byte-order length.
    #[arg(long)]
    pub use_framed_protocol: bool,
}

impl Args {
    pub fn tap_config(&self) -> TapConfig {
        TapConfig {
            network_device_number: self.network_device_number,
            io_device_number: self.io_device_number,
            mac_address: self.mac_address,
            ip_address: self.ip_address,
            mtu: self.mtu,
            metric: self.metric,
            enable_nud: !self.disable_nud,
            enable_router_advertisements: self.enable_router_advertisements,
            ifconfig_command: self.ifconfig_command.clone(),
        }
    }

    pub fn framing(&self) -> Framing {
        if self.use_framed_protocol {
            Framing::LengthPrefixed
        } else {
            Framing::SelfDelimited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["tapserver"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--listen=4000"]);
        assert_eq!(args.network_device_number, 1);
        assert_eq!(args.io_device_number, 2);
        assert_eq!(args.mac_address.0, [0x90; 6]);
        assert_eq!(args.ip_address, Ipv4Addr::new(172, 30, 0, 1));
        assert_eq!(args.mtu, 1500);
        assert_eq!(args.metric, 0);
        assert!(!args.disable_nud);
        assert!(!args.enable_router_advertisements);
        assert_eq!(args.ifconfig_command, "ifconfig");
        assert!(!args.show_data);
        assert_eq!(args.framing(), Framing::SelfDelimited);
    }

    #[test]
    fn test_listen_is_required() {
        assert!(Args::try_parse_from(["tapserver"]).is_err());
    }

    #[test]
    fn test_listen_port_only() {
        let args = parse(&["--listen=4000"]);
        assert_eq!(
            args.listen,
            ListenSpec::Tcp {
                address: None,
                port: 4000
            }
        );
    }

    #[test]
    fn test_listen_addr_and_port() {
        let args = parse(&["--listen=127.0.0.1:4000"]);
        assert_eq!(
            args.listen,
            ListenSpec::Tcp {
                address: Some("127.0.0.1".into()),
                port: 4000
            }
        );
    }

    #[test]
    fn test_listen_unix_path() {
        let args = parse(&["--listen=/tmp/tap.sock"]);
        assert_eq!(args.listen, ListenSpec::Unix(PathBuf::from("/tmp/tap.sock")));
    }

    #[test]
    fn test_listen_rejects_garbage() {
        assert!("".parse::<ListenSpec>().is_err());
        assert!("not-a-port".parse::<ListenSpec>().is_err());
        assert!(":4000".parse::<ListenSpec>().is_err());
        assert!("::1:4000".parse::<ListenSpec>().is_err());
        assert!("host:99999".parse::<ListenSpec>().is_err());
    }

    #[test]
    fn test_nud_and_framing_flags() {
        let args = parse(&["--listen=4000", "--disable-nud", "--use-framed-protocol"]);
        assert!(!args.tap_config().enable_nud);
        assert_eq!(args.framing(), Framing::LengthPrefixed);
    }

    #[test]
    fn test_mac_address_flag() {
        let args = parse(&["--listen=4000", "--mac-address=de:ad:be:ef:00:01"]);
        assert_eq!(args.mac_address.0, [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert!(Args::try_parse_from(["tapserver", "--listen=4000", "--mac-address=nope"])
            .is_err());
    }

    #[test]
    fn test_tap_config_mapping() {
        let args = parse(&[
            "--listen=4000",
            "--network-device-number=7",
            "--io-device-number=8",
            "--mtu=9000",
            "--metric=5",
            "--ifconfig-command=/sbin/ifconfig",
        ]);
        let config = args.tap_config();
        assert_eq!(config.network_device_number, 7);
        assert_eq!(config.io_device_number, 8);
        assert_eq!(config.mtu, 9000);
        assert_eq!(config.metric, 5);
        assert_eq!(config.ifconfig_command, "/sbin/ifconfig");
    }
}
