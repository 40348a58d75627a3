//! Listening socket, client accept, and the forwarder loop.
//!
//! Exactly one client is served. The forwarder multiplexes the tap's capture
//! descriptor and the client socket in a single blocking poll loop: captured
//! frames stream to the client, client bytes are de-framed and injected.
//! Termination signals latch a flag that the next poll wakeup observes.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use nix::errno::Errno;
use signal_hook::consts::{SIGINT, SIGPIPE, SIGQUIT, SIGTERM};

use crate::cli::{Args, ListenSpec};
use crate::codec::{self, DecodedFrame, FrameDecoder, Framing};
use crate::config;
use crate::error::TapError;
use crate::frame::{self, FrameSize};
use crate::hexdump;
use crate::poll::Event;
use crate::tap::TapInterface;

/// Forwarding behavior fixed at startup.
struct ForwardOptions {
    framing: Framing,
    show_data: bool,
    show_size_warnings: bool,
}

/// The accepted client connection, TCP or Unix-domain.
enum ClientConn {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for ClientConn {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ClientConn::Tcp(stream) => stream.read(buf),
            ClientConn::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientConn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ClientConn::Tcp(stream) => stream.write(buf),
            ClientConn::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ClientConn::Tcp(stream) => stream.flush(),
            ClientConn::Unix(stream) => stream.flush(),
        }
    }
}

impl AsRawFd for ClientConn {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            ClientConn::Tcp(stream) => stream.as_raw_fd(),
            ClientConn::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

/// Serve one client: accept, open the tap, forward until shutdown.
pub fn run(args: Args) -> anyhow::Result<()> {
    let client = accept_client(&args.listen)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGQUIT, SIGPIPE] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("cannot install signal handler")?;
    }

    let mut tap = TapInterface::open(&args.tap_config())?;
    tracing::info!(
        "tap interface {} is up (io endpoint {})",
        tap.network_device(),
        tap.io_device()
    );

    let options = ForwardOptions {
        framing: args.framing(),
        show_data: args.show_data,
        show_size_warnings: args.show_size_warnings,
    };
    forward(&mut tap, client, &options, &shutdown)
}

/// Bind the requested listener, accept a single client, and close the
/// listener: there is no second connection.
fn accept_client(spec: &ListenSpec) -> anyhow::Result<ClientConn> {
    match spec {
        ListenSpec::Tcp { address, port } => {
            let bind_address = address.as_deref().unwrap_or("0.0.0.0");
            let listener = TcpListener::bind((bind_address, *port))
                .with_context(|| format!("cannot listen on {bind_address}:{port}"))?;
            tracing::info!("listening on port {port}");
            tracing::info!("waiting for connection");
            let (stream, peer) = listener
                .accept()
                .context("could not accept client connection")?;
            tracing::info!("client connected from {peer}");
            Ok(ClientConn::Tcp(stream))
        }
        ListenSpec::Unix(path) => {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)
                .with_context(|| format!("cannot listen on {}", path.display()))?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
                .with_context(|| format!("cannot set permissions on {}", path.display()))?;
            tracing::info!("listening on unix socket {}", path.display());
            tracing::info!("waiting for connection");
            let (stream, _) = listener
                .accept()
                .context("could not accept client connection")?;
            tracing::info!("client connected");
            Ok(ClientConn::Unix(stream))
        }
    }
}

/// Per-descriptor verdict for one poll wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// The peer hung up. Ends the session even when data is also pending.
    Disconnected,
    /// Data is waiting to be read.
    Readable,
    /// Nothing to do this wakeup.
    Idle,
}

fn readiness(event: Option<Event>) -> Readiness {
    match event {
        Some(event) if event.hangup => Readiness::Disconnected,
        Some(event) if event.readable => Readiness::Readable,
        _ => Readiness::Idle,
    }
}

/// Which dump one outbound frame gets: `--show-size-warnings` takes
/// precedence over `--show-data` when the computed size disagrees with the
/// frame's actual length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundDump {
    SizeWarning,
    ShowData,
    Quiet,
}

fn outbound_dump(frame_len: usize, computed: FrameSize, options: &ForwardOptions) -> OutboundDump {
    if options.show_size_warnings && computed != FrameSize::Complete(frame_len) {
        OutboundDump::SizeWarning
    } else if options.show_data {
        OutboundDump::ShowData
    } else {
        OutboundDump::Quiet
    }
}

/// True when an inbound frame's declared length disagrees with the computed
/// one. Only meaningful in length-prefixed mode; the declared length stays
/// authoritative and the frame is forwarded regardless.
fn inbound_mismatch(decoded: &DecodedFrame, framing: Framing) -> bool {
    framing == Framing::LengthPrefixed && decoded.size_mismatch()
}

/// The forwarder loop. Returns cleanly on client/tap hang-up or a latched
/// shutdown; any I/O or protocol error propagates, and the tap teardown runs
/// either way when the caller drops it.
fn forward(
    tap: &mut TapInterface,
    mut client: ClientConn,
    options: &ForwardOptions,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let client_fd = client.as_raw_fd();
    tap.poll_mut().register(client_fd);

    let mut decoder = FrameDecoder::new(options.framing);
    let mut read_buffer = vec![0u8; config::CLIENT_READ_CHUNK];
    let mut write_buffer = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        let events = match tap.poll_mut().wait(None) {
            // A signal interrupted the wait; re-check the shutdown flag.
            Err(Errno::EINTR) => continue,
            other => other.map_err(|e| TapError::Poll(e.into()))?,
        };

        let capture_event = events.iter().find(|e| e.fd == tap.capture_fd()).copied();
        match readiness(capture_event) {
            Readiness::Disconnected => {
                tracing::info!("tap disconnected");
                break;
            }
            Readiness::Readable => {
                tap.on_data_available()?;
                while let Some(frame) = tap.recv(0)? {
                    forward_to_client(&frame, &mut client, options, &mut write_buffer)?;
                }
            }
            Readiness::Idle => {}
        }

        let client_event = events.iter().find(|e| e.fd == client_fd).copied();
        match readiness(client_event) {
            Readiness::Disconnected => {
                tracing::info!("client disconnected");
                break;
            }
            Readiness::Readable => {
                let len = match client.read(&mut read_buffer) {
                    Ok(0) => {
                        tracing::info!("client disconnected");
                        break;
                    }
                    Ok(len) => len,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e).context("read from client"),
                };
                decoder.push(&read_buffer[..len]);
                inject_from_client(tap, &mut decoder, options)?;
            }
            Readiness::Idle => {}
        }
    }

    tap.poll_mut().unregister(client_fd);
    Ok(())
}

/// Ship one captured frame to the client, with the advisory size diagnostic.
fn forward_to_client(
    frame: &[u8],
    client: &mut impl Write,
    options: &ForwardOptions,
    scratch: &mut Vec<u8>,
) -> anyhow::Result<()> {
    let computed = frame::frame_size(frame);
    match outbound_dump(frame.len(), computed, options) {
        OutboundDump::SizeWarning => {
            tracing::warn!(
                "outgoing frame size {:#06X} would be incorrectly computed ({computed:?})",
                frame.len()
            );
            hexdump::dump("To tap client", frame);
        }
        OutboundDump::ShowData => hexdump::dump("To tap client", frame),
        OutboundDump::Quiet => {}
    }

    scratch.clear();
    codec::encode(options.framing, frame, scratch);
    client.write_all(scratch).context("write to client")
}

/// Pull the next complete frame out of the decoder and emit its inbound
/// diagnostics. The length-prefixed mismatch warning and the `--show-data`
/// dump are independent: a mismatching frame with `--show-data` set is
/// dumped by both. An unclassifiable self-delimited stream is fatal; the
/// offending bytes are dumped first.
fn next_inbound_frame(
    decoder: &mut FrameDecoder,
    options: &ForwardOptions,
) -> anyhow::Result<Option<Vec<u8>>> {
    let decoded = match decoder.next_frame() {
        Ok(None) => return Ok(None),
        Ok(Some(decoded)) => decoded,
        Err(e @ TapError::UnknownFrameSize) => {
            hexdump::dump("Unrecognized data from tap client", decoder.buffered());
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if inbound_mismatch(&decoded, options.framing) {
        tracing::warn!(
            "frame size {:#06X} would be incorrectly computed ({:?})",
            decoded.data.len(),
            decoded.computed
        );
        hexdump::dump("From tap client", &decoded.data);
    }
    if options.show_data {
        hexdump::dump("From tap client", &decoded.data);
    }

    Ok(Some(decoded.data))
}

/// Inject every complete frame the decoder holds.
fn inject_from_client(
    tap: &mut TapInterface,
    decoder: &mut FrameDecoder,
    options: &ForwardOptions,
) -> anyhow::Result<()> {
    while let Some(frame) = next_inbound_frame(decoder, options)? {
        tap.send(&frame)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(framing: Framing, show_data: bool, show_size_warnings: bool) -> ForwardOptions {
        ForwardOptions {
            framing,
            show_data,
            show_size_warnings,
        }
    }

    /// An ARP frame whose classifier size (hlen=6, plen=4 -> 42) matches its
    /// actual length.
    fn arp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 42];
        frame[0..6].copy_from_slice(&[0xFF; 6]);
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        frame[18] = 6;
        frame[19] = 4;
        frame
    }

    /// The same frame with an inflated protocol-address length, so the
    /// classifier computes 66 against an actual 42.
    fn mismatching_arp_frame() -> Vec<u8> {
        let mut frame = arp_frame();
        frame[19] = 16;
        frame
    }

    #[test]
    fn test_readiness_hangup_wins_over_readable() {
        let event = Event {
            fd: 3,
            readable: true,
            hangup: true,
        };
        assert_eq!(readiness(Some(event)), Readiness::Disconnected);
    }

    #[test]
    fn test_readiness_readable_without_hangup() {
        let event = Event {
            fd: 3,
            readable: true,
            hangup: false,
        };
        assert_eq!(readiness(Some(event)), Readiness::Readable);
    }

    #[test]
    fn test_readiness_idle_cases() {
        assert_eq!(readiness(None), Readiness::Idle);
        let event = Event {
            fd: 3,
            readable: false,
            hangup: false,
        };
        assert_eq!(readiness(Some(event)), Readiness::Idle);
    }

    #[test]
    fn test_outbound_warning_takes_precedence_over_show_data() {
        let opts = options(Framing::SelfDelimited, true, true);
        assert_eq!(
            outbound_dump(42, FrameSize::Complete(66), &opts),
            OutboundDump::SizeWarning
        );
    }

    #[test]
    fn test_outbound_show_data_when_sizes_agree() {
        let opts = options(Framing::SelfDelimited, true, true);
        assert_eq!(
            outbound_dump(42, FrameSize::Complete(42), &opts),
            OutboundDump::ShowData
        );
    }

    #[test]
    fn test_outbound_mismatch_without_warning_flag_still_shows_data() {
        let opts = options(Framing::SelfDelimited, true, false);
        assert_eq!(
            outbound_dump(42, FrameSize::Complete(66), &opts),
            OutboundDump::ShowData
        );
    }

    #[test]
    fn test_outbound_quiet_without_flags() {
        let opts = options(Framing::SelfDelimited, false, false);
        assert_eq!(
            outbound_dump(42, FrameSize::Unsupported, &opts),
            OutboundDump::Quiet
        );
    }

    #[test]
    fn test_inbound_mismatch_only_in_length_prefixed_mode() {
        let decoded = DecodedFrame {
            data: mismatching_arp_frame(),
            computed: FrameSize::Complete(66),
        };
        assert!(inbound_mismatch(&decoded, Framing::LengthPrefixed));
        assert!(!inbound_mismatch(&decoded, Framing::SelfDelimited));
    }

    #[test]
    fn test_inbound_mismatch_independent_of_show_data() {
        // Both dumps apply to the same frame: the mismatch warning does not
        // suppress --show-data or vice versa.
        let opts = options(Framing::LengthPrefixed, true, false);
        let decoded = DecodedFrame {
            data: mismatching_arp_frame(),
            computed: FrameSize::Complete(66),
        };
        assert!(inbound_mismatch(&decoded, opts.framing));
        assert!(opts.show_data);
    }

    #[test]
    fn test_forward_to_client_writes_length_prefix() {
        let frame = arp_frame();
        let mut sink: Vec<u8> = Vec::new();
        let mut scratch = Vec::new();
        let opts = options(Framing::LengthPrefixed, false, false);

        forward_to_client(&frame, &mut sink, &opts, &mut scratch).unwrap();
        assert_eq!(&sink[..2], &(frame.len() as u16).to_ne_bytes());
        assert_eq!(&sink[2..], &frame[..]);
    }

    #[test]
    fn test_forward_to_client_self_delimited_is_raw() {
        let frame = arp_frame();
        let mut sink: Vec<u8> = Vec::new();
        let mut scratch = Vec::new();
        let opts = options(Framing::SelfDelimited, false, false);

        forward_to_client(&frame, &mut sink, &opts, &mut scratch).unwrap();
        assert_eq!(sink, frame);
    }

    #[test]
    fn test_forward_to_client_reuses_scratch() {
        let frame = arp_frame();
        let mut sink: Vec<u8> = Vec::new();
        let mut scratch = vec![0xEE; 512]; // stale bytes from a prior frame
        let opts = options(Framing::SelfDelimited, false, false);

        forward_to_client(&frame, &mut sink, &opts, &mut scratch).unwrap();
        assert_eq!(sink, frame);
    }

    #[test]
    fn test_next_inbound_frame_yields_frames_in_order() {
        let first = arp_frame();
        let mut second = arp_frame();
        second[0] = 0x01;
        let mut decoder = FrameDecoder::new(Framing::LengthPrefixed);
        let mut wire = Vec::new();
        codec::encode(Framing::LengthPrefixed, &first, &mut wire);
        codec::encode(Framing::LengthPrefixed, &second, &mut wire);
        decoder.push(&wire);

        let opts = options(Framing::LengthPrefixed, false, false);
        assert_eq!(next_inbound_frame(&mut decoder, &opts).unwrap(), Some(first));
        assert_eq!(
            next_inbound_frame(&mut decoder, &opts).unwrap(),
            Some(second)
        );
        assert_eq!(next_inbound_frame(&mut decoder, &opts).unwrap(), None);
    }

    #[test]
    fn test_next_inbound_frame_never_drops_mismatching_frame() {
        let frame = mismatching_arp_frame();
        let mut decoder = FrameDecoder::new(Framing::LengthPrefixed);
        let mut wire = Vec::new();
        codec::encode(Framing::LengthPrefixed, &frame, &mut wire);
        decoder.push(&wire);

        let opts = options(Framing::LengthPrefixed, true, true);
        assert_eq!(next_inbound_frame(&mut decoder, &opts).unwrap(), Some(frame));
    }

    #[test]
    fn test_next_inbound_frame_fatal_on_unknown_ethertype() {
        let mut junk = vec![0u8; 64];
        junk[12..14].copy_from_slice(&0x9000u16.to_be_bytes()); // loopback
        let mut decoder = FrameDecoder::new(Framing::SelfDelimited);
        decoder.push(&junk);

        let opts = options(Framing::SelfDelimited, false, false);
        let err = next_inbound_frame(&mut decoder, &opts).unwrap_err();
        assert!(err.downcast_ref::<TapError>().is_some());
    }

    #[test]
    fn test_next_inbound_frame_waits_on_partial_input() {
        let mut decoder = FrameDecoder::new(Framing::LengthPrefixed);
        decoder.push(&256u16.to_ne_bytes());
        let opts = options(Framing::LengthPrefixed, false, false);
        assert_eq!(next_inbound_frame(&mut decoder, &opts).unwrap(), None);
    }
}
