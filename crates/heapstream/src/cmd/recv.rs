use std::sync::Arc;
use std::time::Duration;

use heapstream_heap::ItemGroup;
use heapstream_stream::{RecvConfig, RecvStream, ThreadPool};
use heapstream_transport::{tcp, UdpReceiver};
use heapstream_wire::PacketReader;
use tracing::{debug, info, warn};

use crate::cmd::{RecvArgs, TransportKind};
use crate::exit::{stream_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_items, OutputFormat};

/// Kernel receive buffer requested for UDP sockets.
const UDP_BUFFER_SIZE: usize = 8 * 1024 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub fn run(args: RecvArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == Some(0) {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }

    let config = RecvConfig::default().with_max_heaps(args.max_heaps);
    let pool = ThreadPool::new(1).map_err(|err| stream_error("pool start failed", err))?;
    let stream = Arc::new(
        RecvStream::new(pool, config).map_err(|err| stream_error("stream setup failed", err))?,
    );
    install_ctrlc_handler(Arc::clone(&stream))?;

    match args.transport {
        TransportKind::Udp => {
            let source = UdpReceiver::bind(args.bind.as_str())
                .and_then(|source| source.with_buffer_size(UDP_BUFFER_SIZE))
                .map_err(|err| transport_error("bind failed", err))?;
            if let Ok(addr) = source.local_addr() {
                info!(%addr, "listening for heaps");
            }
            stream
                .add_reader(source)
                .map_err(|err| stream_error("reader setup failed", err))?;
        }
        TransportKind::Tcp => {
            let listener =
                tcp::bind(args.bind.as_str()).map_err(|err| transport_error("bind failed", err))?;
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "waiting for sender");
            }
            let accepted = tcp::accept_until(&listener, ACCEPT_POLL, || stream.is_stopped())
                .map_err(|err| transport_error("accept failed", err))?;
            let Some(conn) = accepted else {
                info!("interrupted before a sender connected");
                print_items(&ItemGroup::new(), 0, format);
                return Ok(SUCCESS);
            };
            stream
                .add_reader(PacketReader::new(conn))
                .map_err(|err| stream_error("reader setup failed", err))?;
        }
    }

    let mut group = ItemGroup::new();
    let mut heaps = 0u64;
    for heap in stream.iter() {
        heaps += 1;
        match group.update(&heap) {
            Ok(changed) => debug!(cnt = heap.cnt(), changed = changed.len(), "heap applied"),
            Err(err) => warn!(cnt = heap.cnt(), error = %err, "heap skipped"),
        }
        if args.count.is_some_and(|count| heaps >= count) {
            stream.stop();
            break;
        }
    }

    let stats = stream.stats();
    info!(
        heaps,
        packets = stats.reassembly.packets,
        evicted = stats.reassembly.evicted,
        malformed = stats.reassembly.malformed_packets,
        reader_errors = stats.reader_errors,
        "receive finished"
    );
    print_items(&group, heaps, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(stream: Arc<RecvStream>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stream.stop();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
