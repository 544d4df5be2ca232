//! Tutorial receiver: prints every item once the sender ends the stream.
//!
//! Run with:
//!   cargo run --example tutorial-receiver

use heapstream::heap::ItemGroup;
use heapstream::stream::{RecvConfig, RecvStream, ThreadPool};
use heapstream::transport::UdpReceiver;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pool = ThreadPool::new(1)?;
    let stream = RecvStream::new(pool, RecvConfig::default())?;
    let source = UdpReceiver::bind("0.0.0.0:8888")?.with_buffer_size(8 * 1024 * 1024)?;
    stream.add_reader(source)?;
    eprintln!("Listening on udp 0.0.0.0:8888");

    let mut group = ItemGroup::new();
    for heap in &stream {
        match group.update(&heap) {
            Ok(updated) => eprintln!("Heap {} updated {} items", heap.cnt(), updated.len()),
            Err(err) => eprintln!("Heap {} skipped: {err}", heap.cnt()),
        }
    }
    stream.stop();

    for item in group.items() {
        println!(
            "0x{:x} {} ({} {:?}): {:?}",
            item.id(),
            item.name(),
            item.dtype(),
            item.shape(),
            item.value()
        );
    }
    Ok(())
}
