//! Tutorial sender: one heap of three items, then the end marker.
//!
//! Run the receiver first:
//!   cargo run --example tutorial-receiver
//!
//! Then, in another terminal:
//!   cargo run --example tutorial-sender

use heapstream::heap::{DType, HeapGenerator, ItemGroup};
use heapstream::stream::{SendConfig, SendStream, ThreadPool};
use heapstream::transport::UdpSender;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pool = ThreadPool::new(1)?;
    let sink = UdpSender::connect("127.0.0.1:8888")?;
    let stream = SendStream::new(pool, sink, SendConfig::default().with_rate(1e7))?;

    let mut group = ItemGroup::new();
    group
        .add_item(0x1000, "cat", "string containing the word cat", vec![], DType::U32)?
        .set_scalar(0xDEAD_BEEFu32)?;
    group
        .add_item(0x1001, "matrix", "a matrix of integers", vec![4, 4], DType::I32)?
        .set_elements(&(0..16).collect::<Vec<i32>>())?;
    group
        .add_item(0x1002, "string", "a string", vec![16], DType::U8)?
        .set_value(&b"this is a string"[..])?;

    let mut generator = HeapGenerator::default();
    let cnt = stream.send_group(&mut generator, &mut group)?;
    eprintln!("Sent heap {cnt}");

    stream.send_heap(generator.build_end_marker())?;
    stream.flush()?;
    eprintln!("Stream ended");
    Ok(())
}
