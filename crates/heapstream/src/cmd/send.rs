use std::sync::Arc;
use std::time::Duration;

use heapstream_heap::{DType, DescriptorCadence, Element, HeapGenerator, ItemGroup};
use heapstream_stream::{SendConfig, SendStream, ThreadPool};
use heapstream_transport::{tcp, PacketSink, UdpSender};
use heapstream_wire::PacketWriter;
use tracing::info;

use crate::cmd::{SendArgs, TransportKind};
use crate::exit::{
    heap_error, stream_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE,
};
use crate::output::{print_send_summary, OutputFormat, SendSummary};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One parsed `--item` argument.
#[derive(Debug, Clone, PartialEq)]
struct ItemSpec {
    id: u64,
    dtype: DType,
    shape: Vec<u64>,
    value: Vec<u8>,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    if args.names.len() > args.items.len() {
        return Err(CliError::new(USAGE, "more --name values than --item values"));
    }
    let specs = args
        .items
        .iter()
        .map(|spec| parse_item_spec(spec))
        .collect::<CliResult<Vec<_>>>()?;
    let mut group = build_group(&specs, &args.names)?;

    let config = SendConfig::default()
        .with_rate(args.rate)
        .with_burst_size(args.burst_size)
        .with_max_packet_size(args.max_packet_size);
    let pool = ThreadPool::new(1).map_err(|err| stream_error("pool start failed", err))?;
    let sink = open_sink(&args.addr, args.transport)?;
    let stream = Arc::new(
        SendStream::new(pool, sink, config)
            .map_err(|err| stream_error("stream setup failed", err))?,
    );
    install_ctrlc_handler(Arc::clone(&stream))?;

    let cadence = match args.descriptor_every {
        Some(n) => DescriptorCadence::EveryNth(n),
        None => DescriptorCadence::Never,
    };
    let mut generator = HeapGenerator::new(cadence);
    for round in 0..args.repeat {
        if round > 0 {
            touch_all(&mut group, &specs)?;
        }
        let cnt = stream
            .send_group(&mut generator, &mut group)
            .map_err(|err| stream_error("send failed", err))?;
        info!(cnt, "heap sent");
    }
    stream
        .send_heap(generator.build_end_marker())
        .map_err(|err| stream_error("send failed", err))?;
    stream
        .flush()
        .map_err(|err| stream_error("flush failed", err))?;

    let stats = stream.stats();
    print_send_summary(
        &SendSummary {
            heaps: stats.heaps,
            packets: stats.packets,
            bytes: stats.bytes,
            retries: stats.retries,
        },
        format,
    );
    Ok(SUCCESS)
}

fn open_sink(addr: &str, transport: TransportKind) -> CliResult<Box<dyn PacketSink>> {
    match transport {
        TransportKind::Udp => {
            let sender =
                UdpSender::connect(addr).map_err(|err| transport_error("connect failed", err))?;
            Ok(Box::new(sender))
        }
        TransportKind::Tcp => {
            let stream = tcp::connect(addr, Some(CONNECT_TIMEOUT))
                .map_err(|err| transport_error("connect failed", err))?;
            Ok(Box::new(PacketWriter::new(stream)))
        }
    }
}

fn build_group(specs: &[ItemSpec], names: &[String]) -> CliResult<ItemGroup> {
    let mut group = ItemGroup::new();
    for (index, spec) in specs.iter().enumerate() {
        let name = names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("item_{}", spec.id));
        group
            .add_item(spec.id, name, "", spec.shape.clone(), spec.dtype)
            .and_then(|item| item.set_value(spec.value.clone()))
            .map_err(|err| heap_error(&format!("item 0x{:x}", spec.id), err))?;
    }
    Ok(group)
}

/// Re-set every value so the next heap carries all of them.
fn touch_all(group: &mut ItemGroup, specs: &[ItemSpec]) -> CliResult<()> {
    for spec in specs {
        let item = group.get_mut(spec.id).ok_or_else(|| {
            CliError::new(INTERNAL, format!("item 0x{:x} vanished from group", spec.id))
        })?;
        item.set_value(spec.value.clone())
            .map_err(|err| heap_error(&format!("item 0x{:x}", spec.id), err))?;
    }
    Ok(())
}

fn parse_item_spec(spec: &str) -> CliResult<ItemSpec> {
    let usage = |detail: &str| CliError::new(USAGE, format!("invalid --item '{spec}': {detail}"));

    let (head, values) = spec
        .split_once('=')
        .ok_or_else(|| usage("expected ID:TYPE[:SHAPE]=VALUES"))?;
    let mut parts = head.split(':');
    let id = parts
        .next()
        .and_then(|id| parse_int(id.trim()))
        .and_then(|id| u64::try_from(id).ok())
        .ok_or_else(|| usage("item id must be an integer"))?;
    let dtype: DType = parts
        .next()
        .ok_or_else(|| usage("missing element type"))?
        .trim()
        .parse()
        .map_err(|err: String| usage(&err))?;
    let shape = match parts.next() {
        Some(shape) => Some(parse_shape(shape).ok_or_else(|| usage("shape must look like 4x4"))?),
        None => None,
    };
    if parts.next().is_some() {
        return Err(usage("too many ':' separated fields"));
    }

    let value = match values.strip_prefix("str:") {
        Some(text) if dtype == DType::U8 => text.as_bytes().to_vec(),
        Some(_) => return Err(usage("text values need element type u8")),
        None => {
            let tokens: Vec<&str> = values.split(',').map(str::trim).collect();
            encode_values(dtype, &tokens).map_err(|token| usage(&format!("bad value '{token}'")))?
        }
    };

    let elements = (value.len() / dtype.size()) as u64;
    let shape = shape.unwrap_or_else(|| if elements == 1 { vec![] } else { vec![elements] });
    Ok(ItemSpec {
        id,
        dtype,
        shape,
        value,
    })
}

fn parse_shape(shape: &str) -> Option<Vec<u64>> {
    shape
        .split('x')
        .map(|dim| dim.trim().parse::<u64>().ok())
        .collect()
}

fn parse_int(token: &str) -> Option<i128> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Big-endian encoding of `tokens` as `dtype` elements. Returns the first
/// token that does not fit.
fn encode_values<'a>(dtype: DType, tokens: &[&'a str]) -> Result<Vec<u8>, &'a str> {
    fn int<T: Element + TryFrom<i128>>(token: &str, out: &mut Vec<u8>) -> bool {
        match parse_int(token).and_then(|v| T::try_from(v).ok()) {
            Some(value) => {
                value.put_be(out);
                true
            }
            None => false,
        }
    }
    fn float<T: Element + std::str::FromStr>(token: &str, out: &mut Vec<u8>) -> bool {
        match token.parse::<T>() {
            Ok(value) => {
                value.put_be(out);
                true
            }
            Err(_) => false,
        }
    }

    let mut out = Vec::with_capacity(tokens.len() * dtype.size());
    for &token in tokens {
        let ok = match dtype {
            DType::U8 => int::<u8>(token, &mut out),
            DType::U16 => int::<u16>(token, &mut out),
            DType::U32 => int::<u32>(token, &mut out),
            DType::U64 => int::<u64>(token, &mut out),
            DType::I8 => int::<i8>(token, &mut out),
            DType::I16 => int::<i16>(token, &mut out),
            DType::I32 => int::<i32>(token, &mut out),
            DType::I64 => int::<i64>(token, &mut out),
            DType::F32 => float::<f32>(token, &mut out),
            DType::F64 => float::<f64>(token, &mut out),
        };
        if !ok {
            return Err(token);
        }
    }
    Ok(out)
}

fn install_ctrlc_handler(stream: Arc<SendStream>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stream.stop();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
