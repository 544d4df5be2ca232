use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use heapstream_heap::{DType, Item, ItemGroup};
use serde::Serialize;
use serde_json::Value;

/// Array elements shown before a table or pretty value is cut short.
const PREVIEW_ELEMENTS: usize = 8;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ItemOutput<'a> {
    id: u64,
    name: &'a str,
    description: &'a str,
    dtype: &'static str,
    shape: &'a [u64],
    version: u64,
    value: Value,
}

impl<'a> ItemOutput<'a> {
    fn from_item(item: &'a Item) -> Self {
        Self {
            id: item.id(),
            name: item.name(),
            description: item.description(),
            dtype: item.dtype().name(),
            shape: item.shape(),
            version: item.version(),
            value: item_value(item),
        }
    }
}

#[derive(Serialize)]
struct ReceivedOutput<'a> {
    heaps: u64,
    items: Vec<ItemOutput<'a>>,
}

/// Print every item of `group` after a receive run.
pub fn print_items(group: &ItemGroup, heaps: u64, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReceivedOutput {
                heaps,
                items: group.items().map(ItemOutput::from_item).collect(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "NAME", "TYPE", "SHAPE", "VERSION", "VALUE"]);
            for item in group.items() {
                table.add_row(vec![
                    format!("0x{:x}", item.id()),
                    item.name().to_string(),
                    item.dtype().to_string(),
                    format!("{:?}", item.shape()),
                    item.version().to_string(),
                    preview(&item_value(item)),
                ]);
            }
            println!("{table}");
            println!("{heaps} heaps received");
        }
        OutputFormat::Pretty => {
            for item in group.items() {
                println!(
                    "0x{:x} name={} type={} shape={:?} version={} value={}",
                    item.id(),
                    item.name(),
                    item.dtype(),
                    item.shape(),
                    item.version(),
                    preview(&item_value(item))
                );
            }
        }
    }
}

#[derive(Serialize)]
pub struct SendSummary {
    pub heaps: u64,
    pub packets: u64,
    pub bytes: u64,
    pub retries: u64,
}

pub fn print_send_summary(summary: &SendSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["HEAPS", "PACKETS", "BYTES", "RETRIES"])
                .add_row(vec![
                    summary.heaps.to_string(),
                    summary.packets.to_string(),
                    summary.bytes.to_string(),
                    summary.retries.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "heaps={} packets={} bytes={} retries={}",
                summary.heaps, summary.packets, summary.bytes, summary.retries
            );
        }
    }
}

/// Decode an item value for display. Byte vectors holding printable text are
/// shown as strings.
pub fn item_value(item: &Item) -> Value {
    let Some(raw) = item.value() else {
        return Value::Null;
    };
    if item.dtype() == DType::U8 && item.shape().len() == 1 {
        if let Ok(text) = std::str::from_utf8(raw) {
            if text.chars().all(|c| !c.is_control()) {
                return Value::String(text.to_string());
            }
        }
    }

    let elements = match item.dtype() {
        DType::U8 => to_values(item.elements::<u8>()),
        DType::U16 => to_values(item.elements::<u16>()),
        DType::U32 => to_values(item.elements::<u32>()),
        DType::U64 => to_values(item.elements::<u64>()),
        DType::I8 => to_values(item.elements::<i8>()),
        DType::I16 => to_values(item.elements::<i16>()),
        DType::I32 => to_values(item.elements::<i32>()),
        DType::I64 => to_values(item.elements::<i64>()),
        DType::F32 => to_values(item.elements::<f32>()),
        DType::F64 => to_values(item.elements::<f64>()),
    };
    match elements {
        Some(mut values) if item.shape().is_empty() && values.len() == 1 => values.remove(0),
        Some(values) => Value::Array(values),
        None => Value::Null,
    }
}

fn to_values<T: Serialize>(elements: heapstream_heap::Result<Vec<T>>) -> Option<Vec<Value>> {
    let elements = elements.ok()?;
    elements
        .into_iter()
        .map(|element| serde_json::to_value(element).ok())
        .collect()
}

fn preview(value: &Value) -> String {
    match value {
        Value::Array(values) if values.len() > PREVIEW_ELEMENTS => {
            let head: Vec<String> = values[..PREVIEW_ELEMENTS]
                .iter()
                .map(Value::to_string)
                .collect();
            format!("[{}, ... {} total]", head.join(", "), values.len())
        }
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
