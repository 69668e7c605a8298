use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::OrcError;
use crate::event::Event;

use super::{read_sidecar_json, Plugin, PluginContext};

const FILETIME_EPOCH_DIFF_SECS: i64 = 11_644_473_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TimestampKind {
    Filetime,
    Unix,
}

/// Fixed-record layout for a raw binary artefact matched purely by
/// `file_header_filter` — the `$I` recycle-bin / LNK case — read as a
/// data-driven sidecar instead of a hardcoded struct.
#[derive(Debug, Clone, Deserialize)]
struct RawLayout {
    #[serde(default)]
    header_filter_hex: Option<String>,
    timestamp_offset: usize,
    timestamp_kind: TimestampKind,
    #[serde(default)]
    path_offset: Option<usize>,
    #[serde(default)]
    path_len_bytes: Option<usize>,
}

impl Default for RawLayout {
    fn default() -> Self {
        // $I recycle-bin record (Windows 10+): u64 LE FILETIME at offset 8,
        // u32 LE UTF-16 path length at offset 24, path at offset 28.
        RawLayout {
            header_filter_hex: None,
            timestamp_offset: 8,
            timestamp_kind: TimestampKind::Filetime,
            path_offset: Some(28),
            path_len_bytes: None,
        }
    }
}

fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    let secs = (ticks / 10_000_000) as i64 - FILETIME_EPOCH_DIFF_SECS;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

fn read_u64_le(bytes: &[u8], offset: usize) -> Option<u64> {
    bytes
        .get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

pub struct RawHeaderPlugin {
    hostname: String,
    source_type: String,
    layout: RawLayout,
}

pub fn construct(ctx: &PluginContext) -> Box<dyn Plugin> {
    let layout = read_sidecar_json(&ctx.install_dir, "layout.json", RawLayout::default());
    Box::new(RawHeaderPlugin {
        hostname: ctx.hostname.clone(),
        source_type: ctx.source_type.clone(),
        layout,
    })
}

impl Plugin for RawHeaderPlugin {
    fn file_header_filter(&self) -> Option<Vec<u8>> {
        self.layout
            .header_filter_hex
            .as_ref()
            .and_then(|hex| decode_hex(hex))
    }

    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError> {
        let bytes = std::fs::read(path)
            .map_err(|e| OrcError::Parse(format!("reading {}: {e}", path.display())))?;

        let ticks = read_u64_le(&bytes, self.layout.timestamp_offset)
            .ok_or_else(|| OrcError::Parse(format!("{}: record too short for timestamp", path.display())))?;
        let timestamp = match self.layout.timestamp_kind {
            TimestampKind::Filetime => filetime_to_utc(ticks),
            TimestampKind::Unix => Utc.timestamp_opt(ticks as i64, 0).single(),
        };
        let Some(timestamp) = timestamp else {
            return Err(OrcError::Parse(format!("{}: unparseable timestamp", path.display())));
        };

        let recovered_path = self.layout.path_offset.and_then(|off| {
            let len = self.layout.path_len_bytes.or_else(|| {
                off.checked_sub(4)
                    .and_then(|p| read_u32_le(&bytes, p))
                    .map(|n| n as usize * 2)
            })?;
            bytes.get(off..off + len).map(|raw| {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            })
        });

        let source = recovered_path.unwrap_or_else(|| source_hint.to_string());

        emit(Event::new(
            timestamp,
            self.hostname.clone(),
            self.source_type.clone(),
            format!("raw artefact record ({} bytes)", bytes.len()),
            source,
        ));

        Ok(())
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
