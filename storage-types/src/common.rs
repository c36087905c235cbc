//! Common utility types shared across models

use bytesize::ByteSize;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// Partition alignment boundary (1 MiB) - standard for modern disks
pub const GPT_ALIGNMENT_BYTES: u64 = 1024 * 1024;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;
pub const PIB: u64 = 1024 * TIB;

/// A byte range representing a contiguous region (partitions, unused slots)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Check if this range is valid for a disk of the given size
    pub fn is_valid_for_disk(&self, disk_size: u64) -> bool {
        self.start < self.end && self.end <= disk_size
    }

    /// Clamp this range to fit within a disk of the given size
    pub fn clamp_to_disk(&self, disk_size: u64) -> Self {
        let start = self.start.min(disk_size);
        let end = self.end.min(disk_size);
        Self { start, end }
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Shrink the range inwards to alignment boundaries
    pub fn aligned(&self) -> Self {
        let start = align_up(self.start);
        let end = align_down(self.end).max(start);
        Self { start, end }
    }
}

pub fn align_up(bytes: u64) -> u64 {
    bytes.div_ceil(GPT_ALIGNMENT_BYTES) * GPT_ALIGNMENT_BYTES
}

pub fn align_down(bytes: u64) -> u64 {
    (bytes / GPT_ALIGNMENT_BYTES) * GPT_ALIGNMENT_BYTES
}

/// Convert bytes to human-readable format (e.g., "1.50 GiB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val >= 1024. && steps < 5 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KiB",
        2 => "MiB",
        3 => "GiB",
        4 => "TiB",
        _ => "PiB",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Parse a disk size such as `"10 GiB"`, `"512MiB"`, `"1.5 TB"` or `"4096"`.
///
/// Binary units (`KiB` .. `PiB`) are powers of 1024, SI units (`KB` .. `PB`)
/// powers of 1000. A bare number is a byte count and a single-letter unit
/// (`"512M"`) is binary. Returns `None` for anything else, including
/// `"unlimited"`, which callers handle themselves.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let unit_at = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(unit_at);
    let text = match unit.to_ascii_lowercase().as_str() {
        "k" | "m" | "g" | "t" | "p" => format!("{} {unit}i", number.trim()),
        _ => text.to_string(),
    };
    text.parse::<ByteSize>().ok().map(|size| size.as_u64())
}
