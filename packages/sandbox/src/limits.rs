// ABOUTME: Resource limit parsing from human-readable units
// ABOUTME: Normalizes "80%" / "16GB" style strings into a validated, immutable ResourceLimits

use crate::error::LimitError;
use serde::Serialize;
use std::fmt;

const KIB: f64 = 1024.0;

/// CPU and memory caps applied to an environment and checked by the governor
///
/// `cpu_fraction` is always within (0, 1] and `memory_bytes` is always positive;
/// both constructors reject anything else, and the fields cannot be mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceLimits {
    cpu_fraction: f64,
    memory_bytes: u64,
}

impl ResourceLimits {
    /// Build limits from already-normalized values
    pub fn new(cpu_fraction: f64, memory_bytes: u64) -> Result<Self, LimitError> {
        // Zero becomes NanoCpus=0, which the runtime treats as unlimited
        if !cpu_fraction.is_finite() || cpu_fraction <= 0.0 || cpu_fraction > 1.0 {
            return Err(LimitError::InvalidCpu(cpu_fraction.to_string()));
        }
        if memory_bytes == 0 {
            return Err(LimitError::InvalidMemory(memory_bytes.to_string()));
        }
        Ok(Self {
            cpu_fraction,
            memory_bytes,
        })
    }

    /// Parse limits from configuration strings such as `("80%", "16GB")`
    pub fn parse(cpu: &str, memory: &str) -> Result<Self, LimitError> {
        let cpu_fraction = parse_cpu(cpu)?;
        let memory_bytes = parse_memory(memory)?;
        Self::new(cpu_fraction, memory_bytes)
    }

    pub fn cpu_fraction(&self) -> f64 {
        self.cpu_fraction
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    /// CPU cap expressed in the runtime's nano-CPU unit (1e9 = one full core)
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_fraction * 1_000_000_000.0).round() as i64
    }
}

impl fmt::Display for ResourceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={:.0}% memory={}",
            self.cpu_fraction * 100.0,
            format_bytes(self.memory_bytes)
        )
    }
}

/// Parse a CPU limit: `"80%"` → 0.8, `"0.5"` → 0.5
pub fn parse_cpu(value: &str) -> Result<f64, LimitError> {
    let trimmed = value.trim();
    let invalid = || LimitError::InvalidCpu(value.to_string());

    let fraction = match trimmed.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().map_err(|_| invalid())? / 100.0,
        None => trimmed.parse::<f64>().map_err(|_| invalid())?,
    };

    if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
        return Err(invalid());
    }
    Ok(fraction)
}

/// Parse a memory size with 1024-based units: `"512MB"`, `"16GB"`, `"8g"`, `"1048576"`
pub fn parse_memory(value: &str) -> Result<u64, LimitError> {
    let trimmed = value.trim();
    let invalid = || LimitError::InvalidMemory(value.to_string());

    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);

    let amount = number.parse::<f64>().map_err(|_| invalid())?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "K" | "KB" | "KIB" => KIB,
        "M" | "MB" | "MIB" => KIB * KIB,
        "G" | "GB" | "GIB" => KIB * KIB * KIB,
        "T" | "TB" | "TIB" => KIB * KIB * KIB * KIB,
        _ => return Err(invalid()),
    };

    let bytes = amount * multiplier;
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Render a byte count with the largest whole binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }
    if value.fract() == 0.0 {
        format!("{}{}", value as u64, UNITS[unit])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
