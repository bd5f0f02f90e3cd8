//! Process memory samplers.

/// Source of resident memory readings.
pub trait MemorySampler: Send {
    /// Current resident set size in bytes, or `None` if unavailable.
    fn resident_bytes(&mut self) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/self/status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcSampler;

impl MemorySampler for ProcSampler {
    fn resident_bytes(&mut self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
}

/// Extract `VmRSS` (reported in kB) from procfs status text, in bytes.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => value.checked_mul(1024),
        Some(_) => None,
    }
}
