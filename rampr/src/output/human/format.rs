pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

/// Trend values are milliseconds.
pub(crate) fn format_ms(ms: f64) -> String {
    if !ms.is_finite() {
        return "n/a".to_string();
    }
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{ms:.2}ms")
    } else {
        format!("{:.0}us", ms * 1000.0)
    }
}

pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    ms.map_or_else(|| "n/a".to_string(), format_ms)
}

pub(crate) fn format_percent(ratio: f64) -> String {
    if ratio.is_finite() {
        format!("{:.2}%", ratio * 100.0)
    } else {
        "n/a".to_string()
    }
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

/// `name......:` padded to a fixed column.
pub(crate) fn dotted(name: &str, width: usize) -> String {
    let dots = width.saturating_sub(name.chars().count()).max(2);
    format!("{name}{}:", ".".repeat(dots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_latency_in_a_readable_unit() {
        assert_eq!(format_ms(0.25), "250us");
        assert_eq!(format_ms(12.5), "12.50ms");
        assert_eq!(format_ms(1500.0), "1.50s");
        assert_eq!(format_ms_opt(None), "n/a");
    }

    #[test]
    fn formats_bytes_and_percent() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KiB");
        assert_eq!(format_percent(0.05), "5.00%");
        assert_eq!(dotted("errors", 10), "errors....:");
        assert_eq!(dotted("very_long_metric_name", 4), "very_long_metric_name..:");
    }
}
