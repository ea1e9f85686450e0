use std::time::Duration;

/// One rounded component in us, ms or s; keeps progress lines short.
pub(crate) fn format_duration_single(d: Duration) -> String {
    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    // Ties round up.
    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    let total_ns = d.as_nanos();
    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_a_single_unit() {
        assert_eq!(format_duration_single(Duration::from_millis(1500)), "2s");
        assert_eq!(format_duration_single(Duration::from_micros(2400)), "2ms");
        assert_eq!(format_duration_single(Duration::from_nanos(1500)), "2us");
    }
}
