//! Formatting helpers shared by the built-in decorators.

/// Render a duration in seconds, omitting the hour field until it's needed.
pub(crate) fn format_time(seconds: u64) -> String {
    let m = seconds / 60 % 60;
    let s = seconds % 60;
    match seconds / 3600 {
        0 => format!("{:02}:{:02}", m, s),
        h => format!("{:02}:{:02}:{:02}", h, m, s),
    }
}

/// Scale `num` down by `divisor` until it fits in three significant digits,
/// then attach the unit reached. The last unit absorbs whatever is left.
pub(crate) fn format_scaled(num: f64, divisor: f64, units: &[&str]) -> String {
    let mut num = num.max(0.0);
    for unit in &units[..units.len() - 1] {
        if num < 999.5 {
            if num < 99.95 {
                if num < 9.995 {
                    return format!("{:.2}{}", num, unit);
                }
                return format!("{:.1}{}", num, unit);
            }
            return format!("{:.0}{}", num, unit);
        }
        num /= divisor;
    }

    format!("{:.1}{}", num, units.last().unwrap())
}

#[cfg(test)]
mod tests {
    const SI: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    const IEC: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    #[test]
    fn format_time() {
        assert_eq!(super::format_time(45), "00:45");
        assert_eq!(super::format_time(30 * 60), "30:00");
        assert_eq!(super::format_time(12 * 60 * 60), "12:00:00");
    }

    #[test]
    fn format_scaled_si() {
        assert_eq!(super::format_scaled(10.0, 1000.0, SI), "10.0B");
        assert_eq!(super::format_scaled(1_234.0, 1000.0, SI), "1.23kB");
        assert_eq!(super::format_scaled(12_345.0, 1000.0, SI), "12.3kB");
        assert_eq!(super::format_scaled(1_234_000.0, 1000.0, SI), "1.23MB");
        assert_eq!(super::format_scaled(999_000_000.0, 1000.0, SI), "999MB");
        assert_eq!(super::format_scaled(999_999_000.0, 1000.0, SI), "1.00GB");
    }

    #[test]
    fn format_scaled_iec() {
        assert_eq!(super::format_scaled(512.0, 1024.0, IEC), "512B");
        assert_eq!(super::format_scaled(2048.0, 1024.0, IEC), "2.00KiB");
        assert_eq!(super::format_scaled(1.5 * 1024.0 * 1024.0, 1024.0, IEC), "1.50MiB");
    }
}
