use std::time::Duration;

/// Render a duration the way log lines want it: `"1s"`, `"2m 30s"`, never a
/// raw `Duration` debug dump.
pub fn humanize(d: Duration) -> String {
	humantime::format_duration(d).to_string()
}
