//! Compact formatting helpers for journal and log output.
//!
//! The log formatter stamps every line with the *virtual* clock of the
//! kernel running on the current thread instead of wall time, so log
//! output lines up with the simulation journal.

use std::cell::Cell;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::types::Tick;

thread_local! {
    static SIM_CLOCK: Cell<Tick> = const { Cell::new(0) };
}

/// Publish the current virtual time for log timestamps.
///
/// Called by the kernel on every dispatch; one kernel per thread, so a
/// thread-local is sufficient and race-free.
pub(crate) fn set_sim_clock(now: Tick) {
    SIM_CLOCK.with(|c| c.set(now));
}

/// The virtual time of the kernel running on this thread.
pub fn sim_clock() -> Tick {
    SIM_CLOCK.with(|c| c.get())
}

/// Format a u64 with underscore grouping (groups of 3 from the right).
pub(crate) fn fmt_grouped(v: u64) -> String {
    let digits = v.to_string();
    let len = digits.len();
    if len <= 3 {
        return digits;
    }
    let mut out = String::with_capacity(len + (len - 1) / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push('_');
        }
        out.push(ch);
    }
    out
}

/// Tick formatter: underscore-grouped, right-aligned in a 12-char field.
///
/// Examples: `0` → `           0`, `10_000` → `      10_000`.
pub struct FmtTick(pub Tick);

impl fmt::Display for FmtTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12}", fmt_grouped(self.0))
    }
}

/// Wrapper that displays large round numbers compactly.
///
/// Exact multiples of powers of 1000 are shortened (`4_000` → `4K`,
/// `20_000_000` → `20M`); everything else passes through unchanged.
pub struct FmtN(pub u64);

impl fmt::Display for FmtN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        const SUFFIXES: &[(u64, &str)] = &[(1_000_000_000, "G"), (1_000_000, "M"), (1_000, "K")];
        for &(divisor, suffix) in SUFFIXES {
            if v >= divisor && v % divisor == 0 {
                return write!(f, "{}{}", v / divisor, suffix);
            }
        }
        write!(f, "{v}")
    }
}

/// Event formatter that shows virtual time instead of wall-clock time.
pub struct SimFormat;

impl<S, N> FormatEvent<S, N> for SimFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[{}] ", FmtTick(sim_clock()))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::ERROR => "\x1b[31m",
                Level::WARN => "\x1b[33m",
                Level::INFO => "\x1b[32m",
                Level::DEBUG => "\x1b[34m",
                Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{color}{level:>5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:>5} ")?;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        write!(writer, "{}", visitor.message)?;
        for (key, value) in &visitor.fields {
            write!(writer, " {key}={value}")?;
        }
        writeln!(writer)
    }
}

/// Collects the message and key-value fields from a tracing event.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}
