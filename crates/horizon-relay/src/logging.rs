//! Logging and debugging facilities for Horizon Relay.
//!
//! This module provides:
//! - The `tracing` targets and span names the crate logs under
//! - A debug view of a sender's connection table
//! - A timing span for profiling
//!
//! # Tracing Integration
//!
//! Horizon Relay uses the `tracing` crate for instrumentation. Install any
//! subscriber to see its output, for example with `tracing-subscriber`:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_relay::dispatch=trace")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! ```ignore
//! use horizon_relay::logging::ConnectionTableDebug;
//!
//! println!("{}", ConnectionTableDebug::new(button.signal_base()));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::signal::{ConnectionKind, SignalBase};

/// Span names used throughout Horizon Relay for tracing.
pub mod span_names {
    /// One `activate()` pass over a sender's connections.
    pub const ACTIVATE: &str = "horizon_relay::activate";
    /// A queued slot invocation running on its execution context.
    pub const QUEUED_INVOCATION: &str = "horizon_relay::queued_invocation";
    /// An execution context draining its queue.
    pub const EXECUTOR: &str = "horizon_relay::executor";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Endpoint registry and crate-wide messages.
    pub const CORE: &str = "horizon_relay";
    /// Connection list reclamation.
    pub const LIST: &str = "horizon_relay::list";
    /// Sender side: connect, disconnect, teardown.
    pub const SIGNAL: &str = "horizon_relay::signal";
    /// Receiver side: back-references, affinity, enqueue.
    pub const SLOT: &str = "horizon_relay::slot";
    /// Delivery routing inside `activate()`.
    pub const DISPATCH: &str = "horizon_relay::dispatch";
    /// Execution contexts.
    pub const EXECUTOR: &str = "horizon_relay::executor";
    /// Operation timing from [`PerfSpan`](super::PerfSpan).
    pub const PERF: &str = "horizon_relay::perf";
}

/// One row of a sender's connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    /// Type name of the signal method.
    pub signal: &'static str,
    /// Raw receiver id and type name, or `None` for an unbound connection.
    pub receiver: Option<(u64, &'static str)>,
    /// Type name of the slot callable.
    pub slot: &'static str,
    /// Delivery policy.
    pub kind: ConnectionKind,
}

/// Configuration for connection table output.
#[derive(Debug, Clone)]
pub struct TableFormatOptions {
    /// Whether to show raw receiver ids.
    pub show_ids: bool,
    /// Whether to show the delivery kind.
    pub show_kinds: bool,
    /// Whether to shorten type paths to their last segment.
    pub short_names: bool,
}

impl Default for TableFormatOptions {
    fn default() -> Self {
        Self {
            show_ids: true,
            show_kinds: true,
            short_names: true,
        }
    }
}

impl TableFormatOptions {
    /// Full type paths and every column.
    pub fn detailed() -> Self {
        Self {
            short_names: false,
            ..Default::default()
        }
    }

    /// Signal and slot names only.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_kinds: false,
            short_names: true,
        }
    }
}

/// Debug view of a sender's live connections.
pub struct ConnectionTableDebug<'a> {
    base: &'a SignalBase,
    options: TableFormatOptions,
}

impl<'a> ConnectionTableDebug<'a> {
    /// Create a view with default options.
    pub fn new(base: &'a SignalBase) -> Self {
        Self {
            base,
            options: TableFormatOptions::default(),
        }
    }

    /// Create a view with custom options.
    pub fn with_options(base: &'a SignalBase, options: TableFormatOptions) -> Self {
        Self { base, options }
    }

    /// Render the table.
    pub fn format_table(&self) -> String {
        let rows = self.base.connection_rows();
        let mut output = String::new();
        let _ = writeln!(
            output,
            "Connections of {} ({} total):",
            self.name(self.base.type_name()),
            rows.len()
        );

        if rows.is_empty() {
            output.push_str("  (none)\n");
            return output;
        }

        for row in rows {
            let _ = write!(output, "  {} -> ", self.name(row.signal));
            match row.receiver {
                Some((id, type_name)) => {
                    output.push_str(self.name(type_name));
                    if self.options.show_ids {
                        let _ = write!(output, " [{id:#x}]");
                    }
                }
                None => output.push_str("(unbound)"),
            }
            let _ = write!(output, " :: {}", self.name(row.slot));
            if self.options.show_kinds {
                let _ = write!(output, " ({:?})", row.kind);
            }
            output.push('\n');
        }
        output
    }

    fn name<'n>(&self, full: &'n str) -> &'n str {
        if !self.options.short_names {
            return full;
        }
        // Keep method names qualified by their type: `Button::clicked`.
        let mut segments = full.rsplitn(3, "::");
        match (segments.next(), segments.next()) {
            (Some(last), Some(owner)) => {
                let start = full.len() - last.len() - owner.len() - 2;
                &full[start..]
            }
            _ => full,
        }
    }
}

impl fmt::Display for ConnectionTableDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_table())
    }
}

/// A guard that keeps an `info` span entered until dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}
