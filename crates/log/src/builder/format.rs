//! Format layer construction

/// Apply [`DisplayConfig`](crate::DisplayConfig) to a fmt layer and box it.
///
/// Dropping the timer changes the layer's type, so both arms are boxed.
macro_rules! create_fmt_layer {
    ($layer:expr, $display:expr) => {{
        let display = $display;
        let layer = $layer
            .with_ansi(display.colors)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_ids(display.thread_ids)
            .with_writer(std::io::stderr);
        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}
