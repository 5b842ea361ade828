use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};

pub mod float_ext;
pub mod yaml_format;

pub const EPSILON: f64 = 1e-10;

/// Starts the process-wide logger.
///
/// Writes to a size-rotated file under `logs/`, mirrors every record to stdout
/// and warnings and errors to stderr. `base_level` uses the `log` filter
/// syntax, e.g. `"info"` or `"warn,smlm=trace"`. Keep the returned handle
/// alive until shutdown so buffered lines get flushed.
pub fn setup_logging(base_level: &str) -> LoggerHandle {
    Logger::try_with_str(base_level)
        .unwrap_or_else(|e| panic!("Logger initialization failed with {}", e))
        .log_to_file(FileSpec::default().directory("logs").basename("smlm"))
        .duplicate_to_stderr(Duplicate::Warn)
        .duplicate_to_stdout(Duplicate::All)
        .rotate(
            flexi_logger::Criterion::Size(1024 * 1024), //1MB
            flexi_logger::Naming::Timestamps,
            flexi_logger::Cleanup::KeepLogFiles(5),
        )
        .start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_logging_accepts_module_filters() {
        let handle = setup_logging("warn,common=debug");
        log::debug!("logger started");
        handle.flush();
    }
}
