use ringlog::*;
use std::str::FromStr;
use std::time::Duration;

/// Raise `level` by `verbosity` steps (info -> debug -> trace).
pub fn effective_level(level: Level, verbosity: u8) -> Level {
    let mut level = level;
    for _ in 0..verbosity {
        level = match level {
            Level::Error => Level::Warn,
            Level::Warn => Level::Info,
            Level::Info => Level::Debug,
            Level::Debug | Level::Trace => Level::Trace,
        };
    }
    level
}

/// Parse a level name from config, falling back to info.
pub fn parse_level(name: &str) -> Level {
    Level::from_str(name).unwrap_or(Level::Info)
}

/// Configure the ringlog debug log on stderr and start a background flusher.
///
/// Stdout is left alone so it can carry the stdio transport and the agent's
/// streamed output.
pub fn configure(level: Level) -> Result<(), String> {
    let debug_output: Box<dyn Output> = Box::new(Stderr::new());

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .build()
    .map_err(|e| format!("failed to initialize debug log: {e}"))?;

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    std::thread::Builder::new()
        .name("log-flush".to_string())
        .spawn(move || loop {
            let _ = log.flush();
            std::thread::sleep(Duration::from_millis(100));
        })
        .map_err(|e| format!("failed to spawn log flusher: {e}"))?;

    Ok(())
}
