//! Tracing setup and the append-only record logs (visited URLs, downloads,
//! recovered panics).

use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber: compact stdout output plus a daily
/// rolling file in `log_dir`. `RUST_LOG` controls filtering (default "info").
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_appender = tracing_appender::rolling::daily(log_path, "nicrawl.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter);

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the program for the background writer to flush.
    Box::leak(Box::new(file_guard));

    tracing::info!("logging initialized, files under {}", log_path.display());
    Ok(())
}

/// Append one line to a record log from a detached task. Each record is a
/// single short line; the OS orders concurrent appends, and interleaving
/// across records is acceptable.
pub fn append_line_detached(path: PathBuf, line: String) {
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        match tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                let _ = file.write_all(format!("{}\n", line).as_bytes()).await;
            }
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "record log append failed");
            }
        }
    });
}
