use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::error;

use logroll::env::{env_or, LOGROLL_DIR_ENV};
use logroll::rotation::RotationPolicy;
use logroll::{
    init_file_writer, init_tracing_with_config, FileWriterConfig, LogConfig, SharedConfig, TracingBridgeConfig,
};

/// Drives the writer through the `tracing` bridge with a small buffer and
/// size splitting, so drops and split files show up quickly.
#[tokio::main]
async fn main() -> logroll::Result<()> {
    let config = Arc::new(SharedConfig::new(LogConfig {
        max_file_size_bytes: Some(4 * 1024 * 1024),
        ..LogConfig::default().apply_env()?
    }));

    let handle = init_file_writer(
        FileWriterConfig {
            module: "load".into(),
            base_dir: env_or(LOGROLL_DIR_ENV, "logs").into(),
            file_prefix: "custom_load".into(),
            buffer_capacity: 50_000,
            batch_bytes: 64 * 1024,
            overflow_notice_cooldown: Duration::from_secs(1),
            rotation: RotationPolicy::new().with_pid_discriminator().with_size_split(true),
            ..Default::default()
        },
        config.clone(),
    )?;

    init_tracing_with_config(
        handle.writer.clone(),
        config,
        TracingBridgeConfig {
            module: "load".into(),
            disable_color: true,
            enable_stdout: false,
        },
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "custom config: sent {} events in {:?} (~{:.0} ev/s), dropped {}",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        handle.file.dropped()
    );

    handle.shutdown().await
}
