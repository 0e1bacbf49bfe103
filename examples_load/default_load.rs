use std::sync::Arc;
use std::time::Instant;

use logroll::env::{env_or, LOGROLL_DIR_ENV};
use logroll::{init_file_writer, FileWriterConfig, Level, LogConfig, LogWriter, SharedConfig};

#[tokio::main]
async fn main() -> logroll::Result<()> {
    let config = Arc::new(SharedConfig::new(LogConfig::default().apply_env()?));
    let handle = init_file_writer(
        FileWriterConfig {
            module: "load".into(),
            base_dir: env_or(LOGROLL_DIR_ENV, "logs").into(),
            file_prefix: "default_load".into(),
            ..Default::default()
        },
        config,
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        handle.writer.write(Level::Error, "default load test error iteration={}", &[&i])?;
    }

    let elapsed = start.elapsed();
    println!(
        "default config: queued {} lines in {:?} (~{:.0} lines/s), dropped {}",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        handle.file.dropped()
    );

    let written_to = handle.file.current_file();
    handle.shutdown().await?;
    println!("written to {:?}", written_to);
    Ok(())
}
