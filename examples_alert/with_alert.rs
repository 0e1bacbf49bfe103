use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use logroll::{init_streams, set_default_writer, trace, AlertFn, Level, LogConfig, LogWriter, Msg, SharedConfig};

#[tokio::main]
async fn main() -> logroll::Result<()> {
    let config = Arc::new(SharedConfig::new(LogConfig {
        alert_level: Level::Error,
        ..LogConfig::default().apply_env()?
    }));

    let alerts = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&alerts);
    let on_alert: AlertFn = Arc::new(move |msg: &Msg| {
        counter.fetch_add(1, Ordering::Relaxed);
        // A real hook would post to a pager or chat channel here.
        eprint!("ALERT {}", msg.formatted);
    });

    let streams = init_streams(config.clone(), "checkout", Some(on_alert))?;
    set_default_writer(streams.default.writer.clone())?;

    {
        let _trace = trace::enter("req-7f3a");
        let log = logroll::default_writer().ok_or_else(|| logroll::Error::Config("no default writer".into()))?;
        log.write(Level::Info, "cart {} has {} items", &[&"c-19", &3])?;
        log.write(Level::Error, "payment provider timed out after {}ms", &[&3000])?;
        streams.exception.writer.write(Level::Error, "payment provider timed out", &[])?;
    }

    // Lower the threshold at runtime; the next warning alerts too.
    config.update(|cfg| cfg.alert_level = Level::Warn);
    streams.default.writer.write(Level::Warn, "retrying payment", &[])?;

    println!("alerts sent: {}", alerts.load(Ordering::Relaxed));
    streams.default.shutdown().await?;
    streams.exception.shutdown().await
}
