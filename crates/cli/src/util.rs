use chrono::DateTime;
use nu_ansi_term::{AnsiGenericString, Style};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level, which wins over `info`.
pub fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn bold<'a>(msg: impl AsRef<str> + 'a) -> AnsiGenericString<'a, str> {
    Style::new().bold().paint(msg.as_ref().to_owned())
}

pub fn format_timestamp(unix_secs: u64) -> String {
    DateTime::from_timestamp(unix_secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}
