use std::future::Future;
use std::time::Instant;

/// Which unit `IMQ_LOG_TIME_FORMAT` asked for. Defaults to microseconds,
/// matching the distilled spec's default wall-clock resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeFormat {
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeFormat {
    fn from_env() -> Self {
        match std::env::var("IMQ_LOG_TIME_FORMAT").as_deref() {
            Ok("milliseconds") => TimeFormat::Milliseconds,
            Ok("seconds") => TimeFormat::Seconds,
            _ => TimeFormat::Microseconds,
        }
    }

    fn format(&self, elapsed: std::time::Duration) -> String {
        match self {
            TimeFormat::Microseconds => format!("{}us", elapsed.as_micros()),
            TimeFormat::Milliseconds => format!("{}ms", elapsed.as_millis()),
            TimeFormat::Seconds => format!("{:.3}s", elapsed.as_secs_f64()),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

/// Wraps an async operation with the profiling decorator's contract
/// (spec §6): if both `IMQ_LOG_TIME` and `IMQ_LOG_ARGS` are disabled, the
/// future is awaited unchanged; otherwise wall-clock time around the
/// `.await` is recorded and logged via `tracing`. Never alters the
/// wrapped future's output or error behavior.
pub async fn profiled<F, T>(label: &str, args: Option<&str>, fut: F) -> T
where
    F: Future<Output = T>,
{
    let log_time = env_flag("IMQ_LOG_TIME");
    let log_args = env_flag("IMQ_LOG_ARGS");

    if !log_time && !log_args {
        return fut.await;
    }

    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed();

    if log_time {
        let format = TimeFormat::from_env();
        tracing::info!(operation = label, elapsed = %format.format(elapsed), "profiled");
    }
    if log_args {
        tracing::info!(operation = label, args = args.unwrap_or(""), "profiled args");
    }

    result
}
