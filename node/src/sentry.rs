use std::env;

use anyhow::Result;
use tracing::info;

use crate::config::SentryConfig;

/// Initialize Sentry from config or environment. The returned guard must be
/// held for the process lifetime; `None` means reporting is disabled.
pub fn init_sentry(config: Option<&SentryConfig>) -> Result<Option<sentry::ClientInitGuard>> {
    let dsn = config
        .and_then(|c| c.dsn.clone())
        .or_else(|| env::var("SENTRY_DSN").ok())
        .filter(|dsn| !dsn.is_empty());

    let Some(dsn) = dsn else {
        return Ok(None);
    };

    info!("initializing sentry error tracking");

    let environment = config
        .and_then(|c| c.environment.clone())
        .or_else(|| env::var("SENTRY_ENVIRONMENT").ok())
        .unwrap_or_else(|| {
            if cfg!(debug_assertions) {
                "development".to_string()
            } else {
                "production".to_string()
            }
        });

    let sample_rate = config.and_then(|c| c.sample_rate).unwrap_or(1.0);

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: Some(format!("tpn-node@{}", env!("CARGO_PKG_VERSION")).into()),
            environment: Some(environment.into()),
            sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Ok(Some(guard))
}
