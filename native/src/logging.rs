use log::{error, info, LevelFilter};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

const LOG_DIR_NAME: &str = "PipeWatch";
const CRASH_LOG_NAME: &str = "crash.log";

/// Environment variable holding the Sentry DSN used by [`init_sentry_from_env`].
pub const SENTRY_DSN_VAR: &str = "PIPEWATCH_SENTRY_DSN";

static CRASH_LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
static SENTRY_GUARD: Mutex<Option<sentry::ClientInitGuard>> = Mutex::new(None);

fn guarded<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initialize Sentry reporting. Empty or missing DSN leaves it disabled.
pub fn init_sentry(dsn: Option<&str>, environment: Option<&str>) -> bool {
    let dsn = match dsn {
        Some(d) if !d.trim().is_empty() => d.trim(),
        _ => {
            info!("[SENTRY] No DSN provided - Sentry disabled");
            return false;
        }
    };

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: environment.map(|e| std::borrow::Cow::Owned(e.to_string())),
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        *guarded(&SENTRY_GUARD) = Some(guard);
        info!("[SENTRY] Initialized - Environment: {:?}", environment);
        true
    } else {
        info!("[SENTRY] Failed to initialize");
        false
    }
}

/// Read the DSN from `PIPEWATCH_SENTRY_DSN`.
pub fn init_sentry_from_env() -> bool {
    let dsn = std::env::var(SENTRY_DSN_VAR).ok();
    let environment = if cfg!(debug_assertions) {
        "development"
    } else {
        "production"
    };
    init_sentry(dsn.as_deref(), Some(environment))
}

pub fn is_sentry_enabled() -> bool {
    guarded(&SENTRY_GUARD)
        .as_ref()
        .map_or(false, |g| g.is_enabled())
}

/// Flush pending events and close the Sentry client.
pub fn shutdown_sentry() {
    if let Some(guard) = guarded(&SENTRY_GUARD).take() {
        info!("[SENTRY] Shutting down - flushing events");
        drop(guard);
    }
}

/// Report a non-fatal error, e.g. the first failure of a run of failed ticks.
pub fn capture_error(context: &str, error: &str) {
    if !is_sentry_enabled() {
        return;
    }
    sentry::with_scope(
        |scope| {
            scope.set_tag("context", context);
            scope.set_level(Some(sentry::Level::Error));
        },
        || {
            sentry::capture_message(&format!("{}: {}", context, error), sentry::Level::Error);
        },
    );
}

/// Initialize env_logger; `RUST_LOG` overrides the default `warn` level.
pub fn init_logger() {
    init_logger_with_level(LevelFilter::Warn);
}

/// Same as [`init_logger`] with a caller-chosen default level.
pub fn init_logger_with_level(default_level: LevelFilter) {
    let mut builder = env_logger::Builder::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(default_level);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    let _ = builder.try_init();
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(LOG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Install a panic hook appending panics to the crash log.
pub fn init_crash_logger() {
    init_crash_logger_in(default_log_dir());
}

pub fn init_crash_logger_in(log_dir: PathBuf) {
    let _ = fs::create_dir_all(&log_dir);
    let log_path = log_dir.join(CRASH_LOG_NAME);
    *guarded(&CRASH_LOG_PATH) = Some(log_path.clone());

    std::panic::set_hook(Box::new(|panic_info| {
        let crash_msg = format_panic_message(panic_info);

        if is_sentry_enabled() {
            sentry::capture_message(&crash_msg, sentry::Level::Fatal);
        }

        if let Err(e) = write_crash_log(&crash_msg) {
            error!("[CRASH LOGGER] Failed to write crash log: {}", e);
        }

        error!("\n{}", crash_msg);
    }));

    info!("[CRASH LOGGER] Initialized - Log: {:?}", log_path);
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

fn thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

fn format_panic_message(panic_info: &std::panic::PanicHookInfo) -> String {
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic payload".to_string());

    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "Unknown location".to_string());

    format!(
        "\n===== PANIC =====\nTimestamp: {}\nLocation: {}\nMessage: {}\nThread: {}\n\nBacktrace:\n{}\n",
        timestamp(),
        location,
        payload,
        thread_name(),
        std::backtrace::Backtrace::capture()
    )
}

fn write_crash_log(message: &str) -> std::io::Result<()> {
    if let Some(ref log_path) = *guarded(&CRASH_LOG_PATH) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        writeln!(file, "{}", message)?;
    }
    Ok(())
}

/// Record an error that stops the tool without panicking.
pub fn log_critical_error(context: &str, error: &str) {
    let message = format!(
        "\n===== CRITICAL ERROR =====\nTimestamp: {}\nContext: {}\nError: {}\nThread: {}\n",
        timestamp(),
        context,
        error,
        thread_name()
    );

    if is_sentry_enabled() {
        sentry::with_scope(
            |scope| {
                scope.set_tag("context", context);
                scope.set_level(Some(sentry::Level::Fatal));
            },
            || {
                sentry::capture_message(error, sentry::Level::Fatal);
            },
        );
    }

    if let Err(e) = write_crash_log(&message) {
        error!("[CRASH LOGGER] Failed to write critical error: {}", e);
    }

    error!("{}", message);
}

pub fn crash_log_path() -> Option<PathBuf> {
    guarded(&CRASH_LOG_PATH).clone()
}

pub fn clear_crash_log() -> std::io::Result<()> {
    if let Some(ref log_path) = *guarded(&CRASH_LOG_PATH) {
        if log_path.exists() {
            fs::remove_file(log_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentry_stays_disabled_without_dsn() {
        assert!(!init_sentry(None, None));
        assert!(!init_sentry(Some("  "), Some("test")));
        assert!(!is_sentry_enabled());
        // No client: must be a no-op.
        capture_error("test", "nothing to report");
    }

    #[test]
    fn critical_errors_land_in_crash_log() {
        let dir = std::env::temp_dir().join(format!("pipewatch-log-{}", uuid::Uuid::new_v4()));
        init_crash_logger_in(dir.clone());
        let _ = std::panic::take_hook();

        let path = crash_log_path().expect("crash log path set");
        assert_eq!(path, dir.join("crash.log"));

        log_critical_error("startup", "namespace unavailable");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Context: startup"));
        assert!(contents.contains("Error: namespace unavailable"));

        clear_crash_log().unwrap();
        assert!(!path.exists());
        let _ = fs::remove_dir_all(dir);
    }
}
