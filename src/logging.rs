use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the stderr logger with elapsed-time formatting.
///
/// Verbosity 0 logs warnings only, 1 adds progress (Info), 2 and above adds
/// Debug. `SIGNET_LOG` overrides the level like `RUST_LOG` would.
/// Output format: [HH:MM:SS] LEVEL: message
pub fn init_logger(verbosity: u8) {
    START_TIME.set(Instant::now()).ok();

    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    env_logger::Builder::from_env(env_logger::Env::new().filter("SIGNET_LOG"))
        .filter_level(level)
        .format(|buf, record| {
            let elapsed = START_TIME.get().unwrap().elapsed();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                elapsed.as_secs() / 3600,
                (elapsed.as_secs() % 3600) / 60,
                elapsed.as_secs() % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok();
}
