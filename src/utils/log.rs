use std::{io::Write, sync::Once};

static INIT_LOG: Once = Once::new();

/// Initialize the logger. Safe to call multiple times, only the
/// first call takes effect.
pub fn init_log() {
    INIT_LOG.call_once(|| {
        use env_logger::Builder;

        let mut builder = Builder::from_default_env();

        builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}
