//! Injected progress reporting.
//!
//! The build pipeline and the query engine never write to a global stream;
//! they emit structured events into a sink chosen by the caller. The default
//! sink forwards to the `log` facade.

/// Structured progress events emitted by long-running operations.
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    /// A document batch was dispatched to the build pipeline.
    BatchStarted { seq: u64, name: &'a str },
    /// A document batch finished (block written).
    BatchFinished { seq: u64, name: &'a str },
    /// A merge level begins with the given number of input blocks.
    LevelStarted { level: u32, blocks: usize },
    /// A merge level completed; its inputs have been deleted.
    LevelFinished { level: u32 },
    /// A compact sub-index build begins.
    SubIndexStarted {
        index: usize,
        columns: usize,
        sig_size: u64,
    },
    /// A compact sub-index was written.
    SubIndexFinished { index: usize },
}

/// Capability accepting progress events.
pub trait ProgressSink: Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

/// Sink that forwards events to the `log` facade at info level.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::BatchStarted { seq, name } => {
                log::info!("IN - {:07} - {}", seq, name)
            }
            ProgressEvent::BatchFinished { seq, name } => {
                log::info!("OK - {:07} - {}", seq, name)
            }
            ProgressEvent::LevelStarted { level, blocks } => {
                log::info!("merge level {}: {} blocks", level, blocks)
            }
            ProgressEvent::LevelFinished { level } => {
                log::info!("merge level {} complete", level)
            }
            ProgressEvent::SubIndexStarted {
                index,
                columns,
                sig_size,
            } => {
                log::info!(
                    "sub-index {}: {} columns, signature size {}",
                    index,
                    columns,
                    sig_size
                )
            }
            ProgressEvent::SubIndexFinished { index } => {
                log::info!("sub-index {} written", index)
            }
        }
    }
}

/// Sink that drops every event; used by tests and library embedders.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent<'_>) {}
}
