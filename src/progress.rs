use kdam::{BarExt, Column, RichProgress, tqdm};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Segmented media transfer.
    Segments,
    /// External transcoder (soft-mux or hard-burn) running.
    Transcode,
}

#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// 0.0 ..= 100.0
    pub percent: f64,
    pub detail: String,
}

/// Consumer of progress events. One sink per job; the orchestrator and the
/// transcoder monitor both forward through it.
pub trait ProgressSink: Send + Sync {
    fn update(&self, event: ProgressEvent);
}

/// Discards everything; default for tests and embedding callers.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _event: ProgressEvent) {}
}

/// Terminal progress bar for the CLI.
pub struct BarSink {
    bar: Mutex<RichProgress>,
}

impl BarSink {
    pub fn new() -> Self {
        let bar = RichProgress::new(
            tqdm!(total = 100, unit = "%".to_owned(), dynamic_ncols = true),
            vec![
                Column::Animation,
                Column::Percentage(0),
                Column::Text("•".to_owned()),
                Column::Text(String::new()),
                Column::Text("•".to_owned()),
                Column::ElapsedTime,
            ],
        );

        Self {
            bar: Mutex::new(bar),
        }
    }
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarSink {
    fn update(&self, event: ProgressEvent) {
        if let Ok(mut bar) = self.bar.lock() {
            bar.replace(3, Column::Text(format!("[cyan]{}", event.detail)));
            let _ = bar.update_to(event.percent.clamp(0.0, 100.0) as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<f64>>>);

    impl ProgressSink for Recorder {
        fn update(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event.percent);
        }
    }

    #[test]
    fn sinks_receive_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Recorder(seen.clone());

        for percent in [10.0, 50.0, 100.0] {
            sink.update(ProgressEvent {
                phase: Phase::Segments,
                percent,
                detail: String::new(),
            });
        }

        assert_eq!(*seen.lock().unwrap(), vec![10.0, 50.0, 100.0]);
    }
}
