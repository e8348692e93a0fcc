use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::processing::analyser::Analyser;

/// One visualization frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedFrame {
    pub snapshot: Vec<u8>,
    pub loudness: f32,
}

impl FeedFrame {
    pub fn new(snapshot: Vec<u8>) -> Self {
        let loudness = loudness(&snapshot);
        Self { snapshot, loudness }
    }
}

/// Arithmetic mean of the bin magnitudes.
pub fn loudness(snapshot: &[u8]) -> f32 {
    if snapshot.is_empty() {
        return 0.0;
    }
    snapshot.iter().map(|&b| b as f32).sum::<f32>() / snapshot.len() as f32
}

/// Periodic snapshots pulled from an analyser.
#[derive(Debug, Clone)]
pub struct FrequencyFeed {
    analyser: Analyser,
    period: Duration,
}

impl FrequencyFeed {
    pub fn new(analyser: Analyser, period: Duration) -> Self {
        Self { analyser, period }
    }

    pub fn with_fps(analyser: Analyser, fps: u32) -> Self {
        Self::new(analyser, Duration::from_secs_f64(1.0 / fps.max(1) as f64))
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// A fresh frame stream, one frame per tick, ending once the analyser closes.
    ///
    /// Every call starts a new, independent stream.
    pub fn frames(&self) -> impl Stream<Item = FeedFrame> + Send + 'static {
        let period = self.period;
        let state: (Analyser, Option<Interval>) = (self.analyser.clone(), None);
        stream::unfold(state, move |(analyser, ticker)| async move {
            let mut ticker = ticker.unwrap_or_else(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval
            });
            ticker.tick().await;
            if analyser.is_closed() {
                return None;
            }
            let frame = FeedFrame::new(analyser.byte_frequency_data());
            Some((frame, (analyser, Some(ticker))))
        })
    }

    /// Drive `callback` from a background task until the handle is cancelled.
    pub fn spawn<F>(&self, callback: F) -> FeedHandle
    where
        F: FnMut(&FeedFrame) + Send + 'static,
    {
        let boxed: Box<dyn FnMut(&FeedFrame) + Send> = Box::new(callback);
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(boxed)));
        let task_slot = Arc::clone(&slot);
        let mut frames = Box::pin(self.frames());

        let task = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let mut guard = task_slot.lock();
                match guard.as_mut() {
                    Some(callback) => callback(&frame),
                    None => break,
                }
            }
            log::debug!("frequency feed finished");
        });

        FeedHandle {
            slot,
            task: Some(task),
        }
    }
}

type CallbackSlot = Arc<Mutex<Option<Box<dyn FnMut(&FeedFrame) + Send>>>>;

/// Keeps a spawned feed alive. Dropping it cancels the feed.
pub struct FeedHandle {
    slot: CallbackSlot,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Stop the feed. No callback runs after this returns.
    pub fn cancel(&mut self) {
        // Taking the slot waits for an in-flight callback to finish.
        self.slot.lock().take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub const DEFAULT_BASE_RADIUS: f32 = 40.0;
pub const GLOW_GAIN: f32 = 0.8;

/// Geometry of the radial loudness visual.
///
/// Holds only surface dimensions; resizing never touches the analyser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialMeter {
    width: u32,
    height: u32,
    base_radius: f32,
}

impl RadialMeter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            base_radius: DEFAULT_BASE_RADIUS,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }

    pub fn base_radius(&self) -> f32 {
        self.base_radius
    }

    pub fn glow_radius(&self, loudness: f32) -> f32 {
        self.base_radius + loudness * GLOW_GAIN
    }
}

impl Default for RadialMeter {
    fn default() -> Self {
        Self::new(300, 300)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn loudness_is_mean_of_bins() {
        assert_relative_eq!(loudness(&[0, 100, 200]), 100.0);
        assert_eq!(loudness(&[]), 0.0);
    }

    #[test]
    fn glow_follows_loudness() {
        let meter = RadialMeter::default();
        assert_relative_eq!(meter.glow_radius(0.0), 40.0);
        assert_relative_eq!(meter.glow_radius(100.0), 120.0);
    }

    #[test]
    fn resize_moves_center_only() {
        let mut meter = RadialMeter::new(300, 300);
        meter.resize(600, 200);
        assert_eq!(meter.center(), (300.0, 100.0));
        assert_relative_eq!(meter.glow_radius(10.0), 48.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_one_frame_per_tick() {
        let analyser = Analyser::new(64).unwrap();
        let feed = FrequencyFeed::with_fps(analyser, 60);
        let frames: Vec<FeedFrame> = feed.frames().take(3).collect().await;
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.snapshot.len() == 32));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_when_analyser_closes() {
        let analyser = Analyser::new(32).unwrap();
        let feed = FrequencyFeed::new(analyser.clone(), Duration::from_millis(10));
        let mut frames = Box::pin(feed.frames());
        assert!(frames.next().await.is_some());
        analyser.close();
        assert!(frames.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_feed_stops_calling_back() {
        let analyser = Analyser::new(32).unwrap();
        let feed = FrequencyFeed::new(analyser, Duration::from_millis(16));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut handle = feed.spawn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        let frozen = calls.load(Ordering::SeqCst);
        assert!(frozen > 0);
        assert!(!handle.is_active());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), frozen);
    }
}
