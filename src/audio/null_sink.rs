//! Clock-driven silent output
//!
//! Renders sources in real time without a sound device: every quantum the
//! render task advances its read position by the elapsed wall time and
//! feeds the post-gain samples to the analyser. Used when no audio server
//! is available and by the session tests together with tokio's paused clock.

use super::analyser::Analyser;
use super::output::{ActiveSource, AudioOutput};
use super::DecodedAudio;
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const RENDER_QUANTUM: Duration = Duration::from_millis(10);

pub struct NullSink {
    gain: Arc<AtomicU32>,
    analyser: Arc<Analyser>,
    closed: AtomicBool,
    live_sources: Arc<AtomicUsize>,
    started: AtomicUsize,
}

impl NullSink {
    pub fn new(fft_size: usize) -> Self {
        Self {
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            analyser: Arc::new(Analyser::new(fft_size)),
            closed: AtomicBool::new(false),
            live_sources: Arc::new(AtomicUsize::new(0)),
            started: AtomicUsize::new(0),
        }
    }

    /// Sources currently rendering
    pub fn live_sources(&self) -> usize {
        self.live_sources.load(Ordering::SeqCst)
    }

    /// Sources created since this output was opened
    pub fn sources_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioOutput for NullSink {
    fn start(&self, audio: &DecodedAudio, offset: f64) -> Result<Box<dyn ActiveSource>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Output("Output has been closed".into()));
        }

        let cancel = CancellationToken::new();
        let (ended_tx, ended_rx) = oneshot::channel();

        self.started.fetch_add(1, Ordering::SeqCst);
        let job = RenderJob {
            audio: audio.clone(),
            start_frame: audio.frame_at(offset),
            gain: self.gain.clone(),
            analyser: self.analyser.clone(),
            _live: LiveSource::new(self.live_sources.clone()),
        };
        let task = tokio::spawn(job.run(cancel.clone(), ended_tx));

        Ok(Box::new(NullSource {
            cancel,
            task: Some(task),
            ended: Some(ended_rx),
        }))
    }

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn frequency_data(&self) -> Vec<u8> {
        self.analyser.byte_frequency_data()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.analyser.reset();
    }
}

/// Counts a rendering source for as long as it lives
struct LiveSource(Arc<AtomicUsize>);

impl LiveSource {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RenderJob {
    audio: DecodedAudio,
    start_frame: usize,
    gain: Arc<AtomicU32>,
    analyser: Arc<Analyser>,
    _live: LiveSource,
}

impl RenderJob {
    async fn run(self, cancel: CancellationToken, ended: oneshot::Sender<Result<()>>) {
        let samples = self.audio.samples();
        let rate = self.audio.sample_rate() as f64;
        let started = Instant::now();
        let mut position = self.start_frame;

        let mut ticker = tokio::time::interval(RENDER_QUANTUM);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while position < samples.len() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = (started.elapsed().as_secs_f64() * rate) as usize;
                    let target = (self.start_frame + elapsed).min(samples.len());
                    if target > position {
                        // Only the analyser window is observable
                        let from = target
                            .saturating_sub(self.analyser.fft_size())
                            .max(position);
                        let gain = f32::from_bits(self.gain.load(Ordering::SeqCst));
                        let rendered: Vec<f32> =
                            samples[from..target].iter().map(|s| s * gain).collect();
                        self.analyser.push(&rendered);
                        position = target;
                    }
                }
            }
        }

        let _ = ended.send(Ok(()));
    }
}

struct NullSource {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    ended: Option<oneshot::Receiver<Result<()>>>,
}

#[async_trait]
impl ActiveSource for NullSource {
    fn take_ended(&mut self) -> Option<oneshot::Receiver<Result<()>>> {
        self.ended.take()
    }

    async fn stop(mut self: Box<Self>) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NullSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::{decode, tests::sine_wav};

    #[tokio::test(start_paused = true)]
    async fn test_source_ends_after_remaining_duration() {
        let sink = NullSink::new(64);
        let audio = decode(&sine_wav(2.0, 8000)).unwrap();
        let mut source = sink.start(&audio, 1.5).unwrap();
        let ended = source.take_ended().unwrap();
        assert!(source.take_ended().is_none());

        let started = Instant::now();
        ended.await.unwrap().unwrap();
        let elapsed = started.elapsed().as_secs_f64();
        assert!((0.5..0.52).contains(&elapsed), "ended after {}", elapsed);

        source.stop().await;
        assert_eq!(sink.live_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_source() {
        let sink = NullSink::new(64);
        let audio = decode(&sine_wav(5.0, 8000)).unwrap();
        let source = sink.start(&audio, 0.0).unwrap();
        assert_eq!(sink.live_sources(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        source.stop().await;
        assert_eq!(sink.live_sources(), 0);
        assert_eq!(sink.sources_started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gain_reaches_analyser() {
        let sink = NullSink::new(64);
        let audio = decode(&sine_wav(5.0, 8000)).unwrap();

        sink.set_gain(0.0);
        let source = sink.start(&audio, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.frequency_data().iter().all(|&b| b == 0));

        sink.set_gain(1.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.frequency_data().iter().any(|&b| b > 0));
        source.stop().await;
    }

    #[tokio::test]
    async fn test_closed_output_refuses_sources() {
        let sink = NullSink::new(64);
        let audio = decode(&sine_wav(1.0, 8000)).unwrap();
        sink.close();
        assert!(matches!(
            sink.start(&audio, 0.0),
            Err(MediaError::Output(_))
        ));
    }
}
