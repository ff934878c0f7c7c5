//! Playback session
//!
//! Keeps a decoded buffer, a gain stage and a frequency analyser in sync
//! with the position shown to the user. Playback time is derived from the
//! monotonic clock rather than polled from the output; the output's end
//! signal is authoritative for completion.

use super::decoder::{decode, DecodedAudio};
use super::output::{ActiveSource, AudioOutput};
use super::source::{fetch_bytes, http_client, AudioSource};
use crate::config::PlaybackConfig;
use crate::error::{MediaError, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared state for a playback session, read by the console and written by
/// the session and its timer tasks
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackInner>>,
}

struct PlaybackInner {
    audio: Option<DecodedAudio>,
    track_label: Option<String>,
    /// Pre-computed RMS bars for the overview
    waveform: Vec<f32>,
    volume: f32,
    /// Position at which playback last started or was paused
    offset: f64,
    /// Set while playing; position = offset + started_at.elapsed()
    started_at: Option<Instant>,
    /// Present iff playing
    source: Option<Box<dyn ActiveSource>>,
    /// Bumped on every start/stop so stale callbacks can tell
    generation: u64,
    /// Cancels the timers of the current play interval
    timers: Option<CancellationToken>,
    /// Last value published by the position ticker
    reported_position: f64,
    spectrum: Vec<u8>,
    error: Option<String>,
}

impl PlaybackInner {
    fn duration(&self) -> f64 {
        self.audio.as_ref().map(|a| a.duration()).unwrap_or(0.0)
    }

    fn raw_position(&self) -> f64 {
        match self.started_at {
            Some(started) => self.offset + started.elapsed().as_secs_f64(),
            None => self.offset,
        }
    }

    fn position(&self) -> f64 {
        self.raw_position().clamp(0.0, self.duration())
    }

    /// End the current play interval: cancel its timers and hand back the
    /// source so the caller can stop it outside the lock
    fn end_interval(&mut self) -> Option<Box<dyn ActiveSource>> {
        if let Some(timers) = self.timers.take() {
            timers.cancel();
        }
        self.generation += 1;
        self.started_at = None;
        self.spectrum.clear();
        self.source.take()
    }
}

impl SharedPlaybackState {
    fn new(volume: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackInner {
                audio: None,
                track_label: None,
                waveform: Vec::new(),
                volume,
                offset: 0.0,
                started_at: None,
                source: None,
                generation: 0,
                timers: None,
                reported_position: 0.0,
                spectrum: Vec::new(),
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().audio.is_some()
    }

    /// Check if playback is active
    pub fn is_playing(&self) -> bool {
        self.lock().source.is_some()
    }

    /// Current position in seconds, computed from the clock
    pub fn current_time(&self) -> f64 {
        self.lock().position()
    }

    /// Position as last sampled by the ticker
    pub fn reported_position(&self) -> f64 {
        self.lock().reported_position
    }

    /// Position at which playback last started or was paused
    pub fn offset(&self) -> f64 {
        self.lock().offset
    }

    /// Get total duration in seconds
    pub fn duration(&self) -> f64 {
        self.lock().duration()
    }

    /// Get playback progress as fraction (0.0 - 1.0)
    pub fn progress(&self) -> f32 {
        let inner = self.lock();
        let duration = inner.duration();
        if duration <= 0.0 {
            0.0
        } else {
            (inner.position() / duration) as f32
        }
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn track_label(&self) -> Option<String> {
        self.lock().track_label.clone()
    }

    pub fn waveform(&self) -> Vec<f32> {
        self.lock().waveform.clone()
    }

    /// Latest analyser frame, empty when not playing
    pub fn spectrum(&self) -> Vec<u8> {
        self.lock().spectrum.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    fn set_error(&self, error: &MediaError) {
        self.lock().error = Some(error.to_string());
    }

    /// Publish the clock position; false once the interval is over
    fn sample_position(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.source.is_none() {
            return false;
        }
        inner.reported_position = inner.position();
        true
    }

    fn publish_spectrum(&self, generation: u64, bins: Vec<u8>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.source.is_none() {
            return false;
        }
        inner.spectrum = bins;
        true
    }

    /// Handle the end signal of the source started for `generation`. A
    /// source that got within `epsilon` of the end completed and rewinds to
    /// 0. Any other end stops playback where the clock is and records why.
    /// Returns the released source and whether playback completed.
    fn finish_interval(
        &self,
        generation: u64,
        epsilon: f64,
        outcome: Result<()>,
    ) -> Option<(Box<dyn ActiveSource>, bool)> {
        let mut inner = self.lock();
        if inner.generation != generation || inner.source.is_none() {
            return None;
        }
        let duration = inner.duration();
        let position = inner.raw_position().clamp(0.0, duration);
        let completed = outcome.is_ok() && position >= duration - epsilon;

        let stopped_at = if completed {
            0.0
        } else {
            let error = outcome.err().unwrap_or_else(|| {
                MediaError::Output(format!(
                    "Output stopped at {:.2}s of {:.2}s",
                    position, duration
                ))
            });
            inner.error = Some(error.to_string());
            position
        };

        let source = inner.end_interval()?;
        inner.offset = stopped_at;
        inner.reported_position = stopped_at;
        Some((source, completed))
    }
}

/// Counts a running timer loop for as long as it lives
struct TimerGuard(Arc<AtomicUsize>);

impl TimerGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns one output graph and the buffer played through it
pub struct PlaybackSession {
    id: Uuid,
    output: Arc<dyn AudioOutput>,
    client: reqwest::Client,
    config: PlaybackConfig,
    state: SharedPlaybackState,
    timers: Arc<AtomicUsize>,
}

impl PlaybackSession {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Result<Self> {
        let client = http_client(config.fetch_timeout())?;
        let state = SharedPlaybackState::new(1.0);
        output.set_gain(1.0);
        Ok(Self {
            id: Uuid::new_v4(),
            output,
            client,
            config,
            state,
            timers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get shared playback state for UI updates
    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn position(&self) -> f64 {
        self.state.current_time()
    }

    pub fn offset(&self) -> f64 {
        self.state.offset()
    }

    pub fn duration(&self) -> f64 {
        self.state.duration()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.error()
    }

    /// Timer loops (position sampler, visualiser) still scheduled
    pub fn active_timer_count(&self) -> usize {
        self.timers.load(Ordering::SeqCst)
    }

    /// Fetch and decode `source`, replacing whatever was loaded. Playback
    /// pauses first; on failure the previous buffer stays loaded at the
    /// paused position.
    pub async fn load(&mut self, source: AudioSource) -> Result<()> {
        self.pause().await;

        let label = source.label();
        match self.fetch_and_decode(source).await {
            Ok(audio) => {
                info!(
                    "[playback {}] Loaded {:?}: {:.2}s, {}Hz, {} channel(s)",
                    self.id,
                    label,
                    audio.duration(),
                    audio.sample_rate(),
                    audio.channels()
                );
                let mut inner = self.state.lock();
                inner.waveform = audio.waveform(self.config.waveform_bars);
                inner.audio = Some(audio);
                inner.track_label = Some(label);
                inner.offset = 0.0;
                inner.reported_position = 0.0;
                inner.error = None;
                Ok(())
            }
            Err(e) => {
                warn!("[playback {}] Failed to load {:?}: {}", self.id, label, e);
                self.state.set_error(&e);
                Err(e)
            }
        }
    }

    async fn fetch_and_decode(&self, source: AudioSource) -> Result<DecodedAudio> {
        let data = match source {
            AudioSource::Bytes { data, .. } => data,
            AudioSource::Url(url) => fetch_bytes(&self.client, &url).await?,
        };
        tokio::task::spawn_blocking(move || decode(&data))
            .await
            .map_err(|e| MediaError::Decode(format!("Decoder task failed: {}", e)))?
    }

    /// Start playback at the current offset. No-op when nothing is loaded
    /// or already playing.
    pub fn play(&mut self) -> Result<()> {
        let mut inner = self.state.lock();
        if inner.source.is_some() {
            return Ok(());
        }
        let Some(audio) = inner.audio.clone() else {
            return Ok(());
        };

        let offset = inner.offset;
        let mut source = match self.output.start(&audio, offset) {
            Ok(source) => source,
            Err(e) => {
                warn!("[playback {}] Failed to start source: {}", self.id, e);
                inner.error = Some(e.to_string());
                return Err(e);
            }
        };
        let ended = source.take_ended();

        inner.generation += 1;
        let generation = inner.generation;
        inner.started_at = Some(Instant::now());
        inner.reported_position = offset;
        inner.source = Some(source);
        let timers = CancellationToken::new();
        inner.timers = Some(timers.clone());
        drop(inner);

        debug!("[playback {}] Playing from {:.2}s", self.id, offset);
        self.spawn_position_ticker(generation, timers.clone());
        self.spawn_visualizer(generation, timers.clone());
        if let Some(ended) = ended {
            self.spawn_end_watcher(generation, timers, ended);
        }
        Ok(())
    }

    /// Stop the active source and remember where it was
    pub async fn pause(&mut self) {
        let source = {
            let mut inner = self.state.lock();
            if inner.source.is_none() {
                return;
            }
            let position = inner.position();
            inner.offset = position;
            inner.reported_position = position;
            inner.end_interval()
        };

        if let Some(source) = source {
            source.stop().await;
        }
        debug!("[playback {}] Paused at {:.2}s", self.id, self.offset());
    }

    /// Move to `time` seconds, clamped to the buffer. While playing the
    /// source is stopped, and restarted once the stop has completed.
    pub async fn seek(&mut self, time: f64) -> Result<()> {
        if time.is_nan() {
            return Ok(());
        }

        let was_playing = self.is_playing();
        if was_playing {
            self.pause().await;
        }

        {
            let mut inner = self.state.lock();
            let target = time.clamp(0.0, inner.duration());
            inner.offset = target;
            inner.reported_position = target;
        }

        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Set the gain, clamped to [0, 1]. Applies whether or not playing.
    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.lock().volume = volume;
        self.output.set_gain(volume);
    }

    pub async fn toggle_play_pause(&mut self) -> Result<()> {
        if !self.state.is_loaded() {
            return Ok(());
        }
        if self.is_playing() {
            self.pause().await;
            Ok(())
        } else {
            self.play()
        }
    }

    /// Stop everything and release the output
    pub async fn close(mut self) {
        self.pause().await;
        self.output.close();
        info!("[playback {}] Closed", self.id);
    }

    fn spawn_position_ticker(&self, generation: u64, cancel: CancellationToken) {
        let state = self.state.clone();
        let period = self.config.position_interval();
        let guard = TimerGuard::new(&self.timers);

        tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !state.sample_position(generation) {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_visualizer(&self, generation: u64, cancel: CancellationToken) {
        let state = self.state.clone();
        let output = self.output.clone();
        let period = self.config.visualizer_interval();
        let guard = TimerGuard::new(&self.timers);

        tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let bins = output.frequency_data();
                        if !state.publish_spectrum(generation, bins) {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_end_watcher(
        &self,
        generation: u64,
        cancel: CancellationToken,
        ended: oneshot::Receiver<Result<()>>,
    ) {
        let state = self.state.clone();
        let epsilon = self.config.end_epsilon_secs;
        let id = self.id;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                // A dropped sender means the source is gone as well
                outcome = ended => outcome.unwrap_or(Ok(())),
            };
            let Some((source, completed)) = state.finish_interval(generation, epsilon, outcome)
            else {
                return;
            };
            source.stop().await;
            if completed {
                info!("[playback {}] Reached end of media", id);
            } else {
                warn!(
                    "[playback {}] Source ended early, stopped at {:.2}s: {}",
                    id,
                    state.offset(),
                    state.error().unwrap_or_default()
                );
            }
        });
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        // Sources release their device handle on drop
        drop(self.state.lock().end_interval());
    }
}
