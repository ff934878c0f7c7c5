//! Audio output using PipeWire
//!
//! Each source runs its own PipeWire main loop on a dedicated thread and
//! quits it once the buffer is exhausted or a stop command arrives.

use super::analyser::Analyser;
use super::output::{ActiveSource, AudioOutput};
use super::DecodedAudio;
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use log::error;
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

enum PlaybackCommand {
    Stop,
}

/// Output graph rendering to the default PipeWire sink
pub struct PipeWireOutput {
    gain: Arc<AtomicU32>,
    analyser: Arc<Analyser>,
    closed: AtomicBool,
}

impl PipeWireOutput {
    pub fn new(fft_size: usize) -> Self {
        Self {
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            analyser: Arc::new(Analyser::new(fft_size)),
            closed: AtomicBool::new(false),
        }
    }
}

impl AudioOutput for PipeWireOutput {
    fn start(&self, audio: &DecodedAudio, offset: f64) -> Result<Box<dyn ActiveSource>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Output("Output has been closed".into()));
        }

        let render = RenderState {
            samples: audio.samples().clone(),
            sample_rate: audio.sample_rate(),
            position: audio.frame_at(offset),
            gain: self.gain.clone(),
            analyser: self.analyser.clone(),
        };

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        let (ended_tx, ended_rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name("mediadeck-playback".into())
            .spawn(move || {
                let outcome = run_playback_loop(render, receiver).map_err(|e| {
                    error!("Playback error: {}", e);
                    MediaError::Output(e)
                });
                let _ = ended_tx.send(outcome);
            })
            .map_err(|e| MediaError::Output(format!("Failed to spawn playback thread: {}", e)))?;

        Ok(Box::new(PipeWireSource {
            sender: Some(sender),
            thread: Some(handle),
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

struct PipeWireSource {
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
    thread: Option<JoinHandle<()>>,
    ended: Option<oneshot::Receiver<Result<()>>>,
}

impl PipeWireSource {
    fn send_stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
    }
}

#[async_trait]
impl ActiveSource for PipeWireSource {
    fn take_ended(&mut self) -> Option<oneshot::Receiver<Result<()>>> {
        self.ended.take()
    }

    async fn stop(mut self: Box<Self>) {
        self.send_stop();
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

impl Drop for PipeWireSource {
    fn drop(&mut self) {
        self.send_stop();
    }
}

struct RenderState {
    samples: Arc<[f32]>,
    sample_rate: u32,
    position: usize,
    gain: Arc<AtomicU32>,
    analyser: Arc<Analyser>,
}

impl RenderState {
    /// Next block of post-gain samples, None once exhausted
    fn next_block(&mut self, count: usize) -> Option<Vec<f32>> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + count).min(self.samples.len());
        let gain = f32::from_bits(self.gain.load(Ordering::SeqCst));
        let block: Vec<f32> = self.samples[self.position..end]
            .iter()
            .map(|s| s * gain)
            .collect();
        self.position = end;
        self.analyser.push(&block);
        Some(block)
    }
}

/// Copy a mono block into every channel of an interleaved F32LE buffer,
/// zeroing whatever the block does not cover. Returns the bytes written.
fn fill_interleaved(block: &[f32], channels: usize, out: &mut [u8]) -> usize {
    const SAMPLE: usize = std::mem::size_of::<f32>();
    let frame = SAMPLE * channels;
    let frames = block.len().min(out.len() / frame);

    for (dst, &sample) in out.chunks_exact_mut(frame).zip(&block[..frames]) {
        let bytes = sample.to_le_bytes();
        for slot in dst.chunks_exact_mut(SAMPLE) {
            slot.copy_from_slice(&bytes);
        }
    }
    let written = frames * frame;
    out[written..].fill(0);
    written
}

/// EnumFormat pod asking for mono-sourced F32LE at `sample_rate`
fn format_param(sample_rate: u32) -> std::result::Result<Vec<u8>, String> {
    let mut info = spa::param::audio::AudioInfoRaw::new();
    info.set_format(spa::param::audio::AudioFormat::F32LE);
    info.set_rate(sample_rate);

    let object = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: info.into(),
    };
    let (cursor, _) = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(object),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?;
    Ok(cursor.into_inner())
}

/// Blocks the calling thread until the buffer drains or `Stop` arrives
fn run_playback_loop(
    render: RenderState,
    receiver: pw::channel::Receiver<PlaybackCommand>,
) -> std::result::Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let quit_on_stop = mainloop.downgrade();
    let _commands = receiver.attach(mainloop.loop_(), move |PlaybackCommand::Stop| {
        if let Some(mainloop) = quit_on_stop.upgrade() {
            mainloop.quit();
        }
    });

    struct Callbacks {
        negotiated: spa::param::audio::AudioInfoRaw,
        render: RenderState,
        mainloop: pw::main_loop::MainLoopWeak,
    }

    let param = format_param(render.sample_rate)?;
    let callbacks = Callbacks {
        negotiated: Default::default(),
        render,
        mainloop: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "Mediadeck",
    };

    let stream = pw::stream::StreamBox::new(&core, "mediadeck-playback", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(callbacks)
        .param_changed(|_, cb, id, param| {
            let Some(param) = param.filter(|_| id == spa::param::ParamType::Format.as_raw())
            else {
                return;
            };
            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }
            if let Err(e) = cb.negotiated.parse(param) {
                error!("Unusable negotiated format: {:?}", e);
            }
        })
        .process(|stream, cb| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let Some(data) = buffer.datas_mut().first_mut() else {
                return;
            };

            let channels = cb.negotiated.channels().max(1) as usize;
            let frame = std::mem::size_of::<f32>() * channels;
            let Some(out) = data.data() else {
                return;
            };

            let Some(block) = cb.render.next_block(out.len() / frame) else {
                // Drained
                if let Some(mainloop) = cb.mainloop.upgrade() {
                    mainloop.quit();
                }
                return;
            };
            let written = fill_interleaved(&block, channels, out);

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = frame as i32;
            *chunk.size_mut() = written as u32;
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    // Channel count is left to the server; the rate follows the buffer
    let pod = Pod::from_bytes(&param).ok_or("Serialized audio format is not a valid pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    mainloop.run();
    Ok(())
}
