//! Line-oriented console driving the playback and capture sessions
//!
//! Each input line is parsed into a `Command`, executed to completion, and
//! the resulting state printed. Timers keep running between lines.

use crate::audio::{AudioSource, PlaybackSession};
use crate::camera::{CaptureSession, ConstraintInput};
use crate::settings;
use log::{debug, info};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(String),
    Play,
    Pause,
    Toggle,
    Seek(f64),
    Volume(f32),
    Status,
    Spectrum,
    Cameras,
    CameraStart(Option<String>),
    CameraSwitch(String),
    CameraStop,
    CameraSet(ConstraintInput),
    CameraInfo,
    Help,
    Quit,
}

impl Command {
    /// Parse one line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "load" | "open" => {
                if rest.is_empty() {
                    return Err("usage: load <file|url>".to_string());
                }
                Command::Load(rest.to_string())
            }
            "play" => Command::Play,
            "pause" => Command::Pause,
            "toggle" | "space" => Command::Toggle,
            "seek" => Command::Seek(parse_number(rest, "seek <seconds>")?),
            "volume" | "vol" => Command::Volume(parse_number(rest, "volume <0.0-1.0>")?),
            "status" | "st" => Command::Status,
            "spectrum" | "fft" => Command::Spectrum,
            "cameras" | "devices" => Command::Cameras,
            "camera" | "cam" => Self::parse_camera(rest)?,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("Unknown command {:?}, try \"help\"", other)),
        };
        Ok(Some(command))
    }

    fn parse_camera(rest: &str) -> Result<Command, String> {
        let (action, arg) = match rest.split_once(char::is_whitespace) {
            Some((action, arg)) => (action, arg.trim()),
            None => (rest, ""),
        };
        match action {
            "start" => Ok(Command::CameraStart(
                (!arg.is_empty()).then(|| arg.to_string()),
            )),
            "switch" if !arg.is_empty() => Ok(Command::CameraSwitch(arg.to_string())),
            "switch" => Err("usage: camera switch <device id>".to_string()),
            "stop" => Ok(Command::CameraStop),
            "set" if !arg.is_empty() => Ok(Command::CameraSet(ConstraintInput::parse(arg))),
            "set" => Err("usage: camera set width=1280 zoom=2 ...".to_string()),
            "info" | "" => Ok(Command::CameraInfo),
            other => Err(format!("Unknown camera action {:?}", other)),
        }
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, usage: &str) -> Result<T, String> {
    text.parse().map_err(|_| format!("usage: {}", usage))
}

const HELP: &str = "\
Playback:
  load <file|url>     decode a WAV file or URL
  play | pause        start or pause
  toggle              play/pause
  seek <seconds>      jump to a position
  volume <0.0-1.0>    set the gain
  status              position, duration and volume
  spectrum            current frequency bars
Camera:
  cameras             list video inputs
  camera start [id]   open the default or given camera
  camera switch <id>  select another camera
  camera set k=v ...  width, height, aspect, zoom, focus, resize
  camera info         capabilities and settings
  camera stop         release the camera
  quit";

pub struct Console {
    playback: PlaybackSession,
    capture: CaptureSession,
}

impl Console {
    pub fn new(playback: PlaybackSession, capture: CaptureSession) -> Self {
        Self { playback, capture }
    }

    /// Restore the persisted volume and list cameras once
    pub async fn init(&mut self) {
        self.playback.set_volume(settings::get_volume());
        if let Err(e) = self.capture.list_devices().await {
            println!("Camera enumeration failed: {}", e);
        }
    }

    /// Read commands from stdin until EOF or `quit`
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("mediadeck ready, type \"help\" for commands");
        prompt();

        while let Some(line) = lines.next_line().await? {
            match Command::parse(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => {}
                Err(message) => println!("{}", message),
            }
            prompt();
        }

        self.close().await;
        Ok(())
    }

    pub async fn execute(&mut self, command: Command) {
        debug!("Executing {:?}", command);
        match command {
            Command::Load(arg) => self.load(&arg).await,
            Command::Play => {
                if let Err(e) = self.playback.play() {
                    println!("{}", e);
                }
                self.print_status();
            }
            Command::Pause => {
                self.playback.pause().await;
                self.print_status();
            }
            Command::Toggle => {
                if let Err(e) = self.playback.toggle_play_pause().await {
                    println!("{}", e);
                }
                self.print_status();
            }
            Command::Seek(time) => {
                if let Err(e) = self.playback.seek(time).await {
                    println!("{}", e);
                }
                self.print_status();
            }
            Command::Volume(volume) => {
                self.playback.set_volume(volume);
                let state = self.playback.shared_state();
                settings::set_volume(state.volume());
                println!("Volume {:.0}%", state.volume() * 100.0);
            }
            Command::Status => self.print_status(),
            Command::Spectrum => {
                let spectrum = self.playback.shared_state().spectrum();
                if spectrum.is_empty() {
                    println!("(no signal)");
                } else {
                    println!("{}", render_bars(&spectrum, 32));
                }
            }
            Command::Cameras => {
                if let Err(e) = self.capture.list_devices().await {
                    println!("{}", e);
                }
                self.print_cameras();
            }
            Command::CameraStart(device_id) => {
                // A remembered camera that is no longer attached falls back to the default
                let device_id = device_id.or_else(|| {
                    settings::get_preferred_camera()
                        .filter(|id| self.capture.devices().iter().any(|d| &d.id == id))
                });
                match self.capture.start(device_id.as_deref()).await {
                    Ok(()) => self.camera_opened(),
                    Err(e) => println!("{}", e),
                }
            }
            Command::CameraSwitch(device_id) => {
                if let Err(e) = self.capture.switch_device(&device_id).await {
                    println!("{}", e);
                } else if self.capture.is_live() {
                    self.camera_opened();
                } else {
                    println!("Selected {}", device_id);
                }
            }
            Command::CameraStop => {
                self.capture.stop();
                println!("Camera {}", self.capture.state());
            }
            Command::CameraSet(input) => match self.capture.apply_constraint(&input).await {
                Ok(()) => self.print_camera_info(),
                Err(e) => println!("{}", e),
            },
            Command::CameraInfo => self.print_camera_info(),
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
    }

    pub async fn load(&mut self, arg: &str) {
        let source = match AudioSource::from_arg(arg).await {
            Ok(source) => source,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };
        match self.playback.load(source).await {
            Ok(()) => {
                let state = self.playback.shared_state();
                println!(
                    "Loaded {} ({})",
                    state.track_label().unwrap_or_default(),
                    format_duration(state.duration())
                );
                println!("{}", render_waveform(&state.waveform()));
            }
            Err(e) => println!("{}", e),
        }
    }

    /// Open the camera given on the command line, `None` meaning the
    /// preferred or default one
    pub async fn start_camera(&mut self, device_id: Option<&str>) {
        self.execute(Command::CameraStart(device_id.map(str::to_string)))
            .await;
    }

    async fn close(self) {
        info!("Shutting down");
        self.capture.close();
        self.playback.close().await;
    }

    fn camera_opened(&self) {
        if let Some(id) = self.capture.selected_device_id() {
            settings::set_preferred_camera(id);
        }
        println!(
            "Camera {}: {}",
            self.capture.state(),
            self.capture.track_label().unwrap_or_default()
        );
        self.print_camera_info();
    }

    fn print_status(&self) {
        let state = self.playback.shared_state();
        if !state.is_loaded() {
            println!("Nothing loaded");
            return;
        }
        println!(
            "{} {} {} / {} vol {:.0}%",
            if state.is_playing() { "▶" } else { "⏸" },
            render_progress(state.progress(), 30),
            format_duration(state.current_time()),
            format_duration(state.duration()),
            state.volume() * 100.0
        );
        if let Some(error) = state.error() {
            println!("Last error: {}", error);
        }
    }

    fn print_cameras(&self) {
        let selected = self.capture.selected_device_id();
        if self.capture.devices().is_empty() {
            println!("No cameras");
        }
        for device in self.capture.devices() {
            let marker = if Some(device.id.as_str()) == selected { "*" } else { " " };
            println!("{} {:<16} {}", marker, device.id, device.label);
        }
    }

    fn print_camera_info(&self) {
        println!("State: {}", self.capture.state());
        match self.capture.settings() {
            Some(s) => println!(
                "Settings: {}x{} @ {} fps, aspect {}, zoom {}, focus {}, resize {}",
                opt(s.width),
                opt(s.height),
                opt(s.frame_rate),
                s.aspect_ratio.map_or("-".to_string(), |a| format!("{:.3}", a)),
                opt(s.zoom),
                opt(s.focus_distance),
                s.resize_mode.map_or("-", |m| m.as_str()),
            ),
            None => println!("Settings: unavailable"),
        }
        match self.capture.capabilities() {
            Some(c) => {
                let range = |r: Option<crate::models::NumericRange>| {
                    r.map_or("-".to_string(), |r| format!("{}..{}", r.min, r.max))
                };
                println!(
                    "Capabilities: width {}, height {}, zoom {}, focus {}",
                    range(c.width),
                    range(c.height),
                    range(c.zoom),
                    range(c.focus_distance)
                );
            }
            None => println!("Capabilities: unavailable"),
        }
        if self.capture.constraints().is_none() && self.capture.is_live() {
            println!("Constraints: unavailable");
        }
        if let Some(error) = self.capture.last_error() {
            println!("Last error: {}", error);
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn opt(value: Option<f64>) -> String {
    value.map_or("-".to_string(), |v| format!("{}", v))
}

/// m:ss
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;
    format!("{}:{:02}", minutes, secs)
}

fn render_progress(progress: f32, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Average `spectrum` into `bars` columns of block characters
fn render_bars(spectrum: &[u8], bars: usize) -> String {
    let chunk = spectrum.len().div_ceil(bars).max(1);
    spectrum
        .chunks(chunk)
        .map(|c| {
            let avg = c.iter().map(|&v| v as usize).sum::<usize>() / c.len();
            LEVELS[avg * (LEVELS.len() - 1) / 255]
        })
        .collect()
}

fn render_waveform(waveform: &[f32]) -> String {
    waveform
        .iter()
        .map(|&v| {
            let level = (v.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[level]
        })
        .collect()
}
