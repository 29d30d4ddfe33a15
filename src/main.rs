use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nexus_voice::voice::{
    AudioCapture, AudioPlayback, CaptureEvent, CaptureSource, PLAYBACK_SAMPLE_RATE,
    PlaybackBuffer, PlaybackSink, SpeechRate, SpeechRequest, TextToSpeech, TtsProvider,
    samples_to_wav,
};
use nexus_voice::{
    AssistantClient, Config, TranscriptSubmitter, VoiceController, VoiceEvent, WebSocketEndpoint,
};

/// Nexus Voice - talk to a multilingual security assistant
#[derive(Parser)]
#[command(name = "nexus-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture one spoken request, submit it and print the reply
    Listen {
        /// Read the reply aloud
        #[arg(long)]
        speak: bool,
    },
    /// Send a typed request to the assistant
    Ask {
        /// Request text
        text: String,
        /// Read the reply aloud
        #[arg(long)]
        speak: bool,
    },
    /// Synthesize text and play it
    Speak {
        /// Text to speak
        text: String,
        /// Voice identifier (e.g. Kore, Puck)
        #[arg(long)]
        voice: Option<String>,
        /// Speaking pace: slow, normal or fast
        #[arg(long)]
        rate: Option<SpeechRate>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,nexus_voice=info",
        1 => "info,nexus_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Listen { speak } => listen(speak).await,
        Command::Ask { text, speak } => ask(&text, speak).await,
        Command::Speak { text, voice, rate } => {
            let config = Config::load()?;
            speak_text(&config, &text, voice, rate).await
        }
        Command::TestMic { duration, output } => test_mic(duration, output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run one voice turn through the controller
async fn listen(speak: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let key = config.gemini_key()?;
    let endpoint = Arc::new(WebSocketEndpoint::new(&config.live.url, key));
    let capture = Arc::new(AudioCapture::new(
        config.capture.sample_rate,
        config.capture.frame_size,
    ));
    let assistant: Arc<dyn TranscriptSubmitter> = Arc::new(AssistantClient::new(
        config.gemini_key()?,
        config.assistant.model.clone(),
        config.assistant.base_url.clone(),
    )?);

    let (controller, mut events) =
        VoiceController::spawn(endpoint, capture, Some(assistant), config.controller_config());
    controller.start_voice_input();

    let mut reply = None;
    let mut awaiting_reply = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                println!();
                controller.stop_voice_input();
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };

        match event {
            VoiceEvent::Connecting => println!("Connecting..."),
            VoiceEvent::Listening { .. } => println!("Listening. Speak now (Ctrl-C to cancel)."),
            VoiceEvent::Transcript { text, .. } => println!("> {text}"),
            VoiceEvent::Submitted { .. } => awaiting_reply = true,
            VoiceEvent::Dropped => println!("Nothing was heard."),
            VoiceEvent::Cancelled => println!("Cancelled."),
            VoiceEvent::Failed { error } => println!("Voice input failed: {error}"),
            VoiceEvent::Reply { text, language } => {
                println!("\n[{language}] {text}");
                reply = Some(text);
                break;
            }
            VoiceEvent::SubmissionFailed { error } => {
                println!("Assistant failed: {error}");
                break;
            }
            VoiceEvent::Idle if !awaiting_reply => break,
            VoiceEvent::Idle => {}
        }
    }

    controller.shutdown().await;

    if speak && let Some(text) = reply {
        speak_text(&config, &text, None, None).await?;
    }
    Ok(())
}

/// Ask the assistant a typed question
async fn ask(text: &str, speak: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let assistant = AssistantClient::new(
        config.gemini_key()?,
        config.assistant.model.clone(),
        config.assistant.base_url.clone(),
    )?;

    let reply = assistant.ask(text).await?;
    println!("[{}] {}", reply.detected_language, reply.text);

    if speak {
        speak_text(&config, &reply.text, None, None).await?;
    }
    Ok(())
}

/// Synthesize `text` and wait for playback to finish
async fn speak_text(
    config: &Config,
    text: &str,
    voice: Option<String>,
    rate: Option<SpeechRate>,
) -> anyhow::Result<()> {
    let key = config.tts_key()?;
    let tts = match config.tts.provider {
        TtsProvider::Gemini => TextToSpeech::new_gemini(key, config.tts.model.clone())?,
        TtsProvider::OpenAI => TextToSpeech::new_openai(key, config.tts.model.clone())?,
    };

    let request = SpeechRequest {
        text: text.to_string(),
        voice_id: voice.unwrap_or_else(|| config.tts.voice.clone()),
        speed: rate.unwrap_or(config.tts.speed),
    };

    let playback = AudioPlayback::new()?;
    tts.speak(&request, &playback).await?;
    wait_for_playback(&playback).await;
    Ok(())
}

async fn wait_for_playback(playback: &AudioPlayback) {
    while playback.is_playing() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load()?;
    let capture = AudioCapture::new(config.capture.sample_rate, config.capture.frame_size);
    let (frame_tx, mut frames) = tokio::sync::mpsc::unbounded_channel();
    let mut handle = capture.start(frame_tx)?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut recorded = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, frames.recv()).await {
        let frame = match event {
            CaptureEvent::Frame(frame) => frame,
            CaptureEvent::Error(e) => {
                handle.stop();
                return Err(e.into());
            }
        };
        let energy = calculate_rms(&frame.samples);
        let peak = frame.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[frame {:3}] RMS: {:.4} | Peak: {:.4} | [{}]",
            frame.sequence, energy, peak, meter
        );
        recorded.extend_from_slice(&frame.samples);
    }

    handle.stop();

    if let Some(path) = output {
        std::fs::write(&path, samples_to_wav(&recorded, sample_rate)?)?;
        println!("\nSaved {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;
    let sample_rate = PLAYBACK_SAMPLE_RATE;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.play(PlaybackBuffer::mono(sample_rate, samples))?;
    wait_for_playback(&playback).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
