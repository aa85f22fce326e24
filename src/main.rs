use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use caring_voice::config::TtsSettings;
use caring_voice::db;
use caring_voice::voice::{
    AudioCapture, AudioPlayback, Microphone, PLAYBACK_SAMPLE_RATE, Speak, SpeechToText,
    TextOnlySpeaker, TextToSpeech, VoiceSpeaker, calculate_energy,
};
use caring_voice::{ClockSync, Components, Config, OllamaClient, Options, Session};

/// Caring - a spoken conversation companion
#[derive(Parser)]
#[command(name = "caring", version, about)]
struct Cli {
    #[command(flatten)]
    options: Options,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Print recent stored conversation turns
    History {
        /// Number of turns to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,caring_voice=info",
        1 => "info,caring_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker(),
            Command::History { limit } => history(cli.options, limit).await,
        };
    }

    let config = Config::load(cli.options)?;

    tracing::info!(
        model = %config.model,
        ollama = %config.ollama_url,
        wake_word = %config.session.wake_word,
        policy = %config.session.policy,
        "starting caring voice assistant"
    );

    let context = config.context_builder();
    let Config {
        model,
        ollama_url,
        session,
        store,
        ntp_server,
        stt,
        tts,
        ..
    } = config;

    ClockSync::new(ntp_server).check().await;

    // Without a microphone there is nothing to do
    let audio = Microphone::new()?;

    let Some(stt_key) = stt.api_key else {
        anyhow::bail!(
            "{} is required for {:?} speech recognition",
            stt.provider.key_var(),
            stt.provider
        );
    };
    let transcriber = SpeechToText::new(stt.provider, stt_key, stt.model, stt.language)?;

    let speaker = build_speaker(tts);
    let store = db::open_store(&store).await;
    let model = OllamaClient::new(&ollama_url, model)?;

    let session = Session::new(
        session,
        context,
        Components {
            audio: Box::new(audio),
            transcriber: Box::new(transcriber),
            store,
            model: Box::new(model),
            speaker,
        },
    );

    session.run().await?;
    Ok(())
}

/// Voice output when a synthesis key is configured, text otherwise
fn build_speaker(tts: Option<TtsSettings>) -> Box<dyn Speak> {
    let Some(tts) = tts else {
        return Box::new(TextOnlySpeaker);
    };

    match TextToSpeech::new(tts.provider, tts.api_key, tts.voice, tts.speed, tts.model) {
        Ok(tts) => Box::new(VoiceSpeaker::new(tts)),
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis unavailable, replies will be text only");
            Box::new(TextOnlySpeaker)
        }
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    let lost = capture.is_device_lost();
    capture.stop();
    if lost {
        anyhow::bail!("input device disappeared during the test");
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a short tone
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play(samples)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl list sinks short");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Print stored turns, oldest first
async fn history(options: Options, limit: usize) -> anyhow::Result<()> {
    let config = Config::load(options)?;
    let mut store = db::open_store(&config.store).await;

    let mut turns = store.recent_turns(limit).await;
    store.close().await;

    if turns.is_empty() {
        println!("No stored conversations ({} store).", store.backend());
        return Ok(());
    }

    turns.reverse();
    for turn in turns {
        let at = turn.timestamp.with_timezone(&config.utc_offset);
        println!("[{}]", at.format("%Y-%m-%d %-I:%M %p"));
        println!("  You:    {}", turn.user_message);
        println!("  Caring: {}\n", turn.assistant_response);
    }

    Ok(())
}
