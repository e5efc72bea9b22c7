use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::*;
use cpal::SampleFormat;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use midisynth::midi;
use midisynth::sequencer::{MidiDataProvider, MidiSequence, Sequencer};
use midisynth::util::log_if_error;
use midisynth::{EngineConfig, Synthesizer};

mod audio;

#[derive(StructOpt)]
struct PlayOpt {
    #[structopt(short, long, parse(from_os_str))]
    /// TOML file with tempo, MIDI modifiers and presets.
    config: Option<PathBuf>,

    input_midi_ports: Vec<String>,
}

#[derive(StructOpt)]
struct FileOpt {
    #[structopt(short, long, parse(from_os_str))]
    /// TOML file with tempo, MIDI modifiers and presets.
    config: Option<PathBuf>,

    #[structopt(short = "l", long = "loop")]
    /// Restart from the beginning when the file ends.
    looping: bool,

    #[structopt(parse(from_os_str))]
    path: PathBuf,
}

#[derive(StructOpt)]
#[structopt(about = "Polyphonic MIDI synthesizer.")]
enum SynthOpt {
    /// List all available MIDI ports.
    ListMidi,

    /// Play the synthesizer from MIDI input ports.
    Play(PlayOpt),

    /// Play a Standard MIDI File.
    File(FileOpt),
}

struct Output {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
}

fn open_output() -> Result<Output> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;

    let supported_config = device
        .supported_output_configs()
        .context("error while querying configs")?
        .next()
        .context("no supported output config")?
        .with_max_sample_rate();

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    tracing::info!(
        "audio output: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    Ok(Output {
        device,
        config,
        sample_format,
    })
}

fn start(
    output: &Output,
    synth: Arc<Synthesizer>,
    sequencer: Option<Sequencer>,
) -> Result<cpal::Stream> {
    let (device, config) = (&output.device, &output.config);
    match output.sample_format {
        SampleFormat::F32 => audio::run::<f32>(device, config, synth, sequencer),
        SampleFormat::I16 => audio::run::<i16>(device, config, synth, sequencer),
        SampleFormat::U16 => audio::run::<u16>(device, config, synth, sequencer),
    }
}

fn build_synth(config_path: Option<PathBuf>, output: &Output) -> Result<Arc<Synthesizer>> {
    let config = match config_path {
        Some(path) => EngineConfig::from_toml(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let synth = Synthesizer::new(
        config.instrument_bank(),
        output.config.sample_rate.0 as f32,
        output.config.channels as usize,
    )?;
    config.apply(&synth);
    Ok(Arc::new(synth))
}

fn play(opt: PlayOpt) -> Result<()> {
    let output = open_output()?;
    let synth = build_synth(opt.config, &output)?;

    let (midi_queue, _midi_connections) = midi::connect_to_ports(opt.input_midi_ports)?;
    let _stream = start(&output, synth.clone(), None)?;

    for message in midi_queue.iter() {
        synth.process_midi_message(message);
    }

    Ok(())
}

fn play_file(opt: FileOpt) -> Result<()> {
    let output = open_output()?;
    let synth = build_synth(opt.config, &output)?;

    let sequence = MidiSequence::load(&opt.path)
        .with_context(|| format!("reading {}", opt.path.display()))?;
    tracing::info!(
        "playing {} ({:.1} s)",
        opt.path.display(),
        sequence.duration().as_secs_f64()
    );

    let mut sequencer = Sequencer::new(
        Arc::new(sequence),
        synth.clone(),
        output.config.sample_rate.0 as f32,
    );
    sequencer.set_looping(opt.looping);

    let (done_sender, done) = mpsc::channel();
    sequencer.on_end_of_stream(move || {
        log_if_error("end of stream notify failed", done_sender.send(()));
    });
    sequencer.play();

    let _stream = start(&output, synth, Some(sequencer))?;
    done.recv()?;

    // Let release tails ring out.
    thread::sleep(Duration::from_secs(2));
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match SynthOpt::from_args() {
        SynthOpt::ListMidi => {
            println!("Available devices:");
            for device_name in midi::list_devices()? {
                println!("{}", device_name);
            }
            Ok(())
        }

        SynthOpt::Play(opt) => play(opt),

        SynthOpt::File(opt) => play_file(opt),
    }
}
