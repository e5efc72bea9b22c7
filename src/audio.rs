use std::sync::Arc;

use anyhow::Result;
use cpal::traits::*;

use midisynth::sequencer::Sequencer;
use midisynth::Synthesizer;

pub fn run<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    synth: Arc<Synthesizer>,
    mut sequencer: Option<Sequencer>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample,
{
    let channels = config.channels as usize;
    let err_fn = |err| tracing::error!("an error occurred on stream: {}", err);
    let mut mix: Vec<f32> = Vec::with_capacity(8192);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if mix.len() != data.len() {
                mix.resize(data.len(), 0.0);
            }

            if let Some(sequencer) = &mut sequencer {
                sequencer.process_block(data.len() / channels);
            }
            synth.generate_audio(&mut mix);

            for (out, s) in data.iter_mut().zip(mix.iter()) {
                *out = cpal::Sample::from(&s.clamp(-1.0, 1.0));
            }
        },
        err_fn,
    )?;
    stream.play()?;

    Ok(stream)
}
