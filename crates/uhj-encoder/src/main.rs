//! uhj-encoder: convert ambisonic / speaker-mapped audio files into
//! 2-channel UHJ-encoded stereo FLAC.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use uhj_core::{detect_layout, UhjEncoder, FILTER_DELAY};
use uhj_io::{read_input, FlacOutput};

/// Block size used when streaming samples through the encoder. Chosen to
/// keep memory bounded for long files while staying well above the
/// encoder's internal filter delay.
const BLOCK_FRAMES: usize = 8192;

#[derive(Parser)]
#[command(name = "uhj-encoder", about = "Encode ambisonic audio to UHJ stereo FLAC")]
struct Cli {
    /// Input audio files (WAV, FLAC, MP3, OGG, AAC via symphonia)
    #[arg(required = true)]
    infiles: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let total = cli.infiles.len();
    let mut succeeded = 0usize;

    for infile in &cli.infiles {
        match encode_file(infile) {
            Ok(outfile) => {
                log::info!("encoded {} -> {}", infile.display(), outfile.display());
                succeeded += 1;
            }
            Err(e) => {
                eprintln!("failed to encode {}: {e}", infile.display());
            }
        }
    }

    match succeeded {
        n if n == total => {
            eprintln!("encoded all {total} file(s)");
            ExitCode::SUCCESS
        }
        0 => {
            eprintln!("encoded none of {total} file(s)");
            ExitCode::SUCCESS
        }
        n => {
            eprintln!("encoded {n} of {total} file(s)");
            ExitCode::SUCCESS
        }
    }
}

fn encode_file(infile: &Path) -> uhj_io::FileResult<PathBuf> {
    let input = read_input(infile)?;
    let layout = detect_layout(input.num_channels(), input.channel_map.as_deref())?;

    let outfile = output_path(infile);
    let mut output = FlacOutput::create(&outfile, input.sample_rate)?;

    let mut encoder = UhjEncoder::new(layout);
    let num_frames = input.num_frames();

    // The encoder's output stream is delayed by FILTER_DELAY frames relative
    // to its input, so the first FILTER_DELAY frames it emits are lead-in
    // with no corresponding input and must be dropped before writing.
    let mut lead_in_remaining = FILTER_DELAY;

    let mut start = 0;
    while start < num_frames {
        let end = (start + BLOCK_FRAMES).min(num_frames);
        let block: Vec<Vec<f64>> = input
            .channels
            .iter()
            .map(|c| c[start..end].to_vec())
            .collect();
        write_past_lead_in(&mut output, &encoder.encode(&block), &mut lead_in_remaining)?;
        start = end;
    }

    write_past_lead_in(&mut output, &encoder.finish(), &mut lead_in_remaining)?;
    output.finish()?;

    Ok(outfile)
}

/// Write `frames` to `output`, dropping however many of its leading
/// entries are still owed to `lead_in_remaining`.
fn write_past_lead_in(
    output: &mut FlacOutput<'_>,
    frames: &[[f32; 2]],
    lead_in_remaining: &mut usize,
) -> uhj_io::FileResult<()> {
    let skip = (*lead_in_remaining).min(frames.len());
    *lead_in_remaining -= skip;
    output.write_frames(&frames[skip..])
}

fn output_path(infile: &Path) -> PathBuf {
    let stem = infile.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let mut out = infile.to_path_buf();
    out.set_file_name(format!("{stem}-uhj.flac"));
    out
}
