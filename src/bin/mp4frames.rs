use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mp4seek::{
    ContainerIndex, DecodeEngine, DecoderConfig, EncodedChunk, EngineError, ReaderConfig,
    SampleInfo, SampleLocator, SeekController, SequenceTag, util::dump_frame,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mp4frames",
    about = "Index the video track of an MP4 file and replay frame seeks"
)]
struct Args {
    /// Input MP4 file
    input: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Limit number of frames printed
    #[arg(long)]
    limit: Option<usize>,

    /// Hex-dump the coded bytes of one frame
    #[arg(long, value_name = "FRAME")]
    dump_frame: Option<u32>,

    /// Bytes shown by --dump-frame
    #[arg(long, default_value_t = 256)]
    dump_len: usize,

    /// Replay a seek sequence against a loopback engine (repeatable)
    #[arg(long = "seek", value_name = "FRAME")]
    seeks: Vec<u32>,

    /// Reader configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames to decode past each target
    #[arg(long)]
    decode_ahead: Option<u32>,

    /// Output latency of the loopback engine, in samples
    #[arg(long, default_value_t = 0)]
    latency: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    info: mp4seek::MovieInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    frames: Vec<SampleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seeks: Option<&'a SeekLog>,
}

#[derive(Debug, Default, Serialize)]
struct SeekLog {
    submitted: Vec<u32>,
    served: Vec<u32>,
    resets: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ReaderConfig::from_json_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ReaderConfig::default(),
    };
    if let Some(n) = args.decode_ahead {
        config = config.with_decode_ahead(n);
    }

    let bytes = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let index = Arc::new(ContainerIndex::parse(bytes).context("indexing container")?);
    let locator = SampleLocator::new(&index);

    if let Some(frame) = args.dump_frame {
        print!("{}", dump_frame(&locator, frame, args.dump_len)?);
        return Ok(());
    }

    let seek_log = if args.seeks.is_empty() {
        None
    } else {
        Some(replay_seeks(index.clone(), &config, &args.seeks, args.latency)?)
    };

    let limit = args.limit.unwrap_or(usize::MAX);
    let frames: Vec<SampleInfo> = if seek_log.is_some() {
        Vec::new()
    } else {
        locator.iter().take(limit).collect()
    };

    let report = Report {
        info: index.info(),
        frames,
        seeks: seek_log.as_ref(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &Report<'_>) {
    let info = &report.info;
    println!(
        "track {}: {} {}x{}, {} frames",
        info.track_id, info.codec, info.frame_width, info.frame_height, info.num_frames
    );
    if let Some(secs) = info.duration_seconds {
        println!("duration: {:.3}s (timescale {})", secs, info.timescale);
    }
    match info.sync_frames {
        Some(n) => println!("sync frames: {}", n),
        None => println!("sync frames: all (no stss)"),
    }

    if !report.frames.is_empty() {
        println!("{:>8} {:>12} {:>10} {:>10} {:>6}", "frame", "offset", "size", "dts", "sync");
        for f in &report.frames {
            println!(
                "{:>8} {:>12} {:>10} {:>10} {:>6}",
                f.index,
                f.file_offset,
                f.size,
                f.dts,
                if f.is_sync { "yes" } else { "" }
            );
        }
    }

    if let Some(log) = report.seeks {
        println!("resets:    {}", log.resets);
        println!("submitted: {:?}", log.submitted);
        println!("served:    {:?}", log.served);
    }
}

// ---------- Loopback engine ----------

enum Event {
    InputReady,
    Output(LoopbackImage, SequenceTag),
}

/// "Decodes" a sample by echoing its size back.
#[derive(Debug)]
struct LoopbackImage {
    bytes: usize,
}

struct LoopbackEngine {
    latency: usize,
    held: VecDeque<(SequenceTag, usize)>,
    events: Rc<RefCell<VecDeque<Event>>>,
    log: Rc<RefCell<SeekLog>>,
}

impl LoopbackEngine {
    fn emit(&mut self, tag: SequenceTag, bytes: usize) {
        self.events
            .borrow_mut()
            .push_back(Event::Output(LoopbackImage { bytes }, tag));
    }
}

impl DecodeEngine for LoopbackEngine {
    type Image = LoopbackImage;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), EngineError> {
        if !config.codec.starts_with("avc") {
            return Err(EngineError::Rejected(config.codec.clone()));
        }
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk<'_>) -> Result<(), EngineError> {
        self.log.borrow_mut().submitted.push(chunk.tag.index);
        self.held.push_back((chunk.tag, chunk.data.len()));
        while self.held.len() > self.latency {
            if let Some((tag, bytes)) = self.held.pop_front() {
                self.emit(tag, bytes);
            }
        }
        self.events.borrow_mut().push_back(Event::InputReady);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        while let Some((tag, bytes)) = self.held.pop_front() {
            self.emit(tag, bytes);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.held.clear();
        self.log.borrow_mut().resets += 1;
    }
}

fn replay_seeks(index: Arc<ContainerIndex>, config: &ReaderConfig, seeks: &[u32], latency: usize) -> Result<SeekLog> {
    let events = Rc::new(RefCell::new(VecDeque::new()));
    let log = Rc::new(RefCell::new(SeekLog::default()));
    let engine = LoopbackEngine {
        latency,
        held: VecDeque::new(),
        events: events.clone(),
        log: log.clone(),
    };

    let served = log.clone();
    let mut controller = SeekController::new(
        index,
        engine,
        |image: LoopbackImage| image.bytes,
        config,
        move |bytes: usize, frame: u32| {
            tracing::debug!(frame, bytes, "frame ready");
            served.borrow_mut().served.push(frame);
        },
    )?;

    for &frame in seeks {
        controller.seek(frame)?;
        loop {
            let event = events.borrow_mut().pop_front();
            match event {
                Some(Event::InputReady) => controller.on_input_ready()?,
                Some(Event::Output(image, tag)) => controller.on_output(image, tag),
                None => break,
            }
        }
    }
    controller.close();

    let log = log.take();
    Ok(log)
}
