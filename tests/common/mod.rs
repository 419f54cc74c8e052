#![allow(dead_code)]

use mp4seek::{
    ChunkKind, ContainerIndex, DecodeEngine, DecoderConfig, EncodedChunk, EngineError, ReaderConfig,
    SeekController, SequenceTag,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

// ---------- Synthetic containers ----------

pub fn bx(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(payload.len() + 8);
    v.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    v.extend_from_slice(tag);
    v.extend_from_slice(payload);
    v
}

pub fn full(tag: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version];
    payload.extend_from_slice(&flags.to_be_bytes()[1..]);
    payload.extend_from_slice(body);
    bx(tag, &payload)
}

fn be32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub const AVCC: [u8; 17] = [
    0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1f, 0x01, 0x00, 0x02, 0x68, 0xee,
];

/// Bytes of a container plus where its frames ended up.
pub struct Fixture {
    pub bytes: Vec<u8>,
    pub offsets: Vec<u64>,
    pub sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
}

impl Fixture {
    pub fn index(&self) -> ContainerIndex {
        ContainerIndex::parse(self.bytes.clone()).expect("fixture should parse")
    }
}

pub struct FixtureBuilder {
    sizes: Vec<u32>,
    fixed_size: bool,
    chunks: Vec<u32>,
    sync: Option<Vec<u32>>,
    co64: bool,
    audio_first: bool,
    version: u8,
    width: u32,
    height: u32,
    format: [u8; 4],
    with_avcc: bool,
    handler: [u8; 4],
    with_stsz: bool,
    stsz_count: Option<u32>,
    stsc_samples: Option<u32>,
}

impl FixtureBuilder {
    /// `n` frames of varying size, one per chunk, frame 0 the only sync frame.
    pub fn new(n: u32) -> Self {
        Self {
            sizes: (0..n).map(|i| 100 + (i * 7) % 50).collect(),
            fixed_size: false,
            chunks: vec![1; n as usize],
            sync: Some(vec![0]),
            co64: false,
            audio_first: false,
            version: 0,
            width: 640,
            height: 480,
            format: *b"avc1",
            with_avcc: true,
            handler: *b"vide",
            with_stsz: true,
            stsz_count: None,
            stsc_samples: None,
        }
    }

    pub fn uniform_size(mut self, size: u32) -> Self {
        self.sizes = vec![size; self.sizes.len()];
        self.fixed_size = true;
        self
    }

    pub fn chunks(mut self, chunks: &[u32]) -> Self {
        self.chunks = chunks.to_vec();
        self
    }

    pub fn sync(mut self, sync: &[u32]) -> Self {
        self.sync = Some(sync.to_vec());
        self
    }

    pub fn no_stss(mut self) -> Self {
        self.sync = None;
        self
    }

    pub fn co64(mut self) -> Self {
        self.co64 = true;
        self
    }

    pub fn audio_first(mut self) -> Self {
        self.audio_first = true;
        self
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn geometry(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: &[u8; 4]) -> Self {
        self.format = *format;
        self
    }

    pub fn without_avcc(mut self) -> Self {
        self.with_avcc = false;
        self
    }

    pub fn handler(mut self, handler: &[u8; 4]) -> Self {
        self.handler = *handler;
        self
    }

    pub fn without_stsz(mut self) -> Self {
        self.with_stsz = false;
        self
    }

    /// Sample count written to `stsz`, regardless of the frames laid out.
    pub fn stsz_count(mut self, count: u32) -> Self {
        self.stsz_count = Some(count);
        self
    }

    /// Samples-per-chunk written to every `stsc` run.
    pub fn stsc_samples(mut self, count: u32) -> Self {
        self.stsc_samples = Some(count);
        self
    }

    pub fn build(self) -> Fixture {
        let ftyp = bx(b"ftyp", &[b"isom".as_slice(), &512u32.to_be_bytes(), b"isom", b"avc1"].concat());

        // mdat: 16 bytes of padding before every chunk
        let payload_start = ftyp.len() + 8;
        let mut mdat = Vec::new();
        let mut offsets = Vec::new();
        let mut chunk_offsets = Vec::new();
        let mut frame = 0usize;
        for &count in &self.chunks {
            mdat.extend_from_slice(&[0xEE; 16]);
            chunk_offsets.push((payload_start + mdat.len()) as u64);
            for _ in 0..count {
                offsets.push((payload_start + mdat.len()) as u64);
                let mut data = vec![0xAB; self.sizes[frame] as usize];
                data[0] = frame as u8;
                mdat.extend_from_slice(&data);
                frame += 1;
            }
        }
        assert_eq!(frame, self.sizes.len(), "chunks must cover every frame");

        let mut tracks = Vec::new();
        if self.audio_first {
            tracks.push(self.audio_trak());
        }
        tracks.push(self.video_trak(&chunk_offsets));
        let moov = bx(b"moov", &[self.mvhd(), tracks.concat()].concat());

        Fixture {
            bytes: [ftyp, bx(b"mdat", &mdat), moov].concat(),
            offsets,
            sizes: self.sizes,
            chunk_offsets,
        }
    }

    fn timing(&self, id_or_scale: &[u8], duration: u64) -> Vec<u8> {
        let mut v = Vec::new();
        if self.version == 1 {
            v.extend_from_slice(&1u64.to_be_bytes());
            v.extend_from_slice(&2u64.to_be_bytes());
            v.extend_from_slice(id_or_scale);
            v.extend_from_slice(&duration.to_be_bytes());
        } else {
            v.extend_from_slice(&1u32.to_be_bytes());
            v.extend_from_slice(&2u32.to_be_bytes());
            v.extend_from_slice(id_or_scale);
            v.extend_from_slice(&(duration as u32).to_be_bytes());
        }
        v
    }

    fn matrix() -> Vec<u8> {
        be32(&[0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000])
    }

    fn mvhd(&self) -> Vec<u8> {
        let mut body = self.timing(&1000u32.to_be_bytes(), self.sizes.len() as u64 * 40);
        body.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
        body.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
        body.extend_from_slice(&[0; 10]);
        body.extend_from_slice(&Self::matrix());
        body.extend_from_slice(&[0; 24]);
        body.extend_from_slice(&3u32.to_be_bytes());
        full(b"mvhd", self.version, 0, &body)
    }

    fn tkhd(&self, track_id: u32, width: u32, height: u32) -> Vec<u8> {
        let mut id = track_id.to_be_bytes().to_vec();
        id.extend_from_slice(&[0; 4]);
        let mut body = self.timing(&id, self.sizes.len() as u64 * 40);
        body.extend_from_slice(&[0; 8]);
        body.extend_from_slice(&[0; 8]); // layer, alternate_group, volume, reserved
        body.extend_from_slice(&Self::matrix());
        body.extend_from_slice(&(width << 16).to_be_bytes());
        body.extend_from_slice(&(height << 16).to_be_bytes());
        full(b"tkhd", self.version, 3, &body)
    }

    fn mdhd(&self) -> Vec<u8> {
        let mut body = self.timing(&12800u32.to_be_bytes(), self.sizes.len() as u64 * 512);
        body.extend_from_slice(&0x55c4u16.to_be_bytes());
        body.extend_from_slice(&[0; 2]);
        full(b"mdhd", self.version, 0, &body)
    }

    fn hdlr(handler: &[u8; 4], name: &str) -> Vec<u8> {
        let mut body = vec![0; 4];
        body.extend_from_slice(handler);
        body.extend_from_slice(&[0; 12]);
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        full(b"hdlr", 0, 0, &body)
    }

    fn stsd(&self) -> Vec<u8> {
        let mut entry = vec![0; 6];
        entry.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
        entry.extend_from_slice(&[0; 16]);
        entry.extend_from_slice(&(self.width as u16).to_be_bytes());
        entry.extend_from_slice(&(self.height as u16).to_be_bytes());
        entry.extend_from_slice(&be32(&[0x0048_0000, 0x0048_0000, 0]));
        entry.extend_from_slice(&1u16.to_be_bytes()); // frame_count
        let mut compressor = [0u8; 32];
        compressor[0] = 8;
        compressor[1..9].copy_from_slice(b"Fake AVC");
        entry.extend_from_slice(&compressor);
        entry.extend_from_slice(&0x0018u16.to_be_bytes());
        entry.extend_from_slice(&0xffffu16.to_be_bytes());
        entry.extend_from_slice(&bx(b"pasp", &be32(&[1, 1])));
        if self.with_avcc {
            entry.extend_from_slice(&bx(b"avcC", &AVCC));
        }
        full(b"stsd", 0, 0, &[be32(&[1]), bx(&self.format, &entry)].concat())
    }

    fn stsc(&self) -> Vec<u8> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for (i, &count) in self.chunks.iter().enumerate() {
            if runs.last().map(|r| r.1) != Some(count) {
                runs.push((i as u32 + 1, count));
            }
        }
        let mut body = be32(&[runs.len() as u32]);
        for (first, count) in runs {
            body.extend_from_slice(&be32(&[first, self.stsc_samples.unwrap_or(count), 1]));
        }
        full(b"stsc", 0, 0, &body)
    }

    fn stsz(&self) -> Vec<u8> {
        let n = self.stsz_count.unwrap_or(self.sizes.len() as u32);
        let body = if self.fixed_size {
            be32(&[self.sizes[0], n])
        } else {
            [be32(&[0, n]), be32(&self.sizes)].concat()
        };
        full(b"stsz", 0, 0, &body)
    }

    fn video_trak(&self, chunk_offsets: &[u64]) -> Vec<u8> {
        let n = self.sizes.len() as u32;
        let mut stbl = vec![self.stsd(), full(b"stts", 0, 0, &be32(&[1, n, 512]))];
        if let Some(sync) = &self.sync {
            let numbers: Vec<u32> = sync.iter().map(|s| s + 1).collect();
            stbl.push(full(b"stss", 0, 0, &[be32(&[numbers.len() as u32]), be32(&numbers)].concat()));
        }
        if self.co64 {
            let mut body = be32(&[chunk_offsets.len() as u32]);
            for o in chunk_offsets {
                body.extend_from_slice(&o.to_be_bytes());
            }
            stbl.push(full(b"co64", 0, 0, &body));
        } else {
            let offsets: Vec<u32> = chunk_offsets.iter().map(|&o| o as u32).collect();
            stbl.push(full(b"stco", 0, 0, &[be32(&[offsets.len() as u32]), be32(&offsets)].concat()));
        }
        stbl.push(self.stsc());
        if self.with_stsz {
            stbl.push(self.stsz());
        }

        let minf = bx(b"minf", &[full(b"vmhd", 0, 1, &[0; 8]), bx(b"stbl", &stbl.concat())].concat());
        let mdia = bx(b"mdia", &[self.mdhd(), Self::hdlr(&self.handler, "VideoHandler"), minf].concat());
        bx(b"trak", &[self.tkhd(1, self.width, self.height), mdia].concat())
    }

    fn audio_trak(&self) -> Vec<u8> {
        let stbl = bx(b"stbl", &full(b"stsz", 0, 0, &be32(&[4, 3])));
        let minf = bx(b"minf", &[full(b"smhd", 0, 0, &[0; 4]), stbl].concat());
        let mdia = bx(b"mdia", &[self.mdhd(), Self::hdlr(b"soun", "SoundHandler"), minf].concat());
        bx(b"trak", &[self.tkhd(2, 0, 0), mdia].concat())
    }
}

// ---------- Scripted engine ----------

#[derive(Debug, Default)]
pub struct Counters {
    /// Engine images alive.
    pub images: Cell<i64>,
    /// Materialized frames alive (cached or held by the caller).
    pub frames: Cell<i64>,
}

pub struct TestImage {
    pub index: u32,
    counters: Rc<Counters>,
}

impl Drop for TestImage {
    fn drop(&mut self) {
        self.counters.images.set(self.counters.images.get() - 1);
    }
}

pub struct Frame {
    pub decoded_index: u32,
    counters: Rc<Counters>,
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.counters.frames.set(self.counters.frames.get() - 1);
    }
}

pub fn materialize(image: TestImage) -> Frame {
    let counters = image.counters.clone();
    counters.frames.set(counters.frames.get() + 1);
    Frame { decoded_index: image.index, counters }
}

pub enum Event {
    InputReady,
    Output(TestImage, SequenceTag),
}

#[derive(Debug, Default)]
pub struct EngineLog {
    pub configures: u32,
    pub resets: u32,
    pub flushes: u32,
    /// (generation, index, kind) for every decode call.
    pub submitted: Vec<(u64, u32, ChunkKind)>,
    pub last_config: Option<DecoderConfig>,
}

/// Emits outputs in submission order, `latency` samples behind.
pub struct FakeEngine {
    latency: usize,
    held: VecDeque<SequenceTag>,
    events: Rc<RefCell<VecDeque<Event>>>,
    log: Rc<RefCell<EngineLog>>,
    counters: Rc<Counters>,
    reject_config: bool,
}

impl FakeEngine {
    fn emit(&mut self, tag: SequenceTag) {
        self.counters.images.set(self.counters.images.get() + 1);
        let image = TestImage { index: tag.index, counters: self.counters.clone() };
        self.events.borrow_mut().push_back(Event::Output(image, tag));
    }
}

impl DecodeEngine for FakeEngine {
    type Image = TestImage;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), EngineError> {
        if self.reject_config {
            return Err(EngineError::Rejected("no hardware decoder".into()));
        }
        let mut log = self.log.borrow_mut();
        log.configures += 1;
        log.last_config = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk<'_>) -> Result<(), EngineError> {
        assert_eq!(chunk.data[0], chunk.tag.index as u8, "sample bytes belong to another frame");
        self.log
            .borrow_mut()
            .submitted
            .push((chunk.tag.generation, chunk.tag.index, chunk.kind));
        self.held.push_back(chunk.tag);
        while self.held.len() > self.latency {
            if let Some(tag) = self.held.pop_front() {
                self.emit(tag);
            }
        }
        self.events.borrow_mut().push_back(Event::InputReady);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.log.borrow_mut().flushes += 1;
        while let Some(tag) = self.held.pop_front() {
            self.emit(tag);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.log.borrow_mut().resets += 1;
        self.held.clear();
    }
}

pub type TestController = SeekController<FakeEngine, fn(TestImage) -> Frame, Box<dyn FnMut(Frame, u32)>>;

pub struct Harness {
    pub controller: TestController,
    pub events: Rc<RefCell<VecDeque<Event>>>,
    pub log: Rc<RefCell<EngineLog>>,
    pub counters: Rc<Counters>,
    /// (callback index, index the image was decoded from)
    pub served: Rc<RefCell<Vec<(u32, u32)>>>,
}

impl Harness {
    pub fn new(fixture: &Fixture, latency: usize) -> Self {
        Self::with_config(fixture, latency, &ReaderConfig::default())
    }

    pub fn with_config(fixture: &Fixture, latency: usize, config: &ReaderConfig) -> Self {
        Self::try_new(fixture, latency, config, false).expect("controller should open")
    }

    pub fn try_new(
        fixture: &Fixture,
        latency: usize,
        config: &ReaderConfig,
        reject_config: bool,
    ) -> mp4seek::Result<Self> {
        let events = Rc::new(RefCell::new(VecDeque::new()));
        let log = Rc::new(RefCell::new(EngineLog::default()));
        let counters = Rc::new(Counters::default());
        let served = Rc::new(RefCell::new(Vec::new()));

        let engine = FakeEngine {
            latency,
            held: VecDeque::new(),
            events: events.clone(),
            log: log.clone(),
            counters: counters.clone(),
            reject_config,
        };
        let sink = served.clone();
        let on_frame_ready: Box<dyn FnMut(Frame, u32)> = Box::new(move |frame: Frame, index: u32| {
            sink.borrow_mut().push((index, frame.decoded_index));
        });
        let controller = SeekController::new(
            Arc::new(fixture.index()),
            engine,
            materialize as fn(TestImage) -> Frame,
            config,
            on_frame_ready,
        )?;

        Ok(Self { controller, events, log, counters, served })
    }

    /// Deliver queued engine notifications until the engine goes quiet.
    pub fn pump(&mut self) {
        loop {
            let event = self.events.borrow_mut().pop_front();
            match event {
                Some(Event::InputReady) => self.controller.on_input_ready().expect("input ready"),
                Some(Event::Output(image, tag)) => self.controller.on_output(image, tag),
                None => break,
            }
        }
    }

    pub fn seek(&mut self, index: u32) {
        self.controller.seek(index).expect("seek");
        self.pump();
    }

    pub fn served_indices(&self) -> Vec<u32> {
        self.served.borrow().iter().map(|&(i, _)| i).collect()
    }

    pub fn submitted_indices(&self) -> Vec<u32> {
        self.log.borrow().submitted.iter().map(|&(_, i, _)| i).collect()
    }

    pub fn live_images(&self) -> i64 {
        self.counters.images.get()
    }

    pub fn live_frames(&self) -> i64 {
        self.counters.frames.get()
    }
}
