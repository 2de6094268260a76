#![allow(dead_code)]

use anyhow::{anyhow, Result};
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use webwall_core::{
    CancelToken, DecodedImage, FixedDisplay, ImageDecoder, MemoryStream, OpenedStream,
    PreviousBackground, ProgressSurface, Services, StreamSource, WallpaperSink,
};

pub const PREVIOUS_SIZE: (u32, u32) = (8, 6);

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 77]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// RGBA PNG streamed out row by row so the full bitmap is never held here.
/// Each row is a single colour, which keeps the file small.
pub fn striped_png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut encoder = png::Encoder::new(&mut bytes, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);
    let mut writer = encoder.write_header().unwrap();
    let mut stream = writer.stream_writer().unwrap();
    let mut row = vec![0u8; width as usize * 4];
    for y in 0..height {
        let shade = (y % 256) as u8;
        for px in row.chunks_exact_mut(4) {
            px.copy_from_slice(&[shade, 255 - shade, 90, 255]);
        }
        stream.write_all(&row).unwrap();
    }
    stream.finish().unwrap();
    drop(writer);
    bytes
}

pub fn data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Answers exactly one HTTP request on a loopback port and returns the URL
/// to fetch.
pub fn serve_once(status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let Ok((mut conn, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match conn.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        let _ = conn.write_all(head.as_bytes());
        let _ = conn.write_all(&body);
    });
    format!("http://{}/wallpaper.png", addr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Hint(u32, u32),
    Commit(u32, u32),
    FailedCommit(u32, u32),
}

/// Sink that records every call and can be told to refuse commits.
pub struct RecordingSink {
    previous: Option<RgbaImage>,
    failures_left: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        let (w, h) = PREVIOUS_SIZE;
        Self {
            previous: Some(RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]))),
            failures_left: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn without_previous() -> Self {
        Self {
            previous: None,
            ..Self::new()
        }
    }

    pub fn failing(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<(u32, u32)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Commit(w, h) => Some((w, h)),
                _ => None,
            })
            .collect()
    }

    pub fn commit_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Commit(..) | Event::FailedCommit(..)))
            .count()
    }
}

impl WallpaperSink for RecordingSink {
    fn current(&self) -> Result<PreviousBackground> {
        self.previous
            .clone()
            .map(PreviousBackground::new)
            .ok_or_else(|| anyhow!("no wallpaper configured"))
    }

    fn suggest_desired_dimensions(&self, width: u32, height: u32) {
        self.events.lock().unwrap().push(Event::Hint(width, height));
    }

    fn set_bitmap(&self, bitmap: &RgbImage) -> Result<()> {
        let (w, h) = bitmap.dimensions();
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            self.events.lock().unwrap().push(Event::FailedCommit(w, h));
            return Err(anyhow!("wallpaper service unavailable"));
        }
        self.events.lock().unwrap().push(Event::Commit(w, h));
        Ok(())
    }
}

/// Serves fixed bytes and counts how often it was opened.
pub struct BytesSource {
    bytes: Vec<u8>,
    markable: bool,
    opens: AtomicUsize,
}

impl BytesSource {
    pub fn markable(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            markable: true,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn forward_only(bytes: Vec<u8>) -> Self {
        Self {
            markable: false,
            ..Self::markable(bytes)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl StreamSource for BytesSource {
    fn open(&self) -> Result<OpenedStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.markable {
            Ok(OpenedStream::Memory(MemoryStream::new(self.bytes.clone())))
        } else {
            Ok(OpenedStream::Remote(Box::new(Cursor::new(self.bytes.clone()))))
        }
    }

    fn describe(&self) -> String {
        format!("{} test bytes", self.bytes.len())
    }
}

/// Decoder whose bounds probe reads `probe_bytes` before answering and whose
/// decode hands back a canned bitmap.
pub struct ScriptedDecoder {
    pub bounds: (u32, u32),
    pub probe_bytes: usize,
    pub decoded: (u32, u32),
    pub sampled: bool,
    pub sample_sizes: Mutex<Vec<u32>>,
}

impl ScriptedDecoder {
    pub fn new(bounds: (u32, u32), decoded: (u32, u32), sampled: bool) -> Self {
        Self {
            bounds,
            probe_bytes: 0,
            decoded,
            sampled,
            sample_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn reading(mut self, probe_bytes: usize) -> Self {
        self.probe_bytes = probe_bytes;
        self
    }
}

impl ImageDecoder for ScriptedDecoder {
    fn decode_bounds(&self, reader: &mut dyn Read) -> Result<(u32, u32)> {
        let mut sink = Vec::new();
        reader.take(self.probe_bytes as u64).read_to_end(&mut sink)?;
        Ok(self.bounds)
    }

    fn decode(&self, reader: &mut dyn Read, sample_size: u32) -> Result<DecodedImage> {
        self.sample_sizes.lock().unwrap().push(sample_size);
        let mut all = Vec::new();
        reader.read_to_end(&mut all)?;
        let (w, h) = self.decoded;
        Ok(DecodedImage {
            pixels: RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255])),
            sampled: self.sampled,
        })
    }
}

/// Decoder that fires the cancel token halfway through decoding.
pub struct CancellingDecoder<D> {
    pub inner: D,
    pub token: CancelToken,
}

impl<D: ImageDecoder> ImageDecoder for CancellingDecoder<D> {
    fn decode_bounds(&self, reader: &mut dyn Read) -> Result<(u32, u32)> {
        self.inner.decode_bounds(reader)
    }

    fn decode(&self, reader: &mut dyn Read, sample_size: u32) -> Result<DecodedImage> {
        self.token.cancel();
        self.inner.decode(reader, sample_size)
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    showing: AtomicBool,
    messages: Mutex<Vec<String>>,
    dismissals: AtomicUsize,
}

impl RecordingProgress {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn dismissals(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }
}

impl ProgressSurface for RecordingProgress {
    fn show(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
        self.showing.store(true, Ordering::SeqCst);
    }

    fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }

    fn dismiss(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
        self.showing.store(false, Ordering::SeqCst);
    }
}

pub fn services(sink: &Arc<RecordingSink>, display_height: u32) -> Services {
    Services::new(sink.clone(), Arc::new(FixedDisplay(display_height)))
}
