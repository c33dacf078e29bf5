use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::capture::domain::camera_source::{
    CameraConstraints, CameraSource, CameraTrack, CaptureError,
};
use crate::shared::frame::Frame;

/// Camera source backed by ffmpeg-next (libavformat + libavcodec).
///
/// Opens either a V4L2 device path (`/dev/videoN`) or a regular video
/// file. File-backed tracks rewind on EOF so they behave like an endless
/// camera; device tracks report `Ended` when the device goes away.
pub struct FfmpegCameraSource {
    input: PathBuf,
}

impl FfmpegCameraSource {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

impl CameraSource for FfmpegCameraSource {
    fn open_track(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraTrack>, CaptureError> {
        ffmpeg_next::init().map_err(|e| CaptureError::DeviceUnavailable {
            device: self.input.display().to_string(),
            reason: e.to_string(),
        })?;

        let loop_on_eof = self.input.is_file();
        let decode = open_decode(&self.input, constraints)?;

        Ok(Box::new(FfmpegCameraTrack {
            path: self.input.clone(),
            constraints: constraints.clone(),
            loop_on_eof,
            decode: Some(decode),
            index: 0,
        }))
    }
}

/// The ffmpeg pieces a live track needs, rebuilt on rewind.
struct DecodeState {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
}

struct FfmpegCameraTrack {
    path: PathBuf,
    constraints: CameraConstraints,
    loop_on_eof: bool,
    decode: Option<DecodeState>,
    index: u64,
}

// Safety: the track is owned by a single worker thread at a time; the raw
// pointers inside the ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegCameraTrack {}

impl CameraTrack for FfmpegCameraTrack {
    fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
        loop {
            let Some(decode) = self.decode.as_mut() else {
                return Err(CaptureError::Ended);
            };

            // Drain the decoder before feeding it more packets
            let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
            if decode.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
                decode
                    .scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| CaptureError::Frame(e.to_string()))?;

                let pixels =
                    extract_rgb_pixels(&rgb, self.constraints.width, self.constraints.height);
                let frame = Frame::new(
                    pixels,
                    self.constraints.width,
                    self.constraints.height,
                    self.index,
                );
                self.index += 1;
                return Ok(frame);
            }

            match next_video_packet(&mut decode.ictx, decode.stream_index) {
                Some(packet) => {
                    if let Err(e) = decode.decoder.send_packet(&packet) {
                        // A corrupt packet is a per-frame hiccup
                        return Err(CaptureError::Frame(e.to_string()));
                    }
                }
                None => {
                    if !self.loop_on_eof {
                        self.decode = None;
                        return Err(CaptureError::Ended);
                    }
                    // Rewind by rebuilding the demux/decode state
                    self.decode = Some(open_decode(&self.path, &self.constraints)?);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.decode = None;
    }
}

fn next_video_packet(
    ictx: &mut ffmpeg_next::format::context::Input,
    stream_index: usize,
) -> Option<ffmpeg_next::codec::packet::Packet> {
    for (stream, packet) in ictx.packets() {
        if stream.index() == stream_index {
            return Some(packet);
        }
    }
    None
}

fn open_decode(path: &Path, constraints: &CameraConstraints) -> Result<DecodeState, CaptureError> {
    let device = path.display().to_string();

    if path_permission_denied(path) {
        return Err(CaptureError::PermissionDenied { device });
    }

    let ictx =
        ffmpeg_next::format::input(path).map_err(|e| CaptureError::DeviceUnavailable {
            device: device.clone(),
            reason: e.to_string(),
        })?;

    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| CaptureError::DeviceUnavailable {
            device: device.clone(),
            reason: "no video stream".into(),
        })?;
    let stream_index = stream.index();

    let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| CaptureError::DeviceUnavailable {
            device: device.clone(),
            reason: e.to_string(),
        })?;
    let decoder = codec_ctx
        .decoder()
        .video()
        .map_err(|e| CaptureError::DeviceUnavailable {
            device: device.clone(),
            reason: e.to_string(),
        })?;

    let scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg_next::format::Pixel::RGB24,
        constraints.width,
        constraints.height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| CaptureError::DeviceUnavailable {
        device,
        reason: e.to_string(),
    })?;

    Ok(DecodeState {
        ictx,
        decoder,
        scaler,
        stream_index,
    })
}

/// Cheap access probe so denied device nodes surface as permission errors
/// rather than generic ffmpeg open failures. Any other outcome (including
/// a missing path) defers to the real open for its error.
fn path_permission_denied(path: &Path) -> bool {
    matches!(
        fs::File::open(path),
        Err(ref e) if e.kind() == io::ErrorKind::PermissionDenied
    )
}

/// Copy scaler output into tightly packed RGB24, dropping per-row padding.
fn extract_rgb_pixels(
    rgb: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb.stride(0);
    let row_len = width as usize * 3;
    let data = rgb.data(0);

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_len]);
    }
    pixels
}
