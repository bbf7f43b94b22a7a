//! Camera capture: the per-device [`Camera`] trait, the named
//! [`FrameSource`] seam used by the control loop, and the letterbox resize
//! every frame goes through before it reaches the policy.

use std::collections::HashMap;

use armpilot_types::{PilotError, RgbImage};
use image::RgbImage as ImageBuf;
use image::imageops::{self, FilterType};
use tracing::debug;

pub use armpilot_types::cameras::{SIDE, TOP, WRIST};

/// A single image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"top"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame at native resolution.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::SensorCapture`] if the frame cannot be read.
    /// Implementations must never hand back a stale or blank frame instead.
    fn capture(&mut self) -> Result<RgbImage, PilotError>;

    /// Release the device handle.
    fn release(&mut self) {}
}

/// Produces fixed-size RGB frames for named cameras on demand.
pub trait FrameSource: Send {
    /// Capture one frame from `camera`.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::SensorCapture`] when the camera is unknown or
    /// the capture fails.
    fn capture(&mut self, camera: &str) -> Result<RgbImage, PilotError>;

    /// Release every camera handle.  Called exactly once by the owner.
    fn close(&mut self) {}
}

/// A set of named [`Camera`]s whose frames are letterboxed to one size.
pub struct CameraRig {
    cameras: HashMap<String, Box<dyn Camera>>,
    width: u32,
    height: u32,
}

impl CameraRig {
    /// Create an empty rig producing `width × height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            cameras: HashMap::new(),
            width,
            height,
        }
    }

    /// Register a camera.  A previously registered camera with the same id is
    /// released and replaced.
    pub fn register(&mut self, camera: Box<dyn Camera>) {
        if let Some(mut old) = self.cameras.insert(camera.id().to_string(), camera) {
            old.release();
        }
    }

    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.register(camera);
        self
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

impl FrameSource for CameraRig {
    fn capture(&mut self, camera: &str) -> Result<RgbImage, PilotError> {
        let device = self
            .cameras
            .get_mut(camera)
            .ok_or_else(|| PilotError::SensorCapture {
                source_id: camera.to_string(),
                details: format!("camera '{camera}' is not registered"),
            })?;
        let frame = device.capture()?;
        Ok(resize_with_pad(&frame, self.width, self.height))
    }

    fn close(&mut self) {
        for (id, camera) in self.cameras.iter_mut() {
            debug!(camera = %id, "releasing camera");
            camera.release();
        }
    }
}

/// Resize `frame` to fit inside `width × height` while keeping its aspect
/// ratio, then centre it on a black canvas of exactly that size.
///
/// Resampling is bilinear (`FilterType::Triangle`).  A frame that already has
/// the target size is returned unchanged.
pub fn resize_with_pad(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }
    let mut canvas = ImageBuf::new(width, height);
    if frame.width == 0 || frame.height == 0 || width == 0 || height == 0 {
        return into_frame(canvas);
    }
    let Some(src) = ImageBuf::from_raw(frame.width, frame.height, frame.data.clone()) else {
        return into_frame(canvas);
    };

    let (iw, ih) = (frame.width as u64, frame.height as u64);
    let (resized_w, resized_h) = if iw * height as u64 >= ih * width as u64 {
        (width, ((ih * width as u64 / iw) as u32).clamp(1, height))
    } else {
        (((iw * height as u64 / ih) as u32).clamp(1, width), height)
    };
    let resized = imageops::resize(&src, resized_w, resized_h, FilterType::Triangle);
    let pad_x = (width - resized_w) / 2;
    let pad_y = (height - resized_h) / 2;
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);
    into_frame(canvas)
}

fn into_frame(buf: ImageBuf) -> RgbImage {
    let (width, height) = buf.dimensions();
    RgbImage {
        width,
        height,
        data: buf.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SolidCamera {
        id: String,
        width: u32,
        height: u32,
        rgb: [u8; 3],
        released: bool,
    }

    impl Camera for SolidCamera {
        fn id(&self) -> &str {
            &self.id
        }

        fn capture(&mut self) -> Result<RgbImage, PilotError> {
            let data = self
                .rgb
                .iter()
                .copied()
                .cycle()
                .take((self.width * self.height * 3) as usize)
                .collect();
            RgbImage::from_raw(self.width, self.height, data)
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    fn solid(id: &str, width: u32, height: u32) -> Box<SolidCamera> {
        Box::new(SolidCamera {
            id: id.to_string(),
            width,
            height,
            rgb: [200, 100, 50],
            released: false,
        })
    }

    #[test]
    fn resize_keeps_target_size() {
        let img = RgbImage::black(640, 480);
        let out = resize_with_pad(&img, 224, 224);
        assert_eq!((out.width, out.height), (224, 224));
        assert_eq!(out.data.len(), 224 * 224 * 3);
    }

    #[test]
    fn resize_letterboxes_wide_image() {
        let mut cam = solid("top", 640, 480);
        let img = cam.capture().unwrap();
        let out = resize_with_pad(&img, 224, 224);
        // 640x480 scales to 224x168, leaving 28 rows of padding top and bottom.
        assert_eq!(out.pixel(112, 0), [0, 0, 0]);
        assert_eq!(out.pixel(112, 223), [0, 0, 0]);
        for (x, y) in [(112, 112), (0, 112), (223, 30)] {
            let px = out.pixel(x, y);
            for (got, want) in px.iter().zip([200u8, 100, 50]) {
                assert!(got.abs_diff(want) <= 1, "pixel ({x},{y}) = {px:?}");
            }
        }
    }

    #[test]
    fn resize_is_identity_at_target_size() {
        let img = RgbImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(resize_with_pad(&img, 2, 1), img);
    }

    #[test]
    fn resize_pillarboxes_tall_image() {
        let img = RgbImage::from_raw(1, 2, vec![255; 6]).unwrap();
        let out = resize_with_pad(&img, 4, 4);
        // 1x2 scales to 2x4, centred with one black column either side.
        assert_eq!(out.pixel(0, 2), [0, 0, 0]);
        assert_eq!(out.pixel(3, 2), [0, 0, 0]);
        assert_eq!(out.pixel(1, 2), [255, 255, 255]);
        assert_eq!(out.data.len(), 4 * 4 * 3);
    }

    #[test]
    fn rig_resizes_registered_camera() {
        let mut rig = CameraRig::new(224, 224).with_camera(solid(TOP, 320, 240));
        let frame = rig.capture(TOP).unwrap();
        assert_eq!((frame.width, frame.height), (224, 224));
    }

    #[test]
    fn rig_fails_loudly_for_unknown_camera() {
        let mut rig = CameraRig::new(224, 224);
        assert!(rig.is_empty());
        let err = rig.capture(WRIST).unwrap_err();
        assert!(matches!(err, PilotError::SensorCapture { ref source_id, .. } if source_id == WRIST));
    }

    #[test]
    fn register_replaces_camera_with_same_id() {
        let mut rig = CameraRig::new(8, 8);
        rig.register(solid(SIDE, 8, 8));
        rig.register(solid(SIDE, 16, 16));
        assert_eq!(rig.len(), 1);
    }
}
