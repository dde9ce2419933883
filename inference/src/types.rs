//! Type definitions for frames, detections and distance estimates

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered list of class names, indexed by class id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// Get class name as string, falling back to `class_N` for unknown ids
    pub fn name(&self, id: u32) -> String {
        self.0
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Bounding box in normalized, center-based coordinates (all values relative to the frame)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedBox {
    /// Center X (normalized 0-1)
    pub x: f32,
    /// Center Y (normalized 0-1)
    pub y: f32,
    /// Width (normalized 0-1)
    pub w: f32,
    /// Height (normalized 0-1)
    pub h: f32,
}

impl NormalizedBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Build from corner coordinates
    pub fn from_corners(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            x: (xmin + xmax) / 2.0,
            y: (ymin + ymax) / 2.0,
            w: xmax - xmin,
            h: ymax - ymin,
        }
    }

    pub fn xmin(&self) -> f32 {
        self.x - self.w / 2.0
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.w / 2.0
    }

    pub fn ymin(&self) -> f32 {
        self.y - self.h / 2.0
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.h / 2.0
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Clip the corners to [0, 1] and recompute center and size.
    ///
    /// Boxes already inside the frame come back unchanged.
    pub fn clipped(&self) -> Self {
        if self.xmin() >= 0.0 && self.ymin() >= 0.0 && self.xmax() <= 1.0 && self.ymax() <= 1.0 {
            return *self;
        }
        Self::from_corners(
            self.xmin().max(0.0),
            self.ymin().max(0.0),
            self.xmax().min(1.0),
            self.ymax().min(1.0),
        )
    }

    /// Calculate intersection over union (IoU) with another box
    pub fn iou(&self, other: &NormalizedBox) -> f32 {
        let overlap_w = self.xmax().min(other.xmax()) - self.xmin().max(other.xmin());
        let overlap_h = self.ymax().min(other.ymax()) - self.ymin().max(other.ymin());
        if overlap_w <= 0.0 || overlap_h <= 0.0 {
            return 0.0;
        }

        let intersection = overlap_w * overlap_h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Convert to pixel coordinates given image dimensions.
    ///
    /// Corners are truncated toward zero, not rounded.
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> PixelBoundingBox {
        let w = img_width as f32;
        let h = img_height as f32;
        PixelBoundingBox {
            xmin: (self.xmin() * w) as i32,
            ymin: (self.ymin() * h) as i32,
            xmax: (self.xmax() * w) as i32,
            ymax: (self.ymax() * h) as i32,
        }
    }
}

/// Bounding box in pixel coordinates, valid for a single publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelBoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl PixelBoundingBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> u32 {
        (self.xmax - self.xmin).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.ymax - self.ymin).max(0) as u32
    }
}

/// Single detection: one class of one spatial region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    /// Class probability (0-1)
    pub probability: f32,
    /// Clipped box (normalized)
    pub bbox: NormalizedBox,
}

impl Detection {
    pub fn new(class_id: u32, probability: f32, bbox: NormalizedBox) -> Self {
        Self {
            class_id,
            probability,
            bbox,
        }
    }
}

/// Distance to a detected object, or an explicit marker that no valid depth was found
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distance {
    Meters(f32),
    Undefined,
}

impl Distance {
    pub fn meters(&self) -> Option<f32> {
        match self {
            Self::Meters(d) => Some(*d),
            Self::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Meters(_))
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Meters(d) => write!(f, "{:.2}m", d),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

/// Identifier of an on-demand detection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Capture metadata travelling with a frame through the ring
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Sequence number assigned by the producer
    pub seq: u64,
    /// Capture time in microseconds since the Unix epoch
    pub stamp_us: u64,
    /// Coordinate frame the image was captured in
    pub frame_id: String,
}

impl FrameHeader {
    /// Create a header stamped with the current wall-clock time
    pub fn new<S: Into<String>>(seq: u64, frame_id: S) -> Self {
        let stamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        Self {
            seq,
            stamp_us,
            frame_id: frame_id.into(),
        }
    }
}

/// Published form of a detection: label, pixel box and distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_id: u32,
    pub label: String,
    pub probability: f32,
    pub bbox: PixelBoundingBox,
    pub distance: Distance,
}

/// Detection results for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    /// Header of the frame the detections were computed from
    pub header: FrameHeader,
    /// Originating on-demand request, `None` for streamed frames
    pub request_id: Option<RequestId>,
    pub objects: Vec<DetectedObject>,
    pub image_width: u32,
    pub image_height: u32,
    /// Inference time in milliseconds
    pub inference_time_ms: f32,
}

impl DetectionBatch {
    /// Get number of detections
    pub fn count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Image format for input data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    RGB,
    BGR,
    RGBA,
    BGRA,
    Grayscale,
}

/// Input image data as delivered by the camera driver
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel format
    pub format: ImageFormat,
}

impl ImageData {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    /// Load image from file path
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let img = image::open(path).map_err(|e| {
            crate::DetectionError::preprocessing(format!("Failed to load image: {}", e))
        })?;
        Ok(Self::from_rgb(img.to_rgb8()))
    }

    pub fn from_rgb(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            format: ImageFormat::RGB,
        }
    }

    /// Get number of channels
    pub fn channels(&self) -> u32 {
        match self.format {
            ImageFormat::RGB | ImageFormat::BGR => 3,
            ImageFormat::RGBA | ImageFormat::BGRA => 4,
            ImageFormat::Grayscale => 1,
        }
    }

    /// Validate image data consistency
    pub fn validate(&self) -> bool {
        let expected_size = self.width as usize * self.height as usize * self.channels() as usize;
        self.width > 0 && self.height > 0 && self.data.len() == expected_size
    }
}

/// Per-pixel depth in meters, co-registered with the camera image
#[derive(Debug, Clone, PartialEq)]
pub struct DepthPlane {
    /// Indexed as `[row, col]`
    data: Array2<f32>,
}

impl DepthPlane {
    /// Create a plane from row-major samples
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> crate::Result<Self> {
        let data = Array2::from_shape_vec((height as usize, width as usize), data).map_err(|e| {
            crate::DetectionError::depth_plane(format!(
                "{} samples do not form a {}x{} plane: {}",
                width as usize * height as usize,
                width,
                height,
                e
            ))
        })?;
        Ok(Self { data })
    }

    /// Plane with every sample set to `value`
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            data: Array2::from_elem((height as usize, width as usize), value),
        }
    }

    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.data.get((row, col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        if let Some(v) = self.data.get_mut((row, col)) {
            *v = value;
        }
    }
}

/// One capture from the camera driver: image, optional depth, header
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: ImageData,
    /// Depth in meters at the same resolution as `image`
    pub depth: Option<DepthPlane>,
    pub header: FrameHeader,
}

impl CameraFrame {
    pub fn new(image: ImageData, header: FrameHeader) -> Self {
        Self {
            image,
            depth: None,
            header,
        }
    }

    pub fn with_depth(mut self, depth: DepthPlane) -> Self {
        self.depth = Some(depth);
        self
    }
}
