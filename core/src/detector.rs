//! Face-anchored perceptual fingerprints.
//!
//! A fingerprint is the 64-bit average hash of the single face found in an
//! image, cropped with a small margin and scaled to a fixed width first, so
//! that two copies of one photograph hash alike regardless of resolution,
//! framing or recompression.

use opencv::core::{AlgorithmHint, Mat, Rect, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

const IMREAD_COLOR: i32 = imgcodecs::IMREAD_COLOR;
const HASH_SIZE: i32 = 8;

/// Two fingerprints closer than this many bits come from the same photo.
pub const DEFAULT_HASH_THRESHOLD: u32 = 10;

/// Detector profiles in the order they are tried. The first one that finds
/// exactly one region wins.
pub const CASCADE_PROFILES: &[&str] = &[
    "opencv_frontalface_detection",
    "haarcascade_frontalface_default",
    "haarcascade_frontalface_alt",
    "haarcascade_frontalface_alt2",
    "haarcascade_frontalface_alt_tree",
    "haarcascade_profileface_detection",
    "haarcascade_mcs_eyepair_big",
    "haarcascade_mcs_eyepair_small",
    "haarcascade_smile",
    "haarcascade_mcs_nose",
    "haarcascade_mcs_mouth",
];

/// Tunables for face location and hashing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Directory holding the `<profile>.xml` cascade files.
    pub cascade_dir: PathBuf,
    pub hash_threshold: u32,
    /// Fraction of the face width/height added on every side before cropping.
    pub face_margin: f64,
    /// Width every face crop is scaled to before hashing.
    pub normalized_width: i32,
    pub scale_factor: f64,
    pub min_neighbors: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cascade_dir: PathBuf::from("face_detection"),
            hash_threshold: DEFAULT_HASH_THRESHOLD,
            face_margin: 0.1,
            normalized_width: 128,
            scale_factor: 1.1,
            min_neighbors: 4,
        }
    }
}

/// Pixel bounding box of a detected face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl From<Rect> for FaceRegion {
    fn from(rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

impl FaceRegion {
    /// Grows the region by `margin` of its size on each side, clipped to an
    /// image of `width` x `height`.
    pub fn expanded(&self, margin: f64, width: i32, height: i32) -> Rect {
        let margin_x = (self.width as f64 * margin).round() as i32;
        let margin_y = (self.height as f64 * margin).round() as i32;
        let left = (self.x - margin_x).clamp(0, width);
        let top = (self.y - margin_y).clamp(0, height);
        let right = (self.x + self.width + margin_x).clamp(left, width);
        let bottom = (self.y + self.height + margin_y).clamp(top, height);
        Rect::new(left, top, right - left, bottom - top)
    }
}

/// Perceptual hash of a face crop together with where the face was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceFingerprint {
    pub hash: u64,
    pub face: FaceRegion,
}

/// Calculates the Hamming distance between `left` and `right`.
pub fn hamming_distance(left: u64, right: u64) -> u32 {
    (left ^ right).count_ones()
}

/// Finds the one face an image is about, if there is exactly one.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &Mat) -> Result<Option<FaceRegion>, DetectionError>;
}

/// Produces fingerprints for image files and decides when two match.
///
/// `Ok(None)` means no single face could be found; such an image never
/// matches anything.
pub trait Fingerprinter {
    fn fingerprint(&self, path: &Path) -> Result<Option<FaceFingerprint>, DetectionError>;

    fn is_duplicate(&self, left: &FaceFingerprint, right: &FaceFingerprint) -> bool {
        hamming_distance(left.hash, right.hash) < DEFAULT_HASH_THRESHOLD
    }
}

/// One detector profile: returns every region it finds in a grayscale image.
pub trait RegionDetector: Send {
    fn detect(
        &mut self,
        grayscale: &Mat,
        scale_factor: f64,
        min_neighbors: i32,
    ) -> Result<Vec<Rect>, DetectionError>;
}

impl RegionDetector for CascadeClassifier {
    fn detect(
        &mut self,
        grayscale: &Mat,
        scale_factor: f64,
        min_neighbors: i32,
    ) -> Result<Vec<Rect>, DetectionError> {
        let mut regions = Vector::<Rect>::new();
        self.detect_multi_scale(
            grayscale,
            &mut regions,
            scale_factor,
            min_neighbors,
            0,
            Size::default(),
            Size::default(),
        )?;
        Ok(regions.to_vec())
    }
}

/// A named detector profile.
pub type Profile = (String, Box<dyn RegionDetector>);

/// Haar cascade face locator over the fixed [`CASCADE_PROFILES`] order.
pub struct CascadeFaceLocator {
    profiles: Mutex<Vec<Profile>>,
    scale_factor: f64,
    min_neighbors: i32,
}

impl CascadeFaceLocator {
    /// Loads every profile present under `config.cascade_dir`. Missing files
    /// are skipped; a directory with none of them yields a locator that never
    /// finds a face.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectionError> {
        let mut profiles: Vec<Profile> = Vec::new();
        for name in CASCADE_PROFILES {
            let path = config.cascade_dir.join(format!("{}.xml", name));
            if !path.is_file() {
                debug!(profile = name, path = %path.display(), "cascade file missing, skipping");
                continue;
            }
            let path_string = path_to_str(&path)?;
            let classifier = CascadeClassifier::new(path_string)?;
            if classifier.empty()? {
                return Err(DetectionError::EmptyCascade(path));
            }
            profiles.push((name.to_string(), Box::new(classifier)));
        }
        if profiles.is_empty() {
            warn!(
                dir = %config.cascade_dir.display(),
                "no face cascades found; every image will be treated as unique"
            );
        }
        Ok(Self::with_profiles(profiles, config))
    }

    /// Locator over already loaded profiles, tried in the given order.
    pub fn with_profiles(profiles: Vec<Profile>, config: &DetectorConfig) -> Self {
        Self {
            profiles: Mutex::new(profiles),
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().map(|profiles| profiles.len()).unwrap_or(0)
    }
}

impl FaceLocator for CascadeFaceLocator {
    fn locate(&self, image: &Mat) -> Result<Option<FaceRegion>, DetectionError> {
        let mut grayscale = Mat::default();
        imgproc::cvt_color(
            image,
            &mut grayscale,
            imgproc::COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| DetectionError::LockPoisoned)?;
        for (name, detector) in profiles.iter_mut() {
            let regions = detector.detect(&grayscale, self.scale_factor, self.min_neighbors)?;
            if let [region] = regions.as_slice() {
                debug!(profile = %name, "single face located");
                return Ok(Some(FaceRegion::from(*region)));
            }
            debug!(profile = %name, regions = regions.len(), "no single face, trying next profile");
        }
        Ok(None)
    }
}

/// Fingerprinter backed by a [`FaceLocator`].
#[derive(Clone)]
pub struct FaceFingerprinter {
    locator: Arc<dyn FaceLocator>,
    config: DetectorConfig,
}

impl FaceFingerprinter {
    pub fn new(locator: Arc<dyn FaceLocator>, config: DetectorConfig) -> Self {
        Self { locator, config }
    }

    fn normalized_crop(&self, image: &Mat, face: &FaceRegion) -> Result<Mat, DetectionError> {
        let window = face.expanded(self.config.face_margin, image.cols(), image.rows());
        if window.width == 0 || window.height == 0 {
            return Err(DetectionError::EmptyCrop);
        }
        let crop = Mat::roi(image, window)?.try_clone()?;

        let width = self.config.normalized_width.max(HASH_SIZE);
        let height = ((crop.rows() as f64) * width as f64 / crop.cols() as f64)
            .round()
            .max(1.0) as i32;
        let mut normalized = Mat::default();
        imgproc::resize(
            &crop,
            &mut normalized,
            Size::new(width, height),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )?;
        Ok(normalized)
    }
}

impl Fingerprinter for FaceFingerprinter {
    fn fingerprint(&self, path: &Path) -> Result<Option<FaceFingerprint>, DetectionError> {
        let image = load_image(path)?;
        let Some(face) = self.locator.locate(&image)? else {
            debug!(path = %path.display(), "no single face, image cannot be fingerprinted");
            return Ok(None);
        };
        let crop = self.normalized_crop(&image, &face)?;
        let hash = average_hash(&crop)?;
        Ok(Some(FaceFingerprint { hash, face }))
    }

    fn is_duplicate(&self, left: &FaceFingerprint, right: &FaceFingerprint) -> bool {
        hamming_distance(left.hash, right.hash) < self.config.hash_threshold
    }
}

/// Reads an image as 3-channel BGR; palette and alpha images are flattened.
pub(crate) fn load_image(path: &Path) -> Result<Mat, DetectionError> {
    let path_string = path_to_str(path)?;
    let image = imgcodecs::imread(path_string, IMREAD_COLOR)?;
    if image.empty() {
        return Err(DetectionError::EmptyImage(path.to_path_buf()));
    }
    Ok(image)
}

pub(crate) fn path_to_str(path: &Path) -> Result<&str, DetectionError> {
    path.to_str()
        .ok_or_else(|| DetectionError::InvalidPath(path.to_path_buf()))
}

fn average_hash(image: &Mat) -> Result<u64, DetectionError> {
    let mut grayscale = Mat::default();
    imgproc::cvt_color(
        image,
        &mut grayscale,
        imgproc::COLOR_BGR2GRAY,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let mut resized = Mat::default();
    imgproc::resize(
        &grayscale,
        &mut resized,
        Size::new(HASH_SIZE, HASH_SIZE),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;

    let data = resized.data_typed::<u8>()?;
    let expected = (HASH_SIZE * HASH_SIZE) as usize;
    if data.len() != expected {
        return Err(DetectionError::UnexpectedHashLength {
            expected,
            actual: data.len(),
        });
    }

    let mean = data.iter().map(|value| *value as f64).sum::<f64>() / expected as f64;
    let mut hash = 0u64;
    for value in data.iter() {
        hash <<= 1;
        if (*value as f64) >= mean {
            hash |= 1;
        }
    }
    Ok(hash)
}

/// Errors that can occur while locating faces or hashing images.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("unable to convert path {} to UTF-8 string", .0.display())]
    InvalidPath(PathBuf),
    #[error("image at {} is empty or unreadable", .0.display())]
    EmptyImage(PathBuf),
    #[error("cascade at {} could not be loaded", .0.display())]
    EmptyCascade(PathBuf),
    #[error("face region is empty after clipping")]
    EmptyCrop,
    #[error("unexpected hash length: expected {expected}, got {actual}")]
    UnexpectedHashLength { expected: usize, actual: usize },
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("face locator lock poisoned")]
    LockPoisoned,
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}
