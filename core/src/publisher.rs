//! The publishing capability and a local outbox implementation of it.

use crate::detector::{DetectionError, FaceLocator};
use crate::framing::frame_square;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const CAPTION_FILE: &str = "caption.txt";
const STAGING_PREFIX: &str = ".staging-";

/// One post: a rendered main image followed by the album's extra images.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub caption: &'a str,
    pub main_image: &'a Path,
    pub additional_images: &'a [PathBuf],
    /// When set, nothing may leave the machine and the call must succeed.
    pub dry_run: bool,
}

impl PublishRequest<'_> {
    pub fn image_count(&self) -> usize {
        1 + self.additional_images.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub images: usize,
    /// Where the post ended up, when the publisher has such a notion.
    pub location: Option<PathBuf>,
}

/// Publishes a post as a single unit: on error nothing of it may remain
/// visible.
pub trait Publisher {
    fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PublishError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("image not found: {}", .0.display())]
    MissingImage(PathBuf),
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("could not prepare image: {0}")]
    Framing(#[from] DetectionError),
    #[error("publisher rejected the post: {0}")]
    Rejected(String),
}

/// Randomised wait before a real publish, to keep a human-like cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// A `max` below `min` wins: the wait never exceeds the configured upper
    /// bound.
    pub fn between(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max,
        }
    }

    pub fn delay(&self) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }

    fn wait(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            info!(seconds = delay.as_secs(), "waiting before publishing");
            std::thread::sleep(delay);
        }
    }
}

/// Exports every post as a numbered album directory under `root`.
///
/// Albums are assembled in a hidden staging directory and renamed into place
/// only once complete.
pub struct OutboxPublisher {
    root: PathBuf,
    pacing: Pacing,
    framer: Option<Arc<dyn FaceLocator>>,
}

impl OutboxPublisher {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            pacing: Pacing::none(),
            framer: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Square-crops additional images around their face before export.
    pub fn with_framing(mut self, locator: Arc<dyn FaceLocator>) -> Self {
        self.framer = Some(locator);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stage(&self, staging: &Path, request: &PublishRequest<'_>) -> Result<(), PublishError> {
        fs::create_dir_all(staging).map_err(|source| io_error(source, staging))?;

        let main_target = staging.join(numbered_name(1, request.main_image, None));
        fs::copy(request.main_image, &main_target)
            .map_err(|source| io_error(source, request.main_image))?;

        for (offset, image) in request.additional_images.iter().enumerate() {
            let position = offset + 2;
            match &self.framer {
                Some(locator) => {
                    let target = staging.join(numbered_name(position, image, Some("jpg")));
                    frame_square(image, &target, locator.as_ref())?;
                }
                None => {
                    let target = staging.join(numbered_name(position, image, None));
                    fs::copy(image, &target).map_err(|source| io_error(source, image))?;
                }
            }
        }

        let caption_path = staging.join(CAPTION_FILE);
        fs::write(&caption_path, request.caption).map_err(|source| io_error(source, &caption_path))
    }
}

impl Publisher for OutboxPublisher {
    fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let headline = request.caption.lines().next().unwrap_or_default();
        if request.dry_run {
            info!(
                main = %request.main_image.display(),
                images = request.image_count(),
                headline,
                "dry run, post prepared but not exported"
            );
            return Ok(PublishReceipt {
                images: request.image_count(),
                location: None,
            });
        }

        for image in std::iter::once(request.main_image)
            .chain(request.additional_images.iter().map(PathBuf::as_path))
        {
            if !image.is_file() {
                return Err(PublishError::MissingImage(image.to_path_buf()));
            }
        }

        self.pacing.wait();
        fs::create_dir_all(&self.root).map_err(|source| io_error(source, &self.root))?;
        let album = resolve_album(&self.root, request.main_image);
        let staging = self.root.join(format!(
            "{}{}",
            STAGING_PREFIX,
            album
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|source| io_error(source, &staging))?;
        }

        if let Err(error) = self.stage(&staging, request) {
            let _ = fs::remove_dir_all(&staging);
            return Err(error);
        }
        if let Err(source) = fs::rename(&staging, &album) {
            let _ = fs::remove_dir_all(&staging);
            return Err(io_error(source, &album));
        }

        info!(album = %album.display(), images = request.image_count(), headline, "post exported");
        Ok(PublishReceipt {
            images: request.image_count(),
            location: Some(album),
        })
    }
}

fn io_error(source: std::io::Error, path: &Path) -> PublishError {
    PublishError::Io {
        source,
        path: path.to_path_buf(),
    }
}

fn numbered_name(position: usize, source: &Path, extension: Option<&str>) -> String {
    let extension = extension
        .map(str::to_string)
        .or_else(|| {
            source
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_lowercase())
        })
        .unwrap_or_else(|| String::from("jpg"));
    format!("{:02}.{}", position, extension)
}

/// First free album directory named after the main image, suffixed with
/// ` (n)` on collisions.
fn resolve_album(root: &Path, main_image: &Path) -> PathBuf {
    let stem = main_image
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| String::from("post"));

    let candidate = root.join(&stem);
    if !candidate.exists() {
        return candidate;
    }
    let mut index = 1;
    loop {
        let candidate = root.join(format!("{} ({})", stem, index));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}
