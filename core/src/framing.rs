//! Square framing of album images around the face they show.

use crate::detector::{load_image, path_to_str, DetectionError, FaceLocator, FaceRegion};
use opencv::core::{Mat, Rect, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use std::fs;
use std::path::Path;

/// Largest square window of side `side` inside a `width` x `height` image,
/// centred on `face` where the borders allow, or anchored top-left without one.
pub fn square_window(width: i32, height: i32, face: Option<&FaceRegion>) -> Rect {
    let side = width.min(height).max(0);
    let Some(face) = face else {
        return Rect::new(0, 0, side, side);
    };
    let centre_x = face.x + face.width / 2;
    let centre_y = face.y + face.height / 2;
    let left = (centre_x - side / 2).clamp(0, width - side);
    let top = (centre_y - side / 2).clamp(0, height - side);
    Rect::new(left, top, side, side)
}

/// Writes a square, 3-channel copy of `source` to `target`. Images that are
/// already square are re-encoded as they are.
pub fn frame_square(
    source: &Path,
    target: &Path,
    locator: &dyn FaceLocator,
) -> Result<(), DetectionError> {
    let image = load_image(source)?;
    let (width, height) = (image.cols(), image.rows());
    let framed = if width == height {
        image
    } else {
        let face = locator.locate(&image)?;
        let window = square_window(width, height, face.as_ref());
        Mat::roi(&image, window)?.try_clone()?
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| DetectionError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    let params = Vector::<i32>::new();
    if !imgcodecs::imwrite(path_to_str(target)?, &framed, &params)? {
        return Err(DetectionError::EmptyImage(target.to_path_buf()));
    }
    Ok(())
}
