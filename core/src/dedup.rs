//! Near-duplicate pruning of a record's candidate images.

use crate::detector::{FaceFingerprint, Fingerprinter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Partition of an image list into the images to keep and the ones dropped
/// as copies of an earlier image. Both halves keep input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub unique: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Keeps the first image of every group of look-alikes.
///
/// Each image is compared with every image before it in `images`, including
/// ones already removed, so an image that only resembles a removed image is
/// removed too. Images without a fingerprint never match anything.
pub fn filter_duplicates<F>(images: &[PathBuf], fingerprinter: &F) -> DedupOutcome
where
    F: Fingerprinter + ?Sized,
{
    let Some((first, rest)) = images.split_first() else {
        return DedupOutcome::default();
    };
    let mut outcome = DedupOutcome {
        unique: vec![first.clone()],
        removed: Vec::new(),
    };
    if rest.is_empty() {
        return outcome;
    }

    let fingerprints: Vec<Option<FaceFingerprint>> = images
        .iter()
        .map(|path| match fingerprinter.fingerprint(path) {
            Ok(fingerprint) => fingerprint,
            Err(error) => {
                warn!(path = %path.display(), %error, "fingerprinting failed, keeping image");
                None
            }
        })
        .collect();

    for (index, path) in images.iter().enumerate().skip(1) {
        let duplicate = fingerprints[index].as_ref().is_some_and(|current| {
            fingerprints[..index]
                .iter()
                .flatten()
                .any(|previous| fingerprinter.is_duplicate(current, previous))
        });
        if duplicate {
            outcome.removed.push(path.clone());
        } else {
            outcome.unique.push(path.clone());
        }
    }
    outcome
}
