//! Lifecycle of a record: Collected -> Built -> Tested -> Published.
//!
//! The state is derived from the persisted fields, so it cannot disagree
//! with the timestamps after a reload.

use crate::record::{CasualtyRecord, Timestamp};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RecordState {
    /// No rendered post yet.
    Collected,
    /// Rendered post exists, never published.
    Built,
    /// Published once in test mode; awaits exactly one production publish.
    Tested,
    /// Terminal.
    Published,
}

impl Display for RecordState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Collected => "collected",
            Self::Built => "built",
            Self::Tested => "tested",
            Self::Published => "published",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move record {name:?} from {from} to {to}")]
pub struct TransitionError {
    pub name: String,
    pub from: RecordState,
    pub to: RecordState,
}

impl CasualtyRecord {
    pub fn state(&self) -> RecordState {
        if self.published_at.is_some() {
            RecordState::Published
        } else if self.tested_at.is_some() {
            RecordState::Tested
        } else if self.rendered_post.is_some() {
            RecordState::Built
        } else {
            RecordState::Collected
        }
    }

    /// Records a successful test-mode publish. Allowed from `Built`, and
    /// from `Tested` when re-testing.
    pub(crate) fn mark_tested(&mut self, at: Timestamp) -> Result<(), TransitionError> {
        match self.state() {
            RecordState::Built | RecordState::Tested => {
                self.tested_at = Some(at);
                Ok(())
            }
            from => Err(self.refuse(from, RecordState::Tested)),
        }
    }

    /// Records a successful production publish. Only a tested record may be
    /// published.
    pub(crate) fn mark_published(&mut self, at: Timestamp) -> Result<(), TransitionError> {
        match self.state() {
            RecordState::Tested => {
                self.published_at = Some(at);
                Ok(())
            }
            from => Err(self.refuse(from, RecordState::Published)),
        }
    }

    fn refuse(&self, from: RecordState, to: RecordState) -> TransitionError {
        TransitionError {
            name: self.full_name.clone(),
            from,
            to,
        }
    }
}
