//! One publication run over a batch of records.
//!
//! Records are visited once, in order, and every record comes back out in
//! its original position whether it was published, skipped or left alone
//! after a stop. Only a successful publish changes a record.

use crate::caption::{build_caption, CaptionConfig};
use crate::clock::Clock;
use crate::dedup::filter_duplicates;
use crate::detector::Fingerprinter;
use crate::publisher::{PublishRequest, Publisher};
use crate::record::CasualtyRecord;
use crate::signal::SignalSource;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Failures tolerated in a run before the breaker trips on the next one.
pub const FAILURE_TOLERANCE: u32 = 3;

/// Caller-chosen limits and modes for a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub posts_limit: Option<usize>,
    /// Records with fewer existing candidate images are skipped. `None` and
    /// `Some(0)` disable the check.
    pub min_images: Option<usize>,
    /// Only records whose full name contains one of these are considered.
    pub names: Vec<String>,
    /// Mark successes as tested instead of published.
    pub test_mode: bool,
    /// Ask the publisher not to touch the outside world.
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    Interrupted,
    CircuitBreaker,
}

/// Why an otherwise eligible record was not attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotEnoughImages { found: usize, required: usize },
    NoRenderedPost,
}

/// Counters shared by every record of one run.
#[derive(Debug, Default)]
pub struct RunContext {
    failures: u32,
    stop: Option<StopCause>,
    posts: usize,
    skipped: usize,
    images_per_post: BTreeMap<usize, Vec<String>>,
}

impl RunContext {
    pub fn stop_requested(&self) -> bool {
        self.stop.is_some()
    }

    pub fn posts(&self) -> usize {
        self.posts
    }

    fn request_stop(&mut self, cause: StopCause) {
        if self.stop.is_none() {
            self.stop = Some(cause);
        }
    }

    fn record_success(&mut self, images: usize, name: &str) {
        self.posts += 1;
        self.images_per_post
            .entry(images)
            .or_default()
            .push(name.to_string());
    }

    // Never reset by a success: the breaker counts every failure of the run.
    fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures > FAILURE_TOLERANCE {
            warn!(failures = self.failures, "too many failed publishes, stopping the run");
            self.request_stop(StopCause::CircuitBreaker);
        }
    }

    fn into_summary(self, options: &RunOptions) -> RunSummary {
        RunSummary {
            posts: self.posts,
            failures: self.failures,
            skipped: self.skipped,
            dry_run: options.dry_run,
            test_mode: options.test_mode,
            stopped: self.stop,
            images_per_post: self.images_per_post,
        }
    }
}

/// What a run did, for the end-of-run report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub posts: usize,
    pub failures: u32,
    pub skipped: usize,
    pub dry_run: bool,
    pub test_mode: bool,
    pub stopped: Option<StopCause>,
    /// Number of album images -> names of the records posted with that many.
    pub images_per_post: BTreeMap<usize, Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub records: Vec<CasualtyRecord>,
    pub summary: RunSummary,
}

/// Whether a record may be attempted in this run, before any file checks.
pub fn is_eligible(record: &CasualtyRecord, options: &RunOptions, posts: usize) -> bool {
    if record.published_at.is_some() {
        return false;
    }
    let stage_allows = if options.test_mode {
        record.tested_at.is_none() || !options.names.is_empty()
    } else {
        record.tested_at.is_some()
    };
    let name_matches = options.names.is_empty()
        || options
            .names
            .iter()
            .any(|name| record.full_name.contains(name.as_str()));
    let under_limit = options.posts_limit.map_or(true, |limit| posts < limit);
    stage_allows && name_matches && under_limit
}

/// Drives a batch through the publisher with injected collaborators.
pub struct Orchestrator<'a> {
    publisher: &'a dyn Publisher,
    fingerprinter: &'a dyn Fingerprinter,
    clock: &'a dyn Clock,
    signal: &'a dyn SignalSource,
    caption: CaptionConfig,
    progress: ProgressBar,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        publisher: &'a dyn Publisher,
        fingerprinter: &'a dyn Fingerprinter,
        clock: &'a dyn Clock,
        signal: &'a dyn SignalSource,
    ) -> Self {
        Self {
            publisher,
            fingerprinter,
            clock,
            signal,
            caption: CaptionConfig::default(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_caption(mut self, caption: CaptionConfig) -> Self {
        self.caption = caption;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self, records: Vec<CasualtyRecord>, options: &RunOptions) -> RunReport {
        let mut context = RunContext::default();
        let mut output = Vec::with_capacity(records.len());

        for record in records {
            self.progress.inc(1);
            if !context.stop_requested() && self.signal.interrupted() {
                info!("stop requested, leaving the remaining records untouched");
                context.request_stop(StopCause::Interrupted);
            }
            if context.stop_requested() || !is_eligible(&record, options, context.posts) {
                output.push(record);
                continue;
            }
            self.progress.set_message(format!("Publishing: {}", record.full_name));
            output.push(self.process(record, options, &mut context));
        }

        RunReport {
            records: output,
            summary: context.into_summary(options),
        }
    }

    fn process(
        &self,
        record: CasualtyRecord,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> CasualtyRecord {
        let existing: Vec<PathBuf> = record
            .candidate_images
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect();

        let main_image = match precheck(&record, &existing, options) {
            Ok(main_image) => main_image,
            Err(reason) => {
                info!(record = %record.full_name, ?reason, "skipping record");
                context.skipped += 1;
                return record;
            }
        };

        let deduped = filter_duplicates(&existing, self.fingerprinter);
        if !deduped.removed.is_empty() {
            info!(
                record = %record.full_name,
                removed = deduped.removed.len(),
                "duplicate images removed"
            );
        }

        let caption = build_caption(&record, &self.caption);
        let request = PublishRequest {
            caption: &caption,
            main_image: &main_image,
            additional_images: &deduped.unique,
            dry_run: options.dry_run,
        };
        if let Err(failure) = self.publisher.publish(&request) {
            warn!(record = %record.full_name, error = %failure, "could not publish post");
            context.record_failure();
            return record;
        }

        let mut updated = record.clone();
        updated.candidate_images = existing;
        updated.caption = Some(caption.clone());
        let now = self.clock.now();
        let transition = if options.test_mode {
            updated.mark_tested(now)
        } else {
            updated.mark_published(now)
        };
        match transition {
            Ok(()) => {
                context.record_success(deduped.unique.len(), &record.full_name);
                let verb = if options.dry_run { "prepared" } else { "published" };
                info!(
                    record = %record.full_name,
                    images = deduped.unique.len(),
                    state = %updated.state(),
                    "post {}", verb
                );
                updated
            }
            Err(refused) => {
                error!(error = %refused, "publish succeeded but the record cannot advance");
                context.record_failure();
                record
            }
        }
    }
}

/// Rendered post to publish, or why the record cannot be attempted.
fn precheck(
    record: &CasualtyRecord,
    existing: &[PathBuf],
    options: &RunOptions,
) -> Result<PathBuf, SkipReason> {
    if let Some(required) = options.min_images.filter(|required| *required > 0) {
        if existing.len() < required {
            return Err(SkipReason::NotEnoughImages {
                found: existing.len(),
                required,
            });
        }
    }
    record
        .rendered_post
        .clone()
        .ok_or(SkipReason::NoRenderedPost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::detector::{DetectionError, FaceFingerprint, FaceRegion};
    use crate::publisher::{PublishError, PublishReceipt};
    use crate::record::Timestamp;
    use crate::state::RecordState;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use time::macros::datetime;

    const NOW: Timestamp = datetime!(2024-05-13 20:00:00);
    const EARLIER: Timestamp = datetime!(2024-05-01 09:00:00);

    #[derive(Clone, Debug, PartialEq)]
    struct Call {
        main: PathBuf,
        additional: Vec<PathBuf>,
        dry_run: bool,
        caption: String,
    }

    /// Records every call; fails for main images listed in `failing`.
    #[derive(Default)]
    struct RecordingPublisher {
        calls: RefCell<Vec<Call>>,
        failing: HashSet<PathBuf>,
        fail_all: bool,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
            self.calls.borrow_mut().push(Call {
                main: request.main_image.to_path_buf(),
                additional: request.additional_images.to_vec(),
                dry_run: request.dry_run,
                caption: request.caption.to_string(),
            });
            if self.fail_all || self.failing.contains(request.main_image) {
                return Err(PublishError::Rejected("upload refused".to_string()));
            }
            Ok(PublishReceipt {
                images: request.image_count(),
                location: None,
            })
        }
    }

    /// Every image shares one hash, unless its name contains "noface".
    struct SameFace;

    impl Fingerprinter for SameFace {
        fn fingerprint(&self, path: &Path) -> Result<Option<FaceFingerprint>, DetectionError> {
            let name = path.to_string_lossy();
            if name.contains("noface") {
                return Ok(None);
            }
            Ok(Some(FaceFingerprint {
                hash: 42,
                face: FaceRegion {
                    x: 0,
                    y: 0,
                    width: 1,
                    height: 1,
                },
            }))
        }
    }

    /// Raises the interrupt once it has been polled `after` times.
    struct InterruptAfter {
        after: usize,
        polls: Cell<usize>,
    }

    impl SignalSource for InterruptAfter {
        fn interrupted(&self) -> bool {
            let polls = self.polls.get() + 1;
            self.polls.set(polls);
            polls > self.after
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
            }
        }

        fn image(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            path
        }

        fn built(&self, name: &str, images: &[&str]) -> CasualtyRecord {
            let mut record = CasualtyRecord::new(format!("https://example.org/{name}"), name);
            record.rendered_post = Some(self.image(&format!("{name}-post.jpg")));
            record.candidate_images = images.iter().map(|image| self.image(image)).collect();
            record
        }

        fn tested(&self, name: &str, images: &[&str]) -> CasualtyRecord {
            let mut record = self.built(name, images);
            record.tested_at = Some(EARLIER);
            record
        }
    }

    fn run(
        publisher: &RecordingPublisher,
        records: Vec<CasualtyRecord>,
        options: &RunOptions,
    ) -> RunReport {
        let clock = FixedClock(NOW);
        let signal = crate::signal::NeverInterrupted;
        Orchestrator::new(publisher, &SameFace, &clock, &signal).run(records, options)
    }

    #[test]
    fn production_run_publishes_only_tested_records() {
        let fixture = Fixture::new();
        let mut collected = CasualtyRecord::new("example.org/a", "A");
        collected.candidate_images = vec![fixture.image("a1.jpg"), fixture.image("a2.jpg")];
        let tested = fixture.tested("B", &["i1-noface.jpg", "i2-noface.jpg"]);
        let mut published = fixture.tested("C", &["c1.jpg", "c2.jpg"]);
        published.published_at = Some(EARLIER);
        let input = vec![collected.clone(), tested.clone(), published.clone()];

        let publisher = RecordingPublisher::default();
        let options = RunOptions {
            min_images: Some(2),
            ..RunOptions::default()
        };
        let report = run(&publisher, input, &options);

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[0], collected);
        assert_eq!(report.records[2], published);
        let updated = &report.records[1];
        assert_eq!(updated.full_name, "B");
        assert_eq!(updated.state(), RecordState::Published);
        assert_eq!(updated.published_at, Some(NOW));
        assert_eq!(updated.tested_at, Some(EARLIER));
        assert!(updated.caption.as_deref().unwrap().starts_with("B ז\"ל"));

        let calls = publisher.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].main, tested.rendered_post.clone().unwrap());
        assert_eq!(calls[0].additional, tested.candidate_images);
        assert!(!calls[0].dry_run);
        assert_eq!(report.summary.posts, 1);
        assert_eq!(
            report.summary.images_per_post.get(&2),
            Some(&vec!["B".to_string()])
        );
    }

    #[test]
    fn dry_run_test_mode_advances_built_record_to_tested() {
        let fixture = Fixture::new();
        let record = fixture.built("D", &["d1.jpg"]);
        let publisher = RecordingPublisher::default();
        let options = RunOptions {
            test_mode: true,
            dry_run: true,
            ..RunOptions::default()
        };

        let report = run(&publisher, vec![record], &options);

        let calls = publisher.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].dry_run);
        let updated = &report.records[0];
        assert_eq!(updated.state(), RecordState::Tested);
        assert_eq!(updated.tested_at, Some(NOW));
        assert!(updated.published_at.is_none());
        assert!(report.summary.dry_run);
    }

    #[test]
    fn duplicate_images_are_not_handed_to_publisher() {
        let fixture = Fixture::new();
        let record = fixture.tested("E", &["e1.jpg", "e2.jpg", "e3-noface.jpg"]);
        let publisher = RecordingPublisher::default();

        let report = run(&publisher, vec![record.clone()], &RunOptions::default());

        let calls = publisher.calls.borrow();
        assert_eq!(
            calls[0].additional,
            vec![
                record.candidate_images[0].clone(),
                record.candidate_images[2].clone()
            ]
        );
        // The stored image list is not pruned of duplicates.
        assert_eq!(report.records[0].candidate_images, record.candidate_images);
        assert_eq!(
            report.summary.images_per_post.get(&2),
            Some(&vec!["E".to_string()])
        );
    }

    #[test]
    fn published_records_are_never_selected() {
        let fixture = Fixture::new();
        let mut record = fixture.tested("Forever", &["f1.jpg"]);
        record.published_at = Some(EARLIER);

        for test_mode in [false, true] {
            for names in [vec![], vec!["Forever".to_string()]] {
                for posts_limit in [None, Some(10)] {
                    let options = RunOptions {
                        test_mode,
                        names: names.clone(),
                        posts_limit,
                        ..RunOptions::default()
                    };
                    assert!(!is_eligible(&record, &options, 0));
                    let publisher = RecordingPublisher::default();
                    let report = run(&publisher, vec![record.clone()], &options);
                    assert!(publisher.calls.borrow().is_empty());
                    assert_eq!(report.records, vec![record.clone()]);
                }
            }
        }
    }

    #[test]
    fn test_mode_skips_tested_unless_named() {
        let fixture = Fixture::new();
        let tested = fixture.tested("Gil Ben", &[]);
        let test_mode = RunOptions {
            test_mode: true,
            ..RunOptions::default()
        };
        assert!(!is_eligible(&tested, &test_mode, 0));

        let named = RunOptions {
            names: vec!["Ben".to_string()],
            ..test_mode.clone()
        };
        assert!(is_eligible(&tested, &named, 0));

        let other_name = RunOptions {
            names: vec!["Someone".to_string()],
            ..test_mode
        };
        assert!(!is_eligible(&tested, &other_name, 0));
    }

    #[test]
    fn production_mode_requires_prior_test() {
        let fixture = Fixture::new();
        let built = fixture.built("H", &[]);
        assert!(!is_eligible(&built, &RunOptions::default(), 0));
        let tested = fixture.tested("H", &[]);
        assert!(is_eligible(&tested, &RunOptions::default(), 0));
    }

    #[test]
    fn posts_limit_caps_successful_posts() {
        let fixture = Fixture::new();
        let records: Vec<_> = ["P1", "P2", "P3"]
            .iter()
            .map(|name| fixture.tested(name, &[]))
            .collect();
        let publisher = RecordingPublisher::default();
        let options = RunOptions {
            posts_limit: Some(2),
            ..RunOptions::default()
        };

        let report = run(&publisher, records.clone(), &options);

        assert_eq!(publisher.calls.borrow().len(), 2);
        assert_eq!(report.records[0].state(), RecordState::Published);
        assert_eq!(report.records[1].state(), RecordState::Published);
        assert_eq!(report.records[2], records[2]);
    }

    #[test]
    fn too_few_images_leaves_record_unchanged() {
        let fixture = Fixture::new();
        let mut record = fixture.tested("I", &["i1.jpg"]);
        record.candidate_images.push(fixture.dir.path().join("deleted.jpg"));
        let publisher = RecordingPublisher::default();
        let options = RunOptions {
            min_images: Some(2),
            ..RunOptions::default()
        };

        let report = run(&publisher, vec![record.clone()], &options);

        assert!(publisher.calls.borrow().is_empty());
        assert_eq!(report.records, vec![record]);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.failures, 0);
    }

    #[test]
    fn missing_files_are_dropped_before_publishing() {
        let fixture = Fixture::new();
        let mut record = fixture.tested("J", &["j1-noface.jpg"]);
        let gone = fixture.dir.path().join("gone.jpg");
        record.candidate_images.insert(0, gone);
        let publisher = RecordingPublisher::default();

        let report = run(&publisher, vec![record.clone()], &RunOptions::default());

        let expected = vec![record.candidate_images[1].clone()];
        assert_eq!(publisher.calls.borrow()[0].additional, expected);
        assert_eq!(report.records[0].candidate_images, expected);
    }

    #[test]
    fn record_without_rendered_post_is_skipped() {
        let fixture = Fixture::new();
        let mut record = fixture.tested("K", &[]);
        record.rendered_post = None;
        let publisher = RecordingPublisher::default();

        let report = run(&publisher, vec![record.clone()], &RunOptions::default());

        assert!(publisher.calls.borrow().is_empty());
        assert_eq!(report.records, vec![record]);
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn precheck_reports_reason_or_main_image() {
        let fixture = Fixture::new();
        let record = fixture.tested("S", &["s1.jpg"]);
        let options = RunOptions {
            min_images: Some(2),
            ..RunOptions::default()
        };
        assert_eq!(
            precheck(&record, &record.candidate_images, &options),
            Err(SkipReason::NotEnoughImages {
                found: 1,
                required: 2
            })
        );
        assert_eq!(
            precheck(&record, &record.candidate_images, &RunOptions::default()),
            Ok(record.rendered_post.clone().unwrap())
        );

        let mut unbuilt = record.clone();
        unbuilt.rendered_post = None;
        assert_eq!(
            precheck(&unbuilt, &unbuilt.candidate_images, &RunOptions::default()),
            Err(SkipReason::NoRenderedPost)
        );
    }

    #[test]
    fn failure_leaves_record_unmodified() {
        let fixture = Fixture::new();
        let mut record = fixture.tested("L", &["l1.jpg"]);
        record.candidate_images.push(fixture.dir.path().join("gone.jpg"));
        let publisher = RecordingPublisher {
            fail_all: true,
            ..RecordingPublisher::default()
        };

        let report = run(&publisher, vec![record.clone()], &RunOptions::default());

        assert_eq!(report.records, vec![record]);
        assert_eq!(report.summary.failures, 1);
        assert_eq!(report.summary.posts, 0);
        assert!(report.summary.stopped.is_none());
    }

    #[test]
    fn breaker_trips_after_fourth_failure() {
        let fixture = Fixture::new();
        let records: Vec<_> = (1..=6)
            .map(|index| fixture.tested(&format!("M{index}"), &[]))
            .collect();
        let publisher = RecordingPublisher {
            fail_all: true,
            ..RecordingPublisher::default()
        };

        let report = run(&publisher, records.clone(), &RunOptions::default());

        assert_eq!(publisher.calls.borrow().len(), 4);
        assert_eq!(report.records, records);
        assert_eq!(report.summary.failures, 4);
        assert_eq!(report.summary.stopped, Some(StopCause::CircuitBreaker));
    }

    #[test]
    fn breaker_counts_failures_across_successes() {
        let fixture = Fixture::new();
        let names = ["N1", "N2", "N3", "N4", "N5", "N6", "N7"];
        let records: Vec<_> = names.iter().map(|name| fixture.tested(name, &[])).collect();
        // Failures at 1, 2, 4 and 6; 3 succeeds in between.
        let failing = [0usize, 1, 3, 5]
            .iter()
            .map(|index| records[*index].rendered_post.clone().unwrap())
            .collect();
        let publisher = RecordingPublisher {
            failing,
            ..RecordingPublisher::default()
        };

        let report = run(&publisher, records.clone(), &RunOptions::default());

        assert_eq!(publisher.calls.borrow().len(), 6);
        assert_eq!(report.records[2].state(), RecordState::Published);
        assert_eq!(report.records[4].state(), RecordState::Published);
        assert_eq!(report.records[6], records[6]);
        assert_eq!(report.summary.stopped, Some(StopCause::CircuitBreaker));
    }

    #[test]
    fn interrupt_finishes_current_record_then_stops() {
        let fixture = Fixture::new();
        let records: Vec<_> = (1..=5)
            .map(|index| fixture.tested(&format!("Q{index}"), &[]))
            .collect();
        let publisher = RecordingPublisher::default();
        let clock = FixedClock(NOW);
        let signal = InterruptAfter {
            after: 2,
            polls: Cell::new(0),
        };

        let report = Orchestrator::new(&publisher, &SameFace, &clock, &signal)
            .run(records.clone(), &RunOptions::default());

        assert_eq!(publisher.calls.borrow().len(), 2);
        assert_eq!(report.records[0].published_at, Some(NOW));
        assert_eq!(report.records[1].published_at, Some(NOW));
        assert_eq!(&report.records[2..], &records[2..]);
        assert_eq!(report.summary.stopped, Some(StopCause::Interrupted));
        assert_eq!(report.summary.posts, 2);
    }

    #[test]
    fn caption_is_sent_to_publisher_and_stored() {
        let fixture = Fixture::new();
        let record = fixture.tested("Rina", &[]);
        let publisher = RecordingPublisher::default();

        let report = run(&publisher, vec![record], &RunOptions::default());

        let sent = publisher.calls.borrow()[0].caption.clone();
        assert!(sent.ends_with("#standwithisrael"));
        assert_eq!(report.records[0].caption.as_deref(), Some(sent.as_str()));
    }
}
