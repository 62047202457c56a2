use indicatif::{ProgressBar, ProgressStyle};

const RUN_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.green/white} {pos}/{len} records {msg}";

pub fn run_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(RUN_TEMPLATE)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Bar over the records of one run; hidden when `visible` is false.
pub fn run_progress(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(run_style());
    bar
}
