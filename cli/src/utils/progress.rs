use indicatif::{ProgressBar, ProgressStyle};

/// Wraps an [`indicatif::ProgressBar`], disabled entirely in `--quiet` mode.
///
/// Grounded on `original_source/mrt2mmdb/make_mmdb.py`'s `tqdm(..., disable=args.quiet)`
/// bars for the ASN-table, MRT-load, and convert stages.
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new(message: &str, quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                    .unwrap(),
            );
            bar.set_message(message.to_string());
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        };
        Self { bar }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.into());
        }
    }

    pub fn finish_with_message(&self, msg: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(msg.into());
        }
    }
}
