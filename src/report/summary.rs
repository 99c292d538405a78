//! Derived, immutable summary of a report and its human-readable rendering.

use std::env;
use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use owo_colors::OwoColorize;

use crate::report::registry::{Report, RunResult, RunSnapshot};

const PREFIX: &str = "   ";
const RUN_SUMMARY_HEADER: &str = "❯❯ Run Summary";
const DURATION_LABEL: &str = "Duration";
const UNITS_LABEL: &str = "Units";
const SUCCESS_LABEL: &str = "Succeeded";
const FAILURE_LABEL: &str = "Failed";
const EARLY_EXIT_LABEL: &str = "Early Exits";
const EXCLUDE_LABEL: &str = "Excluded";
const SEPARATOR: &str = ": ";

/// Undocumented temporary environment variable used to experiment with the
/// summary padding character.
const ENV_TMP_UNDOCUMENTED_REPORT_PADDER: &str = "TMP_UNDOCUMENTED_REPORT_PADDER";

/// Aggregated counts and spanning time window of a report.
#[derive(Debug, Clone)]
pub struct Summary {
    total_units: usize,
    succeeded: usize,
    failed: usize,
    early_exits: usize,
    excluded: usize,
    first_run_start: Option<DateTime<Utc>>,
    last_run_end: Option<DateTime<Utc>>,
    padder: String,
    should_color: bool,
}

impl Summary {
    pub(crate) fn from_snapshots(snapshots: Vec<RunSnapshot>, should_color: bool) -> Self {
        let padder = match env::var(ENV_TMP_UNDOCUMENTED_REPORT_PADDER) {
            Ok(value) if !value.is_empty() => value,
            _ => " ".to_owned(),
        };

        let mut summary = Self {
            total_units: snapshots.len(),
            succeeded: 0,
            failed: 0,
            early_exits: 0,
            excluded: 0,
            first_run_start: None,
            last_run_end: None,
            padder,
            should_color,
        };

        for snapshot in &snapshots {
            summary.update(snapshot);
        }

        summary
    }

    fn update(&mut self, run: &RunSnapshot) {
        match run.result {
            Some(RunResult::Succeeded) => self.succeeded += 1,
            Some(RunResult::Failed) => self.failed += 1,
            Some(RunResult::EarlyExit) => self.early_exits += 1,
            Some(RunResult::Excluded) => self.excluded += 1,
            None => {}
        }

        if self
            .first_run_start
            .map_or(true, |first| run.started < first)
        {
            self.first_run_start = Some(run.started);
        }

        if let Some(ended) = run.ended {
            if self.last_run_end.map_or(true, |last| ended > last) {
                self.last_run_end = Some(ended);
            }
        }
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn early_exits(&self) -> usize {
        self.early_exits
    }

    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// Time between the first run start and the last run end; zero when the
    /// report is empty.
    pub fn total_duration(&self) -> Duration {
        match (self.first_run_start, self.last_run_end) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }

    fn total_duration_string(&self, colorizer: &Colorizer) -> String {
        let duration = self.total_duration();

        if duration < Duration::milliseconds(1) {
            let micros = duration.num_microseconds().unwrap_or(0);
            return colorizer.microseconds(&format!("{micros}µs"));
        }

        if duration < Duration::seconds(1) {
            return colorizer.milliseconds(&format!("{}ms", duration.num_milliseconds()));
        }

        if duration < Duration::minutes(1) {
            return colorizer.seconds(&format!("{}s", duration.num_seconds()));
        }

        colorizer.minutes(&format!("{}m", duration.num_minutes()))
    }

    /// Writes the summary to a writer.
    pub fn write(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let colorizer = Colorizer::new(self.should_color);

        writeln!(w, "{}", colorizer.heading(RUN_SUMMARY_HEADER))?;

        self.write_entry(w, DURATION_LABEL, &self.total_duration_string(&colorizer))?;
        self.write_entry(
            w,
            UNITS_LABEL,
            &colorizer.default_value(&self.total_units.to_string()),
        )?;

        if self.succeeded > 0 {
            self.write_entry(
                w,
                SUCCESS_LABEL,
                &colorizer.success(&self.succeeded.to_string()),
            )?;
        }

        if self.failed > 0 {
            self.write_entry(w, FAILURE_LABEL, &colorizer.failure(&self.failed.to_string()))?;
        }

        if self.early_exits > 0 {
            self.write_entry(
                w,
                EARLY_EXIT_LABEL,
                &colorizer.early_exit(&self.early_exits.to_string()),
            )?;
        }

        if self.excluded > 0 {
            self.write_entry(
                w,
                EXCLUDE_LABEL,
                &colorizer.excluded(&self.excluded.to_string()),
            )?;
        }

        Ok(())
    }

    fn write_entry(&self, w: &mut dyn Write, label: &str, value: &str) -> std::io::Result<()> {
        writeln!(
            w,
            "{PREFIX}{label}{SEPARATOR}{} {value}",
            self.padding(label)
        )
    }

    fn longest_line_length(&self) -> usize {
        let mut lengths = vec![DURATION_LABEL.len(), UNITS_LABEL.len()];

        if self.succeeded > 0 {
            lengths.push(SUCCESS_LABEL.len());
        }

        if self.failed > 0 {
            lengths.push(FAILURE_LABEL.len());
        }

        if self.early_exits > 0 {
            lengths.push(EARLY_EXIT_LABEL.len());
        }

        if self.excluded > 0 {
            lengths.push(EXCLUDE_LABEL.len());
        }

        lengths
            .into_iter()
            .map(|length| length + PREFIX.len() + SEPARATOR.len())
            .max()
            .unwrap_or(0)
    }

    fn padding(&self, label: &str) -> String {
        let label_length = PREFIX.len() + label.len() + SEPARATOR.len();
        self.padder
            .repeat(self.longest_line_length() - label_length)
    }
}

impl Report {
    /// Writes the summary, with a line gap before and after.
    pub fn write_summary(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w)?;
        self.summarize().write(w)?;
        writeln!(w)
    }
}

/// Applies ANSI styling to summary fragments when color is enabled.
struct Colorizer {
    enabled: bool,
}

impl Colorizer {
    fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> String) -> String {
        if self.enabled {
            style(text)
        } else {
            text.to_owned()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow().bold().to_string())
    }

    fn success(&self, text: &str) -> String {
        self.paint(text, |t| t.green().bold().to_string())
    }

    fn failure(&self, text: &str) -> String {
        self.paint(text, |t| t.red().bold().to_string())
    }

    fn early_exit(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow().bold().to_string())
    }

    fn excluded(&self, text: &str) -> String {
        self.paint(text, |t| t.blue().bold().to_string())
    }

    fn microseconds(&self, text: &str) -> String {
        self.paint(text, |t| t.cyan().bold().to_string())
    }

    fn milliseconds(&self, text: &str) -> String {
        self.paint(text, |t| t.cyan().bold().to_string())
    }

    fn seconds(&self, text: &str) -> String {
        self.paint(text, |t| t.green().bold().to_string())
    }

    fn minutes(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow().bold().to_string())
    }

    fn default_value(&self, text: &str) -> String {
        self.paint(text, |t| t.white().bold().to_string())
    }
}
