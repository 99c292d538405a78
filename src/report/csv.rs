//! Tabular (CSV) export of the report: fixed header, RFC 3339 timestamps,
//! CRLF-terminated records, atomic file replacement.

use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use tempfile::NamedTempFile;

use crate::report::registry::{Report, RunSnapshot};

const HEADER: [&str; 6] = ["Name", "Started", "Ended", "Result", "Reason", "Cause"];

impl Report {
    /// Writes the report to a writer in CSV format, rows in the current
    /// (sorted) order.
    pub fn write_csv(&self, w: &mut dyn Write) -> Result<()> {
        write_record(w, HEADER.iter().map(|field| Cow::Borrowed(*field)))?;

        for run in self.snapshots() {
            write_record(w, record_fields(&run).into_iter().map(Cow::Owned))?;
        }

        Ok(())
    }

    /// Writes the report to a file, sorting the runs first. The content goes
    /// to a temporary sibling which is atomically renamed over the
    /// destination, so the destination is either unchanged or fully replaced.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        self.sort_runs();

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .context("failed to create temporary report file")?;

        self.write_csv(&mut tmp)
            .context("failed to write report")?;

        tmp.persist(path)
            .with_context(|| format!("failed to replace report at {}", path.display()))?;

        Ok(())
    }
}

fn record_fields(run: &RunSnapshot) -> Vec<String> {
    let started = run.started.to_rfc3339_opts(SecondsFormat::Secs, true);
    let ended = run
        .ended
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    vec![
        run.name.display().to_string(),
        started,
        ended,
        run.result.map(|r| r.to_string()).unwrap_or_default(),
        run.reason.map(|r| r.to_string()).unwrap_or_default(),
        run.cause.clone().unwrap_or_default(),
    ]
}

fn write_record<'a>(
    w: &mut dyn Write,
    fields: impl Iterator<Item = Cow<'a, str>>,
) -> Result<()> {
    let mut first = true;
    for field in fields {
        if !first {
            w.write_all(b",")?;
        }
        first = false;
        w.write_all(escape(&field).as_bytes())?;
    }
    w.write_all(b"\r\n")?;
    Ok(())
}

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains(['"', ',', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::registry::{EndOption, Run, RunReason, RunResult};
    use std::path::PathBuf;

    fn sample_report() -> Report {
        let report = Report::new();
        report.add_run(Run::new("/stacks/db").unwrap()).unwrap();
        report.add_run(Run::new("/stacks/app").unwrap()).unwrap();

        report.end_run(Path::new("/stacks/db"), []).unwrap();
        report
            .end_run(
                Path::new("/stacks/app"),
                [
                    EndOption::Result(RunResult::EarlyExit),
                    EndOption::Reason(RunReason::EarlyExit),
                    EndOption::AncestorExit("/stacks/db".into()),
                ],
            )
            .unwrap();

        report
    }

    #[test]
    fn csv_has_fixed_header_and_crlf_records() {
        let report = sample_report();
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();

        let mut lines = rendered.split("\r\n");
        assert_eq!(lines.next(), Some("Name,Started,Ended,Result,Reason,Cause"));

        let first = lines.next().unwrap();
        assert!(first.starts_with("/stacks/db,"));
        assert!(first.ends_with(",succeeded,,"));

        let second = lines.next().unwrap();
        assert!(second.starts_with("/stacks/app,"));
        assert!(second.ends_with(",early exit,early exit,/stacks/db"));

        assert_eq!(lines.next(), Some(""), "output should end with CRLF");
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let report = sample_report();
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();

        let row = rendered.split("\r\n").nth(1).unwrap();
        let started = row.split(',').nth(1).unwrap();
        assert!(
            chrono::DateTime::parse_from_rfc3339(started).is_ok(),
            "started field should parse as RFC 3339: {started}"
        );
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn csv_round_trips_non_timestamp_fields() {
        let report = sample_report();
        report.sort_runs();
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();

        let rows: Vec<Vec<&str>> = rendered
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .skip(1)
            .map(|line| line.split(',').collect())
            .collect();

        let expected: Vec<Vec<String>> = report
            .snapshots()
            .iter()
            .map(|run| {
                vec![
                    run.name.display().to_string(),
                    run.result.map(|r| r.to_string()).unwrap_or_default(),
                    run.reason.map(|r| r.to_string()).unwrap_or_default(),
                    run.cause.clone().unwrap_or_default(),
                ]
            })
            .collect();

        for (row, want) in rows.iter().zip(expected.iter()) {
            assert_eq!(row[0], want[0]);
            assert_eq!(row[3], want[1]);
            assert_eq!(row[4], want[2]);
            assert_eq!(row[5], want[3]);
        }
    }

    #[test]
    fn write_to_file_replaces_destination_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.csv");
        std::fs::write(&dest, "stale").unwrap();

        let report = sample_report();
        report.write_to_file(&dest).unwrap();

        let contents = std::fs::read_to_string(&dest).unwrap();
        assert!(contents.starts_with("Name,Started,Ended,Result,Reason,Cause"));
        assert!(!contents.contains("stale"));

        // No temp droppings left beside the destination.
        let leftovers: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path != &dest)
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn write_to_file_sorts_runs_by_start() {
        let report = sample_report();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.csv");
        report.write_to_file(&dest).unwrap();

        let contents = std::fs::read_to_string(&dest).unwrap();
        let names: Vec<&str> = contents
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(names, vec!["/stacks/db", "/stacks/app"]);
    }
}
