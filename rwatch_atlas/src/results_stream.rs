//! Historical measurement results: URL construction, download, and the
//! tolerant line-oriented parser that turns a results file into a stream of
//! [`TracerouteResult`] values.

use crate::measurement::TracerouteResult;
use crate::AtlasError;
use futures_util::StreamExt;
use rwatch_utils::work_group::spawn_work_group;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

pub(crate) const MEASUREMENTS_URL: &str = "https://atlas.ripe.net/api/v2/measurements";

/// Builds the upstream results URL for a measurement, optionally bounded in
/// time and restricted to a single probe.
pub fn results_url(
    measurement_id: u64,
    start: Option<i64>,
    stop: Option<i64>,
    probe_id: Option<u64>,
) -> String {
    let mut url = format!("{MEASUREMENTS_URL}/{measurement_id}/results?format=txt");

    if let Some(start) = start {
        url.push_str(&format!("&start={start}"));
    }
    if let Some(stop) = stop {
        url.push_str(&format!("&stop={stop}"));
    }
    if let Some(probe_id) = probe_id {
        url.push_str(&format!("&probe_ids={probe_id}"));
    }

    url
}

/// Streams the upstream results body into `file`, draining the response to
/// EOF. The file ends up holding whatever framing upstream used (NDJSON or
/// a wrapping JSON array); the reader side tolerates both.
pub(crate) async fn download_results_to_file(
    url: &str,
    file: &Path,
) -> Result<(), AtlasError> {
    let response = reqwest::get(url).await?.error_for_status()?;

    let mut output = tokio::fs::File::create(file).await?;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        output.write_all(&chunk?).await?;
    }

    output.flush().await?;
    Ok(())
}

/// Reduces one line of a results file to a JSON object, tolerating the
/// wrapping-array framing: a lone `[` or `]` line, objects with trailing
/// commas, and the closing bracket glued to the final object.
fn clean_result_line(line: &str) -> Option<&str> {
    let mut cleaned = line.trim();
    cleaned = cleaned.strip_prefix('[').unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix(',').unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix(']').unwrap_or(cleaned);
    cleaned = cleaned.trim();

    (!cleaned.is_empty()).then_some(cleaned)
}

/// Parse a results file into a bounded stream of results. Line splitting
/// runs on a dedicated reader thread and JSON parsing is spread across the
/// work-group pool; the returned channel closes once the file is exhausted.
/// Malformed lines are logged and skipped.
pub fn stream_results_from_file(path: &Path) -> Result<mpsc::Receiver<TracerouteResult>, AtlasError> {
    let file = std::fs::File::open(path)?;

    let (line_tx, results) = spawn_work_group(|line: String, output| {
        match serde_json::from_str::<TracerouteResult>(&line) {
            Ok(result) => {
                let _ = output.blocking_send(result);
            }
            Err(e) => warn!("Skipping unreadable result line: {e}"),
        }
    });

    std::thread::spawn(move || {
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Error while reading measurement results: {e}");
                    break;
                }
            };

            if let Some(cleaned) = clean_result_line(&line) {
                if line_tx.send(cleaned.to_string()).is_err() {
                    break;
                }
            }
        }
    });

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::{clean_result_line, results_url, stream_results_from_file};
    use std::io::Write;

    #[test]
    fn url_includes_only_requested_parameters() {
        assert_eq!(
            results_url(47072659, Some(100), None, None),
            "https://atlas.ripe.net/api/v2/measurements/47072659/results?format=txt&start=100"
        );
        assert_eq!(
            results_url(47072659, Some(100), Some(200), Some(6041)),
            "https://atlas.ripe.net/api/v2/measurements/47072659/results?format=txt&start=100&stop=200&probe_ids=6041"
        );
    }

    #[test]
    fn line_cleaning_tolerates_array_framing() {
        assert_eq!(clean_result_line("{\"a\": 1}"), Some("{\"a\": 1}"));
        assert_eq!(clean_result_line("{\"a\": 1},"), Some("{\"a\": 1}"));
        assert_eq!(clean_result_line("[{\"a\": 1},"), Some("{\"a\": 1}"));
        assert_eq!(clean_result_line("{\"a\": 1}]"), Some("{\"a\": 1}"));
        assert_eq!(clean_result_line("["), None);
        assert_eq!(clean_result_line("]"), None);
        assert_eq!(clean_result_line("   "), None);
    }

    #[tokio::test]
    async fn file_streaming_parses_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[").expect("write");
        writeln!(
            file,
            "{},",
            r#"{"msm_id": 1, "prb_id": 10, "timestamp": 100, "result": []}"#
        )
        .expect("write");
        writeln!(file, "this is not json").expect("write");
        writeln!(
            file,
            "{}]",
            r#"{"msm_id": 1, "prb_id": 11, "timestamp": 101, "result": []}"#
        )
        .expect("write");
        file.flush().expect("flush");

        let mut results = stream_results_from_file(file.path()).expect("file should open");

        let mut probe_ids = Vec::new();
        while let Some(result) = results.recv().await {
            assert_eq!(result.msm_id, 1);
            probe_ids.push(result.prb_id);
        }

        probe_ids.sort_unstable();
        assert_eq!(probe_ids, vec![10, 11]);
    }
}
