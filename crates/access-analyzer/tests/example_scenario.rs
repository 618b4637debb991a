//! End-to-end run of the built-in Freiburg scenario

use access_analyzer::config::example_scenario;
use access_analyzer::sink::{format_epoch, format_value};
use access_analyzer::{BatchScheduler, CancelToken, CsvSinkFactory, MemorySinkFactory, TaskOutcome};
use std::sync::Arc;

const SAMPLES: usize = 10_081;

#[test]
fn test_example_scenario_csv_output() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = example_scenario().build().unwrap();
    let factory = Arc::new(CsvSinkFactory::new(dir.path()));

    let report = BatchScheduler::new(2)
        .run(
            scenario.satellites,
            Arc::new(scenario.context),
            factory.clone(),
            CancelToken::never(),
        )
        .unwrap();
    assert!(report.all_succeeded(), "{:?}", report);

    let mut sun = csv::Reader::from_path(factory.sun_path("ERNST")).unwrap();
    assert_eq!(
        sun.headers().unwrap(),
        vec!["TimeUTC", "Azimuth(deg)", "Elevation(deg)", "Subsolar(deg)"]
    );
    let rows: Vec<csv::StringRecord> = sun.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), SAMPLES);
    assert_eq!(&rows[0][0], "1 Jan 2021 00:00:00.000");
    assert_eq!(&rows[SAMPLES - 1][0], "8 Jan 2021 00:00:00.000");
    for row in &rows {
        let az: f64 = row[1].parse().unwrap();
        let el: f64 = row[2].parse().unwrap();
        let subsolar: f64 = row[3].parse().unwrap();
        assert!((0.0..360.0).contains(&az), "azimuth {}", &row[1]);
        assert!((-90.0..=90.0).contains(&el));
        assert!((0.0..=180.0).contains(&subsolar));
        assert!(row[1].len() >= 7, "unpadded azimuth {}", &row[1]);
    }

    let mut earth = csv::Reader::from_path(factory.earth_path("ERNST")).unwrap();
    assert_eq!(earth.headers().unwrap(), vec!["TimeUTC", "Azimuth(deg)", "Elevation(deg)"]);
    let earth_rows: Vec<csv::StringRecord> = earth.records().map(|r| r.unwrap()).collect();
    assert_eq!(earth_rows.len(), SAMPLES);
    assert!(earth_rows.iter().all(|row| row[1].parse::<f64>().unwrap() < 360.0));

    let mut access = csv::Reader::from_path(factory.access_path("Freiburg", "ERNST")).unwrap();
    assert_eq!(
        access.headers().unwrap(),
        vec!["Access", "StartTimeUTC", "StopTimeUTC", "DurationSeconds"]
    );
    let windows: Vec<csv::StringRecord> = access.records().map(|r| r.unwrap()).collect();
    assert!(
        (10..=60).contains(&windows.len()),
        "unexpected number of passes: {}",
        windows.len()
    );
    for (i, w) in windows.iter().enumerate() {
        assert_eq!(w[0].parse::<usize>().unwrap(), i + 1);
        let duration: f64 = w[3].parse().unwrap();
        assert!(duration > 0.0 && duration < 1_000.0, "duration {}", duration);
    }
}

#[test]
fn test_csv_matches_in_memory_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv_factory = Arc::new(CsvSinkFactory::new(dir.path()));
    let memory = Arc::new(MemorySinkFactory::new());
    let scheduler = BatchScheduler::new(1);

    let scenario = example_scenario().build().unwrap();
    let report = scheduler
        .run(scenario.satellites, Arc::new(scenario.context), memory.clone(), CancelToken::never())
        .unwrap();
    let summary = match report.get("SSO-700") {
        Some(TaskOutcome::Completed(summary)) => summary.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(summary.samples as usize, SAMPLES);
    assert_eq!(summary.skipped_samples, 0);

    let scenario = example_scenario().build().unwrap();
    scheduler
        .run(scenario.satellites, Arc::new(scenario.context), csv_factory.clone(), CancelToken::never())
        .unwrap();

    let output = memory.outputs("SSO-700").unwrap();
    assert_eq!(output.windows.len() as u32, summary.windows["FR"]);
    let expected: Vec<Vec<String>> = output
        .windows
        .iter()
        .map(|w| {
            vec![
                w.sequence.to_string(),
                format_epoch(w.start),
                format_epoch(w.end),
                format_value(w.duration_s),
            ]
        })
        .collect();

    let mut reader = csv::Reader::from_path(csv_factory.access_path("Freiburg", "ERNST")).unwrap();
    let written: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    assert_eq!(written, expected);

    for pair in output.windows.windows(2) {
        assert!(pair[0].end < pair[1].start);
    }
    assert!(output.windows.iter().all(|w| !w.truncated));
}
