//! Property-based tests for the scheduler, normaliser and statistics.

use proptest::prelude::*;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use driftwatch_ml::data::frame::{Column, Frame};
use driftwatch_ml::drift::stattest::{self, ColumnValues, StatTestOptions};
use driftwatch_ml::features::Normalizer;
use driftwatch_ml::monitor::{WindowSchedule, windows};

fn epoch(offset_minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::minutes(offset_minutes)
}

// --- Window scheduler properties ---

proptest! {
    #[test]
    fn scheduler_yields_exactly_count_contiguous_windows(
        offset in -100_000i64..100_000,
        period_secs in 1i64..(14 * 86_400),
        count in 0u32..200,
    ) {
        let begin = epoch(offset);
        let all = windows(begin, Duration::seconds(period_secs), count).unwrap();

        prop_assert_eq!(all.len(), count as usize);
        if let Some(first) = all.first() {
            prop_assert_eq!(first.start, begin);
        }
        for (i, w) in all.iter().enumerate() {
            prop_assert_eq!(w.index, i as u32);
            prop_assert_eq!(w.end - w.start, Duration::seconds(period_secs));
        }
        for pair in all.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn every_instant_in_range_falls_in_one_window(
        period_secs in 60i64..86_400,
        count in 1u32..50,
        probe in 0.0f64..1.0,
    ) {
        let begin = epoch(0);
        let all = windows(begin, Duration::seconds(period_secs), count).unwrap();
        let span = period_secs * count as i64;
        let t = begin + Duration::seconds((probe * span as f64) as i64);
        prop_assert_eq!(all.iter().filter(|w| w.contains(t)).count(), 1);
    }

    #[test]
    fn resume_after_window_start_is_next_index(
        count in 1u32..60,
        pick in 0usize..60,
    ) {
        let schedule = WindowSchedule::new(epoch(0), Duration::days(1), count).unwrap();
        let index = (pick as u32) % count;
        let window = schedule.window(index).unwrap();
        prop_assert_eq!(schedule.resume_index(Some(window.start)), index + 1);
    }
}

// --- Normaliser properties ---

fn cell_f64() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        Just(Some(f64::NAN)),
        (-1e6f64..1e6).prop_map(Some),
    ]
}

fn cell_text() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), "[0-9]{1,3}".prop_map(Some)]
}

proptest! {
    #[test]
    fn normalizer_is_idempotent(
        rows in prop::collection::vec((cell_f64(), cell_text(), cell_f64()), 0..60),
    ) {
        let frame = Frame::from_columns(vec![
            Column::float("trip_distance", rows.iter().map(|r| r.0).collect()),
            Column::text("PULocationID", rows.iter().map(|r| r.1.clone()).collect()),
            Column::float("DOLocationID", rows.iter().map(|r| r.2.map(f64::trunc)).collect()),
        ])
        .unwrap();
        let normalizer = Normalizer::new(
            vec!["trip_distance".into()],
            vec!["PULocationID".into(), "DOLocationID".into()],
        );

        let once = normalizer.normalize(&frame);
        let twice = normalizer.normalize(&once);
        prop_assert_eq!(once.missing_values().missing_cells, 0);
        prop_assert_eq!(once.height(), frame.height());
        prop_assert_eq!(twice, once);
    }
}

// --- Statistics properties ---

proptest! {
    #[test]
    fn identical_samples_never_drift(
        values in prop::collection::vec(-1e3f64..1e3, 1..300),
        cutoff in prop_oneof![Just(10usize), Just(1000usize)],
    ) {
        let sample = ColumnValues::Numeric(values);
        let options = StatTestOptions { threshold: None, small_sample_cutoff: cutoff };
        let drift = stattest::column_drift("x", &sample, &sample, &options).unwrap();
        prop_assert!(!drift.drifted);
    }

    #[test]
    fn p_values_stay_in_unit_interval(
        a in prop::collection::vec(-1e3f64..1e3, 1..100),
        b in prop::collection::vec(-1e3f64..1e3, 1..100),
    ) {
        let p = stattest::ks_p_value(&a, &b);
        prop_assert!((0.0..=1.0).contains(&p));
        prop_assert!(stattest::wasserstein_distance(&a, &b) >= 0.0);
    }

    #[test]
    fn quantile_lies_within_sample_range(
        values in prop::collection::vec(-1e3f64..1e3, 1..100),
        q in 0.0f64..=1.0,
    ) {
        let v = stattest::quantile(&values, q).unwrap();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(v >= min - 1e-9 && v <= max + 1e-9);
    }
}
