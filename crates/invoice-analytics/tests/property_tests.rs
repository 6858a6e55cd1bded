//! Property-based tests for sequence construction and regression metrics.

use chrono::{Duration, TimeZone, Utc};
use invoice_analytics::ml::{
    calculate_metrics, FeatureExtractor, MlError, SequenceBuilder, SEQUENCE_WINDOW,
};
use invoice_core::InvoiceRecord;
use proptest::collection::vec;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn dated_invoices(totals: &[u32]) -> Vec<InvoiceRecord> {
    let start = Utc.with_ymd_and_hms(2023, 11, 20, 8, 0, 0).unwrap();
    totals
        .iter()
        .enumerate()
        .map(|(i, total)| {
            InvoiceRecord::new("Customer", Decimal::from(*total))
                .with_created_at(start + Duration::hours(13 * i as i64))
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_sequence_count_and_shape(totals in vec(0u32..50_000, 0..60)) {
        let extractor = FeatureExtractor::with_defaults();
        let features = extractor
            .extract_time_series(&dated_invoices(&totals))
            .unwrap_or_default();
        let dataset = SequenceBuilder::default().build(&extractor, &features);

        let n = totals.len();
        prop_assert_eq!(dataset.len(), n.saturating_sub(SEQUENCE_WINDOW));
        if n < SEQUENCE_WINDOW + 1 {
            prop_assert!(dataset.is_empty());
        }
        for (i, sequence) in dataset.sequences.iter().enumerate() {
            prop_assert_eq!(sequence.len(), SEQUENCE_WINDOW);
            prop_assert!(sequence.iter().all(|point| point.len() == 7));
            // Target is the raw total right after the window.
            prop_assert_eq!(dataset.targets[i], totals[i + SEQUENCE_WINDOW] as f64);
        }
    }

    #[test]
    fn prop_identical_predictions_are_perfect(values in vec(-1.0e6f64..1.0e6, 1..100)) {
        let metrics = calculate_metrics(&values, &values).unwrap();
        prop_assert_eq!(metrics.mse, 0.0);
        prop_assert_eq!(metrics.rmse, 0.0);
        prop_assert_eq!(metrics.mae, 0.0);
        prop_assert_eq!(metrics.r2, 1.0);
    }

    #[test]
    fn prop_length_mismatch_fails(
        predictions in vec(0.0f64..1000.0, 0..30),
        actuals in vec(0.0f64..1000.0, 0..30),
    ) {
        prop_assume!(predictions.len() != actuals.len());
        let is_mismatch = matches!(
            calculate_metrics(&predictions, &actuals),
            Err(MlError::ShapeMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    #[test]
    fn prop_metrics_are_consistent(
        pairs in vec((0.0f64..10_000.0, 1.0f64..10_000.0), 2..50),
    ) {
        let (predictions, actuals): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let metrics = calculate_metrics(&predictions, &actuals).unwrap();

        prop_assert!(metrics.mse >= 0.0);
        prop_assert!((metrics.rmse - metrics.mse.sqrt()).abs() < 1e-9);
        prop_assert!(metrics.mae <= metrics.rmse + 1e-9);
        prop_assert!(metrics.r2 <= 1.0);
        prop_assert!(metrics.mean_absolute_percentage_error >= 0.0);
    }
}
