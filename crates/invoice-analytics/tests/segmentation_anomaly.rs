//! Integration tests for customer segmentation and anomaly detection.

use chrono::{Duration, TimeZone, Utc};
use invoice_analytics::ml::{
    segment_summary, AnomalyDetector, CustomerSegmenter, DetectorConfig, MlError,
    ModelKind, SegmenterConfig,
};
use invoice_core::{InvoiceRecord, LineItem};
use rust_decimal_macros::dec;

fn invoice(customer: &str, day: i64, total: rust_decimal::Decimal) -> InvoiceRecord {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    InvoiceRecord::new(customer, total)
        .with_created_at(start + Duration::days(day))
        .with_item(LineItem::new("Service", dec!(1), total))
}

#[test]
fn test_segmenter_needs_k_customers() {
    let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let two_customers = vec![
        invoice("Alpha", 0, dec!(120)),
        invoice("Beta", 1, dec!(340)),
        invoice("Alpha", 2, dec!(90)),
    ];

    let mut segmenter = CustomerSegmenter::with_defaults();
    let err = segmenter.train_at(&two_customers, 3, now).unwrap_err();
    assert!(matches!(
        err,
        MlError::InsufficientData {
            required: 3,
            actual: 2,
            ..
        }
    ));
    assert!(matches!(
        segmenter.predict_segments(),
        Err(MlError::NotTrained(ModelKind::CustomerSegmentation))
    ));

    let mut three_customers = two_customers;
    three_customers.push(invoice("Gamma", 3, dec!(1500)));

    segmenter.train_at(&three_customers, 3, now).unwrap();
    let segmented = segmenter.predict_segments().unwrap();

    assert_eq!(segmented.len(), 3);
    assert!(segmented.iter().all(|c| c.segment < 3));

    let names: Vec<_> = segmented.iter().map(|c| c.customer.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);

    let alpha = &segmented[0].customer;
    assert_eq!(alpha.invoice_count, 2);
    assert_eq!(alpha.total_spent, 210.0);
    assert_eq!(alpha.days_since_last_purchase, 28);

    let summary = segment_summary(&segmented);
    assert_eq!(summary.iter().map(|s| s.customer_count).sum::<usize>(), 3);
}

#[test]
fn test_segmentation_is_reproducible() {
    let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let invoices: Vec<_> = ["A", "B", "C", "D", "E", "F"]
        .iter()
        .enumerate()
        .map(|(i, name)| invoice(name, i as i64, rust_decimal::Decimal::from(100 * (i + 1))))
        .collect();

    let run = || {
        let mut segmenter = CustomerSegmenter::new(SegmenterConfig::default().with_seed(5));
        segmenter.train_at(&invoices, 3, now).unwrap();
        segmenter
            .predict_segments()
            .unwrap()
            .into_iter()
            .map(|c| c.segment)
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_anomaly_detector_minimum() {
    let invoices: Vec<_> = (0..10)
        .map(|i| invoice("Alpha", i, rust_decimal::Decimal::from(200 + 5 * i)))
        .collect();

    let mut detector = AnomalyDetector::with_defaults();
    let err = detector.train(&invoices[..9]).unwrap_err();
    assert!(matches!(
        err,
        MlError::InsufficientData {
            required: 10,
            actual: 9,
            ..
        }
    ));
    assert!(!detector.is_trained());

    let history = detector.train(&invoices).unwrap();
    assert_eq!(history.epochs_run(), 50);
    assert!(detector.is_trained());
}

#[test]
fn test_anomaly_scores_on_new_data() {
    let training: Vec<_> = (0..20)
        .map(|i| invoice("Alpha", i, rust_decimal::Decimal::from(300 + 10 * (i % 5))))
        .collect();

    let mut detector = AnomalyDetector::new(DetectorConfig::default().with_epochs(30));
    detector.train(&training).unwrap();

    let fresh = vec![
        invoice("Alpha", 30, dec!(320)),
        InvoiceRecord::new("Mega", dec!(75000))
            .with_item(LineItem::new("Fleet", dec!(1), dec!(60000)))
            .with_item(LineItem::new("Service", dec!(1), dec!(15000))),
    ];

    let scores = detector.detect_anomalies(&fresh).unwrap();
    assert_eq!(scores.len(), 2);
    assert!(!scores[0].is_anomaly);
    assert!(scores[1].is_anomaly);
    assert!(scores[1].reconstruction_error > scores[0].reconstruction_error);
    assert_eq!(scores[1].invoice.customer_key(), "Mega");

    let report = detector.report(&scores);
    assert_eq!(report.normal_count, 1);
    assert_eq!(report.anomaly_count, 1);
    assert!((report.points[1].total - 75000.0).abs() < 1.0);
    assert!((report.points[1].item_count - 2.0).abs() < 1e-4);
}
