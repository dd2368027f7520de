use std::time::Duration as StdDuration;

use evidence_ledger_core::{
    freeze_bundle_at, ingest, verify_freeze_integrity, ChangeApplier, Direction, Driver,
    EvidenceBundle, EvidenceClaim, EvidenceItem, Horizon, IngestionEngine, IngestionOutcome,
    IngestionPolicy, IntegrityStatus, LedgerError, MagnitudeUnits, RejectionStage, SourceType,
    ValuationInputs, HIGHEST_CONFIDENCE,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use time::OffsetDateTime;

fn fixture_time() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + StdDuration::from_secs(1_700_000_000)
}

fn mk_inputs(growth_y1: f64) -> ValuationInputs {
    serde_json::from_value(json!({
        "ticker": "ACME",
        "currency": "USD",
        "drivers": {
            "sales_growth": [growth_y1, 0.08, 0.06],
            "oper_margin": [0.20, 0.21, 0.22],
            "stable_growth": 0.03,
            "stable_margin": 0.22
        },
        "wacc": [0.09, 0.09],
        "sales_to_capital": [1.5, 1.6]
    }))
    .unwrap_or_else(|err| panic!("fixture inputs should decode: {err}"))
}

fn mk_claim(
    driver: Driver,
    horizon: Horizon,
    units: MagnitudeUnits,
    magnitude: f64,
    confidence: f64,
) -> EvidenceClaim {
    EvidenceClaim {
        driver,
        statement: format!("{} outlook revised", driver.as_str()),
        direction: Direction::Increase,
        magnitude_units: units,
        magnitude_value: Some(magnitude),
        horizon,
        confidence,
        quote: "management raised the outlook".to_string(),
        page_ref: Some(4),
        line_range: Some((10, 14)),
    }
}

fn mk_item(id: &str, claims: Vec<EvidenceClaim>) -> EvidenceItem {
    EvidenceItem {
        id: id.to_string(),
        source_url: format!("https://www.sec.gov/Archives/{id}"),
        snapshot_id: format!("snap_{id}"),
        date: Some("2023-11-01".to_string()),
        source_type: SourceType::TenQ,
        title: "Quarterly report".to_string(),
        claims,
    }
}

fn mk_bundle(items: Vec<EvidenceItem>) -> EvidenceBundle {
    let mut bundle = EvidenceBundle::new("ACME", fixture_time())
        .unwrap_or_else(|err| panic!("bundle should be created: {err}"));
    for item in items {
        bundle.add_item(item).unwrap_or_else(|err| panic!("item should be added: {err}"));
    }
    bundle
}

fn mk_frozen_bundle(items: Vec<EvidenceItem>) -> EvidenceBundle {
    let mut bundle = mk_bundle(items);
    freeze_bundle_at(&mut bundle, "scenario", fixture_time())
        .unwrap_or_else(|err| panic!("bundle should freeze: {err}"));
    bundle
}

fn run(inputs: &ValuationInputs, bundle: &EvidenceBundle, threshold: f64) -> IngestionOutcome {
    ingest(inputs, bundle, threshold, fixture_time())
        .unwrap_or_else(|err| panic!("ingestion should succeed: {err}"))
}

fn mixed_items() -> Vec<EvidenceItem> {
    vec![
        mk_item(
            "ev_a1b2c3",
            vec![
                mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 3.0, 0.92),
                mk_claim(Driver::Margin, Horizon::Y2To3, MagnitudeUnits::Bps, 150.0, 0.88),
                mk_claim(Driver::Wacc, Horizon::LongTerm, MagnitudeUnits::Bps, 25.0, 0.55),
            ],
        ),
        mk_item(
            "ev_d4e5f6",
            vec![
                mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 4.0, 0.81),
                mk_claim(Driver::S2c, Horizon::LongTerm, MagnitudeUnits::Abs, 0.2, 0.9),
            ],
        ),
    ]
}

#[test]
fn frozen_runs_are_bit_identical() {
    let inputs = mk_inputs(0.10);
    let bundle = mk_frozen_bundle(mixed_items());

    let first = run(&inputs, &bundle, 0.8);
    let second = run(&inputs, &bundle, 0.8);

    assert_eq!(first.inputs, second.inputs);
    let first_report = serde_json::to_string(&first.log.generate_audit_report())
        .unwrap_or_else(|err| panic!("report should serialize: {err}"));
    let second_report = serde_json::to_string(&second.log.generate_audit_report())
        .unwrap_or_else(|err| panic!("report should serialize: {err}"));
    assert_eq!(first_report, second_report);

    let first_log = serde_json::to_string(&first.log).unwrap_or_else(|err| panic!("log should serialize: {err}"));
    let second_log = serde_json::to_string(&second.log).unwrap_or_else(|err| panic!("log should serialize: {err}"));
    assert_eq!(first_log, second_log);
}

#[test]
fn growth_claim_is_capped_at_five_points() {
    // a 25% growth claim breaks the per-claim limit, so the cap is exercised with abs units
    let inputs = mk_inputs(0.10);
    let bundle = mk_frozen_bundle(vec![mk_item(
        "ev_cap001",
        vec![mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Abs, 0.25, 0.85)],
    )]);
    let outcome = run(&inputs, &bundle, 0.8);

    assert_eq!(outcome.log.changes().len(), 1);
    let change = &outcome.log.changes()[0];
    assert_eq!(change.target_path, "drivers.sales_growth[0]");
    assert!(change.cap_applied);
    assert!((change.after_value - 0.15).abs() < 1e-12);
    assert_eq!(change.applied_rule, "growth_cap_y1_500bps");
    assert!((outcome.inputs.drivers.sales_growth[0] - 0.15).abs() < 1e-12);
}

#[test]
fn percent_claim_over_per_claim_limit_is_rejected_before_the_applier() {
    let oversized = mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 25.0, 0.85);

    let applied = ChangeApplier::default().apply(Some(0.10), &oversized);
    assert!(applied.cap_applied);
    assert!((applied.after - 0.15).abs() < 1e-12);

    let mut bundle = mk_bundle(Vec::new());
    assert!(matches!(
        bundle.add_item(mk_item("ev_cap002", vec![oversized])),
        Err(LedgerError::Schema { .. })
    ));
}

#[test]
fn contested_path_keeps_higher_confidence_claim() {
    let inputs = mk_inputs(0.10);
    let bundle = mk_frozen_bundle(vec![
        mk_item(
            "ev_low075",
            vec![mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 1.0, 0.75)],
        ),
        mk_item(
            "ev_high090",
            vec![mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 2.0, 0.90)],
        ),
    ]);

    // 0.75 must clear the threshold to contend at all
    let outcome = run(&inputs, &bundle, 0.7);

    assert_eq!(outcome.log.changes().len(), 1);
    assert_eq!(outcome.log.changes()[0].evidence_id, "ev_high090");
    assert!(outcome.log.changes().iter().all(|change| change.evidence_id != "ev_low075"));

    let conflicts = outcome.log.conflicts_resolved();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].winning_evidence_id, "ev_high090");
    assert_eq!(conflicts[0].resolution_method, HIGHEST_CONFIDENCE);
    assert_eq!(conflicts[0].conflicting_evidence_ids, vec!["ev_low075", "ev_high090"]);

    let loser = &outcome.log.rejections()[0];
    assert_eq!(loser.evidence_id, "ev_low075");
    assert_eq!(loser.stage, RejectionStage::Superseded);
    assert!((outcome.inputs.drivers.sales_growth[0] - 0.12).abs() < 1e-12);
}

#[test]
fn low_confidence_claim_changes_nothing() {
    let inputs = mk_inputs(0.10);
    let bundle = mk_frozen_bundle(vec![mk_item(
        "ev_weak060",
        vec![mk_claim(Driver::Growth, Horizon::Y1, MagnitudeUnits::Percent, 2.0, 0.60)],
    )]);
    let outcome = run(&inputs, &bundle, 0.8);

    assert!(outcome.log.changes().is_empty());
    let summary = outcome.log.validation_summary();
    assert!(summary.total_rejected >= 1);
    assert_eq!(outcome.log.rejections()[0].stage, RejectionStage::Confidence);
    assert_eq!(outcome.inputs, inputs);
}

#[test]
fn second_freeze_is_refused() {
    let mut bundle = mk_frozen_bundle(mixed_items());
    assert!(matches!(bundle.freeze(), Err(LedgerError::FreezeState(_))));
    assert!(matches!(
        freeze_bundle_at(&mut bundle, "again", fixture_time()),
        Err(LedgerError::FreezeState(_))
    ));
}

#[test]
fn tampered_bundle_fails_verification_and_ingestion() {
    let bundle = mk_frozen_bundle(mixed_items());
    let mut raw = serde_json::to_value(&bundle).unwrap_or_else(|err| panic!("bundle should serialize: {err}"));
    raw["items"][0]["claims"][0]["confidence"] = Value::from(0.99);
    let tampered: EvidenceBundle =
        serde_json::from_value(raw).unwrap_or_else(|err| panic!("tampered bundle should decode: {err}"));

    let report = verify_freeze_integrity(&tampered);
    assert!(!report.is_valid);
    assert_eq!(report.status, IntegrityStatus::Corrupted);

    assert!(matches!(
        ingest(&mk_inputs(0.10), &tampered, 0.8, fixture_time()),
        Err(LedgerError::Integrity(_))
    ));
}

#[test]
fn require_frozen_policy_accepts_frozen_bundle() {
    let engine = IngestionEngine::new(IngestionPolicy { require_frozen: true, ..IngestionPolicy::default() })
        .unwrap_or_else(|err| panic!("policy should validate: {err}"));
    let outcome = engine
        .run(&mk_inputs(0.10), &mk_frozen_bundle(mixed_items()), fixture_time())
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));
    assert!(outcome.summary.evidence_bundle_stats.frozen);
    assert_eq!(outcome.summary.processing_stats.conflicts_resolved, 1);
}

fn arb_claim() -> impl Strategy<Value = EvidenceClaim> {
    (
        prop_oneof![Just(Driver::Growth), Just(Driver::Margin), Just(Driver::Wacc), Just(Driver::S2c)],
        prop_oneof![Just(Horizon::Y1), Just(Horizon::Y2To3), Just(Horizon::LongTerm)],
        prop_oneof![Just(Direction::Increase), Just(Direction::Decrease), Just(Direction::Unclear)],
        prop_oneof![Just(MagnitudeUnits::Percent), Just(MagnitudeUnits::Bps), Just(MagnitudeUnits::Abs)],
        proptest::option::of(0.0_f64..2.0),
        0.5_f64..=1.0,
    )
        .prop_map(|(driver, horizon, direction, units, magnitude, confidence)| EvidenceClaim {
            driver,
            statement: "generated".to_string(),
            direction,
            magnitude_units: units,
            magnitude_value: magnitude,
            horizon,
            confidence,
            quote: "generated quote".to_string(),
            page_ref: None,
            line_range: None,
        })
}

fn arb_bundle() -> impl Strategy<Value = EvidenceBundle> {
    proptest::collection::vec(proptest::collection::vec(arb_claim(), 0..5), 0..8).prop_map(|items| {
        let mut bundle = EvidenceBundle::new("ACME", fixture_time())
            .unwrap_or_else(|err| panic!("bundle should be created: {err}"));
        for (index, claims) in items.into_iter().enumerate() {
            let item = mk_item(&format!("ev_{index:06x}"), claims);
            // claims over the per-claim limit are refused here, which is fine
            let _ = bundle.add_item(item);
        }
        bundle
    })
}

proptest! {
    #[test]
    fn applied_changes_respect_caps_and_threshold(
        bundle in arb_bundle(),
        growth_y1 in -0.4_f64..1.5,
        threshold in 0.5_f64..=1.0,
    ) {
        let outcome = match ingest(&mk_inputs(growth_y1), &bundle, threshold, fixture_time()) {
            Ok(outcome) => outcome,
            Err(err) => return Err(TestCaseError::fail(format!("run failed: {err}"))),
        };

        for change in outcome.log.changes() {
            prop_assert!(change.claim_confidence >= threshold);
            if change.target_path.starts_with("drivers.sales_growth") || change.target_path == "drivers.stable_growth" {
                prop_assert!(change.change_magnitude() <= 0.05 + 1e-12);
            }
            if change.target_path.starts_with("drivers.oper_margin") || change.target_path == "drivers.stable_margin" {
                prop_assert!(change.change_magnitude() <= 0.02 + 1e-12);
            }
        }

        let summary = outcome.log.validation_summary();
        prop_assert_eq!(summary.total_attempted, summary.total_applied + summary.total_rejected);
        prop_assert_eq!(summary.total_attempted, bundle.total_claims());
    }

    #[test]
    fn repeated_runs_are_deterministic(bundle in arb_bundle(), threshold in 0.5_f64..=1.0) {
        let inputs = mk_inputs(0.10);
        let first = ingest(&inputs, &bundle, threshold, fixture_time());
        let second = ingest(&inputs, &bundle, threshold, fixture_time());
        prop_assert_eq!(first, second);
    }
}
