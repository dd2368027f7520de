use criterion::{criterion_group, criterion_main, Criterion};
use evidence_ledger_core::{
    assess_bundle, freeze_bundle_at, Direction, Driver, EvidenceBundle, EvidenceClaim,
    EvidenceItem, Horizon, IngestionEngine, IngestionPolicy, MagnitudeUnits, SourceType,
    ValuationInputs,
};
use time::OffsetDateTime;

const DRIVERS: [Driver; 4] = [Driver::Growth, Driver::Margin, Driver::Wacc, Driver::S2c];
const HORIZONS: [Horizon; 3] = [Horizon::Y1, Horizon::Y2To3, Horizon::LongTerm];

fn mk_claim(index: usize) -> EvidenceClaim {
    let direction = if index % 3 == 0 { Direction::Decrease } else { Direction::Increase };
    EvidenceClaim {
        driver: DRIVERS[index % DRIVERS.len()],
        statement: format!("bench claim {index}"),
        direction,
        magnitude_units: MagnitudeUnits::Bps,
        magnitude_value: Some(f64::from(u32::try_from(index % 150).unwrap_or(0))),
        horizon: HORIZONS[index % HORIZONS.len()],
        confidence: 0.6 + f64::from(u32::try_from(index % 40).unwrap_or(0)) / 100.0,
        quote: "benchmark fixture".to_string(),
        page_ref: None,
        line_range: None,
    }
}

fn mk_bundle(items: usize, claims_per_item: usize) -> EvidenceBundle {
    let mut bundle = match EvidenceBundle::new("BENCH", OffsetDateTime::UNIX_EPOCH) {
        Ok(bundle) => bundle,
        Err(err) => panic!("bench bundle failed: {err}"),
    };
    for item_index in 0..items {
        let item = EvidenceItem {
            id: format!("ev_{item_index:06x}"),
            source_url: format!("https://source-{}.example.com/doc/{item_index}", item_index % 7),
            snapshot_id: format!("snap_{item_index:08x}"),
            date: Some("2024-01-15".to_string()),
            source_type: SourceType::News,
            title: format!("bench document {item_index}"),
            claims: (0..claims_per_item).map(|offset| mk_claim(item_index * claims_per_item + offset)).collect(),
        };
        if let Err(err) = bundle.add_item(item) {
            panic!("bench item failed: {err}");
        }
    }
    if let Err(err) = freeze_bundle_at(&mut bundle, "bench", OffsetDateTime::UNIX_EPOCH) {
        panic!("bench freeze failed: {err}");
    }
    bundle
}

fn mk_inputs() -> ValuationInputs {
    let raw = serde_json::json!({
        "ticker": "BENCH",
        "drivers": {
            "sales_growth": [0.10, 0.08, 0.06],
            "oper_margin": [0.20, 0.21, 0.22],
            "stable_growth": 0.03,
            "stable_margin": 0.22
        },
        "wacc": [0.09],
        "sales_to_capital": [1.5]
    });
    match serde_json::from_value(raw) {
        Ok(inputs) => inputs,
        Err(err) => panic!("bench inputs failed: {err}"),
    }
}

fn bench_ingest(c: &mut Criterion) {
    let bundle = mk_bundle(60, 5);
    let inputs = mk_inputs();
    let engine = match IngestionEngine::new(IngestionPolicy::default()) {
        Ok(engine) => engine,
        Err(err) => panic!("bench engine failed: {err}"),
    };

    c.bench_function("ingest_300_claims", |b| {
        b.iter(|| engine.run(&inputs, &bundle, OffsetDateTime::UNIX_EPOCH));
    });

    c.bench_function("content_hash_300_claims", |b| {
        b.iter(|| bundle.compute_content_hash());
    });

    c.bench_function("assess_bundle_300_claims", |b| {
        b.iter(|| assess_bundle(&bundle, 0.8));
    });
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
