use chrono::Utc;
use common::{LineItemId, ListingId, OrderId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CarrierShipmentId, LineItem, LineItemCommand, LineItemStatus, Shipment, ShipmentStatus,
    TransitionGuards,
};
use std::hint::black_box;

fn bench_transition_table(c: &mut Criterion) {
    let guards = TransitionGuards::default();
    c.bench_function("domain/transition_table", |b| {
        b.iter(|| {
            for status in LineItemStatus::ALL {
                let _ = black_box(status).transition(&LineItemCommand::WaitToPrintLabel, &guards);
            }
        });
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let now = Utc::now();
    let mut shipment = Shipment::new(
        CarrierShipmentId::new("shp_bench"),
        None,
        ShipmentStatus::LabelGenerated,
        now,
    );
    shipment.update_carrier_fields(None, None, Some("https://labels.example/bench.png"), None);
    let guards = TransitionGuards::with_shipment(shipment.facts());

    c.bench_function("domain/line_item_lifecycle", |b| {
        b.iter(|| {
            let mut item = LineItem::new(LineItemId::new(), OrderId::new(), ListingId::new(), now);
            for command in [
                LineItemCommand::ConfirmToShip,
                LineItemCommand::WaitToPrintLabel,
                LineItemCommand::LabelPrinted,
                LineItemCommand::MoveInTransit,
                LineItemCommand::Receive,
            ] {
                item.apply(&command, &guards, now).unwrap();
            }
            black_box(item)
        });
    });
}

criterion_group!(benches, bench_transition_table, bench_full_lifecycle);
criterion_main!(benches);
