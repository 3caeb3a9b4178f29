//! End-to-end lifecycle checks across the domain entities.

use chrono::{Duration, Utc};
use common::{LineItemId, ListingId, OrderId, UserId};
use domain::{
    Address, CarrierShipmentId, GuardError, LineItem, LineItemCommand, LineItemStatus, Listing,
    ListingStatus, Money, Order, RefundPolicy, Shipment, ShipmentStatus, ShipmentTracker,
    TrackerMerge, TrackerUpdate, TransitionGuards,
};

fn address(name: &str) -> Address {
    Address {
        name: name.into(),
        company: None,
        street1: "500 Market St".into(),
        street2: None,
        city: "San Francisco".into(),
        state: "CA".into(),
        zip: "94105".into(),
        country: "US".into(),
        phone: None,
    }
}

fn tracker_update(status: &str, at: chrono::DateTime<Utc>) -> TrackerUpdate {
    TrackerUpdate {
        carrier_tracker_id: "trk_42".into(),
        tracking_code: Some("9400100000000000000000".into()),
        public_url: Some("https://track.example/9400".into()),
        status: status.into(),
        signed_by: None,
        est_delivery_at: None,
        details: vec![],
        updated_at: at,
    }
}

#[test]
fn test_item_ships_and_is_received() {
    let now = Utc::now();
    let order = Order::new(
        OrderId::new(),
        UserId::new(),
        "Jane Buyer",
        address("Jane Buyer"),
        Some("pi_1".into()),
        now,
    );
    let mut listing = Listing::new(
        ListingId::new(),
        "Winter bundle",
        UserId::new(),
        address("Sam Seller"),
        Money::from_cents(6500),
        Money::from_cents(5200),
        32.0,
        None,
    );
    listing.mark_sold();
    let mut item = LineItem::new(LineItemId::new(), order.id(), listing.id(), now);

    item.apply(&LineItemCommand::ConfirmToShip, &TransitionGuards::default(), now)
        .unwrap();
    item.apply(&LineItemCommand::WaitToPrintLabel, &TransitionGuards::default(), now)
        .unwrap();

    let mut shipment = Shipment::new(
        CarrierShipmentId::new("shp_42"),
        Some(item.id()),
        ShipmentStatus::LabelGenerated,
        now,
    );
    // label_printed refuses until the label is known
    assert_eq!(
        item.apply(
            &LineItemCommand::LabelPrinted,
            &TransitionGuards::with_shipment(shipment.facts()),
            now,
        ),
        Err(GuardError::LabelMissing)
    );
    shipment.update_carrier_fields(None, None, Some("https://labels.example/42.png"), None);
    item.apply(
        &LineItemCommand::LabelPrinted,
        &TransitionGuards::with_shipment(shipment.facts()),
        now,
    )
    .unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelPrinted);

    let (mut tracker, outcome) = ShipmentTracker::upsert(
        None,
        shipment.id(),
        tracker_update("in_transit", now + Duration::hours(1)),
        now,
    );
    assert_eq!(outcome, TrackerMerge::Created);
    assert!(tracker.shows_movement());
    shipment.advance(ShipmentStatus::InTransit, now).unwrap();
    item.apply(
        &LineItemCommand::MoveInTransit,
        &TransitionGuards::with_shipment(shipment.facts()),
        now,
    )
    .unwrap();

    assert_eq!(
        tracker.merge(tracker_update("delivered", now + Duration::hours(30))),
        TrackerMerge::Updated
    );
    assert!(tracker.is_delivered());
    assert!(listing.mark_shipped(now).is_some());
    assert_eq!(listing.status(), ListingStatus::Shipped);

    assert!(item.can_be_received(&order, &listing, true));
    item.apply(&LineItemCommand::Receive, &TransitionGuards::default(), now)
        .unwrap();
    assert_eq!(item.status(), LineItemStatus::Received);
    assert!(!item.can_be_canceled(Some(shipment.status())));
}

#[test]
fn test_canceled_item_keeps_refundable_label() {
    let label_time = Utc::now() - Duration::days(20);
    let mut item = LineItem::new(LineItemId::new(), OrderId::new(), ListingId::new(), label_time);
    let mut shipment = Shipment::new(
        CarrierShipmentId::new("shp_7"),
        Some(item.id()),
        ShipmentStatus::LabelGenerated,
        label_time,
    );
    shipment.update_carrier_fields(None, None, Some("https://labels.example/7.png"), None);
    let guards = TransitionGuards::with_shipment(shipment.facts());
    item.apply(&LineItemCommand::WaitToPrintLabel, &guards, label_time)
        .unwrap();
    item.apply(&LineItemCommand::LabelPrinted, &guards, label_time)
        .unwrap();

    assert!(item.can_be_canceled(Some(shipment.status())));
    let change = item
        .apply(
            &LineItemCommand::Cancel {
                reason: "Seller out of stock".into(),
            },
            &guards,
            Utc::now(),
        )
        .unwrap();
    assert_eq!(change.reason.as_deref(), Some("Seller out of stock"));
    assert!(shipment.can_refund(Utc::now(), &RefundPolicy::default()));
}
