//! End-to-end fulfillment flows against the in-memory store and services.

use std::time::Duration;

use chrono::Utc;
use common::{LineItemId, ListingId, OrderId, UserId};
use domain::{
    Address, CarrierReference, CompensationStep, LineItem, LineItemCommand, LineItemStatus,
    Listing, ListingStatus, Money, Order, PickupStatus, ShipmentStatus, TransitionGuards,
};
use fulfillment::batch::{BATCH_LEASE, MISSING_FROM_BATCH, PURCHASE_FAILED, SETTLEMENT_TIMEOUT};
use fulfillment::cancellation::{PICKUP_ALREADY_SCHEDULED, PICKUP_NEEDS_SHIPMENT};
use fulfillment::services::carrier::{CarrierShipment, CarrierTracker, InMemoryCarrierGateway};
use fulfillment::{
    BatchPipeline, CancellationService, CarrierGateway, EventOutcome, FulfillmentConfig, FulfillmentError,
    InMemoryNotifier, InMemoryPaymentGateway, LineItemService, Reconciler, SettlePolicy,
    StepOutcome,
};
use fulfillment_store::{FulfillmentStore, InMemoryFulfillmentStore, UnitOfWork};
use serde_json::json;

type Store = InMemoryFulfillmentStore;
type Carrier = InMemoryCarrierGateway;

struct Sale {
    item: LineItemId,
    seller: UserId,
    buyer: UserId,
    buyer_price: Money,
}

struct TestHarness {
    store: Store,
    carrier: Carrier,
    payment: InMemoryPaymentGateway,
    notifier: InMemoryNotifier,
    line_items: LineItemService<Store>,
    pipeline: BatchPipeline<Store, Carrier, InMemoryNotifier>,
    reconciler: Reconciler<Store, Carrier, InMemoryNotifier>,
    cancellation: CancellationService<Store, Carrier, InMemoryPaymentGateway, InMemoryNotifier>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(FulfillmentConfig {
            test_mode: true,
            ..fast_config()
        })
    }

    fn with_config(config: FulfillmentConfig) -> Self {
        let store = InMemoryFulfillmentStore::new();
        let carrier = InMemoryCarrierGateway::new();
        let payment = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();
        Self {
            line_items: LineItemService::new(store.clone(), &config),
            pipeline: BatchPipeline::new(store.clone(), carrier.clone(), notifier.clone(), &config),
            reconciler: Reconciler::new(store.clone(), carrier.clone(), notifier.clone(), &config),
            cancellation: CancellationService::new(
                store.clone(),
                carrier.clone(),
                payment.clone(),
                notifier.clone(),
                &config,
            ),
            store,
            carrier,
            payment,
            notifier,
        }
    }

    /// Seeds a paid order for one listing and returns its line item.
    async fn sale(&self) -> Sale {
        self.sale_with_id(LineItemId::new(), LineItemStatus::Active)
            .await
    }

    async fn sale_with_id(&self, id: LineItemId, status: LineItemStatus) -> Sale {
        let now = Utc::now();
        let buyer = UserId::new();
        let seller = UserId::new();
        let buyer_price = Money::from_cents(6500);
        let order = Order::new(
            OrderId::new(),
            buyer,
            "Jane Buyer",
            address("Jane Buyer"),
            Some("pi_test".into()),
            now,
        );
        let mut listing = Listing::new(
            ListingId::new(),
            "Winter bundle",
            seller,
            address("Sam Seller"),
            buyer_price,
            Money::from_cents(5200),
            32.0,
            None,
        );
        listing.mark_sold();

        let mut item = LineItem::new(id, order.id(), listing.id(), now);
        let guards = TransitionGuards::default();
        if status == LineItemStatus::LabelPending {
            item.apply(&LineItemCommand::ConfirmToShip, &guards, now).unwrap();
            item.apply(&LineItemCommand::WaitToPrintLabel, &guards, now).unwrap();
        }

        self.store
            .commit(
                UnitOfWork::new()
                    .with_order(order)
                    .with_listing(listing)
                    .with_line_item(item),
            )
            .await
            .unwrap();
        Sale {
            item: id,
            seller,
            buyer,
            buyer_price,
        }
    }

    async fn status(&self, id: LineItemId) -> LineItemStatus {
        self.store.get_line_item(id).await.unwrap().unwrap().status()
    }

    async fn carrier_shipment(&self, id: LineItemId) -> CarrierShipment {
        let shipment = self.store.shipment_for_line_item(id).await.unwrap().unwrap();
        self.carrier.shipment(shipment.carrier_shipment_id()).unwrap()
    }

    /// Confirms and batches a sale until its label is printed.
    async fn labeled_sale(&self) -> Sale {
        let sale = self.sale().await;
        self.line_items
            .confirm_to_ship(sale.item, sale.seller)
            .await
            .unwrap();
        let report = self.pipeline.run().await.unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(self.status(sale.item).await, LineItemStatus::LabelPrinted);
        sale
    }

    async fn tracker_event(&self, tracker: &CarrierTracker) -> EventOutcome {
        let payload = json!({
            "description": "tracker.updated",
            "result": tracker,
        });
        self.reconciler
            .handle_payload(payload.to_string().as_bytes())
            .await
            .unwrap()
    }
}

fn fast_config() -> FulfillmentConfig {
    FulfillmentConfig {
        settle: SettlePolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        },
        ..FulfillmentConfig::default()
    }
}

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

fn reference(id: LineItemId) -> String {
    CarrierReference::LineItem(id).to_string()
}

fn batch_updated(previous: &str, shipments: serde_json::Value) -> Vec<u8> {
    json!({
        "description": "batch.updated",
        "previous_attributes": { "state": previous },
        "result": { "id": "batch_hook", "state": "purchased", "shipments": shipments },
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_happy_path_from_confirmation_to_receipt() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;

    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(shipment.status(), ShipmentStatus::LabelGenerated);
    assert!(shipment.label_url().is_some());
    assert_eq!(h.notifier.sold_count(), 1);
    let item = h.store.get_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(item.carrier_shipment_id(), Some(shipment.carrier_shipment_id()));
    assert!(item.carrier_batch_id().is_some());

    let tracker = h
        .carrier
        .set_tracker_status(shipment.carrier_shipment_id(), "in_transit")
        .unwrap();
    h.tracker_event(&tracker).await;
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);

    let tracker = h
        .carrier
        .set_tracker_status(shipment.carrier_shipment_id(), "delivered")
        .unwrap();
    h.tracker_event(&tracker).await;
    let shipment = h.store.get_shipment(shipment.id()).await.unwrap().unwrap();
    assert_eq!(shipment.status(), ShipmentStatus::Received);
    let listing = h
        .store
        .get_listing(item.listing_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listing.status(), ListingStatus::Shipped);

    // Delivery alone does not complete the item; the buyer confirms it
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);
    let check = h
        .line_items
        .check_receivable(sale.item, sale.buyer)
        .await
        .unwrap();
    assert!(check.receivable, "{:?}", check.blockers);
    let received = h.line_items.receive(sale.item, sale.buyer).await.unwrap();
    assert_eq!(received.status(), LineItemStatus::Received);

    let history = h.line_items.history(sale.item, sale.seller).await.unwrap();
    let actions: Vec<&str> = history.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(
        actions,
        [
            "confirm_to_ship",
            "wait_to_print_label",
            "label_printed",
            "intransition",
            "receive"
        ]
    );
}

#[tokio::test]
async fn test_label_failure_then_confirm_again() {
    let h = TestHarness::new();
    let sale = h.sale().await;
    h.carrier.fail_purchase_for(reference(sale.item));
    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();

    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.failed, vec![(sale.item, PURCHASE_FAILED.to_string())]);
    let item = h.store.get_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelFailure);
    assert_eq!(item.failure_reason(), Some(PURCHASE_FAILED));
    assert_eq!(h.notifier.sold_count(), 0);

    let item = h
        .line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();
    assert_eq!(item.status(), LineItemStatus::ReadyToShip);
    assert_eq!(item.failure_reason(), None);
    let ready = h
        .store
        .line_items_with_status(&[LineItemStatus::ReadyToShip])
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_items() {
    let h = TestHarness::new();
    let good = h.sale().await;
    let bad = h.sale().await;
    for sale in [&good, &bad] {
        h.line_items
            .confirm_to_ship(sale.item, sale.seller)
            .await
            .unwrap();
    }
    h.carrier.fail_purchase_for(reference(bad.item));

    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.shipment_ids.len(), 1);
    assert_eq!(report.failed, vec![(bad.item, PURCHASE_FAILED.to_string())]);
    let batch = h.carrier.batch(report.batch_id.as_deref().unwrap()).unwrap();
    assert_eq!(batch.shipments.len(), 2);

    assert_eq!(h.status(good.item).await, LineItemStatus::LabelPrinted);
    assert_eq!(h.status(bad.item).await, LineItemStatus::LabelFailure);
}

#[tokio::test]
async fn test_item_missing_from_batch_fails() {
    let h = TestHarness::new();
    let kept = h.sale().await;
    let dropped = h.sale().await;
    for sale in [&kept, &dropped] {
        h.line_items
            .confirm_to_ship(sale.item, sale.seller)
            .await
            .unwrap();
    }
    h.carrier.omit_from_batch(reference(dropped.item));

    let report = h.pipeline.run().await.unwrap();
    assert_eq!(
        report.failed,
        vec![(dropped.item, MISSING_FROM_BATCH.to_string())]
    );
    assert_eq!(h.status(kept.item).await, LineItemStatus::LabelPrinted);
    assert_eq!(h.status(dropped.item).await, LineItemStatus::LabelFailure);
}

#[tokio::test]
async fn test_delivered_tracker_marks_listing_shipped_only() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();

    let tracker = h
        .carrier
        .set_tracker_status(shipment.carrier_shipment_id(), "delivered")
        .unwrap();
    h.tracker_event(&tracker).await;

    let shipment = h.store.get_shipment(shipment.id()).await.unwrap().unwrap();
    assert_eq!(shipment.status(), ShipmentStatus::Received);
    let item = h.store.get_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelPrinted);
    let listing = h
        .store
        .get_listing(item.listing_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listing.status(), ListingStatus::Shipped);
}

#[tokio::test]
async fn test_settlement_timeout_fails_items_and_buys_once() {
    let h = TestHarness::new();
    h.carrier.set_settle_after_polls(2);
    h.carrier.set_never_settle(true);
    let sale = h.sale().await;
    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();

    let report = h.pipeline.run().await.unwrap();
    let batch_id = report.batch_id.clone().unwrap();
    assert_eq!(h.carrier.buy_batch_calls(&batch_id), 1);
    assert_eq!(
        report.failed,
        vec![(sale.item, SETTLEMENT_TIMEOUT.to_string())]
    );
    let item = h.store.get_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelFailure);
    assert_eq!(item.carrier_batch_id(), Some(batch_id.as_str()));
}

/// Lets a batch the pipeline gave up on finish its purchase, and returns the
/// `batch.updated` event the carrier would send for it.
async fn settle_late(h: &TestHarness, batch_id: &str, item: LineItemId) -> Vec<u8> {
    h.carrier.set_never_settle(false);
    let batch = h.carrier.retrieve_batch(batch_id).await.unwrap();
    let entry = batch
        .shipments
        .iter()
        .find(|s| s.reference.as_deref() == Some(reference(item).as_str()))
        .unwrap();
    batch_updated(
        "created",
        json!([{ "id": entry.id, "reference": reference(item), "batch_status": "postage_purchased" }]),
    )
}

#[tokio::test]
async fn test_late_purchase_after_reconfirm_prints_label() {
    let h = TestHarness::new();
    h.carrier.set_never_settle(true);
    let sale = h.sale().await;
    let report = h.pipeline.run().await.unwrap();
    let batch_id = report.batch_id.unwrap();
    assert_eq!(h.status(sale.item).await, LineItemStatus::LabelFailure);

    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();
    assert_eq!(h.status(sale.item).await, LineItemStatus::ReadyToShip);

    let payload = settle_late(&h, &batch_id, sale.item).await;
    let outcome = h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(outcome, EventOutcome::Applied { changed: 1 });
    assert_eq!(h.status(sale.item).await, LineItemStatus::LabelPrinted);
    assert_eq!(h.notifier.sold_count(), 1);

    // Nothing left to buy
    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.submitted, 0);
    assert_eq!(h.carrier.batch_count(), 1);
    assert_eq!(h.carrier.refund_count(), 0);

    let history = h.line_items.history(sale.item, sale.seller).await.unwrap();
    assert_eq!(history.last().unwrap().action, "print_label");
}

#[tokio::test]
async fn test_late_purchase_before_reconfirm_is_reused_by_next_run() {
    let h = TestHarness::new();
    h.carrier.set_never_settle(true);
    let sale = h.sale().await;
    let report = h.pipeline.run().await.unwrap();
    let batch_id = report.batch_id.unwrap();

    // The label lands while the item still shows the timeout failure
    let payload = settle_late(&h, &batch_id, sale.item).await;
    let outcome = h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(outcome, EventOutcome::Applied { changed: 0 });
    assert_eq!(h.status(sale.item).await, LineItemStatus::LabelFailure);
    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert!(shipment.label_url().is_some());

    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();
    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.reused, vec![sale.item]);
    assert_eq!(report.submitted, 0);
    assert!(report.batch_id.is_none());
    assert_eq!(h.carrier.batch_count(), 1);
    assert_eq!(h.status(sale.item).await, LineItemStatus::LabelPrinted);
    assert_eq!(h.notifier.sold_count(), 1);

    let still = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(still.id(), shipment.id());
}

#[tokio::test]
async fn test_batch_run_is_exclusive() {
    let h = TestHarness::new();
    let sale = h.sale().await;
    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();
    h.store
        .try_acquire_lease(BATCH_LEASE, "other-process", chrono::Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();

    let err = h.pipeline.run().await.unwrap_err();
    assert!(matches!(err, FulfillmentError::LeaseHeld(BATCH_LEASE)));
    assert_eq!(h.carrier.batch_count(), 0);
    assert_eq!(h.status(sale.item).await, LineItemStatus::ReadyToShip);
}

#[tokio::test]
async fn test_second_run_has_nothing_to_submit() {
    let h = TestHarness::new();
    h.sale().await;

    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.submitted, 1);
    assert_eq!(h.carrier.batch_count(), 1);

    // The item is now labeled; nothing is left to submit
    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.submitted, 0);
    assert!(report.batch_id.is_none());
    assert_eq!(h.carrier.batch_count(), 1);
}

#[tokio::test]
async fn test_batch_webhook_replay_is_idempotent() {
    let h = TestHarness::new();
    let sale = h
        .sale_with_id(LineItemId::new(), LineItemStatus::LabelPending)
        .await;
    let remote = h.carrier.purchased_shipment(&reference(sale.item));
    let payload = batch_updated(
        "created",
        json!([{
            "id": remote.id,
            "reference": reference(sale.item),
            "batch_status": "postage_purchased",
        }]),
    );

    let first = h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(first, EventOutcome::Applied { changed: 1 });
    let history_after_first = h.store.history_len().await;

    let second = h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(second, EventOutcome::Applied { changed: 0 });

    assert_eq!(h.status(sale.item).await, LineItemStatus::LabelPrinted);
    assert_eq!(h.store.shipment_count().await, 1);
    assert_eq!(h.store.history_len().await, history_after_first);
    assert_eq!(h.notifier.sold_count(), 1);
}

#[tokio::test]
async fn test_webhook_does_not_step_on_advanced_item() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let remote = h.carrier_shipment(sale.item).await;
    h.carrier.set_tracker_status(&remote.id, "in_transit");
    let tracker = h.carrier_shipment(sale.item).await.tracker.unwrap();
    h.tracker_event(&tracker).await;

    let payload = batch_updated(
        "created",
        json!([{
            "id": remote.id,
            "reference": reference(sale.item),
            "batch_status": "postage_purchased_failed",
        }]),
    );
    h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);
}

#[tokio::test]
async fn test_out_of_order_tracker_is_dropped() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let remote = h.carrier_shipment(sale.item).await;
    let stale = remote.tracker.clone().unwrap();

    let fresh = h.carrier.set_tracker_status(&remote.id, "in_transit").unwrap();
    h.tracker_event(&fresh).await;

    // Redelivery of the older pre-transit event
    let outcome = h.tracker_event(&stale).await;
    assert_eq!(outcome, EventOutcome::Applied { changed: 0 });

    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    let tracker = h.store.tracker_for_shipment(shipment.id()).await.unwrap().unwrap();
    assert_eq!(tracker.status(), "in_transit");
    assert_eq!(tracker.updated_at(), fresh.updated_at);
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);
}

#[tokio::test]
async fn test_unknown_reference_is_ignored() {
    let h = TestHarness::new();
    let payload = batch_updated(
        "created",
        json!([{ "id": "shp_foreign", "reference": "NOT_OURS", "batch_status": "postage_purchased" }]),
    );
    let outcome = h.reconciler.handle_payload(&payload).await.unwrap();
    assert_eq!(outcome, EventOutcome::Applied { changed: 0 });
    assert_eq!(h.store.shipment_count().await, 0);
}

#[tokio::test]
async fn test_orphan_shipment_attached_by_polling() {
    let h = TestHarness::new();
    let id = LineItemId::new();
    let remote = h.carrier.purchased_shipment(&reference(id));
    let payload = batch_updated(
        "created",
        json!([{ "id": remote.id, "reference": reference(id), "batch_status": "postage_purchased" }]),
    );

    // The webhook arrives before the line item is known
    h.reconciler.handle_payload(&payload).await.unwrap();
    let orphan = h.store.shipment_by_carrier_id(&remote.id).await.unwrap().unwrap();
    assert_eq!(orphan.line_item_id(), None);

    h.sale_with_id(id, LineItemStatus::LabelPending).await;
    let report = h.reconciler.poll().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.attached, 1);
    assert_eq!(report.errors, 0);

    let shipment = h.store.shipment_for_line_item(id).await.unwrap().unwrap();
    assert_eq!(shipment.id(), orphan.id());
    assert_eq!(h.status(id).await, LineItemStatus::LabelPrinted);

    let again = h.reconciler.poll().await.unwrap();
    assert_eq!(again.attached, 0);
    assert_eq!(again.changed, 0);
}

#[tokio::test]
async fn test_polling_picks_up_missed_tracker_updates() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let remote = h.carrier_shipment(sale.item).await;
    h.carrier.set_tracker_status(&remote.id, "out_for_delivery");

    let report = h.reconciler.poll().await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);
    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(shipment.status(), ShipmentStatus::InTransit);
}

#[tokio::test]
async fn test_cancellation_with_refund() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let now = Utc::now();
    let pickup = h
        .cancellation
        .create_pickup(
            sale.item,
            sale.seller,
            now + chrono::Duration::hours(2),
            now + chrono::Duration::hours(6),
            Some("Side door".into()),
        )
        .await
        .unwrap();

    let report = h
        .cancellation
        .cancel(sale.item, sale.buyer, "buyer request")
        .await
        .unwrap();
    assert_eq!(report.line_item.status(), LineItemStatus::Canceled);
    assert_eq!(report.line_item.cancel_reason(), Some("buyer request"));
    assert!(report.is_complete(), "{:?}", report.steps);
    for step in [
        CompensationStep::CancelPickup,
        CompensationStep::CarrierRefund,
        CompensationStep::PaymentRefund,
        CompensationStep::NotifyBuyer,
    ] {
        assert_eq!(report.outcome(step), Some(&StepOutcome::Completed), "{step}");
    }

    let remote = h.carrier_shipment(sale.item).await;
    assert!(h.carrier.has_refund(&remote.id));
    let carrier_pickup = h.carrier.pickup(pickup.carrier_pickup_id()).unwrap();
    assert_eq!(carrier_pickup.status, "canceled");
    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert!(h.store.pickup_for_shipment(shipment.id()).await.unwrap().is_none());
    assert_eq!(h.payment.refunded_amount("pi_test"), sale.buyer_price);
    assert_eq!(h.notifier.canceled_count(), 1);
}

#[tokio::test]
async fn test_label_not_refunded_within_grace_period() {
    let h = TestHarness::with_config(fast_config());
    let sale = h.labeled_sale().await;

    let report = h
        .cancellation
        .cancel(sale.item, sale.seller, "out of stock")
        .await
        .unwrap();
    assert!(matches!(
        report.outcome(CompensationStep::CarrierRefund),
        Some(StepOutcome::Skipped(_))
    ));
    assert_eq!(h.carrier.refund_count(), 0);
    assert_eq!(h.payment.refund_count(), 1);
    assert_eq!(h.notifier.canceled_count(), 1);
}

#[tokio::test]
async fn test_cancel_before_label_skips_carrier() {
    let h = TestHarness::new();
    let sale = h.sale().await;

    let report = h
        .cancellation
        .cancel(sale.item, sale.seller, "changed my mind")
        .await
        .unwrap();
    assert_eq!(report.line_item.status(), LineItemStatus::Canceled);
    assert!(matches!(
        report.outcome(CompensationStep::CarrierRefund),
        Some(StepOutcome::Skipped(_))
    ));
    assert_eq!(h.payment.refund_count(), 1);
}

#[tokio::test]
async fn test_cancel_rejected_once_in_transit() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    let remote = h.carrier_shipment(sale.item).await;
    let tracker = h.carrier.set_tracker_status(&remote.id, "in_transit").unwrap();
    h.tracker_event(&tracker).await;

    let err = h
        .cancellation
        .cancel(sale.item, sale.buyer, "too slow")
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Guard(_)));
    assert_eq!(h.status(sale.item).await, LineItemStatus::InTransit);
    assert_eq!(h.payment.refund_count(), 0);
}

#[tokio::test]
async fn test_cancel_requires_a_party() {
    let h = TestHarness::new();
    let sale = h.sale().await;
    let err = h
        .cancellation
        .cancel(sale.item, UserId::new(), "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::NotPermitted(_)));
    assert_eq!(h.status(sale.item).await, LineItemStatus::Active);
}

#[tokio::test]
async fn test_failed_compensation_is_retried() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;
    h.payment.set_fail_on_refund(true);
    h.carrier.set_fail_on_refund(true);

    let report = h
        .cancellation
        .cancel(sale.item, sale.buyer, "buyer request")
        .await
        .unwrap();
    assert_eq!(report.line_item.status(), LineItemStatus::Canceled);
    assert!(!report.is_complete());
    assert_eq!(h.notifier.canceled_count(), 1);
    assert_eq!(h.store.pending_compensations().await.unwrap().len(), 2);

    // Still failing: attempts are counted, nothing resolved
    h.carrier.set_fail_on_refund(false);
    assert_eq!(h.cancellation.retry_pending_compensations().await.unwrap(), 1);
    let pending = h.store.pending_compensations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].step(), CompensationStep::PaymentRefund);
    assert_eq!(pending[0].attempts(), 2);

    h.payment.set_fail_on_refund(false);
    assert_eq!(h.cancellation.retry_pending_compensations().await.unwrap(), 1);
    assert!(h.store.pending_compensations().await.unwrap().is_empty());
    assert_eq!(h.payment.refund_count(), 1);
    assert_eq!(h.carrier.refund_count(), 1);
    assert_eq!(h.status(sale.item).await, LineItemStatus::Canceled);
}

#[tokio::test]
async fn test_pickup_lifecycle() {
    let h = TestHarness::new();
    h.carrier.set_pickups_need_buy(true);
    let sale = h.sale().await;
    let now = Utc::now();
    let (min, max) = (now + chrono::Duration::hours(1), now + chrono::Duration::hours(4));

    let err = h
        .cancellation
        .create_pickup(sale.item, sale.seller, min, max, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Rejected(msg) if msg == PICKUP_NEEDS_SHIPMENT));

    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();
    h.pipeline.run().await.unwrap();

    let err = h
        .cancellation
        .create_pickup(sale.item, sale.buyer, min, max, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::NotPermitted(_)));

    let err = h
        .cancellation
        .create_pickup(sale.item, sale.seller, max, min, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Guard(_)));

    let pickup = h
        .cancellation
        .create_pickup(sale.item, sale.seller, min, max, None)
        .await
        .unwrap();
    assert_eq!(pickup.status(), PickupStatus::Scheduled);
    assert!(pickup.reference().starts_with("SHIPMENT__"));

    let err = h
        .cancellation
        .create_pickup(sale.item, sale.seller, min, max, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Rejected(msg) if msg == PICKUP_ALREADY_SCHEDULED));

    h.cancellation
        .cancel_pickup(sale.item, sale.seller)
        .await
        .unwrap();
    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert!(h.store.pickup_for_shipment(shipment.id()).await.unwrap().is_none());
    assert!(h.cancellation.cancel_pickup(sale.item, sale.seller).await.is_err());
}

#[tokio::test]
async fn test_single_label_purchase() {
    let h = TestHarness::new();
    let sale = h.sale().await;
    h.line_items
        .confirm_to_ship(sale.item, sale.seller)
        .await
        .unwrap();

    let item = h
        .pipeline
        .purchase_label_individually(sale.item)
        .await
        .unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelPrinted);
    assert_eq!(h.carrier.batch_count(), 0);
    assert_eq!(h.notifier.sold_count(), 1);

    let shipment = h.store.shipment_for_line_item(sale.item).await.unwrap().unwrap();
    assert_eq!(shipment.reference(), Some(reference(sale.item).as_str()));
}

#[tokio::test]
async fn test_single_label_failure_is_recorded() {
    let h = TestHarness::new();
    let sale = h.sale().await;
    h.carrier.fail_purchase_for(reference(sale.item));

    let item = h
        .pipeline
        .purchase_label_individually(sale.item)
        .await
        .unwrap();
    assert_eq!(item.status(), LineItemStatus::LabelFailure);
    assert!(item.failure_reason().is_some());
}

#[tokio::test]
async fn test_return_after_label() {
    let h = TestHarness::new();
    let sale = h.labeled_sale().await;

    let err = h
        .line_items
        .start_return(sale.item, sale.seller)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::NotPermitted(_)));

    let item = h
        .line_items
        .start_return(sale.item, sale.buyer)
        .await
        .unwrap();
    assert_eq!(item.status(), LineItemStatus::InReturn);
}
