mod common;

use assert_matches::assert_matches;
use common::TestHarness;
use rust_decimal_macros::dec;
use stateset_inventory_core::{
    entities::cycle_count::CycleCountStatus,
    entities::cycle_count_line::CycleCountLineStatus,
    entities::inventory_event::InventoryEventType,
    events::Event,
    services::cycle_counts::{CountLineSpec, CYCLE_COUNT_REFERENCE},
    services::ledger::EventFilter,
    ServiceError, TenantInventoryPolicy,
};

#[tokio::test]
async fn start_snapshots_expected_quantities() {
    let h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    let b = h.location("B").await;
    h.receive(&item, a.id, dec!(10)).await;

    let detail = h
        .services
        .cycle_counts
        .start_count(
            &h.actor,
            h.site_id,
            &[
                CountLineSpec { item_id: item.id, location_id: a.id },
                CountLineSpec { item_id: item.id, location_id: b.id },
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(detail.count.status, CycleCountStatus::InProgress);
    let expected: Vec<_> = detail.lines.iter().map(|line| line.expected_qty_base).collect();
    assert!(expected.contains(&dec!(10)));
    assert!(expected.contains(&dec!(0)));
    assert!(detail
        .lines
        .iter()
        .all(|line| line.status == CycleCountLineStatus::Pending));
}

#[tokio::test]
async fn duplicate_lines_and_foreign_locations_are_rejected() {
    let h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    let remote = h.location_in(h.other_site_id, "R").await;
    let spec = CountLineSpec { item_id: item.id, location_id: a.id };

    let err = h
        .services
        .cycle_counts
        .start_count(&h.actor, h.site_id, &[spec, spec], None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = h
        .services
        .cycle_counts
        .start_count(
            &h.actor,
            h.site_id,
            &[CountLineSpec { item_id: item.id, location_id: remote.id }],
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn a_counted_line_cannot_be_recounted() {
    let h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    h.receive(&item, a.id, dec!(10)).await;
    let detail = h
        .services
        .cycle_counts
        .start_count(&h.actor, h.site_id, &[CountLineSpec { item_id: item.id, location_id: a.id }], None)
        .await
        .unwrap();
    let line = &detail.lines[0];

    let counted = h
        .services
        .cycle_counts
        .record_count(&h.actor, detail.count.id, line.id, dec!(8), "EA")
        .await
        .unwrap();
    assert_eq!(counted.variance_qty_base, Some(dec!(-2)));
    assert_eq!(counted.counted_by_user_id, Some(h.actor.user_id));

    let err = h
        .services
        .cycle_counts
        .record_count(&h.actor, detail.count.id, line.id, dec!(9), "EA")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn completion_posts_variances_as_count_events() {
    let mut h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    let b = h.location("B").await;
    let c = h.location("C").await;
    h.receive(&item, a.id, dec!(10)).await;
    h.receive(&item, b.id, dec!(4)).await;
    h.receive(&item, c.id, dec!(6)).await;

    let counts = h.services.cycle_counts.clone();
    let detail = counts
        .start_count(
            &h.actor,
            h.site_id,
            &[
                CountLineSpec { item_id: item.id, location_id: a.id },
                CountLineSpec { item_id: item.id, location_id: b.id },
                CountLineSpec { item_id: item.id, location_id: c.id },
            ],
            Some("quarterly".into()),
        )
        .await
        .unwrap();
    for line in &detail.lines {
        let counted = if line.location_id == a.id {
            dec!(7)
        } else if line.location_id == b.id {
            dec!(5)
        } else {
            dec!(6)
        };
        counts
            .record_count(&h.actor, detail.count.id, line.id, counted, "EA")
            .await
            .unwrap();
    }

    let err = counts
        .complete_count(&h.actor, TenantInventoryPolicy::strict(), detail.count.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::MissingReasonCode(_));

    let reason = h.reason("COUNT_LOSS").await;
    h.drain_events();
    let report = counts
        .complete_count(&h.actor, TenantInventoryPolicy::strict(), detail.count.id, Some(reason.id))
        .await
        .unwrap();

    assert_eq!(report.count.status, CycleCountStatus::Completed);
    assert_eq!(report.posted.lines.len(), 2);
    assert!(report.posted.all_succeeded());
    assert_eq!(h.balance(item.id, a.id).await, dec!(7));
    assert_eq!(h.balance(item.id, b.id).await, dec!(5));
    assert_eq!(h.balance(item.id, c.id).await, dec!(6));

    let filter = EventFilter {
        event_type: Some(InventoryEventType::Count),
        reference_id: Some(detail.count.id.to_string()),
        ..Default::default()
    };
    let page = h
        .services
        .ledger
        .list_events(h.tenant_id, &filter, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    for event in &page.events {
        assert_eq!(event.reference_type.as_deref(), Some(CYCLE_COUNT_REFERENCE));
        if event.from_location_id == Some(a.id) {
            assert_eq!(event.qty_base, dec!(3));
            assert_eq!(event.reason_code_id, Some(reason.id));
        } else {
            assert_eq!(event.to_location_id, Some(b.id));
            assert_eq!(event.qty_base, dec!(1));
        }
    }

    let refreshed = counts.get_count(&h.actor, detail.count.id).await.unwrap();
    assert!(refreshed
        .lines
        .iter()
        .filter(|line| line.location_id != c.id)
        .all(|line| line.posted_event_id.is_some()));
    assert!(h.drain_events().iter().any(|event| matches!(
        event,
        Event::CycleCountCompleted { posted_event_ids, .. } if posted_event_ids.len() == 2
    )));

    let err = counts
        .complete_count(&h.actor, TenantInventoryPolicy::strict(), detail.count.id, Some(reason.id))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn completion_requires_every_line_counted() {
    let h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    let detail = h
        .services
        .cycle_counts
        .start_count(&h.actor, h.site_id, &[CountLineSpec { item_id: item.id, location_id: a.id }], None)
        .await
        .unwrap();

    let err = h
        .services
        .cycle_counts
        .complete_count(&h.actor, TenantInventoryPolicy::strict(), detail.count.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn an_unposted_count_can_be_cancelled() {
    let h = TestHarness::new().await;
    let item = h.item("WIDGET", "EA").await;
    let a = h.location("A").await;
    let detail = h
        .services
        .cycle_counts
        .start_count(&h.actor, h.site_id, &[CountLineSpec { item_id: item.id, location_id: a.id }], None)
        .await
        .unwrap();

    let cancelled = h
        .services
        .cycle_counts
        .cancel_count(&h.actor, detail.count.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, CycleCountStatus::Cancelled);

    let err = h
        .services
        .cycle_counts
        .record_count(&h.actor, detail.count.id, detail.lines[0].id, dec!(1), "EA")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn lot_tracked_items_are_not_counted_by_location() {
    let h = TestHarness::new().await;
    let item = h.tracked_item("FLOUR", "KG", true, false).await;
    let a = h.location("A").await;

    let err = h
        .services
        .cycle_counts
        .start_count(&h.actor, h.site_id, &[CountLineSpec { item_id: item.id, location_id: a.id }], None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
