//! Property-based tests for the pure parts of the inventory core: delta
//! planning, allocation and unit conversion.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use stateset_inventory_core::{
    entities::{item_master, uom_conversion},
    services::allocation::{allocate, order_candidates, AllocationStrategy, SupplyCandidate},
    services::inventory_transactions::plan_deltas,
    services::uom::{from_base, to_base, UomGraph, ROUND_TRIP_TOLERANCE},
    AdjustDirection, ServiceError, TenantInventoryPolicy, TxnKind,
};
use uuid::Uuid;

fn qty_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn kind_strategy() -> impl Strategy<Value = TxnKind> {
    let a = Uuid::from_u128(1);
    let b = Uuid::from_u128(2);
    let direction = prop_oneof![
        Just(AdjustDirection::Increase),
        Just(AdjustDirection::Decrease {
            reason_code_id: Uuid::from_u128(99)
        }),
    ];
    prop_oneof![
        Just(TxnKind::Receipt { to: a }),
        Just(TxnKind::Issue { from: a }),
        Just(TxnKind::Move { from: a, to: b }),
        Just(TxnKind::Transfer { from: b, to: a }),
        direction.clone().prop_map(move |direction| TxnKind::Adjust { location: a, direction }),
        direction.prop_map(move |direction| TxnKind::Count { location: b, direction }),
    ]
}

fn candidate_strategy() -> impl Strategy<Value = SupplyCandidate> {
    (
        0i64..50_000,
        any::<bool>(),
        proptest::option::of(0i64..365),
        proptest::option::of(0i64..365),
    )
        .prop_map(|(cents, lotted, received_day, expiry_day)| {
            let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let base_date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
            SupplyCandidate {
                lot_id: lotted.then(Uuid::new_v4),
                lot_number: lotted.then(|| "LOT".to_string()),
                location_id: Uuid::new_v4(),
                available: Decimal::new(cents, 2),
                received_at: received_day.map(|day| epoch + Duration::days(day)),
                expiration_date: expiry_day.map(|day| base_date + Duration::days(day)),
            }
        })
}

fn item(base_uom: &str) -> item_master::Model {
    let now = Utc::now();
    item_master::Model {
        id: Uuid::from_u128(7),
        tenant_id: Uuid::from_u128(8),
        sku: "PROP".into(),
        description: None,
        base_uom: base_uom.into(),
        lot_tracked: false,
        serial_tracked: false,
        created_at: now,
        updated_at: now,
    }
}

fn conversion(item_id: Uuid, from: &str, to: &str, factor: Decimal) -> uom_conversion::Model {
    uom_conversion::Model {
        id: Uuid::new_v4(),
        tenant_id: Uuid::from_u128(8),
        item_id: Some(item_id),
        from_uom: from.into(),
        to_uom: to.into(),
        factor,
        created_at: Utc::now(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn deltas_are_conserved_per_event_type(kind in kind_strategy(), qty in qty_strategy()) {
        let deltas = kind.deltas(qty);
        let net: Decimal = deltas.iter().map(|(_, delta)| *delta).sum();
        prop_assert!(deltas.iter().all(|(_, delta)| delta.abs() == qty));
        match kind {
            TxnKind::Move { .. } | TxnKind::Transfer { .. } => {
                prop_assert_eq!(deltas.len(), 2);
                prop_assert_eq!(net, Decimal::ZERO);
            }
            TxnKind::Receipt { .. } => prop_assert_eq!(net, qty),
            TxnKind::Issue { .. } => prop_assert_eq!(net, -qty),
            TxnKind::Adjust { direction, .. } | TxnKind::Count { direction, .. } => {
                let expected = match direction {
                    AdjustDirection::Increase => qty,
                    AdjustDirection::Decrease { .. } => -qty,
                };
                prop_assert_eq!(net, expected);
            }
        }
    }

    #[test]
    fn planned_balances_follow_the_policy(
        kind in kind_strategy(),
        qty in qty_strategy(),
        on_hand_a in qty_strategy(),
        on_hand_b in qty_strategy(),
    ) {
        let current: HashMap<Uuid, Decimal> =
            [(Uuid::from_u128(1), on_hand_a), (Uuid::from_u128(2), on_hand_b)].into_iter().collect();

        let relaxed = plan_deltas(&kind, qty, &current, TenantInventoryPolicy::allowing_negative()).unwrap();
        for planned in &relaxed {
            prop_assert_eq!(planned.new_qty, planned.current + planned.delta);
        }

        let would_go_negative = relaxed
            .iter()
            .any(|planned| planned.delta < Decimal::ZERO && planned.new_qty < Decimal::ZERO);
        match plan_deltas(&kind, qty, &current, TenantInventoryPolicy::strict()) {
            Ok(strict) => {
                prop_assert!(!would_go_negative);
                prop_assert_eq!(strict, relaxed);
            }
            Err(err) => {
                prop_assert!(would_go_negative);
                let is_insufficient = matches!(err, ServiceError::InsufficientBalance { .. });
                prop_assert!(is_insufficient);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn allocation_covers_demand_exactly_or_reports_the_shortfall(
        candidates in proptest::collection::vec(candidate_strategy(), 0..12),
        demand in qty_strategy(),
        strategy in prop_oneof![
            Just(AllocationStrategy::Fifo),
            Just(AllocationStrategy::Lifo),
            Just(AllocationStrategy::Fefo),
        ],
    ) {
        let total: Decimal = candidates
            .iter()
            .map(|candidate| candidate.available)
            .filter(|available| *available > Decimal::ZERO)
            .sum();
        let by_source: HashMap<(Uuid, Option<Uuid>), Decimal> = candidates
            .iter()
            .map(|candidate| ((candidate.location_id, candidate.lot_id), candidate.available))
            .collect();

        match allocate(Uuid::from_u128(7), candidates, demand, strategy, false, false) {
            Ok(lines) => {
                prop_assert!(demand <= total);
                let sum: Decimal = lines.iter().map(|line| line.quantity).sum();
                prop_assert_eq!(sum, demand);
                for line in &lines {
                    prop_assert!(line.quantity > Decimal::ZERO);
                    prop_assert!(line.quantity <= by_source[&(line.location_id, line.lot_id)]);
                }
            }
            Err(ServiceError::InsufficientSupply { requested, available, partial, .. }) => {
                prop_assert!(demand > total);
                prop_assert_eq!(requested, demand);
                prop_assert_eq!(available, total);
                let sum: Decimal = partial.iter().map(|line| line.quantity).sum();
                prop_assert_eq!(sum, total);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn fefo_orders_by_expiry_with_undated_lots_last(
        mut candidates in proptest::collection::vec(candidate_strategy(), 0..16),
    ) {
        order_candidates(&mut candidates, AllocationStrategy::Fefo);
        for pair in candidates.windows(2) {
            match (pair[0].expiration_date, pair[1].expiration_date) {
                (Some(a), Some(b)) => prop_assert!(a <= b),
                (None, Some(_)) => prop_assert!(false, "undated candidate sorted before a dated one"),
                _ => {}
            }
        }
    }

    #[test]
    fn unit_conversion_round_trips(
        factor in 1i64..1_000,
        qty in (1i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2)),
    ) {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[conversion(item.id, "BOX", "EA", Decimal::from(factor))],
        );

        let base = to_base(&item, &graph, qty, "box").unwrap();
        prop_assert_eq!(base, qty * Decimal::from(factor));
        let back = from_base(&item, &graph, base, "BOX").unwrap();
        prop_assert!((back - qty).abs() <= ROUND_TRIP_TOLERANCE);
    }
}
