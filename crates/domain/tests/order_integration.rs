//! Integration tests for the order lifecycle and the events it produces.

use domain::{
    Money, Order, OrderItem, OrderPlaced, OrderResult, OrderStatus, Product, REASON_OUT_OF_STOCK,
    ResultStatus, UserId,
};

fn catalog() -> Vec<Product> {
    vec![
        Product::new("SKU-001", "Widget", Money::from_cents(1000), 10),
        Product::new("SKU-002", "Gadget", Money::from_cents(2500), 1),
    ]
}

fn place(quantities: &[(&str, u32)]) -> Order {
    let products = catalog();
    let total = quantities
        .iter()
        .map(|(sku, qty)| {
            products
                .iter()
                .find(|p| p.id.as_str() == *sku)
                .unwrap()
                .price
                .multiply(*qty)
        })
        .sum();
    let items = quantities
        .iter()
        .map(|(sku, qty)| OrderItem::new(*sku, *qty))
        .collect();
    Order::place(UserId::new(), items, total).unwrap()
}

#[test]
fn placed_order_snapshot_survives_the_wire() {
    let order = place(&[("SKU-001", 2), ("SKU-002", 1)]);
    assert_eq!(order.total.cents(), 4500);

    let body = serde_json::to_vec(&OrderPlaced::from_order(&order)).unwrap();
    let received: OrderPlaced = serde_json::from_slice(&body).unwrap();

    assert_eq!(received.order_id, order.id);
    assert_eq!(received.items.len(), 2);
    assert_eq!(received.items[0].product_id.as_str(), "SKU-001");
}

#[test]
fn confirmed_lifecycle_produces_confirmed_result() {
    let order = place(&[("SKU-001", 2)]);
    let pending = order.try_into_pending().unwrap();
    let result = OrderResult::confirmed(pending.id(), pending.user_id());
    let order = pending.confirm();

    assert_eq!(order.status(), OrderStatus::from(result.status));
    assert_eq!(result.reason, None);
}

#[test]
fn cancelled_lifecycle_produces_out_of_stock_result() {
    let order = place(&[("SKU-002", 3)]);
    let pending = order.try_into_pending().unwrap();
    let result = OrderResult::cancelled(pending.id(), pending.user_id(), REASON_OUT_OF_STOCK);
    let order = pending.cancel();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(result.status, ResultStatus::Cancelled);
    assert_eq!(result.reason.as_deref(), Some("out_of_stock"));
}

#[test]
fn terminal_orders_never_transition_again() {
    for order in [
        place(&[("SKU-001", 1)]).try_into_pending().unwrap().confirm(),
        place(&[("SKU-001", 1)]).try_into_pending().unwrap().cancel(),
    ] {
        let status = order.status();
        let back = order.try_into_pending().unwrap_err();
        assert_eq!(back.status(), status);
    }
}
