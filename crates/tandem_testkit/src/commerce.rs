//! Business actions over the inventory and order stores.
//!
//! Each action is one retried begin/commit/rollback cycle. Rows that are
//! about to change are read with `read_for_update` first, and stock and
//! order updates are guarded by the version read:
//!
//! ```text
//! UPDATE products SET stock = stock - ?, version = version + 1
//!   WHERE product_id = ? AND version = ?
//! ```
//!
//! A guarded update that matches no row is reported as a lock conflict so
//! the whole action is retried.
//!
//! Ledger entries carry their [`movement`] kind.

use crate::fixtures::{
    movement, status, tables, DISCONTINUED_PREFIX, INVENTORY, ORDER, PAYMENT_METHOD,
};
use tandem_core::{
    CoreError, CoreResult, ResourceKey, Target, TransactionCoordinator, TransactionId,
};
use tandem_store::{Expr, Record, Statement, StoreError, Value};
use tracing::debug;
use uuid::Uuid;

/// Places an order for `quantity` units of a product.
///
/// Decrements stock, creates a `PENDING` order and a `PENDING` payment for
/// `price * quantity`, truncated to whole units.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the product does not exist
/// - [`CoreError::Rejected`] if stock is insufficient
/// - [`CoreError::RetriesExhausted`] if conflicts persisted
pub fn place_order(
    coordinator: &TransactionCoordinator,
    customer_id: i64,
    product_id: i64,
    quantity: i64,
) -> CoreResult<i64> {
    coordinator.run("place_order", |txn| {
        let product = find_product_for_update(coordinator, txn, product_id)?;
        ensure_stock(&product, quantity)?;
        adjust_stock(coordinator, txn, &product, -quantity)?;

        let total = line_total(&product, quantity);
        let order_id = create_order(coordinator, txn, customer_id, product_id, quantity, total)?;
        create_payment(coordinator, txn, order_id, total)?;
        Ok(order_id)
    })
}

/// Adds `quantity` units of stock received from a supplier.
///
/// The movement is recorded in the inventory ledger.
///
/// # Errors
///
/// Returns [`CoreError::ResourceNotFound`] if the product does not exist.
pub fn restock(
    coordinator: &TransactionCoordinator,
    product_id: i64,
    quantity: i64,
) -> CoreResult<()> {
    coordinator.run("restock", |txn| {
        log_inventory_movement(coordinator, txn, product_id, quantity, movement::RESTOCK)?;
        let product = find_product_for_update(coordinator, txn, product_id)?;
        adjust_stock(coordinator, txn, &product, quantity)
    })
}

/// Cancels an order, refunds its payment and returns its stock.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the order does not exist
/// - [`CoreError::Rejected`] if the order is already cancelled or returned
pub fn cancel_order(coordinator: &TransactionCoordinator, order_id: i64) -> CoreResult<()> {
    coordinator.run("cancel_order", |txn| {
        let order = find_order_for_update(coordinator, txn, order_id)?;
        if let Some(closed) = closed_status(&order) {
            return Err(CoreError::rejected(format!("order {order_id} is already {closed}")));
        }
        set_order_status(coordinator, txn, &order, status::CANCELLED)?;

        if let Some(payment) = find_payment_for_update(coordinator, txn, order_id)? {
            set_payment(coordinator, txn, &payment, status::REFUNDED, None)?;
        }

        let product_id = order.get_i64("product_id").unwrap_or_default();
        let product = find_product_for_update(coordinator, txn, product_id)?;
        adjust_stock(
            coordinator,
            txn,
            &product,
            order.get_i64("quantity").unwrap_or_default(),
        )
    })
}

/// Ships a pending order and captures its payment.
///
/// The shipped units are recorded in the inventory ledger as a negative
/// movement; stock itself was already taken when the order was placed.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the order does not exist
/// - [`CoreError::Rejected`] if the order is not `PENDING`
pub fn ship_order(coordinator: &TransactionCoordinator, order_id: i64) -> CoreResult<()> {
    coordinator.run("ship_order", |txn| {
        let order = find_order_for_update(coordinator, txn, order_id)?;
        if order.get_str("status") != Some(status::PENDING) {
            return Err(CoreError::rejected(format!(
                "order {order_id} must be {} to ship, it is {}",
                status::PENDING,
                order.get_str("status").unwrap_or("unknown")
            )));
        }
        set_order_status(coordinator, txn, &order, status::SHIPPED)?;

        let total = order.get_i64("total_amount").unwrap_or_default();
        if let Some(payment) = find_payment_for_update(coordinator, txn, order_id)? {
            set_payment(coordinator, txn, &payment, status::CAPTURED, Some(total))?;
        }

        log_inventory_movement(
            coordinator,
            txn,
            order.get_i64("product_id").unwrap_or_default(),
            -order.get_i64("quantity").unwrap_or_default(),
            movement::SHIPMENT,
        )
    })
}

/// Changes the quantity of a pending order.
///
/// Stock moves by the difference, and the order total and payment amount
/// are recomputed from the product's current price.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the order or its product does not exist
/// - [`CoreError::Rejected`] if the order is not `PENDING`, the new quantity
///   is not positive, or stock cannot cover an increase
pub fn modify_order_quantity(
    coordinator: &TransactionCoordinator,
    order_id: i64,
    new_quantity: i64,
) -> CoreResult<()> {
    if new_quantity <= 0 {
        return Err(CoreError::rejected(format!(
            "order quantity must be positive, got {new_quantity}"
        )));
    }
    coordinator.run("modify_order_quantity", |txn| {
        let order = find_order_for_update(coordinator, txn, order_id)?;
        if order.get_str("status") != Some(status::PENDING) {
            return Err(CoreError::rejected(format!(
                "order {order_id} must be {} to modify",
                status::PENDING
            )));
        }

        let old_quantity = order.get_i64("quantity").unwrap_or_default();
        let product_id = order.get_i64("product_id").unwrap_or_default();
        let product = find_product_for_update(coordinator, txn, product_id)?;
        let diff = new_quantity - old_quantity;
        if diff > 0 {
            ensure_stock(&product, diff)?;
        }
        if diff != 0 {
            adjust_stock(coordinator, txn, &product, -diff)?;
        }

        let total = line_total(&product, new_quantity);
        update_order_line(coordinator, txn, &order, product_id, new_quantity, total)?;
        if let Some(payment) = find_payment_for_update(coordinator, txn, order_id)? {
            let current = payment.get_str("status").unwrap_or(status::PENDING).to_string();
            set_payment(coordinator, txn, &payment, &current, Some(total))?;
        }
        Ok(())
    })
}

/// Takes back a shipped order: its stock is on hand again and its payment
/// is refunded.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the order or its product does not exist
/// - [`CoreError::Rejected`] if the order is not `SHIPPED`
pub fn return_order(coordinator: &TransactionCoordinator, order_id: i64) -> CoreResult<()> {
    coordinator.run("return_order", |txn| {
        let order = find_order_for_update(coordinator, txn, order_id)?;
        if order.get_str("status") != Some(status::SHIPPED) {
            return Err(CoreError::rejected(format!(
                "only {} orders can be returned, order {order_id} is {}",
                status::SHIPPED,
                order.get_str("status").unwrap_or("unknown")
            )));
        }
        set_order_status(coordinator, txn, &order, status::RETURNED)?;

        if let Some(payment) = find_payment_for_update(coordinator, txn, order_id)? {
            set_payment(coordinator, txn, &payment, status::REFUNDED, None)?;
        }

        let product = find_product_for_update(
            coordinator,
            txn,
            order.get_i64("product_id").unwrap_or_default(),
        )?;
        adjust_stock(
            coordinator,
            txn,
            &product,
            order.get_i64("quantity").unwrap_or_default(),
        )
    })
}

/// Moves an order to a different product.
///
/// Locks the old product and then the new one, returns the order's units
/// to the old product and takes them from the new one. The order total and
/// payment amount follow the new product's price.
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the order or either product does not exist
/// - [`CoreError::Rejected`] if the product is unchanged, the order is
///   cancelled or returned, or the new product lacks stock
pub fn exchange_product(
    coordinator: &TransactionCoordinator,
    order_id: i64,
    new_product_id: i64,
) -> CoreResult<()> {
    coordinator.run("exchange_product", |txn| {
        let order = find_order_for_update(coordinator, txn, order_id)?;
        if let Some(closed) = closed_status(&order) {
            return Err(CoreError::rejected(format!(
                "cannot exchange order {order_id}, it is {closed}"
            )));
        }
        let old_product_id = order.get_i64("product_id").unwrap_or_default();
        if old_product_id == new_product_id {
            return Err(CoreError::rejected(format!(
                "order {order_id} already holds product {new_product_id}"
            )));
        }

        let old_product = find_product_for_update(coordinator, txn, old_product_id)?;
        let new_product = find_product_for_update(coordinator, txn, new_product_id)?;
        let quantity = order.get_i64("quantity").unwrap_or_default();
        ensure_stock(&new_product, quantity)?;

        adjust_stock(coordinator, txn, &old_product, quantity)?;
        adjust_stock(coordinator, txn, &new_product, -quantity)?;

        let total = line_total(&new_product, quantity);
        let payment = find_payment_for_update(coordinator, txn, order_id)?;
        update_order_line(coordinator, txn, &order, new_product_id, quantity, total)?;
        if let Some(payment) = payment {
            let current = payment.get_str("status").unwrap_or(status::PENDING).to_string();
            set_payment(coordinator, txn, &payment, &current, Some(total))?;
        }
        Ok(())
    })
}

/// Takes a product out of the catalog.
///
/// Its stock is written off to zero and recorded in the ledger, and its
/// name gets the [`DISCONTINUED_PREFIX`].
///
/// # Errors
///
/// - [`CoreError::ResourceNotFound`] if the product does not exist
/// - [`CoreError::Rejected`] if the product is already discontinued
pub fn discontinue_product(coordinator: &TransactionCoordinator, product_id: i64) -> CoreResult<()> {
    coordinator.run("discontinue_product", |txn| {
        let product = find_product_for_update(coordinator, txn, product_id)?;
        if product
            .get_str("name")
            .is_some_and(|name| name.starts_with(DISCONTINUED_PREFIX))
        {
            return Err(CoreError::rejected(format!(
                "product {product_id} is already discontinued"
            )));
        }

        let version = product.get_i64("version").unwrap_or_default();
        let update = Statement::update(tables::PRODUCTS)
            .set("stock", Expr::literal(0))
            .set("name", Expr::literal(DISCONTINUED_PREFIX).concat(Expr::column("name")))
            .set("version", Expr::column("version").add(Expr::literal(1)))
            .filter_eq("product_id", Expr::param(0))
            .filter_eq("version", Expr::param(1));
        let target = Target::row(INVENTORY, tables::PRODUCTS, product_id);
        let rows = coordinator.access().update(
            txn,
            &target,
            &update,
            &[product_id.into(), version.into()],
            Some(product.clone()),
        )?;
        guarded(txn, &target, rows)?;

        log_inventory_movement(
            coordinator,
            txn,
            product_id,
            -product.get_i64("stock").unwrap_or_default(),
            movement::WRITE_OFF,
        )
    })
}

/// Returns the status of an order that no longer holds stock.
fn closed_status(order: &Record) -> Option<&str> {
    order
        .get_str("status")
        .filter(|s| *s == status::CANCELLED || *s == status::RETURNED)
}

fn ensure_stock(product: &Record, required: i64) -> CoreResult<()> {
    let stock = product.get_i64("stock").unwrap_or_default();
    if stock < required {
        return Err(CoreError::rejected(format!(
            "insufficient stock for product {}: {stock} < {required}",
            product.get_i64("product_id").unwrap_or_default()
        )));
    }
    Ok(())
}

/// `price * quantity`, truncated to whole units.
fn line_total(product: &Record, quantity: i64) -> i64 {
    let price = product.get_f64("price").unwrap_or_default();
    (price * quantity as f64) as i64
}

fn find_product_for_update(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    product_id: i64,
) -> CoreResult<Record> {
    let select = Statement::select(tables::PRODUCTS)
        .filter_eq("product_id", Expr::param(0))
        .for_update();
    coordinator
        .access()
        .read_for_update(
            txn,
            &Target::row(INVENTORY, tables::PRODUCTS, product_id),
            &select,
            &[product_id.into()],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::resource_not_found(format!("product {product_id}")))
}

fn find_order_for_update(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    order_id: i64,
) -> CoreResult<Record> {
    let select = Statement::select(tables::ORDERS)
        .filter_eq("order_id", Expr::param(0))
        .for_update();
    coordinator
        .access()
        .read_for_update(
            txn,
            &Target::row(ORDER, tables::ORDERS, order_id),
            &select,
            &[order_id.into()],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::resource_not_found(format!("order {order_id}")))
}

/// Payments are looked up by order, so the key is unknown and the whole
/// table is locked.
fn find_payment_for_update(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    order_id: i64,
) -> CoreResult<Option<Record>> {
    let select = Statement::select(tables::PAYMENTS)
        .filter_eq("order_id", Expr::param(0))
        .for_update();
    Ok(coordinator
        .access()
        .read_for_update(
            txn,
            &Target::table(ORDER, tables::PAYMENTS),
            &select,
            &[order_id.into()],
        )?
        .into_iter()
        .next())
}

/// Applies a signed stock change guarded by the product's version.
fn adjust_stock(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    product: &Record,
    delta: i64,
) -> CoreResult<()> {
    let product_id = product.get_i64("product_id").unwrap_or_default();
    let version = product.get_i64("version").unwrap_or_default();
    let update = Statement::update(tables::PRODUCTS)
        .set("stock", Expr::column("stock").add(Expr::param(0)))
        .set("version", Expr::column("version").add(Expr::literal(1)))
        .filter_eq("product_id", Expr::param(1))
        .filter_eq("version", Expr::param(2));
    let target = Target::row(INVENTORY, tables::PRODUCTS, product_id);
    let rows = coordinator.access().update(
        txn,
        &target,
        &update,
        &[delta.into(), product_id.into(), version.into()],
        Some(product.clone()),
    )?;
    guarded(txn, &target, rows)
}

fn set_order_status(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    order: &Record,
    new_status: &str,
) -> CoreResult<()> {
    let order_id = order.get_i64("order_id").unwrap_or_default();
    let version = order.get_i64("version").unwrap_or_default();
    let update = Statement::update(tables::ORDERS)
        .set("status", Expr::param(0))
        .set("version", Expr::column("version").add(Expr::literal(1)))
        .filter_eq("order_id", Expr::param(1))
        .filter_eq("version", Expr::param(2));
    let target = Target::row(ORDER, tables::ORDERS, order_id);
    let rows = coordinator.access().update(
        txn,
        &target,
        &update,
        &[new_status.into(), order_id.into(), version.into()],
        Some(order.clone()),
    )?;
    guarded(txn, &target, rows)
}

fn update_order_line(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    order: &Record,
    product_id: i64,
    quantity: i64,
    total: i64,
) -> CoreResult<()> {
    let order_id = order.get_i64("order_id").unwrap_or_default();
    let version = order.get_i64("version").unwrap_or_default();
    let update = Statement::update(tables::ORDERS)
        .set("product_id", Expr::param(0))
        .set("quantity", Expr::param(1))
        .set("total_amount", Expr::param(2))
        .set("version", Expr::column("version").add(Expr::literal(1)))
        .filter_eq("order_id", Expr::param(3))
        .filter_eq("version", Expr::param(4));
    let target = Target::row(ORDER, tables::ORDERS, order_id);
    let rows = coordinator.access().update(
        txn,
        &target,
        &update,
        &[
            product_id.into(),
            quantity.into(),
            total.into(),
            order_id.into(),
            version.into(),
        ],
        Some(order.clone()),
    )?;
    guarded(txn, &target, rows)
}

fn set_payment(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    payment: &Record,
    new_status: &str,
    amount: Option<i64>,
) -> CoreResult<()> {
    let payment_id = payment.get_i64("payment_id").unwrap_or_default();
    let amount = amount.or_else(|| payment.get_i64("amount")).unwrap_or_default();
    let update = Statement::update(tables::PAYMENTS)
        .set("status", Expr::param(0))
        .set("amount", Expr::param(1))
        .filter_eq("payment_id", Expr::param(2));
    coordinator.access().update(
        txn,
        &Target::row(ORDER, tables::PAYMENTS, payment_id),
        &update,
        &[new_status.into(), amount.into(), payment_id.into()],
        Some(payment.clone()),
    )?;
    Ok(())
}

fn create_order(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    customer_id: i64,
    product_id: i64,
    quantity: i64,
    total: i64,
) -> CoreResult<i64> {
    let insert = Statement::insert_into(tables::ORDERS)
        .set("customer_id", Expr::param(0))
        .set("product_id", Expr::param(1))
        .set("quantity", Expr::param(2))
        .set("total_amount", Expr::param(3))
        .set("status", Expr::param(4))
        .set("version", Expr::literal(0));
    coordinator
        .access()
        .insert(
            txn,
            ORDER,
            tables::ORDERS,
            &insert,
            &[
                customer_id.into(),
                product_id.into(),
                quantity.into(),
                total.into(),
                status::PENDING.into(),
            ],
        )?
        .as_ref()
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::Store(StoreError::execution("order insert returned no key")))
}

fn create_payment(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    order_id: i64,
    amount: i64,
) -> CoreResult<()> {
    let insert = Statement::insert_into(tables::PAYMENTS)
        .set("order_id", Expr::param(0))
        .set("amount", Expr::param(1))
        .set("payment_method", Expr::literal(PAYMENT_METHOD))
        .set("status", Expr::param(2));
    coordinator.access().insert(
        txn,
        ORDER,
        tables::PAYMENTS,
        &insert,
        &[order_id.into(), amount.into(), status::PENDING.into()],
    )?;
    Ok(())
}

/// Appends a ledger entry keyed by a fresh UUID.
fn log_inventory_movement(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    product_id: i64,
    quantity_change: i64,
    kind: &str,
) -> CoreResult<()> {
    let insert = Statement::insert_into(tables::INVENTORY_TRANSACTIONS)
        .set("transaction_id", Expr::param(0))
        .set("product_id", Expr::param(1))
        .set("quantity_change", Expr::param(2))
        .set("movement", Expr::param(3));
    coordinator.access().insert(
        txn,
        INVENTORY,
        tables::INVENTORY_TRANSACTIONS,
        &insert,
        &[
            Uuid::new_v4().to_string().into(),
            product_id.into(),
            quantity_change.into(),
            kind.into(),
        ],
    )?;
    Ok(())
}

/// Turns a version-guarded update that matched nothing into a conflict.
fn guarded(txn: TransactionId, target: &Target, rows: u64) -> CoreResult<()> {
    if rows == 0 {
        let resource = ResourceKey::for_target(&target.store, &target.table, target.key.as_ref());
        debug!(txn = %txn, resource = %resource, "version guard matched no row");
        return Err(CoreError::lock_conflict(txn, resource.to_string()));
    }
    Ok(())
}
