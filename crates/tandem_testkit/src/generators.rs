//! Property-based test generators using proptest.

use crate::commerce::{
    cancel_order, discontinue_product, exchange_product, modify_order_quantity, place_order,
    restock, return_order, ship_order,
};
use proptest::prelude::*;
use tandem_core::{CoreResult, TransactionCoordinator};
use tandem_store::{Record, Value};

/// Strategy for store values of every kind.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6..1.0e6f64).prop_map(Value::Float),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for column names.
pub fn column_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Strategy for records of up to eight columns.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(column_name_strategy(), value_strategy(), 0..8)
        .prop_map(|columns| columns.into_iter().collect())
}

/// One business action in a generated workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    /// Place an order.
    Place {
        /// Ordering customer.
        customer: i64,
        /// Product index into the seeded catalog.
        product: usize,
        /// Units ordered.
        quantity: i64,
    },
    /// Restock a product.
    Restock {
        /// Product index into the seeded catalog.
        product: usize,
        /// Units added.
        quantity: i64,
    },
    /// Cancel a previously placed order.
    Cancel {
        /// Index into the orders placed so far.
        order: usize,
    },
    /// Ship a previously placed order.
    Ship {
        /// Index into the orders placed so far.
        order: usize,
    },
    /// Change the quantity of a previously placed order.
    Modify {
        /// Index into the orders placed so far.
        order: usize,
        /// New quantity.
        quantity: i64,
    },
    /// Return a previously placed order.
    Return {
        /// Index into the orders placed so far.
        order: usize,
    },
    /// Move a previously placed order to another product.
    Exchange {
        /// Index into the orders placed so far.
        order: usize,
        /// Product index into the seeded catalog.
        product: usize,
    },
    /// Discontinue a product.
    Discontinue {
        /// Product index into the seeded catalog.
        product: usize,
    },
}

impl OrderAction {
    /// Runs the action.
    ///
    /// Product and order indices wrap around `products` and `orders`. An
    /// action with nothing to refer to does nothing. A placed order is
    /// appended to `orders`.
    ///
    /// # Errors
    ///
    /// Whatever the underlying business action returns.
    pub fn apply(
        &self,
        coordinator: &TransactionCoordinator,
        products: &[i64],
        orders: &mut Vec<i64>,
    ) -> CoreResult<()> {
        if products.is_empty() {
            return Ok(());
        }
        let product_at = |index: usize| products[index % products.len()];
        let order_at = |index: usize| orders[index % orders.len()];
        match *self {
            OrderAction::Place {
                customer,
                product,
                quantity,
            } => {
                let order_id = place_order(coordinator, customer, product_at(product), quantity)?;
                orders.push(order_id);
                Ok(())
            }
            OrderAction::Restock { product, quantity } => {
                restock(coordinator, product_at(product), quantity)
            }
            OrderAction::Discontinue { product } => {
                discontinue_product(coordinator, product_at(product))
            }
            _ if orders.is_empty() => Ok(()),
            OrderAction::Cancel { order } => cancel_order(coordinator, order_at(order)),
            OrderAction::Ship { order } => ship_order(coordinator, order_at(order)),
            OrderAction::Modify { order, quantity } => {
                modify_order_quantity(coordinator, order_at(order), quantity)
            }
            OrderAction::Return { order } => return_order(coordinator, order_at(order)),
            OrderAction::Exchange { order, product } => {
                exchange_product(coordinator, order_at(order), product_at(product))
            }
        }
    }
}

/// Strategy for a single business action.
pub fn order_action_strategy() -> impl Strategy<Value = OrderAction> {
    prop_oneof![
        4 => (1i64..5, any::<usize>(), 1i64..6).prop_map(|(customer, product, quantity)| {
            OrderAction::Place {
                customer,
                product,
                quantity,
            }
        }),
        1 => (any::<usize>(), 1i64..10)
            .prop_map(|(product, quantity)| OrderAction::Restock { product, quantity }),
        2 => any::<usize>().prop_map(|order| OrderAction::Cancel { order }),
        2 => any::<usize>().prop_map(|order| OrderAction::Ship { order }),
        2 => (any::<usize>(), 1i64..6)
            .prop_map(|(order, quantity)| OrderAction::Modify { order, quantity }),
        1 => any::<usize>().prop_map(|order| OrderAction::Return { order }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(order, product)| OrderAction::Exchange { order, product }),
        1 => any::<usize>().prop_map(|product| OrderAction::Discontinue { product }),
    ]
}

/// Strategy for a workload of up to `max_len` actions.
pub fn workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<OrderAction>> {
    prop::collection::vec(order_action_strategy(), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStores;

    proptest! {
        #[test]
        fn records_have_generated_columns(record in record_strategy()) {
            for (column, _) in record.iter() {
                prop_assert!(column.chars().next().is_some_and(|c| c.is_ascii_lowercase()));
            }
        }

        #[test]
        fn text_values_are_bounded(value in value_strategy()) {
            if let Value::Text(text) = value {
                prop_assert!(text.len() <= 16);
            }
        }
    }

    #[test]
    fn actions_without_orders_are_noops() {
        let stores = TestStores::new();
        let products = stores.seed_catalog(1, 1.0, 5).unwrap();
        let mut orders = Vec::new();
        OrderAction::Cancel { order: 3 }
            .apply(&stores, &products, &mut orders)
            .unwrap();
        OrderAction::Ship { order: 0 }
            .apply(&stores, &products, &mut orders)
            .unwrap();
        OrderAction::Exchange { order: 1, product: 0 }
            .apply(&stores, &products, &mut orders)
            .unwrap();
        assert_eq!(stores.stats().transactions_begun, 0);
    }

    #[test]
    fn place_records_the_new_order() {
        let stores = TestStores::new();
        let products = stores.seed_catalog(2, 1.0, 5).unwrap();
        let mut orders = Vec::new();
        OrderAction::Place {
            customer: 1,
            product: 3,
            quantity: 2,
        }
        .apply(&stores, &products, &mut orders)
        .unwrap();
        assert_eq!(orders, vec![1]);
        assert_eq!(stores.stock(products[1]), Some(3));
    }

    #[test]
    fn exchange_wraps_product_index() {
        let stores = TestStores::new();
        let products = stores.seed_catalog(2, 1.0, 5).unwrap();
        let mut orders = Vec::new();
        OrderAction::Place {
            customer: 1,
            product: 0,
            quantity: 2,
        }
        .apply(&stores, &products, &mut orders)
        .unwrap();
        OrderAction::Exchange { order: 4, product: 3 }
            .apply(&stores, &products, &mut orders)
            .unwrap();
        assert_eq!(stores.stock(products[0]), Some(5));
        assert_eq!(stores.stock(products[1]), Some(3));
        assert_eq!(stores.order(orders[0]).unwrap().get_i64("product_id"), Some(products[1]));
    }
}
