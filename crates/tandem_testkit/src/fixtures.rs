//! Test fixtures and store helpers.
//!
//! Builds the two stores the business actions run against:
//!
//! - `inventory`: products, suppliers and the inventory transaction ledger
//! - `order`: customers, orders and payments

use std::sync::Arc;
use tandem_core::{CoordinatorConfig, TransactionCoordinator};
use tandem_store::{
    InMemoryProvider, InMemoryStore, Record, Schema, StoreResult, TableSchema, Value,
};

/// Name of the inventory store.
pub const INVENTORY: &str = "inventory";
/// Name of the order store.
pub const ORDER: &str = "order";

/// Table names.
pub mod tables {
    /// Products with stock and version columns.
    pub const PRODUCTS: &str = "products";
    /// Suppliers.
    pub const SUPPLIERS: &str = "suppliers";
    /// Stock movements, keyed by caller-supplied UUID strings.
    pub const INVENTORY_TRANSACTIONS: &str = "inventory_transactions";
    /// Customers.
    pub const CUSTOMERS: &str = "customers";
    /// Orders with status and version columns.
    pub const ORDERS: &str = "orders";
    /// Payments, one per order.
    pub const PAYMENTS: &str = "payments";
}

/// Order and payment statuses.
pub mod status {
    /// Placed and not yet shipped.
    pub const PENDING: &str = "PENDING";
    /// Cancelled by the customer.
    pub const CANCELLED: &str = "CANCELLED";
    /// Handed to the carrier.
    pub const SHIPPED: &str = "SHIPPED";
    /// Shipped and sent back; its stock is on hand again.
    pub const RETURNED: &str = "RETURNED";
    /// Payment returned to the customer.
    pub const REFUNDED: &str = "REFUNDED";
    /// Payment collected.
    pub const CAPTURED: &str = "CAPTURED";
}

/// Kinds of inventory ledger entries, stored in the `movement` column.
pub mod movement {
    /// Stock received from a supplier.
    pub const RESTOCK: &str = "RESTOCK";
    /// Units leaving with a shipped order.
    pub const SHIPMENT: &str = "SHIPMENT";
    /// Stock removed when a product is discontinued.
    pub const WRITE_OFF: &str = "WRITE_OFF";
}

/// Prefix put in front of a discontinued product's name.
pub const DISCONTINUED_PREFIX: &str = "DISCONTINUED - ";

/// Payment method recorded on every payment.
pub const PAYMENT_METHOD: &str = "CREDIT_CARD";

/// Creates an empty inventory store.
#[must_use]
pub fn inventory_store() -> InMemoryStore {
    InMemoryStore::new(
        INVENTORY,
        Schema::new()
            .with_table(TableSchema::generated(tables::PRODUCTS, "product_id"))
            .with_table(TableSchema::generated(tables::SUPPLIERS, "supplier_id"))
            .with_table(TableSchema::supplied(
                tables::INVENTORY_TRANSACTIONS,
                "transaction_id",
            )),
    )
}

/// Creates an empty order store.
#[must_use]
pub fn order_store() -> InMemoryStore {
    InMemoryStore::new(
        ORDER,
        Schema::new()
            .with_table(TableSchema::generated(tables::CUSTOMERS, "customer_id"))
            .with_table(TableSchema::generated(tables::ORDERS, "order_id"))
            .with_table(TableSchema::generated(tables::PAYMENTS, "payment_id")),
    )
}

/// A product to seed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSeed {
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Units in stock.
    pub stock: i64,
}

impl ProductSeed {
    /// Creates a product seed.
    pub fn new(name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Both stores behind one coordinator.
///
/// Store handles are kept so tests can inspect committed rows and inject
/// faults without going through a transaction.
pub struct TestStores {
    /// The inventory store.
    pub inventory: Arc<InMemoryStore>,
    /// The order store.
    pub order: Arc<InMemoryStore>,
    /// Provider over both stores.
    pub provider: InMemoryProvider,
    /// The coordinator under test.
    pub coordinator: TransactionCoordinator,
}

impl TestStores {
    /// Creates empty stores with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Creates empty stores with a custom configuration.
    #[must_use]
    pub fn with_config(config: CoordinatorConfig) -> Self {
        let inventory = Arc::new(inventory_store());
        let order = Arc::new(order_store());
        let provider = InMemoryProvider::new()
            .with_shared_store(Arc::clone(&inventory))
            .with_shared_store(Arc::clone(&order));
        let coordinator = TransactionCoordinator::new(Arc::new(provider.clone()), config);
        Self {
            inventory,
            order,
            provider,
            coordinator,
        }
    }

    /// Seeds products at version 0 and returns their ids.
    ///
    /// # Errors
    ///
    /// Fails if the store rejects a row.
    pub fn seed_products(&self, products: &[ProductSeed]) -> StoreResult<Vec<i64>> {
        products
            .iter()
            .map(|p| {
                let key = self.inventory.seed(
                    tables::PRODUCTS,
                    Record::new()
                        .with("name", p.name.as_str())
                        .with("price", p.price)
                        .with("stock", p.stock)
                        .with("version", 0),
                )?;
                Ok(key.as_i64().unwrap_or_default())
            })
            .collect()
    }

    /// Seeds `count` identical products named `product-N`.
    ///
    /// # Errors
    ///
    /// Fails if the store rejects a row.
    pub fn seed_catalog(&self, count: usize, price: f64, stock: i64) -> StoreResult<Vec<i64>> {
        let seeds: Vec<ProductSeed> = (1..=count)
            .map(|i| ProductSeed::new(format!("product-{i}"), price, stock))
            .collect();
        self.seed_products(&seeds)
    }

    /// Seeds a customer and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the store rejects the row.
    pub fn seed_customer(&self, name: &str, email: &str) -> StoreResult<i64> {
        let key = self.order.seed(
            tables::CUSTOMERS,
            Record::new().with("name", name).with("email", email),
        )?;
        Ok(key.as_i64().unwrap_or_default())
    }

    /// Seeds a supplier and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the store rejects the row.
    pub fn seed_supplier(&self, name: &str) -> StoreResult<i64> {
        let key = self
            .inventory
            .seed(tables::SUPPLIERS, Record::new().with("name", name))?;
        Ok(key.as_i64().unwrap_or_default())
    }

    /// Returns a committed product row.
    #[must_use]
    pub fn product(&self, product_id: i64) -> Option<Record> {
        self.inventory
            .row(tables::PRODUCTS, &Value::Int(product_id))
    }

    /// Returns the committed stock of a product.
    #[must_use]
    pub fn stock(&self, product_id: i64) -> Option<i64> {
        self.product(product_id)?.get_i64("stock")
    }

    /// Returns a committed order row.
    #[must_use]
    pub fn order(&self, order_id: i64) -> Option<Record> {
        self.order.row(tables::ORDERS, &Value::Int(order_id))
    }

    /// Returns the committed payment of an order.
    #[must_use]
    pub fn payment_for(&self, order_id: i64) -> Option<Record> {
        self.order
            .rows(tables::PAYMENTS)
            .into_iter()
            .find(|p| p.get_i64("order_id") == Some(order_id))
    }

    /// Returns every committed order.
    #[must_use]
    pub fn orders(&self) -> Vec<Record> {
        self.order.rows(tables::ORDERS)
    }

    /// Returns every committed inventory ledger entry.
    #[must_use]
    pub fn ledger(&self) -> Vec<Record> {
        self.inventory.rows(tables::INVENTORY_TRANSACTIONS)
    }

    /// Returns the committed stock summed over all products.
    #[must_use]
    pub fn total_stock(&self) -> i64 {
        self.inventory
            .rows(tables::PRODUCTS)
            .iter()
            .filter_map(|p| p.get_i64("stock"))
            .sum()
    }

    /// Stock on hand plus units held by live orders and units written off,
    /// minus everything restocked.
    ///
    /// Cancelled and returned orders hold no units. Business actions never
    /// change this number.
    #[must_use]
    pub fn stock_balance(&self) -> i64 {
        let reserved: i64 = self
            .orders()
            .iter()
            .filter(|o| {
                !matches!(
                    o.get_str("status"),
                    Some(status::CANCELLED | status::RETURNED)
                )
            })
            .filter_map(|o| o.get_i64("quantity"))
            .sum();
        let ledger = self.ledger();
        let movements = |kind: &str| -> i64 {
            ledger
                .iter()
                .filter(|entry| entry.get_str("movement") == Some(kind))
                .filter_map(|entry| entry.get_i64("quantity_change"))
                .sum()
        };
        let restocked = movements(movement::RESTOCK);
        let written_off = -movements(movement::WRITE_OFF);
        self.total_stock() + reserved + written_off - restocked
    }

    /// Checks that no unit of stock was created or lost since the stores
    /// held `initial_stock` units and no orders.
    #[must_use]
    pub fn stock_conserved(&self, initial_stock: i64) -> bool {
        self.stock_balance() == initial_stock
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStores {
    type Target = TransactionCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_start_empty() {
        let stores = TestStores::new();
        assert_eq!(stores.inventory.row_count(tables::PRODUCTS), 0);
        assert_eq!(stores.order.row_count(tables::ORDERS), 0);
        assert!(stores.stock_conserved(0));
    }

    #[test]
    fn seeded_products_start_at_version_zero() {
        let stores = TestStores::new();
        let ids = stores.seed_catalog(3, 2.5, 10).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        let product = stores.product(2).unwrap();
        assert_eq!(product.get_str("name"), Some("product-2"));
        assert_eq!(product.get_i64("version"), Some(0));
        assert_eq!(stores.total_stock(), 30);
    }

    #[test]
    fn coordinator_sees_both_stores() {
        let stores = TestStores::new();
        let txn = stores.begin().unwrap();
        stores.commit(txn).unwrap();
        assert_eq!(
            tandem_store::ConnectionProvider::store_names(&stores.provider),
            vec![INVENTORY.to_string(), ORDER.to_string()]
        );
    }

    #[test]
    fn customers_and_suppliers_get_generated_ids() {
        let stores = TestStores::new();
        assert_eq!(stores.seed_customer("ada", "ada@example.com").unwrap(), 1);
        assert_eq!(stores.seed_customer("bob", "bob@example.com").unwrap(), 2);
        assert_eq!(stores.seed_supplier("acme").unwrap(), 1);
    }
}
