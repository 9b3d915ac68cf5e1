//! Structured, parameterized statements.
//!
//! Statements are data rather than SQL text: the in-memory store evaluates
//! them directly, and the rollback path builds inverse statements without
//! string assembly. `Display` renders the equivalent SQL for logging.

use crate::error::{StoreError, StoreResult};
use crate::value::{Record, Value};
use std::fmt;

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Positional parameter (zero-based).
    Param(usize),
    /// Constant value.
    Literal(Value),
    /// Current value of a column in the row being evaluated.
    Column(String),
    /// Numeric addition.
    Add(Box<Expr>, Box<Expr>),
    /// Numeric subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// Text concatenation.
    Concat(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Positional parameter.
    #[must_use]
    pub fn param(index: usize) -> Self {
        Expr::Param(index)
    }

    /// Literal value.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Column reference.
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// `self + rhs`.
    #[must_use]
    pub fn add(self, rhs: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(rhs))
    }

    /// `self - rhs`.
    #[must_use]
    pub fn sub(self, rhs: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }

    /// `self || rhs`.
    #[must_use]
    pub fn concat(self, rhs: Expr) -> Self {
        Expr::Concat(Box::new(self), Box::new(rhs))
    }

    /// Evaluates the expression against bound parameters and an optional row.
    ///
    /// # Errors
    ///
    /// Fails on an unbound parameter, a column reference without a row, or
    /// arithmetic on non-numeric values.
    pub fn eval(&self, params: &[Value], row: Option<&Record>) -> StoreResult<Value> {
        match self {
            Expr::Param(index) => params
                .get(*index)
                .cloned()
                .ok_or(StoreError::UnboundParameter {
                    index: *index,
                    bound: params.len(),
                }),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(name) => {
                let row = row.ok_or_else(|| {
                    StoreError::type_error(format!("column {name} referenced without a row"))
                })?;
                Ok(row.get(name).cloned().unwrap_or(Value::Null))
            }
            Expr::Add(a, b) => arithmetic(a.eval(params, row)?, b.eval(params, row)?, '+'),
            Expr::Sub(a, b) => arithmetic(a.eval(params, row)?, b.eval(params, row)?, '-'),
            Expr::Concat(a, b) => {
                let (a, b) = (a.eval(params, row)?, b.eval(params, row)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Text(format!("{a}{b}")))
            }
        }
    }
}

fn arithmetic(a: Value, b: Value, op: char) -> StoreResult<Value> {
    match (&a, &b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => {
            let result = if op == '+' {
                x.checked_add(*y)
            } else {
                x.checked_sub(*y)
            };
            result
                .map(Value::Int)
                .ok_or_else(|| StoreError::type_error(format!("integer overflow in {x} {op} {y}")))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(if op == '+' { x + y } else { x - y })),
            _ => Err(StoreError::type_error(format!(
                "cannot apply {op} to {} and {}",
                a.to_sql_literal(),
                b.to_sql_literal()
            ))),
        },
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(_) => f.write_str("?"),
            Expr::Literal(v) => f.write_str(&v.to_sql_literal()),
            Expr::Column(c) => f.write_str(c),
            Expr::Add(a, b) => write!(f, "{a} + {b}"),
            Expr::Sub(a, b) => write!(f, "{a} - {b}"),
            Expr::Concat(a, b) => write!(f, "{a} || {b}"),
        }
    }
}

/// An equality predicate `column = expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column compared.
    pub column: String,
    /// Expected value.
    pub value: Expr,
}

impl Condition {
    /// Evaluates the predicate against a row.
    ///
    /// # Errors
    ///
    /// Propagates expression evaluation failures.
    pub fn matches(&self, row: &Record, params: &[Value]) -> StoreResult<bool> {
        let expected = self.value.eval(params, Some(row))?;
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        Ok(*actual == expected)
    }
}

/// What an insert does when the primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Fail with a duplicate-key error.
    #[default]
    Fail,
    /// Skip the row and report zero rows affected.
    DoNothing,
}

/// A parameterized statement against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read rows matching every condition.
    Select {
        /// Target table.
        table: String,
        /// Conjunction of equality predicates.
        filter: Vec<Condition>,
        /// Whether the read intends to update the rows.
        for_update: bool,
    },
    /// Insert one row.
    Insert {
        /// Target table.
        table: String,
        /// Column names.
        columns: Vec<String>,
        /// One expression per column.
        values: Vec<Expr>,
        /// Duplicate-key behaviour.
        on_conflict: OnConflict,
    },
    /// Update rows matching every condition.
    Update {
        /// Target table.
        table: String,
        /// `column = expr` assignments, evaluated against the old row.
        assignments: Vec<(String, Expr)>,
        /// Conjunction of equality predicates.
        filter: Vec<Condition>,
    },
    /// Delete rows matching every condition.
    Delete {
        /// Target table.
        table: String,
        /// Conjunction of equality predicates.
        filter: Vec<Condition>,
    },
}

impl Statement {
    /// `SELECT * FROM table`.
    #[must_use]
    pub fn select(table: impl Into<String>) -> Self {
        Statement::Select {
            table: table.into(),
            filter: Vec::new(),
            for_update: false,
        }
    }

    /// `INSERT INTO table`.
    #[must_use]
    pub fn insert_into(table: impl Into<String>) -> Self {
        Statement::Insert {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            on_conflict: OnConflict::Fail,
        }
    }

    /// `UPDATE table`.
    #[must_use]
    pub fn update(table: impl Into<String>) -> Self {
        Statement::Update {
            table: table.into(),
            assignments: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// `DELETE FROM table`.
    #[must_use]
    pub fn delete_from(table: impl Into<String>) -> Self {
        Statement::Delete {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    /// Adds `column = value` to the WHERE clause. Ignored on inserts.
    #[must_use]
    pub fn filter_eq(mut self, column: impl Into<String>, value: Expr) -> Self {
        let condition = Condition {
            column: column.into(),
            value,
        };
        match &mut self {
            Statement::Select { filter, .. }
            | Statement::Update { filter, .. }
            | Statement::Delete { filter, .. } => filter.push(condition),
            Statement::Insert { .. } => {}
        }
        self
    }

    /// Adds an insert column or an update assignment.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: Expr) -> Self {
        match &mut self {
            Statement::Insert {
                columns, values, ..
            } => {
                columns.push(column.into());
                values.push(value);
            }
            Statement::Update { assignments, .. } => assignments.push((column.into(), value)),
            Statement::Select { .. } | Statement::Delete { .. } => {}
        }
        self
    }

    /// Marks a select as `FOR UPDATE`.
    #[must_use]
    pub fn for_update(mut self) -> Self {
        if let Statement::Select { for_update, .. } = &mut self {
            *for_update = true;
        }
        self
    }

    /// Makes an insert skip rows whose key already exists.
    #[must_use]
    pub fn on_conflict_do_nothing(mut self) -> Self {
        if let Statement::Insert { on_conflict, .. } = &mut self {
            *on_conflict = OnConflict::DoNothing;
        }
        self
    }

    /// The table this statement targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Statement::Select { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Returns a select over the rows an update or delete would touch.
    ///
    /// The select shares the statement's filter, so it binds the same
    /// parameters. Inserts and selects have no such counterpart.
    #[must_use]
    pub fn matching_select(&self) -> Option<Statement> {
        match self {
            Statement::Update { table, filter, .. } | Statement::Delete { table, filter } => {
                Some(Statement::Select {
                    table: table.clone(),
                    filter: filter.clone(),
                    for_update: true,
                })
            }
            Statement::Select { .. } | Statement::Insert { .. } => None,
        }
    }

    /// Returns true for statements that modify rows.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }
}

fn write_filter(f: &mut fmt::Formatter<'_>, filter: &[Condition]) -> fmt::Result {
    for (i, c) in filter.iter().enumerate() {
        f.write_str(if i == 0 { " WHERE " } else { " AND " })?;
        write!(f, "{} = {}", c.column, c.value)?;
    }
    Ok(())
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select {
                table,
                filter,
                for_update,
            } => {
                write!(f, "SELECT * FROM {table}")?;
                write_filter(f, filter)?;
                if *for_update {
                    f.write_str(" FOR UPDATE")?;
                }
                Ok(())
            }
            Statement::Insert {
                table,
                columns,
                values,
                on_conflict,
            } => {
                write!(
                    f,
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    join(values)
                )?;
                if *on_conflict == OnConflict::DoNothing {
                    f.write_str(" ON CONFLICT DO NOTHING")?;
                }
                Ok(())
            }
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|(c, e)| format!("{c} = {e}"))
                    .collect();
                write!(f, "UPDATE {table} SET {}", sets.join(", "))?;
                write_filter(f, filter)
            }
            Statement::Delete { table, filter } => {
                write!(f, "DELETE FROM {table}")?;
                write_filter(f, filter)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_version_guarded_update() {
        let stmt = Statement::update("products")
            .set("stock", Expr::column("stock").sub(Expr::param(0)))
            .set("version", Expr::column("version").add(Expr::literal(1)))
            .filter_eq("product_id", Expr::param(1))
            .filter_eq("version", Expr::param(2));
        assert_eq!(
            stmt.to_string(),
            "UPDATE products SET stock = stock - ?, version = version + 1 \
             WHERE product_id = ? AND version = ?"
        );
        assert!(stmt.is_write());
        assert_eq!(stmt.table(), "products");
    }

    #[test]
    fn renders_select_for_update() {
        let stmt = Statement::select("orders")
            .filter_eq("order_id", Expr::param(0))
            .for_update();
        assert_eq!(
            stmt.to_string(),
            "SELECT * FROM orders WHERE order_id = ? FOR UPDATE"
        );
        assert!(!stmt.is_write());
    }

    #[test]
    fn matching_select_shares_the_filter() {
        let delete = Statement::delete_from("products").filter_eq("stock", Expr::param(0));
        assert_eq!(
            delete.matching_select().unwrap().to_string(),
            "SELECT * FROM products WHERE stock = ? FOR UPDATE"
        );
        let update = Statement::update("orders")
            .set("status", Expr::literal("SHIPPED"))
            .filter_eq("order_id", Expr::param(0));
        assert_eq!(
            update.matching_select().unwrap().to_string(),
            "SELECT * FROM orders WHERE order_id = ? FOR UPDATE"
        );
        assert_eq!(Statement::select("orders").matching_select(), None);
    }

    #[test]
    fn renders_idempotent_insert() {
        let stmt = Statement::insert_into("payments")
            .set("payment_id", Expr::literal(4))
            .set("status", Expr::literal("PENDING"))
            .on_conflict_do_nothing();
        assert_eq!(
            stmt.to_string(),
            "INSERT INTO payments (payment_id, status) VALUES (4, 'PENDING') ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn eval_arithmetic_against_row() {
        let row = Record::new().with("stock", 10);
        let expr = Expr::column("stock").sub(Expr::param(0));
        assert_eq!(expr.eval(&[Value::Int(5)], Some(&row)).unwrap(), Value::Int(5));
    }

    #[test]
    fn eval_mixed_numeric_widens() {
        let expr = Expr::literal(2).add(Expr::literal(0.5));
        assert_eq!(expr.eval(&[], None).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn eval_unbound_parameter_fails() {
        let err = Expr::param(3).eval(&[Value::Int(1)], None).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnboundParameter { index: 3, bound: 1 }
        ));
    }

    #[test]
    fn eval_concat_text() {
        let row = Record::new().with("name", "widget");
        let expr = Expr::literal("DISCONTINUED - ").concat(Expr::column("name"));
        assert_eq!(
            expr.eval(&[], Some(&row)).unwrap(),
            Value::from("DISCONTINUED - widget")
        );
    }

    #[test]
    fn condition_matches_missing_column_as_null() {
        let row = Record::new().with("a", 1);
        let cond = Condition {
            column: "b".into(),
            value: Expr::literal(Value::Null),
        };
        assert!(cond.matches(&row, &[]).unwrap());
    }
}
