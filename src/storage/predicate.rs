//! Numeric filter predicates and their SQL rendering.
//!
//! A query carries an ordered list of `Predicate`s. Columns and operators
//! come from closed enums; bounds are always bound parameters.

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::fmt;

/// A filterable snapshot field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Field {
    Temperature,
    WindSpeed,
}

impl Field {
    /// Column name in the resolved-row relation.
    pub fn column(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature_f",
            Field::WindSpeed => "wind_speed_mph",
        }
    }
}

/// Strict comparison against a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    GreaterThan,
    LessThan,
}

impl Comparator {
    pub fn operator(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Predicate {
    pub field: Field,
    pub comparator: Comparator,
    pub bound: f64,
}

impl Predicate {
    pub fn new(field: Field, comparator: Comparator, bound: f64) -> Self {
        Self { field, comparator, bound }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field.column(), self.comparator.operator(), self.bound)
    }
}

/// Append `AND <column> <op> ?` for each predicate, binding the bound.
pub fn push_predicates(qb: &mut QueryBuilder<'_, Sqlite>, predicates: &[Predicate]) {
    for p in predicates {
        qb.push(" AND ")
            .push(p.field.column())
            .push(" ")
            .push(p.comparator.operator())
            .push(" ")
            .push_bind(p.bound);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
