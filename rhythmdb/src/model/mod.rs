//! Live views over the entry store: ordered query models and the grouping
//! (property) models bound to them.

pub mod property_model;
pub mod query_model;

pub use property_model::{PropertyModel, PropertyRowEvent, PropertyRowSink, ALL_ROW};
pub use query_model::{Limit, QueryModel, RowEvent, RowSink, Sort};
