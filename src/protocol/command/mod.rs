mod column_definition;
pub mod prepared;
pub mod query;
pub mod resultset;
pub mod utility;

pub use column_definition::{
    ColumnDefinition, ColumnDefinitionBuilder, ColumnDefinitionTail, Field, MysqlType, TypeInputs,
    TypeOptions, resolve_type,
};
