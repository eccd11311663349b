//! Tablet schemas: Arrow fields paired with stable column ids and a key prefix.
//!
//! Column ids and the key length live in Arrow metadata
//! ([`COLUMN_ID_KEY`] on each field, [`NUM_KEY_COLUMNS_KEY`] on the schema), so
//! a schema read back from a segment file describes itself.

use std::{collections::HashMap, ops::Range, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use tablet_predicate::ColumnId;

use crate::error::ConfigError;

/// Field metadata key carrying the stable column id.
pub const COLUMN_ID_KEY: &str = "tablet.column_id";
/// Schema metadata key carrying the number of leading key columns.
pub const NUM_KEY_COLUMNS_KEY: &str = "tablet.num_key_columns";

/// Arrow schema with stable column ids; the first `num_key_columns` fields form
/// the primary key.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    arrow: SchemaRef,
    column_ids: Vec<ColumnId>,
    positions: HashMap<ColumnId, usize>,
    num_key_columns: usize,
}

impl Schema {
    /// Start declaring a schema column by column.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Rebuild a schema from an Arrow schema carrying tablet metadata.
    pub fn from_arrow(arrow: SchemaRef) -> Result<Self, ConfigError> {
        let num_key_columns = arrow
            .metadata()
            .get(NUM_KEY_COLUMNS_KEY)
            .ok_or_else(|| {
                ConfigError::InvalidSchema(format!("missing `{NUM_KEY_COLUMNS_KEY}` metadata"))
            })?
            .parse::<usize>()
            .map_err(|err| {
                ConfigError::InvalidSchema(format!("bad `{NUM_KEY_COLUMNS_KEY}`: {err}"))
            })?;

        let mut column_ids = Vec::with_capacity(arrow.fields().len());
        for field in arrow.fields() {
            let id = field
                .metadata()
                .get(COLUMN_ID_KEY)
                .ok_or_else(|| {
                    ConfigError::InvalidSchema(format!(
                        "field `{}` lacks `{COLUMN_ID_KEY}` metadata",
                        field.name()
                    ))
                })?
                .parse::<ColumnId>()
                .map_err(|err| {
                    ConfigError::InvalidSchema(format!(
                        "field `{}` has a bad column id: {err}",
                        field.name()
                    ))
                })?;
            column_ids.push(id);
        }

        Self::validated(arrow, column_ids, num_key_columns)
    }

    fn validated(
        arrow: SchemaRef,
        column_ids: Vec<ColumnId>,
        num_key_columns: usize,
    ) -> Result<Self, ConfigError> {
        if num_key_columns == 0 || num_key_columns > column_ids.len() {
            return Err(ConfigError::InvalidSchema(format!(
                "{num_key_columns} key columns declared for {} fields",
                column_ids.len()
            )));
        }

        let mut positions = HashMap::with_capacity(column_ids.len());
        for (idx, id) in column_ids.iter().enumerate() {
            if positions.insert(*id, idx).is_some() {
                return Err(ConfigError::InvalidSchema(format!(
                    "duplicate column id {id}"
                )));
            }
        }

        for field in arrow.fields().iter().take(num_key_columns) {
            if field.is_nullable() {
                return Err(ConfigError::InvalidSchema(format!(
                    "key column `{}` must not be nullable",
                    field.name()
                )));
            }
            if !is_scalar_type(field.data_type()) {
                return Err(ConfigError::UnsupportedType {
                    data_type: field.data_type().clone(),
                });
            }
        }

        Ok(Self {
            arrow,
            column_ids,
            positions,
            num_key_columns,
        })
    }

    /// Underlying Arrow schema, metadata included.
    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.arrow
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.column_ids.len()
    }

    /// Number of leading key columns.
    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    /// Positions of the key columns.
    pub fn key_indices(&self) -> Range<usize> {
        0..self.num_key_columns
    }

    /// Column ids in schema order.
    pub fn column_ids(&self) -> &[ColumnId] {
        &self.column_ids
    }

    /// Column ids of the key prefix.
    pub fn key_column_ids(&self) -> &[ColumnId] {
        &self.column_ids[..self.num_key_columns]
    }

    /// Position of a column id, if present.
    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Whether the schema has a column with this id.
    pub fn contains(&self, id: ColumnId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Whether the column with this id is part of the key.
    pub fn is_key_column(&self, id: ColumnId) -> bool {
        self.index_of(id)
            .is_some_and(|idx| idx < self.num_key_columns)
    }

    /// Field at a position.
    pub fn field(&self, idx: usize) -> &Field {
        self.arrow.field(idx)
    }

    /// Field with a column id.
    pub fn field_by_id(&self, id: ColumnId) -> Option<&Field> {
        self.index_of(id).map(|idx| self.arrow.field(idx))
    }

    /// Whether both schemas have the same ids and types in the same order.
    pub fn same_layout(&self, other: &Schema) -> bool {
        self.column_ids == other.column_ids
            && self.num_key_columns == other.num_key_columns
            && self
                .arrow
                .fields()
                .iter()
                .zip(other.arrow.fields().iter())
                .all(|(a, b)| a.data_type() == b.data_type())
    }
}

/// Builder declaring a tablet schema column by column.
///
/// Key columns must be declared first; they are non-nullable.
#[derive(Clone, Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<(ColumnId, Field)>,
    num_key_columns: usize,
    key_closed: bool,
    misplaced_key: bool,
}

impl SchemaBuilder {
    /// Append a key column.
    pub fn key_column(mut self, id: ColumnId, name: impl Into<String>, data_type: DataType) -> Self {
        if self.key_closed {
            self.misplaced_key = true;
        } else {
            self.num_key_columns += 1;
        }
        self.fields.push((id, Field::new(name, data_type, false)));
        self
    }

    /// Append a value column.
    pub fn column(
        mut self,
        id: ColumnId,
        name: impl Into<String>,
        data_type: DataType,
        nullable: bool,
    ) -> Self {
        self.key_closed = true;
        self.fields.push((id, Field::new(name, data_type, nullable)));
        self
    }

    /// Finalise the builder, writing tablet metadata into the Arrow schema.
    pub fn build(self) -> Result<Schema, ConfigError> {
        if self.misplaced_key {
            return Err(ConfigError::InvalidSchema(
                "key columns must be declared before value columns".to_string(),
            ));
        }

        let column_ids: Vec<ColumnId> = self.fields.iter().map(|(id, _)| *id).collect();
        let fields: Vec<Field> = self
            .fields
            .into_iter()
            .map(|(id, field)| {
                let mut metadata = field.metadata().clone();
                metadata.insert(COLUMN_ID_KEY.to_string(), id.to_string());
                field.with_metadata(metadata)
            })
            .collect();
        let metadata = HashMap::from([(
            NUM_KEY_COLUMNS_KEY.to_string(),
            self.num_key_columns.to_string(),
        )]);
        let arrow = Arc::new(ArrowSchema::new_with_metadata(fields, metadata));

        Schema::validated(arrow, column_ids, self.num_key_columns)
    }
}

/// Whether values of this type can be compared, evaluated and used as keys.
pub fn is_scalar_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Binary
            | DataType::LargeBinary
            | DataType::FixedSizeBinary(_)
    )
}

/// Whether a physical column type may be read as the target type.
///
/// Widening integer and float conversions, small integers to `Float64`,
/// 32-bit to 64-bit offsets for strings and binaries, and fixed-width binary
/// to variable-width binary are allowed. Identity is always allowed.
pub fn conversion_rule(from: &DataType, to: &DataType) -> bool {
    use DataType::*;

    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Int8, Int16 | Int32 | Int64 | Float64)
            | (Int16, Int32 | Int64 | Float64)
            | (Int32, Int64 | Float64)
            | (UInt8, UInt16 | UInt32 | UInt64 | Int16 | Int32 | Int64 | Float64)
            | (UInt16, UInt32 | UInt64 | Int32 | Int64 | Float64)
            | (UInt32, UInt64 | Int64)
            | (Float32, Float64)
            | (Utf8, LargeUtf8)
            | (Binary, LargeBinary)
            | (FixedSizeBinary(_), Binary | LargeBinary)
    )
}
