//! Table schemas and structural changes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use ccindex_common::types::hive_partitions;

use super::CatalogError;

/// Logical column type, named the way SQL engines spell them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Float,
    Double,
    Varchar,
    Blob,
    Date,
    Timestamp,
    TimestampTz,
    Other(String),
}

impl ColumnType {
    /// Whether values of `self` can be stored in a column of type `to`
    /// without loss.
    pub fn can_widen_to(&self, to: &ColumnType) -> bool {
        self == to
            || matches!(
                (self, to),
                (ColumnType::Timestamp, ColumnType::TimestampTz)
                    | (ColumnType::Integer, ColumnType::BigInt)
                    | (ColumnType::Float, ColumnType::Double)
            )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Blob => "BLOB",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
            ColumnType::Other(name) => name,
        };
        f.write_str(name)
    }
}

impl FromStr for ColumnType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "INTEGER" | "INT" | "INT4" => ColumnType::Integer,
            "BIGINT" | "INT8" => ColumnType::BigInt,
            "FLOAT" | "REAL" => ColumnType::Float,
            "DOUBLE" => ColumnType::Double,
            "VARCHAR" | "TEXT" | "STRING" => ColumnType::Varchar,
            "BLOB" | "BYTEA" => ColumnType::Blob,
            "DATE" => ColumnType::Date,
            "TIMESTAMP" => ColumnType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => ColumnType::TimestampTz,
            _ => ColumnType::Other(s.trim().to_string()),
        })
    }
}

impl From<String> for ColumnType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(column_type) => column_type,
            Err(never) => match never {},
        }
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// An irreversible change to a table's structure.
///
/// Changes describe a target state. Applying one whose target already holds
/// leaves the schema untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralChange {
    /// Add nullable columns.
    AddColumns { columns: Vec<ColumnDef> },
    /// Change a column to a wider type.
    WidenColumnType { column: String, to: ColumnType },
    /// Replace the partitioning scheme.
    Repartition { partition_by: Vec<String> },
}

impl fmt::Display for StructuralChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralChange::AddColumns { columns } => {
                let names: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.column_type))
                    .collect();
                write!(f, "add columns ({})", names.join(", "))
            },
            StructuralChange::WidenColumnType { column, to } => {
                write!(f, "widen {} to {}", column, to)
            },
            StructuralChange::Repartition { partition_by } => {
                write!(f, "partition by ({})", partition_by.join(", "))
            },
        }
    }
}

/// Columns and partitioning of a catalog table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub partition_by: Vec<String>,
}

impl TableSchema {
    /// Build a table schema from a file's columns. Partition keys the file
    /// does not carry as columns are appended as `VARCHAR`; their values come
    /// from the file's hive path.
    pub fn from_file(columns: Vec<ColumnDef>, partition_by: &[String]) -> Self {
        let mut schema = Self {
            columns,
            partition_by: partition_by.to_vec(),
        };
        schema.add_partition_columns();
        schema
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn is_partition_column(&self, name: &str) -> bool {
        self.partition_by.iter().any(|key| key == name)
    }

    fn add_partition_columns(&mut self) {
        for key in self.partition_by.clone() {
            if self.column(&key).is_none() {
                self.columns
                    .push(ColumnDef::new(key, ColumnType::Varchar).required());
            }
        }
    }

    /// Apply `change` in place. Returns whether anything changed.
    pub fn apply(&mut self, table: &str, change: &StructuralChange) -> Result<bool, CatalogError> {
        match change {
            StructuralChange::AddColumns { columns } => {
                let mut changed = false;
                for column in columns {
                    match self.column(&column.name) {
                        Some(existing) if existing.column_type == column.column_type => {},
                        Some(existing) => {
                            return Err(CatalogError::IncompatibleChange {
                                column: column.name.clone(),
                                from: existing.column_type.clone(),
                                to: column.column_type.clone(),
                            });
                        },
                        None => {
                            self.columns.push(ColumnDef {
                                nullable: true,
                                ..column.clone()
                            });
                            changed = true;
                        },
                    }
                }
                Ok(changed)
            },
            StructuralChange::WidenColumnType { column, to } => {
                let existing = self
                    .columns
                    .iter_mut()
                    .find(|c| &c.name == column)
                    .ok_or_else(|| CatalogError::ColumnNotFound {
                        table: table.to_string(),
                        column: column.clone(),
                    })?;

                if &existing.column_type == to {
                    Ok(false)
                } else if existing.column_type.can_widen_to(to) {
                    existing.column_type = to.clone();
                    Ok(true)
                } else {
                    Err(CatalogError::IncompatibleChange {
                        column: column.clone(),
                        from: existing.column_type.clone(),
                        to: to.clone(),
                    })
                }
            },
            StructuralChange::Repartition { partition_by } => {
                if &self.partition_by == partition_by {
                    return Ok(false);
                }
                self.partition_by = partition_by.clone();
                self.add_partition_columns();
                Ok(true)
            },
        }
    }

    /// Check that a file with `file_columns` can back this table.
    ///
    /// Every file column must exist in the table with a type that widens to
    /// the table's. Table columns absent from the file are accepted only when
    /// `allow_missing` is set. Partition columns are never expected in the
    /// file.
    pub fn check_file(
        &self,
        table: &str,
        location: &str,
        file_columns: &[ColumnDef],
        allow_missing: bool,
    ) -> Result<(), CatalogError> {
        let mismatch = |reason: String| CatalogError::SchemaMismatch {
            table: table.to_string(),
            location: location.to_string(),
            reason,
        };

        for column in file_columns {
            let Some(existing) = self.column(&column.name) else {
                return Err(mismatch(format!("unknown column {}", column.name)));
            };
            if !column.column_type.can_widen_to(&existing.column_type) {
                return Err(mismatch(format!(
                    "column {} is {} in the file but {} in the table",
                    column.name, column.column_type, existing.column_type
                )));
            }
        }

        if !allow_missing {
            let missing: Vec<&str> = self
                .columns
                .iter()
                .filter(|c| !self.is_partition_column(&c.name))
                .filter(|c| !file_columns.iter().any(|f| f.name == c.name))
                .map(|c| c.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(mismatch(format!("missing columns {}", missing.join(", "))));
            }
        }

        Ok(())
    }

    /// Partition values of a file, read from its hive-style location.
    pub fn partition_values(
        &self,
        table: &str,
        location: &str,
    ) -> Result<BTreeMap<String, String>, CatalogError> {
        let segments = hive_partitions(location);
        self.partition_by
            .iter()
            .map(|key| {
                segments
                    .iter()
                    .find(|(k, _)| *k == key.as_str())
                    .map(|(_, v)| (key.clone(), v.to_string()))
                    .ok_or_else(|| CatalogError::SchemaMismatch {
                        table: table.to_string(),
                        location: location.to_string(),
                        reason: format!("no value for partition key {}", key),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_schema() -> TableSchema {
        TableSchema::from_file(
            vec![
                ColumnDef::new("url", ColumnType::Varchar),
                ColumnDef::new("fetch_time", ColumnType::Timestamp),
                ColumnDef::new("fetch_status", ColumnType::Integer),
            ],
            &["crawl".to_string(), "subset".to_string()],
        )
    }

    #[test]
    fn test_column_type_names() {
        assert_eq!("timestamptz".parse::<ColumnType>().unwrap(), ColumnType::TimestampTz);
        assert_eq!(ColumnType::from("DECIMAL(10,2)".to_string()).to_string(), "DECIMAL(10,2)");
        assert!(ColumnType::Timestamp.can_widen_to(&ColumnType::TimestampTz));
        assert!(!ColumnType::TimestampTz.can_widen_to(&ColumnType::Timestamp));
    }

    #[test]
    fn test_partition_columns_are_appended() {
        let schema = base_schema();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["url", "fetch_time", "fetch_status", "crawl", "subset"]);
    }

    #[test]
    fn test_apply_is_a_target_state() {
        let mut schema = base_schema();
        let add = StructuralChange::AddColumns {
            columns: vec![ColumnDef::new("content_charset", ColumnType::Varchar)],
        };
        assert!(schema.apply("archives", &add).unwrap());
        assert!(!schema.apply("archives", &add).unwrap());

        let widen = StructuralChange::WidenColumnType {
            column: "fetch_time".to_string(),
            to: ColumnType::TimestampTz,
        };
        assert!(schema.apply("archives", &widen).unwrap());
        assert!(!schema.apply("archives", &widen).unwrap());
        assert_eq!(
            schema.column("fetch_time").unwrap().column_type,
            ColumnType::TimestampTz
        );
    }

    #[test]
    fn test_apply_rejects_narrowing_and_unknown_columns() {
        let mut schema = base_schema();
        let narrow = StructuralChange::WidenColumnType {
            column: "url".to_string(),
            to: ColumnType::Integer,
        };
        assert!(matches!(
            schema.apply("archives", &narrow),
            Err(CatalogError::IncompatibleChange { .. })
        ));

        let unknown = StructuralChange::WidenColumnType {
            column: "nope".to_string(),
            to: ColumnType::BigInt,
        };
        assert!(matches!(
            schema.apply("archives", &unknown),
            Err(CatalogError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_repartition_adds_new_keys() {
        let mut schema = base_schema();
        let change = StructuralChange::Repartition {
            partition_by: vec!["crawl".to_string(), "subset".to_string(), "year".to_string()],
        };
        assert!(schema.apply("archives", &change).unwrap());
        assert_eq!(schema.partition_by.len(), 3);
        assert!(schema.column("year").is_some());
    }

    #[test]
    fn test_check_file() {
        let mut schema = base_schema();
        schema
            .apply(
                "archives",
                &StructuralChange::AddColumns {
                    columns: vec![ColumnDef::new("content_charset", ColumnType::Varchar)],
                },
            )
            .unwrap();

        let old_file = vec![
            ColumnDef::new("url", ColumnType::Varchar),
            ColumnDef::new("fetch_time", ColumnType::Timestamp),
            ColumnDef::new("fetch_status", ColumnType::Integer),
        ];
        assert!(schema.check_file("archives", "loc", &old_file, true).is_ok());
        assert!(schema.check_file("archives", "loc", &old_file, false).is_err());

        let tz_file = vec![ColumnDef::new("fetch_time", ColumnType::TimestampTz)];
        assert!(matches!(
            schema.check_file("archives", "loc", &tz_file, true),
            Err(CatalogError::SchemaMismatch { .. })
        ));

        let extra = vec![ColumnDef::new("fetch_redirect", ColumnType::Varchar)];
        assert!(schema.check_file("archives", "loc", &extra, true).is_err());
    }

    #[test]
    fn test_partition_values_from_location() {
        let schema = base_schema();
        let values = schema
            .partition_values(
                "archives",
                "https://data.commoncrawl.org/cc-index/table/cc-main/warc/crawl=CC-MAIN-2013-20/subset=warc/part-0.parquet",
            )
            .unwrap();
        assert_eq!(values.get("crawl").map(String::as_str), Some("CC-MAIN-2013-20"));
        assert_eq!(values.get("subset").map(String::as_str), Some("warc"));

        assert!(schema
            .partition_values("archives", "cc-index/crawl=CC-MAIN-2013-20/part-0.parquet")
            .is_err());
    }

    #[test]
    fn test_structural_change_serde() {
        let change = StructuralChange::WidenColumnType {
            column: "fetch_time".to_string(),
            to: ColumnType::TimestampTz,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"widen_column_type","column":"fetch_time","to":"TIMESTAMPTZ"}"#
        );
        assert_eq!(serde_json::from_str::<StructuralChange>(&json).unwrap(), change);
    }
}
