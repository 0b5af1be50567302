//! Parquet footer reading over ranged requests
//!
//! Registration needs only a file's schema and row statistics, both of which
//! live in the footer. The footer is fetched with suffix range requests so no
//! row data is ever transferred.

use parquet::basic::{ConvertedType, LogicalType, Type as PhysicalType};
use parquet::file::footer::{decode_footer, decode_metadata};
use parquet::file::FOOTER_SIZE;
use parquet::schema::types::ColumnDescriptor;
use tracing::debug;

use super::schema::{ColumnDef, ColumnType};
use super::CatalogError;
use crate::transport::RemoteStore;

/// Bytes requested on the first read. Footers of the columnar index are
/// well below this, so one request is the common case.
pub const INITIAL_SUFFIX_LEN: usize = 64 * 1024;

/// What registration needs to know about a data file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub columns: Vec<ColumnDef>,
    pub num_rows: i64,
    pub num_row_groups: usize,
}

/// Read the footer of the Parquet file at `location`.
pub async fn read_metadata(
    store: &dyn RemoteStore,
    location: &str,
) -> Result<FileMetadata, CatalogError> {
    let invalid = |message: String| CatalogError::InvalidParquet {
        location: location.to_string(),
        message,
    };

    let mut suffix = store.get_suffix(location, INITIAL_SUFFIX_LEN).await?;
    let footer = footer_bytes(&suffix).ok_or_else(|| {
        invalid(format!("file is only {} bytes long", suffix.len()))
    })?;
    let metadata_len = decode_footer(&footer).map_err(|e| invalid(e.to_string()))?;

    let needed = metadata_len + FOOTER_SIZE;
    if needed > suffix.len() {
        if suffix.len() < INITIAL_SUFFIX_LEN {
            return Err(invalid(format!(
                "footer claims {} metadata bytes but the file is {} bytes long",
                metadata_len,
                suffix.len()
            )));
        }
        debug!(location, needed, "Footer exceeds initial read, refetching");
        suffix = store.get_suffix(location, needed).await?;
        if suffix.len() < needed {
            return Err(invalid(format!(
                "expected {} footer bytes, received {}",
                needed,
                suffix.len()
            )));
        }
    }

    let start = suffix.len() - needed;
    let metadata = decode_metadata(&suffix[start..suffix.len() - FOOTER_SIZE])
        .map_err(|e| invalid(e.to_string()))?;

    let file_metadata = metadata.file_metadata();
    let columns = file_metadata
        .schema_descr()
        .columns()
        .iter()
        .map(|column| ColumnDef {
            name: column.path().string(),
            column_type: column_type(column),
            nullable: column.max_def_level() > 0,
        })
        .collect();

    Ok(FileMetadata {
        columns,
        num_rows: file_metadata.num_rows(),
        num_row_groups: metadata.num_row_groups(),
    })
}

fn footer_bytes(suffix: &[u8]) -> Option<[u8; FOOTER_SIZE]> {
    let start = suffix.len().checked_sub(FOOTER_SIZE)?;
    suffix[start..].try_into().ok()
}

/// Map a Parquet column to its logical type: logical annotation first, then
/// the legacy converted type, then the physical type.
pub fn column_type(column: &ColumnDescriptor) -> ColumnType {
    from_logical(column.logical_type())
        .or_else(|| from_converted(column.converted_type()))
        .unwrap_or_else(|| from_physical(column.physical_type()))
}

fn from_logical(logical: Option<LogicalType>) -> Option<ColumnType> {
    match logical? {
        LogicalType::String | LogicalType::Enum | LogicalType::Json => Some(ColumnType::Varchar),
        LogicalType::Timestamp {
            is_adjusted_to_u_t_c: true,
            ..
        } => Some(ColumnType::TimestampTz),
        LogicalType::Timestamp { .. } => Some(ColumnType::Timestamp),
        LogicalType::Date => Some(ColumnType::Date),
        LogicalType::Integer { bit_width: 64, .. } => Some(ColumnType::BigInt),
        LogicalType::Integer { .. } => Some(ColumnType::Integer),
        LogicalType::Decimal { scale, precision } => {
            Some(ColumnType::Other(format!("DECIMAL({},{})", precision, scale)))
        },
        _ => None,
    }
}

fn from_converted(converted: ConvertedType) -> Option<ColumnType> {
    match converted {
        ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON => {
            Some(ColumnType::Varchar)
        },
        ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS => {
            Some(ColumnType::Timestamp)
        },
        ConvertedType::DATE => Some(ColumnType::Date),
        ConvertedType::INT_64 | ConvertedType::UINT_32 => Some(ColumnType::BigInt),
        ConvertedType::INT_8 | ConvertedType::INT_16 | ConvertedType::INT_32 => {
            Some(ColumnType::Integer)
        },
        _ => None,
    }
}

fn from_physical(physical: PhysicalType) -> ColumnType {
    match physical {
        PhysicalType::BOOLEAN => ColumnType::Boolean,
        PhysicalType::INT32 => ColumnType::Integer,
        PhysicalType::INT64 => ColumnType::BigInt,
        PhysicalType::INT96 => ColumnType::Timestamp,
        PhysicalType::FLOAT => ColumnType::Float,
        PhysicalType::DOUBLE => ColumnType::Double,
        _ => ColumnType::Blob,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryStore;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::sync::Arc;

    fn empty_parquet(message_type: &str) -> Vec<u8> {
        let schema = Arc::new(parse_message_type(message_type).unwrap());
        let props = Arc::new(WriterProperties::builder().build());
        let mut buffer = Vec::new();
        let writer = SerializedFileWriter::new(&mut buffer, schema, props).unwrap();
        writer.close().unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_reads_columns_and_types() {
        let bytes = empty_parquet(
            "message schema {
                OPTIONAL BYTE_ARRAY url (UTF8);
                OPTIONAL INT64 fetch_time (TIMESTAMP(MILLIS, false));
                OPTIONAL INT64 fetch_time_utc (TIMESTAMP(MICROS, true));
                REQUIRED INT32 fetch_status;
                OPTIONAL INT96 legacy_time;
                OPTIONAL BYTE_ARRAY payload;
            }",
        );
        let store = MemoryStore::new();
        store.insert("mem://a.parquet", bytes);

        let metadata = read_metadata(&store, "mem://a.parquet").await.unwrap();
        let types: Vec<(String, ColumnType, bool)> = metadata
            .columns
            .into_iter()
            .map(|c| (c.name, c.column_type, c.nullable))
            .collect();

        assert_eq!(
            types,
            vec![
                ("url".to_string(), ColumnType::Varchar, true),
                ("fetch_time".to_string(), ColumnType::Timestamp, true),
                ("fetch_time_utc".to_string(), ColumnType::TimestampTz, true),
                ("fetch_status".to_string(), ColumnType::Integer, false),
                ("legacy_time".to_string(), ColumnType::Timestamp, true),
                ("payload".to_string(), ColumnType::Blob, true),
            ]
        );
        assert_eq!(metadata.num_rows, 0);
        assert_eq!(metadata.num_row_groups, 0);
    }

    #[tokio::test]
    async fn test_rejects_non_parquet() {
        let store = MemoryStore::new();
        store.insert("mem://short", b"PAR1".to_vec());
        store.insert("mem://junk", vec![7u8; 128]);

        assert!(matches!(
            read_metadata(&store, "mem://short").await,
            Err(CatalogError::InvalidParquet { .. })
        ));
        assert!(matches!(
            read_metadata(&store, "mem://junk").await,
            Err(CatalogError::InvalidParquet { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_errors_pass_through() {
        let store = MemoryStore::new();
        assert!(matches!(
            read_metadata(&store, "mem://missing").await,
            Err(CatalogError::Transport(_))
        ));
    }
}
