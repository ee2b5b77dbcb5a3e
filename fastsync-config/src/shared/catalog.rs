use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const REPLICATION_METHOD_KEY: &str = "replication-method";
const REPLICATION_KEY_KEY: &str = "replication-key";
const SCHEMA_NAME_KEY: &str = "schema-name";
const DATABASE_NAME_KEY: &str = "database-name";

/// How a stream is replicated after the initial full copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMethod {
    LogBased,
    Incremental,
    FullTable,
}

impl ReplicationMethod {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "LOG_BASED" => Some(Self::LogBased),
            "INCREMENTAL" => Some(Self::Incremental),
            "FULL_TABLE" => Some(Self::FullTable),
            _ => None,
        }
    }
}

/// A singer catalog (`properties.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub streams: Vec<CatalogStream>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStream {
    pub tap_stream_id: Option<String>,
    pub stream: Option<String>,
    pub table_name: Option<String>,
    #[serde(default)]
    pub metadata: Vec<CatalogMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
    #[serde(default)]
    pub breadcrumb: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Replication settings of one stream, read from its top-level metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReplication {
    /// `None` when the method is missing or not recognised.
    pub method: Option<ReplicationMethod>,
    pub replication_key: Option<String>,
}

impl CatalogStream {
    /// Metadata entry with an empty breadcrumb, which describes the stream itself.
    fn stream_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .map(|entry| &entry.metadata)
    }

    fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref().or(self.stream.as_deref())
    }

    /// `schema.table`, or the bare table name when the stream has no schema or database.
    pub fn qualified_name(&self) -> Option<String> {
        let table_name = self.table_name()?;
        let metadata = self.stream_metadata();
        let namespace = metadata.and_then(|metadata| {
            metadata
                .get(SCHEMA_NAME_KEY)
                .or_else(|| metadata.get(DATABASE_NAME_KEY))
                .and_then(Value::as_str)
        });

        match namespace {
            Some(namespace) => Some(format!("{namespace}.{table_name}")),
            None => Some(table_name.to_owned()),
        }
    }

    pub fn replication(&self) -> StreamReplication {
        let metadata = self.stream_metadata();
        let string_value = |key: &str| {
            metadata
                .and_then(|metadata| metadata.get(key))
                .and_then(Value::as_str)
        };

        StreamReplication {
            method: string_value(REPLICATION_METHOD_KEY).and_then(ReplicationMethod::parse),
            replication_key: string_value(REPLICATION_KEY_KEY).map(str::to_owned),
        }
    }
}

impl Catalog {
    /// Finds the replication settings of a table selected as `schema.table`.
    pub fn replication_for(&self, table: &str) -> Option<StreamReplication> {
        self.streams
            .iter()
            .find(|stream| stream.qualified_name().as_deref() == Some(table))
            .map(CatalogStream::replication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        serde_json::from_str(
            r#"{"streams": [
                {
                    "tap_stream_id": "public-orders",
                    "table_name": "orders",
                    "metadata": [
                        {"breadcrumb": ["properties", "id"], "metadata": {"sql-datatype": "integer"}},
                        {"breadcrumb": [], "metadata": {"schema-name": "public", "replication-method": "LOG_BASED"}}
                    ]
                },
                {
                    "tap_stream_id": "shop-items",
                    "stream": "items",
                    "metadata": [
                        {"breadcrumb": [], "metadata": {
                            "database-name": "shop",
                            "replication-method": "INCREMENTAL",
                            "replication-key": "updated_at"
                        }}
                    ]
                }
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_replication_for_schema_stream() {
        let replication = catalog().replication_for("public.orders").unwrap();

        assert_eq!(replication.method, Some(ReplicationMethod::LogBased));
        assert_eq!(replication.replication_key, None);
    }

    #[test]
    fn test_replication_for_database_stream_uses_stream_name() {
        let replication = catalog().replication_for("shop.items").unwrap();

        assert_eq!(replication.method, Some(ReplicationMethod::Incremental));
        assert_eq!(replication.replication_key.as_deref(), Some("updated_at"));
    }

    #[test]
    fn test_unknown_table() {
        assert!(catalog().replication_for("public.missing").is_none());
        assert!(Catalog::default().replication_for("public.orders").is_none());
    }
}
