//! Shared scalar types for the cube model and semantic query layer.

use serde::{Deserialize, Serialize};

/// SQL data types with precision/scale where applicable.
///
/// Retained for dimension/measure metadata (e.g. annotation `format` hints);
/// this crate does not emit DDL, so no `emit_data_type` consumer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal(u8, u8),
    String,
    Char(u16),
    Varchar(u16),
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Binary,
    Json,
    Uuid,
}

impl DataType {
    /// Parse a type string like "decimal(10,2)" or "varchar(255)".
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        let s = s.trim();

        if let Some(inner) = s.strip_prefix("decimal(").and_then(|s| s.strip_suffix(')')) {
            let parts: Vec<&str> = inner.split(',').collect();
            if parts.len() == 2 {
                let precision = parts[0].trim().parse().ok()?;
                let scale = parts[1].trim().parse().ok()?;
                return Some(DataType::Decimal(precision, scale));
            }
        }

        if let Some(inner) = s.strip_prefix("varchar(").and_then(|s| s.strip_suffix(')')) {
            let len = inner.trim().parse().ok()?;
            return Some(DataType::Varchar(len));
        }

        if let Some(inner) = s.strip_prefix("char(").and_then(|s| s.strip_suffix(')')) {
            let len = inner.trim().parse().ok()?;
            return Some(DataType::Char(len));
        }

        match s {
            "bool" | "boolean" => Some(DataType::Bool),
            "int8" | "tinyint" => Some(DataType::Int8),
            "int16" | "smallint" => Some(DataType::Int16),
            "int32" | "int" | "integer" => Some(DataType::Int32),
            "int64" | "bigint" => Some(DataType::Int64),
            "float32" | "float" | "real" => Some(DataType::Float32),
            "float64" | "double" => Some(DataType::Float64),
            "string" | "text" => Some(DataType::String),
            "date" => Some(DataType::Date),
            "time" => Some(DataType::Time),
            "timestamp" | "datetime" => Some(DataType::Timestamp),
            "timestamptz" | "datetimeoffset" => Some(DataType::TimestampTz),
            "binary" | "blob" | "varbinary" => Some(DataType::Binary),
            "json" | "jsonb" => Some(DataType::Json),
            "uuid" | "uniqueidentifier" => Some(DataType::Uuid),
            _ => None,
        }
    }
}

/// Aggregation types for measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
}

impl std::fmt::Display for AggregationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationType::Sum => write!(f, "SUM"),
            AggregationType::Count => write!(f, "COUNT"),
            AggregationType::CountDistinct => write!(f, "COUNT_DISTINCT"),
            AggregationType::Avg => write!(f, "AVG"),
            AggregationType::Min => write!(f, "MIN"),
            AggregationType::Max => write!(f, "MAX"),
        }
    }
}

/// Time-bucket granularity applied to a time dimension via truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "second" => Some(Granularity::Second),
            "minute" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "week" => Some(Granularity::Week),
            "month" => Some(Granularity::Month),
            "quarter" => Some(Granularity::Quarter),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }

    /// Ordinal used by comparison-query day-of-period and period-index math.
    pub fn rank(&self) -> u8 {
        match self {
            Granularity::Second => 0,
            Granularity::Minute => 1,
            Granularity::Hour => 2,
            Granularity::Day => 3,
            Granularity::Week => 4,
            Granularity::Month => 5,
            Granularity::Quarter => 6,
            Granularity::Year => 7,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
