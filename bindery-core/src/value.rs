use rust_decimal::Decimal;
use std::fmt::{self, Display, Formatter};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Dynamically typed SQL value.
///
/// Every variant carries an `Option`: `None` is a typed `NULL`, it still knows
/// what kind of value it would hold. `Value::Null` is the untyped `NULL`.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Decimal(Option<Decimal>),
    Varchar(Option<String>),
    Blob(Option<Box<[u8]>>),
    Date(Option<Date>),
    Time(Option<Time>),
    Timestamp(Option<PrimitiveDateTime>),
    TimestampWithTimezone(Option<OffsetDateTime>),
    Uuid(Option<Uuid>),
    List(Option<Vec<Value>>, /* type: */ Box<Value>),
}

impl Value {
    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(.., l), Self::List(.., r)) => l.same_type(r),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }

    /// True for `Value::Null` and for every typed `NULL`.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Boolean(v) => v.is_none(),
            Value::Int8(v) => v.is_none(),
            Value::Int16(v) => v.is_none(),
            Value::Int32(v) => v.is_none(),
            Value::Int64(v) => v.is_none(),
            Value::UInt8(v) => v.is_none(),
            Value::UInt16(v) => v.is_none(),
            Value::UInt32(v) => v.is_none(),
            Value::UInt64(v) => v.is_none(),
            Value::Float32(v) => v.is_none(),
            Value::Float64(v) => v.is_none(),
            Value::Decimal(v) => v.is_none(),
            Value::Varchar(v) => v.is_none(),
            Value::Blob(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
            Value::Time(v) => v.is_none(),
            Value::Timestamp(v) => v.is_none(),
            Value::TimestampWithTimezone(v) => v.is_none(),
            Value::Uuid(v) => v.is_none(),
            Value::List(v, ..) => v.is_none(),
        }
    }

    /// Name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(..) => "BOOLEAN",
            Value::Int8(..) => "TINYINT",
            Value::Int16(..) => "SMALLINT",
            Value::Int32(..) => "INTEGER",
            Value::Int64(..) => "BIGINT",
            Value::UInt8(..) => "UTINYINT",
            Value::UInt16(..) => "USMALLINT",
            Value::UInt32(..) => "UINTEGER",
            Value::UInt64(..) => "UBIGINT",
            Value::Float32(..) => "FLOAT",
            Value::Float64(..) => "DOUBLE",
            Value::Decimal(..) => "DECIMAL",
            Value::Varchar(..) => "VARCHAR",
            Value::Blob(..) => "BLOB",
            Value::Date(..) => "DATE",
            Value::Time(..) => "TIME",
            Value::Timestamp(..) => "TIMESTAMP",
            Value::TimestampWithTimezone(..) => "TIMESTAMPTZ",
            Value::Uuid(..) => "UUID",
            Value::List(..) => "LIST",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn write<T: Display>(f: &mut Formatter<'_>, value: &Option<T>) -> fmt::Result {
            match value {
                Some(v) => write!(f, "{v}"),
                None => f.write_str("NULL"),
            }
        }
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write(f, v),
            Value::Int8(v) => write(f, v),
            Value::Int16(v) => write(f, v),
            Value::Int32(v) => write(f, v),
            Value::Int64(v) => write(f, v),
            Value::UInt8(v) => write(f, v),
            Value::UInt16(v) => write(f, v),
            Value::UInt32(v) => write(f, v),
            Value::UInt64(v) => write(f, v),
            Value::Float32(v) => write(f, v),
            Value::Float64(v) => write(f, v),
            Value::Decimal(v) => write(f, v),
            Value::Varchar(Some(v)) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Varchar(None) => f.write_str("NULL"),
            Value::Blob(Some(v)) => write!(f, "<{} bytes>", v.len()),
            Value::Blob(None) => f.write_str("NULL"),
            Value::Date(v) => write(f, v),
            Value::Time(v) => write(f, v),
            Value::Timestamp(v) => write(f, v),
            Value::TimestampWithTimezone(v) => write(f, v),
            Value::Uuid(v) => write(f, v),
            Value::List(Some(values), ..) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::List(None, ..) => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn typed_nulls() {
        assert!(Value::Null.is_null());
        assert!(Value::Int32(None).is_null());
        assert!(!Value::Int32(Some(0)).is_null());
        assert!(Value::Int32(None).same_type(&Value::Int32(Some(5))));
        assert!(!Value::Int32(None).same_type(&Value::Int64(None)));
        assert_ne!(Value::Int32(None), Value::Null);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Varchar(Some("it's".into())).to_string(), "'it''s'");
        assert_eq!(Value::Int64(None).to_string(), "NULL");
        assert_eq!(
            Value::List(
                Some(vec![Value::Int8(Some(1)), Value::Int8(Some(2))]),
                Box::new(Value::Int8(None))
            )
            .to_string(),
            "[1, 2]"
        );
    }
}
