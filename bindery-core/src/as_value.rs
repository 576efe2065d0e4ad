use crate::Value;
use anyhow::{Error, Result};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::{any, sync::Arc};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`].
///
/// It backs the built-in binders and column mappers: a type implementing
/// `AsValue` can be bound as a parameter and read back from a column without
/// any further registration.
///
/// # Conversion contract
/// - `as_value` wraps the value in its canonical variant, without lossy
///   transformations.
/// - `try_from_value` accepts the canonical variant and, for numbers, any other
///   numeric variant whose value fits, range checks always happen first.
/// - `NULL` converts only into `Option<T>`, every other target reports an error.
///
/// # Examples
/// ```rust
/// use bindery_core::{AsValue, Value};
/// let v = 42i32.as_value();
/// assert_eq!(v, Value::Int32(Some(42)));
/// let n: i64 = AsValue::try_from_value(v).unwrap();
/// assert_eq!(n, 42);
/// ```
pub trait AsValue {
    /// The typed `NULL` for this type.
    fn as_empty_value() -> Value;
    /// Owned [`Value`] representation of `self`.
    fn as_value(self) -> Value;
    /// Attempt to convert a dynamic [`Value`] into `Self`.
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

fn cannot_convert<T>(value: &Value) -> Error {
    if value.is_null() {
        Error::msg(format!(
            "Cannot convert NULL ({}) to {}",
            value.type_name(),
            any::type_name::<T>()
        ))
    } else {
        Error::msg(format!(
            "Cannot convert {} ({}) to {}",
            value,
            value.type_name(),
            any::type_name::<T>()
        ))
    }
}

macro_rules! impl_as_value_integer {
    ($source:ty, $destination:path) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                let wide: i128 = match value {
                    Value::Int8(Some(v)) => v as _,
                    Value::Int16(Some(v)) => v as _,
                    Value::Int32(Some(v)) => v as _,
                    Value::Int64(Some(v)) => v as _,
                    Value::UInt8(Some(v)) => v as _,
                    Value::UInt16(Some(v)) => v as _,
                    Value::UInt32(Some(v)) => v as _,
                    Value::UInt64(Some(v)) => v as _,
                    Value::Decimal(Some(v)) if v.is_integer() => v.to_i128().ok_or_else(|| {
                        Error::msg(format!("Value {v}: Decimal does not fit into i128"))
                    })?,
                    _ => return Err(cannot_convert::<Self>(&value)),
                };
                <$source>::try_from(wide).map_err(|_| {
                    Error::msg(format!(
                        "Value {wide} is out of range for {}",
                        any::type_name::<Self>(),
                    ))
                })
            }
        }
    };
}

impl_as_value_integer!(i8, Value::Int8);
impl_as_value_integer!(i16, Value::Int16);
impl_as_value_integer!(i32, Value::Int32);
impl_as_value_integer!(i64, Value::Int64);
impl_as_value_integer!(u8, Value::UInt8);
impl_as_value_integer!(u16, Value::UInt16);
impl_as_value_integer!(u32, Value::UInt32);
impl_as_value_integer!(u64, Value::UInt64);

macro_rules! impl_as_value_float {
    ($source:ty, $destination:path, $from_decimal:ident) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Float32(Some(v)) => Ok(v as _),
                    Value::Float64(Some(v)) => Ok(v as _),
                    Value::Int8(Some(v)) => Ok(v as _),
                    Value::Int16(Some(v)) => Ok(v as _),
                    Value::Int32(Some(v)) => Ok(v as _),
                    Value::UInt8(Some(v)) => Ok(v as _),
                    Value::UInt16(Some(v)) => Ok(v as _),
                    Value::UInt32(Some(v)) => Ok(v as _),
                    Value::Decimal(Some(v)) => v.$from_decimal().ok_or_else(|| {
                        Error::msg(format!(
                            "Value {v}: Decimal does not fit into {}",
                            any::type_name::<Self>()
                        ))
                    }),
                    _ => Err(cannot_convert::<Self>(&value)),
                }
            }
        }
    };
}

impl_as_value_float!(f32, Value::Float32, to_f32);
impl_as_value_float!(f64, Value::Float64, to_f64);

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(Some(v)) => Ok(v),
            Value::Int8(Some(v)) => Ok(v != 0),
            Value::Int16(Some(v)) => Ok(v != 0),
            Value::Int32(Some(v)) => Ok(v != 0),
            Value::Int64(Some(v)) => Ok(v != 0),
            Value::UInt8(Some(v)) => Ok(v != 0),
            Value::UInt16(Some(v)) => Ok(v != 0),
            Value::UInt32(Some(v)) => Ok(v != 0),
            Value::UInt64(Some(v)) => Ok(v != 0),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
}

impl AsValue for Decimal {
    fn as_empty_value() -> Value {
        Value::Decimal(None)
    }
    fn as_value(self) -> Value {
        Value::Decimal(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        let result = match &value {
            Value::Decimal(Some(v)) => Some(*v),
            Value::Int8(Some(v)) => Some(Decimal::from(*v)),
            Value::Int16(Some(v)) => Some(Decimal::from(*v)),
            Value::Int32(Some(v)) => Some(Decimal::from(*v)),
            Value::Int64(Some(v)) => Some(Decimal::from(*v)),
            Value::UInt8(Some(v)) => Some(Decimal::from(*v)),
            Value::UInt16(Some(v)) => Some(Decimal::from(*v)),
            Value::UInt32(Some(v)) => Some(Decimal::from(*v)),
            Value::UInt64(Some(v)) => Some(Decimal::from(*v)),
            Value::Float32(Some(v)) => Decimal::from_f32(*v),
            Value::Float64(Some(v)) => Decimal::from_f64(*v),
            Value::Varchar(Some(v)) => v.parse().ok(),
            _ => None,
        };
        result.ok_or_else(|| cannot_convert::<Self>(&value))
    }
}

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            Value::Uuid(Some(v)) => Ok(v.to_string()),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
}

impl AsValue for Arc<str> {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.as_ref().into()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        String::try_from_value(value).map(Into::into)
    }
}

impl AsValue for Box<[u8]> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v),
            Value::Varchar(Some(v)) => Ok(v.into_bytes().into_boxed_slice()),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
}

impl AsValue for Uuid {
    fn as_empty_value() -> Value {
        Value::Uuid(None)
    }
    fn as_value(self) -> Value {
        Value::Uuid(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(Some(v)) => Ok(v),
            Value::Varchar(Some(ref v)) => Uuid::parse_str(v).map_err(|e| {
                Error::new(e).context(format!("While converting `{v}` to {}", "Uuid"))
            }),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
}

macro_rules! impl_as_value_temporal {
    ($source:ty, $destination:path) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    $destination(Some(v)) => Ok(v),
                    _ => Err(cannot_convert::<Self>(&value)),
                }
            }
        }
    };
}

impl_as_value_temporal!(Date, Value::Date);
impl_as_value_temporal!(Time, Value::Time);
impl_as_value_temporal!(PrimitiveDateTime, Value::Timestamp);
impl_as_value_temporal!(OffsetDateTime, Value::TimestampWithTimezone);

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::try_from_value(value).map(Some)
    }
}

impl<T: AsValue> AsValue for Vec<T> {
    fn as_empty_value() -> Value {
        Value::List(None, Box::new(T::as_empty_value()))
    }
    fn as_value(self) -> Value {
        Value::List(
            Some(self.into_iter().map(AsValue::as_value).collect()),
            Box::new(T::as_empty_value()),
        )
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(Some(values), ..) => values.into_iter().map(T::try_from_value).collect(),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
}

impl<T: AsValue> From<T> for Value {
    fn from(value: T) -> Self {
        value.as_value()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(Some(value.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::AsValue;
    use crate::Value;
    use rust_decimal::Decimal;

    #[test]
    fn integers_widen_and_check_range() {
        assert_eq!(i64::try_from_value(Value::Int8(Some(-3))).unwrap(), -3);
        assert_eq!(u16::try_from_value(Value::Int64(Some(65535))).unwrap(), 65535);
        assert!(u16::try_from_value(Value::Int64(Some(65536))).is_err());
        assert!(u8::try_from_value(Value::Int32(Some(-1))).is_err());
        assert_eq!(
            i32::try_from_value(Value::Decimal(Some(Decimal::new(1200, 2)))).unwrap(),
            12
        );
        assert!(i32::try_from_value(Value::Decimal(Some(Decimal::new(1201, 2)))).is_err());
    }

    #[test]
    fn canonical_variants() {
        assert_eq!(i64::try_from_value(i64::MIN.as_value()).unwrap(), i64::MIN);
        assert_eq!(u64::try_from_value(u64::MAX.as_value()).unwrap(), u64::MAX);
        assert_eq!(i8::try_from_value(Value::Int8(Some(-128))).unwrap(), -128);
        assert_eq!(f32::try_from_value(Value::Float32(Some(1.5))).unwrap(), 1.5);
        assert_eq!(f64::try_from_value(f64::MAX.as_value()).unwrap(), f64::MAX);
        assert_eq!(f64::try_from_value(Value::Int32(Some(7))).unwrap(), 7.0);
    }

    #[test]
    fn null_only_into_option() {
        assert!(i32::try_from_value(Value::Int32(None)).is_err());
        assert!(String::try_from_value(Value::Null).is_err());
        assert_eq!(Option::<i32>::try_from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Option::<i32>::try_from_value(Value::Int16(Some(7))).unwrap(),
            Some(7)
        );
        assert_eq!(None::<String>.as_value(), Value::Varchar(None));
    }

    #[test]
    fn bool_from_integers() {
        assert!(bool::try_from_value(Value::Int8(Some(1))).unwrap());
        assert!(!bool::try_from_value(Value::UInt64(Some(0))).unwrap());
        assert!(bool::try_from_value(Value::Float32(Some(0.5))).is_err());
    }

    #[test]
    fn lists() {
        let value = vec![1i32, 2, 3].as_value();
        assert_eq!(
            value,
            Value::List(
                Some(vec![
                    Value::Int32(Some(1)),
                    Value::Int32(Some(2)),
                    Value::Int32(Some(3))
                ]),
                Box::new(Value::Int32(None))
            )
        );
        assert_eq!(Vec::<i64>::try_from_value(value).unwrap(), vec![1, 2, 3]);
    }
}
