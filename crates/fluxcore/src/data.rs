//! Data boxes: the polymorphic value containers carried by ports.
//!
//! A [`DataBox`] pairs a runtime type tag with one [`Value`]. Boxes are shared
//! between the producing port and every consuming port (`Arc`), and support
//! in-place overwrite so a consumer can refresh a box without changing its
//! identity. Domain types that are not part of the built-in union participate
//! through [`OpaqueValue`].

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Units of the duration ladder, nanoseconds through years.
///
/// Calendar units use the civil averages (day = 86 400 s,
/// month = 2 629 746 s, year = 31 556 952 s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 9] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
        TimeUnit::Months,
        TimeUnit::Years,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Months => "months",
            TimeUnit::Years => "years",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        TimeUnit::ALL.into_iter().find(|unit| unit.tag() == tag)
    }

    fn nanos_per(self) -> i128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
            TimeUnit::Months => 2_629_746 * 1_000_000_000,
            TimeUnit::Years => 31_556_952 * 1_000_000_000,
        }
    }
}

/// A wall-clock span: a tick count in a [`TimeUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub count: i64,
    pub unit: TimeUnit,
}

impl TimeSpan {
    pub fn new(count: i64, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    /// Re-expresses the span in another unit, truncating toward zero.
    pub fn cast(self, unit: TimeUnit) -> TimeSpan {
        if unit == self.unit {
            return self;
        }

        let nanos = self.count as i128 * self.unit.nanos_per();
        TimeSpan {
            count: (nanos / unit.nanos_per()) as i64,
            unit,
        }
    }
}

/// Domain-contributed value that the built-in union does not cover.
///
/// Enumerations implement `render` with their value-to-string map.
pub trait OpaqueValue: fmt::Debug + Send + Sync {
    /// The runtime type tag for this value.
    fn type_tag(&self) -> &'static str;

    /// Human-readable rendering.
    fn render(&self) -> String;

    /// Downcast support for consumers that know the concrete type.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The closed union of values a data box can hold.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Duration(TimeSpan),
    List(Vec<Value>),
    /// A typed "nothing": an absent optional of the tagged type.
    Empty(String),
    Custom(Arc<dyn OpaqueValue>),
}

impl Value {
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Duration(span) => span.unit.tag(),
            Value::List(_) => "list",
            Value::Empty(tag) => tag.as_str(),
            Value::Custom(value) => value.type_tag(),
        }
    }

    /// Canonical rendering: numbers and durations via their digits, absent
    /// optionals as `"None"`, sequences as `"[ a, b, c ]"`.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::I8(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U8(v) => v.to_string(),
            Value::U16(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Duration(span) => span.count.to_string(),
            Value::List(items) => {
                if items.is_empty() {
                    return "[]".to_string();
                }

                let rendered: Vec<String> = items.iter().map(Value::render).collect();
                format!("[ {} ]", rendered.join(", "))
            }
            Value::Empty(_) => "None".to_string(),
            Value::Custom(value) => value.render(),
        }
    }

    /// Rebuilds a value from its tag and JSON payload.
    pub fn from_parts(tag: &str, payload: serde_json::Value) -> std::result::Result<Value, String> {
        if payload.is_null() {
            return Ok(Value::Empty(tag.to_string()));
        }

        if let Some(unit) = TimeUnit::from_tag(tag) {
            return payload
                .as_i64()
                .map(|count| Value::Duration(TimeSpan::new(count, unit)))
                .ok_or_else(|| format!("duration payload for `{tag}` is not an integer"));
        }

        let value = match tag {
            "bool" => payload.as_bool().map(Value::Bool),
            "i8" => payload.as_i64().and_then(|v| i8::try_from(v).ok()).map(Value::I8),
            "i16" => payload.as_i64().and_then(|v| i16::try_from(v).ok()).map(Value::I16),
            "i32" => payload.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::I32),
            "i64" => payload.as_i64().map(Value::I64),
            "u8" => payload.as_u64().and_then(|v| u8::try_from(v).ok()).map(Value::U8),
            "u16" => payload.as_u64().and_then(|v| u16::try_from(v).ok()).map(Value::U16),
            "u32" => payload.as_u64().and_then(|v| u32::try_from(v).ok()).map(Value::U32),
            "u64" => payload.as_u64().map(Value::U64),
            "f32" => payload.as_f64().map(|v| Value::F32(v as f32)),
            "f64" => payload.as_f64().map(Value::F64),
            "string" => payload.as_str().map(|v| Value::Str(v.to_string())),
            "list" => serde_json::from_value::<Vec<Value>>(payload.clone()).ok().map(Value::List),
            _ => None,
        };

        value.ok_or_else(|| format!("unsupported value payload for type `{tag}`"))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Empty(a), Value::Empty(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", self.type_tag())?;
        match self {
            Value::Bool(v) => map.serialize_entry("value", v)?,
            Value::I8(v) => map.serialize_entry("value", v)?,
            Value::I16(v) => map.serialize_entry("value", v)?,
            Value::I32(v) => map.serialize_entry("value", v)?,
            Value::I64(v) => map.serialize_entry("value", v)?,
            Value::U8(v) => map.serialize_entry("value", v)?,
            Value::U16(v) => map.serialize_entry("value", v)?,
            Value::U32(v) => map.serialize_entry("value", v)?,
            Value::U64(v) => map.serialize_entry("value", v)?,
            Value::F32(v) => map.serialize_entry("value", v)?,
            Value::F64(v) => map.serialize_entry("value", v)?,
            Value::Str(v) => map.serialize_entry("value", v)?,
            Value::Duration(span) => map.serialize_entry("value", &span.count)?,
            Value::List(items) => map.serialize_entry("value", items)?,
            Value::Empty(_) => map.serialize_entry("value", &serde_json::Value::Null)?,
            // Custom values serialize as their rendering and do not round-trip.
            Value::Custom(v) => map.serialize_entry("value", &v.render())?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            #[serde(rename = "type")]
            tag: String,
            value: serde_json::Value,
        }

        let repr = Repr::deserialize(deserializer)?;
        Value::from_parts(&repr.tag, repr.value).map_err(D::Error::custom)
    }
}

/// A Rust type with a stable runtime type tag and a `Value` embedding.
pub trait DataValue: Sized + Send + Sync + 'static {
    fn type_tag() -> &'static str;
    fn into_value(self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! scalar_data_value {
    ($ty:ty, $variant:ident, $tag:literal) => {
        impl DataValue for $ty {
            fn type_tag() -> &'static str {
                $tag
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

scalar_data_value!(bool, Bool, "bool");
scalar_data_value!(i8, I8, "i8");
scalar_data_value!(i16, I16, "i16");
scalar_data_value!(i32, I32, "i32");
scalar_data_value!(i64, I64, "i64");
scalar_data_value!(u8, U8, "u8");
scalar_data_value!(u16, U16, "u16");
scalar_data_value!(u32, U32, "u32");
scalar_data_value!(u64, U64, "u64");
scalar_data_value!(f32, F32, "f32");
scalar_data_value!(f64, F64, "f64");

impl DataValue for String {
    fn type_tag() -> &'static str {
        "string"
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl<T: DataValue> DataValue for Vec<T> {
    fn type_tag() -> &'static str {
        "list"
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(DataValue::into_value).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<T: DataValue> DataValue for Option<T> {
    fn type_tag() -> &'static str {
        T::type_tag()
    }

    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Empty(T::type_tag().to_string()),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Empty(_) => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! duration_data_value {
    ($name:ident, $unit:expr, $tag:literal) => {
        /// Tick count in the unit this type is named after.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl DataValue for $name {
            fn type_tag() -> &'static str {
                $tag
            }

            fn into_value(self) -> Value {
                Value::Duration(TimeSpan::new(self.0, $unit))
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Duration(span) => Some(Self(span.cast($unit).count)),
                    _ => None,
                }
            }
        }
    };
}

duration_data_value!(Nanoseconds, TimeUnit::Nanoseconds, "nanoseconds");
duration_data_value!(Microseconds, TimeUnit::Microseconds, "microseconds");
duration_data_value!(Milliseconds, TimeUnit::Milliseconds, "milliseconds");
duration_data_value!(Seconds, TimeUnit::Seconds, "seconds");
duration_data_value!(Minutes, TimeUnit::Minutes, "minutes");
duration_data_value!(Hours, TimeUnit::Hours, "hours");
duration_data_value!(Days, TimeUnit::Days, "days");
duration_data_value!(Months, TimeUnit::Months, "months");
duration_data_value!(Years, TimeUnit::Years, "years");

/// A value a function-derived node can produce in return position.
///
/// Implemented for every [`DataValue`], which lands on a `return` port, and
/// for `()`, which declares no port at all.
pub trait FunctionOutput: Send + 'static {
    /// The declared tag of the return port, or `None` for no port.
    fn output_tag() -> Option<&'static str>;

    /// Boxes the produced value, or `None` when there is nothing to emit.
    fn into_box(self) -> Option<SharedData>;
}

impl<T: DataValue> FunctionOutput for T {
    fn output_tag() -> Option<&'static str> {
        Some(T::type_tag())
    }

    fn into_box(self) -> Option<SharedData> {
        Some(DataBox::new(self))
    }
}

impl FunctionOutput for () {
    fn output_tag() -> Option<&'static str> {
        None
    }

    fn into_box(self) -> Option<SharedData> {
        None
    }
}

/// Tags of the numeric ladder, pre-wired for complete conversion.
pub const NUMERIC_TAGS: [&str; 10] = [
    "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64",
];

/// Tags of the duration ladder, pre-wired for complete conversion.
pub const DURATION_TAGS: [&str; 9] = [
    "nanoseconds",
    "microseconds",
    "milliseconds",
    "seconds",
    "minutes",
    "hours",
    "days",
    "months",
    "years",
];

/// Casts a numeric value to another numeric tag. Float-to-integer casts
/// truncate toward zero. Returns `None` when either side is non-numeric.
pub fn cast_numeric(value: &Value, to_tag: &str) -> Option<Value> {
    enum Num {
        Int(i128),
        Float(f64),
    }

    let number = match value {
        Value::I8(v) => Num::Int(*v as i128),
        Value::I16(v) => Num::Int(*v as i128),
        Value::I32(v) => Num::Int(*v as i128),
        Value::I64(v) => Num::Int(*v as i128),
        Value::U8(v) => Num::Int(*v as i128),
        Value::U16(v) => Num::Int(*v as i128),
        Value::U32(v) => Num::Int(*v as i128),
        Value::U64(v) => Num::Int(*v as i128),
        Value::F32(v) => Num::Float(*v as f64),
        Value::F64(v) => Num::Float(*v),
        _ => return None,
    };

    macro_rules! cast {
        ($variant:ident, $ty:ty) => {
            match number {
                Num::Int(v) => Value::$variant(v as $ty),
                Num::Float(v) => Value::$variant(v as $ty),
            }
        };
    }

    Some(match to_tag {
        "i8" => cast!(I8, i8),
        "i16" => cast!(I16, i16),
        "i32" => cast!(I32, i32),
        "i64" => cast!(I64, i64),
        "u8" => cast!(U8, u8),
        "u16" => cast!(U16, u16),
        "u32" => cast!(U32, u32),
        "u64" => cast!(U64, u64),
        "f32" => cast!(F32, f32),
        "f64" => cast!(F64, f64),
        _ => return None,
    })
}

/// Casts a duration value to another unit tag, truncating toward zero.
pub fn cast_duration(value: &Value, to_tag: &str) -> Option<Value> {
    let unit = TimeUnit::from_tag(to_tag)?;
    match value {
        Value::Duration(span) => Some(Value::Duration(span.cast(unit))),
        _ => None,
    }
}

/// A shared, type-tagged value container.
#[derive(Debug)]
pub struct DataBox {
    type_tag: String,
    value: RwLock<Value>,
}

/// The shared handle under which boxes travel between ports.
pub type SharedData = Arc<DataBox>;

impl DataBox {
    /// Boxes a typed value under its own tag.
    pub fn new<T: DataValue>(value: T) -> SharedData {
        Arc::new(Self {
            type_tag: T::type_tag().to_string(),
            value: RwLock::new(value.into_value()),
        })
    }

    /// Boxes a typed value under the reference-qualified tag (`T&`). The
    /// producer keeps the handle and observes in-place updates.
    pub fn new_ref<T: DataValue>(value: T) -> SharedData {
        Arc::new(Self {
            type_tag: format!("{}&", T::type_tag()),
            value: RwLock::new(value.into_value()),
        })
    }

    /// Boxes an untyped value under the tag it reports for itself.
    pub fn from_value(value: Value) -> SharedData {
        Arc::new(Self {
            type_tag: value.type_tag().to_string(),
            value: RwLock::new(value),
        })
    }

    /// Boxes an untyped value under an explicit tag.
    pub fn with_tag(tag: impl Into<String>, value: Value) -> SharedData {
        Arc::new(Self {
            type_tag: tag.into(),
            value: RwLock::new(value),
        })
    }

    pub fn data_type(&self) -> &str {
        &self.type_tag
    }

    pub fn value(&self) -> Value {
        self.value.read().unwrap().clone()
    }

    pub fn get<T: DataValue>(&self) -> Option<T> {
        T::from_value(&self.value())
    }

    pub fn set<T: DataValue>(&self, value: T) {
        *self.value.write().unwrap() = value.into_value();
    }

    pub fn set_value(&self, value: Value) {
        *self.value.write().unwrap() = value;
    }

    /// Overwrites this box's value with the other box's value, preserving the
    /// identity of this instance.
    pub fn assign_from(&self, other: &DataBox) {
        let value = other.value();
        *self.value.write().unwrap() = value;
    }

    pub fn render(&self) -> String {
        self.value.read().unwrap().render()
    }
}

impl fmt::Display for DataBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
