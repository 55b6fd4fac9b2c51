// used for temporal values
use chrono::{NaiveDate, NaiveDateTime};
// used for decimal numbers
use bigdecimal::BigDecimal;

// used when parsing strings into decimals and temporal values
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;
// values need to be hashable so relations can be hashed
use std::hash::{BuildHasherDefault, Hash, Hasher};
// used to reach through the Decimal newtype
use std::ops;

use indexmap::IndexMap;
use seahash::SeaHasher;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{RelataError, Result};
use crate::json;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Insertion-ordered string-keyed map, as produced by JSON objects.
pub type ValueMap = IndexMap<String, Value, OtherHasher>;

// ------------- Kind -------------
/// The declared target kind of a relation type. `Any` places no
/// constraint; every other kind admits exactly the matching value tag
/// (and null, which is valid everywhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Kind {
    Any,
    Bool,
    Int,
    Decimal,
    Text,
    Date,
    DateTime,
    List,
    Map,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Any => "any",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Decimal => "decimal",
            Kind::Text => "text",
            Kind::Date => "date",
            Kind::DateTime => "datetime",
            Kind::List => "list",
            Kind::Map => "map",
        }
    }
    /// Runtime validity check at the boundary where values enter the
    /// model. Null is always acceptable.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Kind::Any, _) => true,
            (Kind::Bool, Value::Bool(_)) => true,
            (Kind::Int, Value::Int(_)) => true,
            (Kind::Decimal, Value::Decimal(_)) => true,
            (Kind::Text, Value::Text(_)) => true,
            (Kind::Date, Value::Date(_)) => true,
            (Kind::DateTime, Value::DateTime(_)) => true,
            (Kind::List, Value::List(_)) => true,
            (Kind::Map, Value::Map(_)) => true,
            _ => false,
        }
    }
    /// Coercion used when values re-enter the model from text, where
    /// dates, datetimes and decimals arrive as strings or integers.
    pub fn adapt(&self, value: Value) -> Result<Value> {
        if self.accepts(&value) {
            return Ok(value);
        }
        match (self, &value) {
            (Kind::Decimal, Value::Int(i)) => Ok(Value::Decimal(Decimal::from(*i))),
            (Kind::Decimal, Value::Text(s)) => match Decimal::from_str(s) {
                Some(d) => Ok(Value::Decimal(d)),
                None => Err(mismatch(self, &value)),
            },
            (Kind::Date, Value::Text(s)) => match NaiveDate::from_str(s) {
                Ok(d) => Ok(Value::Date(d)),
                Err(_) => Err(mismatch(self, &value)),
            },
            (Kind::DateTime, Value::Text(s)) => match NaiveDateTime::from_str(s) {
                Ok(d) => Ok(Value::DateTime(d)),
                Err(_) => Err(mismatch(self, &value)),
            },
            _ => Err(mismatch(self, &value)),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn mismatch(kind: &Kind, value: &Value) -> RelataError {
    RelataError::InvalidTarget {
        expected: kind.name().to_owned(),
        actual: value.type_name().to_owned(),
    }
}

// ------------- Value -------------
/// A closed sum over the value shapes the model can hold. Collection
/// variants nest arbitrarily; `Map` preserves insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}
impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::DateTime(d)
    }
}
impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}
impl From<ValueMap> for Value {
    fn from(m: ValueMap) -> Self {
        Value::Map(m)
    }
}

// Map equality ignores entry order, so the map hash has to as well:
// per-entry hashes are folded with a commutative accumulator.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Decimal(d) => {
                3u8.hash(state);
                d.hash(state);
            }
            Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Date(d) => {
                5u8.hash(state);
                d.hash(state);
            }
            Value::DateTime(d) => {
                6u8.hash(state);
                d.hash(state);
            }
            Value::List(l) => {
                7u8.hash(state);
                l.hash(state);
            }
            Value::Map(m) => {
                8u8.hash(state);
                let mut acc: u64 = 0;
                for (key, value) in m {
                    let mut entry = SeaHasher::new();
                    key.hash(&mut entry);
                    value.hash(&mut entry);
                    acc = acc.wrapping_add(entry.finish());
                }
                state.write_u64(acc);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", json::to_text(self))
    }
}

// Decimals and temporal values serialize as strings in serde contexts;
// the native json module renders them with arbitrary precision.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Decimal(d) => serializer.collect_str(d),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.collect_str(d),
            Value::DateTime(d) => serializer.collect_str(&d.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for item in l {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (key, value) in m {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

// ------------- Decimal -------------
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug)]
pub struct Decimal(BigDecimal);

impl Decimal {
    pub fn from_str(s: &str) -> Option<Decimal> {
        match BigDecimal::from_str(s) {
            Ok(decimal) => Some(Decimal(decimal)),
            _ => None,
        }
    }
}
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<BigDecimal> for Decimal {
    fn from(d: BigDecimal) -> Self {
        Decimal(d)
    }
}
impl From<i64> for Decimal {
    fn from(i: i64) -> Self {
        Decimal(BigDecimal::from(i))
    }
}
impl ops::Deref for Decimal {
    type Target = BigDecimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
