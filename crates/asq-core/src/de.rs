//! Conversion from loosely-typed [`Value`]s into statically-typed targets.
//!
//! `Value` implements [`serde::Deserializer`], so any `DeserializeOwned` type can be
//! materialized from it. The conversion rules:
//!
//! - a value whose shape already matches the target converts directly; integer targets
//!   accept integral floats (wire formats often widen numbers), fractional floats are
//!   rejected;
//! - `Option<T>` / `Box<T>` wrappers of any depth recurse into the pointee, and `Null`
//!   becomes `None`;
//! - a struct is filled from a map by walking its declared fields in order. Keys follow
//!   `#[serde(rename)]`; fields marked `#[serde(default)]` or typed `Option` may be absent.
//!   Any other absent field gets its zero value (`0`, `""`, empty collections, a zeroed
//!   struct) and a warning;
//! - sequences convert element-wise, maps value-wise, both preserving order;
//! - anything else fails with a [`ConvertError`] that names the offending path.

use crate::error::ConvertError;
use crate::value::{Map, Number, Value};
use serde::de::value::StringDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, Expected, IntoDeserializer,
    MapAccess, SeqAccess, Unexpected, VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use std::cell::RefCell;
use tracing::warn;

/// Convert a loosely-typed value into `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ConvertError> {
    fill_absent(|| T::deserialize(value.clone()))
}

thread_local! {
    /// `(struct, field)` pairs to zero-fill during the conversion running on this thread
    static ZERO_FILLED: RefCell<Vec<(&'static str, &'static str)>> = RefCell::new(Vec::new());
}

/// Restores the enclosing conversion's zero-fill set.
struct ZeroFillScope {
    outer: Vec<(&'static str, &'static str)>,
}

impl ZeroFillScope {
    fn enter() -> Self {
        ZeroFillScope {
            outer: ZERO_FILLED.with(|filled| filled.replace(Vec::new())),
        }
    }

    /// Returns false if the field was already zero-filled.
    fn insert(&self, absent: (&'static str, &'static str)) -> bool {
        ZERO_FILLED.with(|filled| {
            let mut filled = filled.borrow_mut();
            if filled.contains(&absent) {
                false
            } else {
                filled.push(absent);
                true
            }
        })
    }
}

impl Drop for ZeroFillScope {
    fn drop(&mut self) {
        let outer = std::mem::take(&mut self.outer);
        ZERO_FILLED.with(|filled| filled.replace(outer));
    }
}

fn zero_filled(container: &'static str, field: &'static str) -> bool {
    ZERO_FILLED.with(|filled| filled.borrow().contains(&(container, field)))
}

/// Run `convert`, rerunning it with a zero value for each required struct field found absent.
///
/// Serde's derived visitors only report a required field as missing after the map is
/// exhausted; each rerun zero-fills one more of them, so the loop ends after at most one pass
/// per distinct field.
pub(crate) fn fill_absent<T>(
    mut convert: impl FnMut() -> Result<T, ConvertError>,
) -> Result<T, ConvertError> {
    let scope = ZeroFillScope::enter();
    loop {
        match convert() {
            Err(e) => match e.absent_field() {
                Some(absent) if scope.insert(absent) => {
                    warn!(
                        target_type = absent.0,
                        key = absent.1,
                        path = %e.path(),
                        "required struct field absent from map, using zero value"
                    );
                }
                _ => return Err(e),
            },
            ok => return ok,
        }
    }
}

impl Value {
    fn invalid_type<E: de::Error>(&self, exp: &dyn Expected) -> E {
        E::invalid_type(self.unexpected(), exp)
    }
}

fn visit_integer<'de, V: Visitor<'de>>(n: Number, visitor: V) -> Result<V::Value, ConvertError> {
    match n {
        Number::PosInt(u) => visitor.visit_u64(u),
        Number::NegInt(i) => visitor.visit_i64(i),
        Number::Float(f) if f.is_finite() && f.fract() == 0.0 => {
            if f >= 0.0 && f <= u64::MAX as f64 {
                visitor.visit_u64(f as u64)
            } else if f < 0.0 && f >= i64::MIN as f64 {
                visitor.visit_i64(f as i64)
            } else {
                Err(de::Error::invalid_value(Unexpected::Float(f), &visitor))
            }
        }
        Number::Float(f) => Err(de::Error::invalid_type(Unexpected::Float(f), &visitor)),
    }
}

macro_rules! deserialize_integer {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
            match self {
                Value::Number(n) => visit_integer(n, visitor),
                other => Err(other.invalid_type(&visitor)),
            }
        }
    )*};
}

macro_rules! deserialize_float {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
            match self {
                Value::Number(n) => visitor.visit_f64(n.as_f64()),
                other => Err(other.invalid_type(&visitor)),
            }
        }
    )*};
}

pub(crate) fn visit_seq<'de, V: Visitor<'de>>(
    items: Vec<Value>,
    visitor: V,
) -> Result<V::Value, ConvertError> {
    let len = items.len();
    let mut access = SeqDeserializer {
        iter: items.into_iter(),
        index: 0,
    };
    let out = visitor.visit_seq(&mut access)?;
    if access.iter.len() == 0 {
        Ok(out)
    } else {
        Err(de::Error::invalid_length(len, &"fewer elements in sequence"))
    }
}

/// A map value, or the zero value of an absent required field.
enum Entry {
    Value(Value),
    Zero,
}

fn entries(map: Map) -> Vec<(String, Entry)> {
    map.into_iter().map(|(k, v)| (k, Entry::Value(v))).collect()
}

fn visit_map<'de, V: Visitor<'de>>(
    entries: Vec<(String, Entry)>,
    visitor: V,
) -> Result<V::Value, ConvertError> {
    let len = entries.len();
    let mut access = MapDeserializer {
        iter: entries.into_iter(),
        pending: None,
    };
    let out = visitor.visit_map(&mut access)?;
    if access.iter.len() == 0 {
        Ok(out)
    } else {
        Err(de::Error::invalid_length(len, &"fewer elements in map"))
    }
}

/// Reorder map entries to follow the declared field order, keeping unknown keys last.
///
/// Absent fields are left out, except those marked for zero-filling by [`fill_absent`].
fn order_by_fields(
    name: &'static str,
    fields: &'static [&'static str],
    map: Map,
) -> Vec<(String, Entry)> {
    let mut rest = entries(map);
    let mut ordered = Vec::with_capacity(rest.len());
    for field in fields {
        match rest.iter().position(|(k, _)| k == field) {
            Some(pos) => ordered.push(rest.remove(pos)),
            None if zero_filled(name, field) => ordered.push((field.to_string(), Entry::Zero)),
            None => {}
        }
    }
    ordered.extend(rest);
    ordered
}

impl<'de> Deserializer<'de> for Value {
    type Error = ConvertError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Number(Number::PosInt(u)) => visitor.visit_u64(u),
            Value::Number(Number::NegInt(i)) => visitor.visit_i64(i),
            Value::Number(Number::Float(f)) => visitor.visit_f64(f),
            Value::String(s) => visitor.visit_string(s),
            Value::Seq(items) => visit_seq(items, visitor),
            Value::Map(map) => visit_map(entries(map), visitor),
        }
    }

    deserialize_integer!(
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64 deserialize_i128
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_u128
    );

    deserialize_float!(deserialize_f32 deserialize_f64);

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Bool(b) => visitor.visit_bool(b),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::String(s) => visitor.visit_string(s),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::String(s) => visitor.visit_string(s),
            Value::Seq(items) => visit_seq(items, visitor),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Null => visitor.visit_unit(),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_newtype_struct(self)
    }

    // A null sequence or map is an empty one.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Seq(items) => visit_seq(items, visitor),
            Value::Null => visit_seq(Vec::new(), visitor),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        match self {
            Value::Map(map) => visit_map(entries(map), visitor),
            Value::Null => visit_map(Vec::new(), visitor),
            other => Err(other.invalid_type(&visitor)),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        let result = match self {
            Value::Map(map) => visit_map(order_by_fields(name, fields, map), visitor),
            Value::Seq(items) => visit_seq(items, visitor),
            Value::Null => visit_map(order_by_fields(name, fields, Map::new()), visitor),
            other => Err(other.invalid_type(&visitor)),
        };
        result.map_err(|e| e.in_struct(name))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        match self {
            Value::String(variant) => visitor.visit_enum(EnumDeserializer {
                variant,
                value: None,
            }),
            Value::Map(map) if map.len() == 1 => {
                let mut entries = map.into_iter();
                match entries.next() {
                    Some((variant, value)) => visitor.visit_enum(EnumDeserializer {
                        variant,
                        value: Some(value),
                    }),
                    None => Err(de::Error::invalid_length(0, &"map with a single key")),
                }
            }
            other => Err(other.invalid_type(&"string or map with a single key")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        match self {
            Value::String(s) => visitor.visit_string(s),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_unit()
    }
}

impl<'de> IntoDeserializer<'de, ConvertError> for Value {
    type Deserializer = Value;

    fn into_deserializer(self) -> Value {
        self
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Value>,
    index: usize,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = ConvertError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, ConvertError> {
        match self.iter.next() {
            Some(value) => {
                let index = self.index;
                self.index += 1;
                seed.deserialize(value)
                    .map(Some)
                    .map_err(|e| e.at(format!("[{}]", index)))
            }
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: std::vec::IntoIter<(String, Entry)>,
    pending: Option<(String, Entry)>,
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = ConvertError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, ConvertError> {
        match self.iter.next() {
            Some((key, value)) => {
                let de = MapKeyDeserializer { key: key.clone() };
                self.pending = Some((key, value));
                seed.deserialize(de).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<T::Value, ConvertError> {
        let (key, entry) = self
            .pending
            .take()
            .ok_or_else(|| ConvertError::new("map value requested before its key"))?;
        let result = match entry {
            Entry::Value(value) => seed.deserialize(value),
            Entry::Zero => seed.deserialize(Zero),
        };
        result.map_err(|e| e.at(key))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

/// Map keys are always strings; numeric and boolean key types are parsed from them.
struct MapKeyDeserializer {
    key: String,
}

macro_rules! deserialize_parsed_key {
    ($($method:ident => $visit:ident($ty:ty))*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
            match self.key.parse::<$ty>() {
                Ok(parsed) => visitor.$visit(parsed),
                Err(_) => visitor.visit_string(self.key),
            }
        }
    )*};
}

impl<'de> Deserializer<'de> for MapKeyDeserializer {
    type Error = ConvertError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visitor.visit_string(self.key)
    }

    deserialize_parsed_key! {
        deserialize_i8 => visit_i64(i64)
        deserialize_i16 => visit_i64(i64)
        deserialize_i32 => visit_i64(i64)
        deserialize_i64 => visit_i64(i64)
        deserialize_u8 => visit_u64(u64)
        deserialize_u16 => visit_u64(u64)
        deserialize_u32 => visit_u64(u64)
        deserialize_u64 => visit_u64(u64)
        deserialize_f32 => visit_f64(f64)
        deserialize_f64 => visit_f64(f64)
        deserialize_bool => visit_bool(bool)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        let de: StringDeserializer<ConvertError> = self.key.into_deserializer();
        visitor.visit_enum(de)
    }

    forward_to_deserialize_any! {
        i128 u128 char str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

/// Zero value of whatever type asks for it.
struct Zero;

macro_rules! deserialize_zero {
    ($($method:ident => $visit:ident($zero:expr))*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
            visitor.$visit($zero)
        }
    )*};
}

impl<'de> Deserializer<'de> for Zero {
    type Error = ConvertError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visitor.visit_unit()
    }

    deserialize_zero! {
        deserialize_bool => visit_bool(false)
        deserialize_i8 => visit_i64(0)
        deserialize_i16 => visit_i64(0)
        deserialize_i32 => visit_i64(0)
        deserialize_i64 => visit_i64(0)
        deserialize_i128 => visit_i64(0)
        deserialize_u8 => visit_u64(0)
        deserialize_u16 => visit_u64(0)
        deserialize_u32 => visit_u64(0)
        deserialize_u64 => visit_u64(0)
        deserialize_u128 => visit_u64(0)
        deserialize_f32 => visit_f64(0.0)
        deserialize_f64 => visit_f64(0.0)
        deserialize_char => visit_char('\0')
        deserialize_str => visit_str("")
        deserialize_string => visit_str("")
        deserialize_identifier => visit_str("")
        deserialize_bytes => visit_bytes(&[])
        deserialize_byte_buf => visit_bytes(&[])
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visitor.visit_none()
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visit_seq(Vec::new(), visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visit_seq(Vec::new(), visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visit_seq(Vec::new(), visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ConvertError> {
        visit_map(Vec::new(), visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        Value::Null.deserialize_struct(name, fields, visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, ConvertError> {
        Err(ConvertError::new(format!("enum {} has no zero value", name)))
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        visitor.visit_unit()
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Value>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = ConvertError;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, VariantDeserializer), ConvertError> {
        let de: StringDeserializer<ConvertError> = self.variant.into_deserializer();
        let variant = seed.deserialize(de)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Value>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = ConvertError;

    fn unit_variant(self) -> Result<(), ConvertError> {
        match self.value {
            None | Some(Value::Null) => Ok(()),
            Some(other) => Err(other.invalid_type(&"unit variant")),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, ConvertError> {
        match self.value {
            Some(value) => seed.deserialize(value),
            None => Err(de::Error::invalid_type(
                Unexpected::UnitVariant,
                &"newtype variant",
            )),
        }
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        match self.value {
            Some(Value::Seq(items)) => visit_seq(items, visitor),
            Some(other) => Err(other.invalid_type(&"tuple variant")),
            None => Err(de::Error::invalid_type(
                Unexpected::UnitVariant,
                &"tuple variant",
            )),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ConvertError> {
        match self.value {
            Some(Value::Map(map)) => visit_map(entries(map), visitor),
            Some(other) => Err(other.invalid_type(&"struct variant")),
            None => Err(de::Error::invalid_type(
                Unexpected::UnitVariant,
                &"struct variant",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::to_value;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Inner {
        #[serde(rename = "M")]
        m: String,
        #[serde(rename = "N", default)]
        n: i64,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Outer {
        #[serde(rename = "A")]
        a: String,
        #[serde(rename = "B")]
        b: i32,
        #[serde(rename = "X", default)]
        x: Option<Box<i64>>,
        #[serde(rename = "C")]
        c: Inner,
    }

    fn json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_struct_from_map() {
        let v = json(r#"{"A": "a", "B": 1, "C": {"M": "m", "N": 666}, "X": null}"#);
        let out: Outer = from_value(v).unwrap();
        assert_eq!(
            out,
            Outer {
                a: "a".to_string(),
                b: 1,
                x: None,
                c: Inner {
                    m: "m".to_string(),
                    n: 666
                },
            }
        );
    }

    #[test]
    fn test_struct_ignores_unknown_and_fills_defaults() {
        let v = json(r#"{"D": 123, "C": {"M": "m"}, "B": 2, "A": "a"}"#);
        let out: Outer = from_value(v).unwrap();
        assert_eq!(out.c.n, 0);
        assert_eq!(out.x, None);
        assert_eq!(out.b, 2);
    }

    #[test]
    fn test_absent_required_field_gets_zero_value() {
        let v = json(r#"{"A": "a", "B": 1, "C": {"N": 1}}"#);
        let out: Outer = from_value(v).unwrap();
        assert_eq!(out.c.m, "");
        assert_eq!(out.c.n, 1);
        assert_eq!(out.b, 1);
    }

    #[test]
    fn test_absent_nested_struct_is_zeroed() {
        let out: Outer = from_value(json(r#"{"B": 3}"#)).unwrap();
        assert_eq!(
            out,
            Outer {
                a: String::new(),
                b: 3,
                x: None,
                c: Inner {
                    m: String::new(),
                    n: 0
                },
            }
        );
    }

    fn seven() -> i64 {
        7
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Defaults {
        #[serde(default = "seven")]
        n: i64,
        tags: Vec<String>,
        flag: bool,
        ratio: f64,
        unit: (),
    }

    #[test]
    fn test_zero_fill_keeps_declared_defaults() {
        let out: Defaults = from_value(json("{}")).unwrap();
        assert_eq!(
            out,
            Defaults {
                n: 7,
                tags: vec![],
                flag: false,
                ratio: 0.0,
                unit: (),
            }
        );
    }

    #[test]
    fn test_present_field_still_type_checked() {
        let err = from_value::<Defaults>(json(r#"{"flag": "yes"}"#)).unwrap_err();
        assert_eq!(err.path(), "flag");
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct WithEnum {
        shape: Shape,
    }

    #[test]
    fn test_absent_enum_field_has_no_zero_value() {
        let err = from_value::<WithEnum>(json("{}")).unwrap_err();
        assert!(err.to_string().contains("no zero value"), "{}", err);
    }

    #[test]
    fn test_nested_type_mismatch_reports_path() {
        let v = json(r#"{"A": "a", "B": 1, "C": {"M": 5}}"#);
        let err = from_value::<Outer>(v).unwrap_err();
        assert_eq!(err.path(), "C.M");
    }

    #[test]
    fn test_integral_float_into_integer() {
        assert_eq!(from_value::<i32>(Value::from(21.0)).unwrap(), 21);
        assert_eq!(from_value::<i64>(Value::from(-3.0)).unwrap(), -3);
        assert!(from_value::<i32>(Value::from(21.5)).is_err());
        assert!(from_value::<u8>(Value::from(300)).is_err());
        assert!(from_value::<u32>(Value::from(-1)).is_err());
    }

    #[test]
    fn test_integer_into_float() {
        assert_eq!(from_value::<f64>(Value::from(2)).unwrap(), 2.0);
    }

    #[test]
    fn test_nested_indirection() {
        let out: Option<Box<Option<i32>>> = from_value(Value::from(7)).unwrap();
        assert_eq!(out, Some(Box::new(Some(7))));

        let out: Option<Box<Option<i32>>> = from_value(Value::Null).unwrap();
        assert_eq!(out, None);

        let out: Box<Box<String>> = from_value(Value::from("deep")).unwrap();
        assert_eq!(**out, "deep");
    }

    #[test]
    fn test_sequence_and_map_targets() {
        let out: Vec<Option<u16>> = from_value(json("[1, null, 3]")).unwrap();
        assert_eq!(out, vec![Some(1), None, Some(3)]);

        let out: HashMap<String, Vec<i32>> = from_value(json(r#"{"a": [1], "b": []}"#)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["a"], vec![1]);

        let out: BTreeMap<u32, bool> = from_value(json(r#"{"1": true, "20": false}"#)).unwrap();
        assert_eq!(out.get(&20), Some(&false));

        let out: Vec<i32> = from_value(Value::Null).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_sequence_error_index() {
        let err = from_value::<Vec<i32>>(json(r#"[1, "two"]"#)).unwrap_err();
        assert_eq!(err.path(), "[1]");
    }

    #[test]
    fn test_tuple_length_must_match() {
        assert!(from_value::<(i32, i32)>(json("[1, 2, 3]")).is_err());
        assert_eq!(from_value::<(i32, String)>(json(r#"[1, "x"]"#)).unwrap(), (1, "x".to_string()));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    enum Shape {
        Point,
        Circle(f64),
        Rect { w: u32, h: u32 },
    }

    #[test]
    fn test_enum_targets() {
        assert_eq!(from_value::<Shape>(json(r#""Point""#)).unwrap(), Shape::Point);
        assert_eq!(
            from_value::<Shape>(json(r#"{"Circle": 1.5}"#)).unwrap(),
            Shape::Circle(1.5)
        );
        assert_eq!(
            from_value::<Shape>(json(r#"{"Rect": {"w": 2, "h": 3}}"#)).unwrap(),
            Shape::Rect { w: 2, h: 3 }
        );
        assert!(from_value::<Shape>(json("[1]")).is_err());
    }

    #[test]
    fn test_unsupported_combination() {
        let err = from_value::<Inner>(Value::from(true)).unwrap_err();
        assert!(err.to_string().contains("invalid type"), "{}", err);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Line {
        #[serde(rename = "Item")]
        item: String,
        #[serde(rename = "Qty")]
        qty: u32,
        #[serde(rename = "Note", default)]
        note: Option<String>,
    }

    fn line() -> impl Strategy<Value = Line> {
        (".*", any::<u32>(), proptest::option::of(".*"))
            .prop_map(|(item, qty, note)| Line { item, qty, note })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_maps(
            map in proptest::collection::btree_map(".*", any::<i64>(), 0..8),
        ) {
            let back: BTreeMap<String, i64> = from_value(to_value(&map).unwrap()).unwrap();
            prop_assert_eq!(back, map);
        }

        #[test]
        fn prop_roundtrip_nested_indirection(inner in proptest::option::of(any::<i32>())) {
            // Some(Box(None)) externalizes to Null like None does, so only these two shapes
            // survive the trip unchanged.
            let original: Option<Box<Option<i32>>> = inner.map(|x| Box::new(Some(x)));
            let back: Option<Box<Option<i32>>> = from_value(to_value(&original).unwrap()).unwrap();
            prop_assert_eq!(back, original);
        }

        #[test]
        fn prop_roundtrip_renamed_struct(lines in proptest::collection::vec(line(), 0..4)) {
            let value = to_value(&lines).unwrap();
            if let Some(Value::Map(first)) = value.as_seq().and_then(|items| items.first()) {
                prop_assert!(first.contains_key("Item"));
            }
            let back: Vec<Line> = from_value(value).unwrap();
            prop_assert_eq!(back, lines);
        }

        #[test]
        fn prop_roundtrip_preserves_values(
            a in any::<i64>(),
            s in ".*",
            flags in proptest::collection::vec(any::<bool>(), 0..8),
            opt in proptest::option::of(any::<u32>()),
        ) {
            let original = (a, s, flags, opt);
            let value = to_value(&original).unwrap();
            let back: (i64, String, Vec<bool>, Option<u32>) = from_value(value).unwrap();
            prop_assert_eq!(back, original);
        }
    }
}
