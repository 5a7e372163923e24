//! Type-erased handlers and the generic call layer.
//!
//! Handlers are plain functions or closures returning `Result<T, E>`. Registering one turns
//! it into an `Arc<dyn Handler>` that accepts positional [`Value`] arguments, converts each
//! into the declared parameter type, calls the function and externalizes the return value.
//!
//! A tuple return spreads into several values (`Ok((a, b))` yields `[a, b]`), `()` yields no
//! values and anything else yields one. Fixed-size arrays serialize as tuples and spread too.

use crate::de::{fill_absent, visit_seq};
use crate::error::ConvertError;
use crate::ser::ValueSerializer;
use crate::{from_value, to_value, Error, Result, Value};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::ser::{self, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A callable registered under a task name.
pub trait Handler: Send + Sync + 'static {
    /// Number of declared parameters
    fn arity(&self) -> usize;

    /// Call with already arity-checked arguments.
    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>>;

    /// Normalize loosely-typed values through the declared output types.
    fn returns(&self, values: Vec<Value>) -> Result<Vec<Value>>;
}

/// Conversion of a function into a [`Handler`]. `M` is the function's signature, which keeps
/// the implementations for different arities apart.
pub trait IntoHandler<M>: Send + Sync + 'static {
    fn into_handler(self) -> Arc<dyn Handler>;
}

impl IntoHandler<Arc<dyn Handler>> for Arc<dyn Handler> {
    fn into_handler(self) -> Arc<dyn Handler> {
        self
    }
}

/// Invoke `handler` with positional arguments.
///
/// The argument count is checked before any conversion; a mismatch never reaches the handler.
pub fn invoke(handler: &dyn Handler, args: Vec<Value>) -> Result<Vec<Value>> {
    let expected = handler.arity();
    if args.len() != expected {
        return Err(Error::Arity {
            expected,
            actual: args.len(),
        });
    }
    handler.call(args)
}

struct FnHandler<F, M> {
    f: F,
    _marker: PhantomData<fn() -> M>,
}

fn next_arg<A: DeserializeOwned>(
    args: &mut impl Iterator<Item = Value>,
    index: usize,
    arity: usize,
) -> Result<A> {
    let value = args.next().ok_or(Error::Arity {
        expected: arity,
        actual: index,
    })?;
    Ok(from_value(value).map_err(|e| e.at(format!("arg[{}]", index)))?)
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, T, E, $($arg,)*> Handler for FnHandler<F, fn($($arg,)*) -> std::result::Result<T, E>>
        where
            F: Fn($($arg),*) -> std::result::Result<T, E> + Send + Sync + 'static,
            T: Serialize + DeserializeOwned + 'static,
            E: fmt::Display + 'static,
            $($arg: DeserializeOwned + 'static,)*
        {
            fn arity(&self) -> usize {
                count!($($arg)*)
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
                let arity = self.arity();
                let mut args = args.into_iter();
                let mut index = 0usize;
                $(
                    let $arg: $arg = next_arg(&mut args, index, arity)?;
                    index += 1;
                )*
                match (self.f)($($arg),*) {
                    Ok(out) => Ok(to_values(&out)?),
                    Err(e) => Err(Error::Handler(e.to_string())),
                }
            }

            fn returns(&self, values: Vec<Value>) -> Result<Vec<Value>> {
                let typed: T = from_values(values)?;
                Ok(to_values(&typed)?)
            }
        }

        impl<F, T, E, $($arg,)*> IntoHandler<fn($($arg,)*) -> std::result::Result<T, E>> for F
        where
            F: Fn($($arg),*) -> std::result::Result<T, E> + Send + Sync + 'static,
            T: Serialize + DeserializeOwned + 'static,
            E: fmt::Display + 'static,
            $($arg: DeserializeOwned + 'static,)*
        {
            fn into_handler(self) -> Arc<dyn Handler> {
                Arc::new(FnHandler {
                    f: self,
                    _marker: PhantomData,
                })
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Externalize a return value, spreading tuples into separate values.
pub fn to_values<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Vec<Value>, ConvertError> {
    value.serialize(Spread)
}

/// Fill typed output slots from a list of values: a tuple takes them positionally, `()`
/// takes none, any other type takes exactly one.
pub fn from_values<T: DeserializeOwned>(values: Vec<Value>) -> std::result::Result<T, ConvertError> {
    fill_absent(|| T::deserialize(Gather(values.clone())))
}

struct Spread;

macro_rules! spread_scalar {
    ($($method:ident($ty:ty))*) => {$(
        fn $method(self, v: $ty) -> std::result::Result<Vec<Value>, ConvertError> {
            Ok(vec![ValueSerializer.$method(v)?])
        }
    )*};
}

impl Serializer for Spread {
    type Ok = Vec<Value>;
    type Error = ConvertError;

    type SerializeSeq = One<<ValueSerializer as Serializer>::SerializeSeq>;
    type SerializeTuple = SpreadTuple;
    type SerializeTupleStruct = One<<ValueSerializer as Serializer>::SerializeTupleStruct>;
    type SerializeTupleVariant = One<<ValueSerializer as Serializer>::SerializeTupleVariant>;
    type SerializeMap = One<<ValueSerializer as Serializer>::SerializeMap>;
    type SerializeStruct = One<<ValueSerializer as Serializer>::SerializeStruct>;
    type SerializeStructVariant = One<<ValueSerializer as Serializer>::SerializeStructVariant>;

    spread_scalar! {
        serialize_bool(bool)
        serialize_i8(i8) serialize_i16(i16) serialize_i32(i32) serialize_i64(i64)
        serialize_i128(i128)
        serialize_u8(u8) serialize_u16(u16) serialize_u32(u32) serialize_u64(u64)
        serialize_u128(u128)
        serialize_f32(f32) serialize_f64(f64)
        serialize_char(char)
        serialize_str(&str)
        serialize_bytes(&[u8])
    }

    fn serialize_none(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![Value::Null])
    }

    fn serialize_some<T: Serialize + ?Sized>(
        self,
        value: &T,
    ) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![to_value(value)?])
    }

    fn serialize_unit(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(Vec::new())
    }

    fn serialize_unit_struct(
        self,
        _name: &'static str,
    ) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(Vec::new())
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
    ) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![ValueSerializer.serialize_unit_variant(name, index, variant)?])
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![to_value(value)?])
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![ValueSerializer.serialize_newtype_variant(name, index, variant, value)?])
    }

    fn serialize_seq(self, len: Option<usize>) -> std::result::Result<Self::SerializeSeq, ConvertError> {
        Ok(One(ValueSerializer.serialize_seq(len)?))
    }

    fn serialize_tuple(self, len: usize) -> std::result::Result<SpreadTuple, ConvertError> {
        Ok(SpreadTuple {
            values: Vec::with_capacity(len),
        })
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, ConvertError> {
        Ok(One(ValueSerializer.serialize_tuple_struct(name, len)?))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, ConvertError> {
        Ok(One(ValueSerializer.serialize_tuple_variant(name, index, variant, len)?))
    }

    fn serialize_map(self, len: Option<usize>) -> std::result::Result<Self::SerializeMap, ConvertError> {
        Ok(One(ValueSerializer.serialize_map(len)?))
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeStruct, ConvertError> {
        Ok(One(ValueSerializer.serialize_struct(name, len)?))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, ConvertError> {
        Ok(One(ValueSerializer.serialize_struct_variant(name, index, variant, len)?))
    }
}

struct SpreadTuple {
    values: Vec<Value>,
}

impl ser::SerializeTuple for SpreadTuple {
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_element<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        let index = self.values.len();
        self.values
            .push(to_value(value).map_err(|e| e.at(format!("[{}]", index)))?);
        Ok(())
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(self.values)
    }
}

/// Wraps a compound value serializer so the finished value becomes a single-element list.
struct One<S>(S);

impl<S> ser::SerializeSeq for One<S>
where
    S: ser::SerializeSeq<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_element<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_element(value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

impl<S> ser::SerializeTupleStruct for One<S>
where
    S: ser::SerializeTupleStruct<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_field(value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

impl<S> ser::SerializeTupleVariant for One<S>
where
    S: ser::SerializeTupleVariant<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_field(value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

impl<S> ser::SerializeMap for One<S>
where
    S: ser::SerializeMap<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> std::result::Result<(), ConvertError> {
        self.0.serialize_key(key)
    }

    fn serialize_value<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_value(value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

impl<S> ser::SerializeStruct for One<S>
where
    S: ser::SerializeStruct<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_field(key, value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

impl<S> ser::SerializeStructVariant for One<S>
where
    S: ser::SerializeStructVariant<Ok = Value, Error = ConvertError>,
{
    type Ok = Vec<Value>;
    type Error = ConvertError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), ConvertError> {
        self.0.serialize_field(key, value)
    }

    fn end(self) -> std::result::Result<Vec<Value>, ConvertError> {
        Ok(vec![self.0.end()?])
    }
}

struct Gather(Vec<Value>);

impl Gather {
    fn single(self) -> std::result::Result<Value, ConvertError> {
        let len = self.0.len();
        let mut values = self.0;
        match values.pop() {
            Some(value) if len == 1 => Ok(value),
            _ => Err(de::Error::invalid_length(len, &"exactly one value")),
        }
    }
}

macro_rules! gather_single {
    ($($method:ident($($arg:ident: $ty:ty),*))*) => {$(
        fn $method<V: Visitor<'de>>(
            self,
            $($arg: $ty,)*
            visitor: V,
        ) -> std::result::Result<V::Value, ConvertError> {
            self.single()?.$method($($arg,)* visitor)
        }
    )*};
}

impl<'de> Deserializer<'de> for Gather {
    type Error = ConvertError;

    gather_single! {
        deserialize_any()
        deserialize_bool()
        deserialize_i8() deserialize_i16() deserialize_i32() deserialize_i64() deserialize_i128()
        deserialize_u8() deserialize_u16() deserialize_u32() deserialize_u64() deserialize_u128()
        deserialize_f32() deserialize_f64()
        deserialize_char() deserialize_str() deserialize_string()
        deserialize_bytes() deserialize_byte_buf()
        deserialize_option()
        deserialize_newtype_struct(name: &'static str)
        deserialize_seq()
        deserialize_tuple_struct(name: &'static str, len: usize)
        deserialize_map()
        deserialize_struct(name: &'static str, fields: &'static [&'static str])
        deserialize_enum(name: &'static str, variants: &'static [&'static str])
        deserialize_identifier()
        deserialize_ignored_any()
    }

    fn deserialize_unit<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, ConvertError> {
        if self.0.is_empty() {
            visitor.visit_unit()
        } else {
            self.single()?.deserialize_unit(visitor)
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, ConvertError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, ConvertError> {
        visit_seq(self.0, visitor)
    }
}
