//! Structural decoder for merged request parameters.
//!
//! Path, query and form values arrive as text and are parsed on demand into
//! whatever the destination field asks for. JSON body values are handed to
//! `serde_json` as-is. Every value remembers where it came from so a failure
//! can name its source.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, value::SeqDeserializer, DeserializeSeed, IntoDeserializer, MapAccess, Visitor};
use serde::forward_to_deserialize_any;

/// Where a parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Path,
    Query,
    Form,
    Json,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Form => "form",
            Self::Json => "json",
        })
    }
}

#[derive(Debug)]
pub(crate) enum Field {
    Text { origin: Source, values: Vec<String> },
    Json(serde_json::Value),
}

/// Merged parameters, keyed by name. Later sources replace earlier ones.
#[derive(Debug, Default)]
pub(crate) struct Fields {
    entries: BTreeMap<String, Field>,
}

impl Fields {
    /// Merge text pairs from one source. Repeated keys within the source
    /// accumulate; a key already present from an earlier source is replaced.
    pub(crate) fn merge_text<I>(&mut self, origin: Source, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in pairs {
            grouped.entry(k).or_default().push(v);
        }
        for (k, values) in grouped {
            self.entries.insert(k, Field::Text { origin, values });
        }
    }

    pub(crate) fn merge_json(&mut self, object: serde_json::Map<String, serde_json::Value>) {
        for (k, v) in object {
            self.entries.insert(k, Field::Json(v));
        }
    }

    pub(crate) fn decode<T: de::DeserializeOwned>(self) -> Result<T, DecodeError> {
        T::deserialize(FieldsDeserializer { fields: self })
    }
}

/// Decoding failure, tagged with the offending source and key when known.
#[derive(Debug)]
pub(crate) struct DecodeError {
    pub(crate) origin: Option<(Source, String)>,
    pub(crate) message: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some((source, key)) => write!(f, "{source} parameter {key:?}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

impl de::Error for DecodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self {
            origin: None,
            message: msg.to_string(),
        }
    }
}

impl DecodeError {
    fn at(mut self, source: Source, key: &str) -> Self {
        if self.origin.is_none() {
            self.origin = Some((source, key.to_string()));
        }
        self
    }
}

struct FieldsDeserializer {
    fields: Fields,
}

impl<'de> de::Deserializer<'de> for FieldsDeserializer {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_map(FieldsAccess {
            entries: self.fields.entries.into_iter(),
            pending: None,
        })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct FieldsAccess {
    entries: std::collections::btree_map::IntoIter<String, Field>,
    pending: Option<(String, Field)>,
}

impl<'de> MapAccess<'de> for FieldsAccess {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, DecodeError> {
        match self.entries.next() {
            Some((key, field)) => {
                let de: de::value::StringDeserializer<DecodeError> = key.clone().into_deserializer();
                let k = seed.deserialize(de)?;
                self.pending = Some((key, field));
                Ok(Some(k))
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        let (key, field) = self
            .pending
            .take()
            .ok_or_else(|| <DecodeError as de::Error>::custom("value requested before key"))?;

        match field {
            Field::Text { origin, values } => seed
                .deserialize(TextDeserializer { values })
                .map_err(|e| e.at(origin, &key)),
            Field::Json(value) => seed
                .deserialize(value)
                .map_err(|e| <DecodeError as de::Error>::custom(e).at(Source::Json, &key)),
        }
    }
}

/// One or more text values for a single key.
struct TextDeserializer {
    values: Vec<String>,
}

impl TextDeserializer {
    /// Scalars take the last value supplied.
    fn last(mut self) -> Result<String, DecodeError> {
        self.values
            .pop()
            .ok_or_else(|| <DecodeError as de::Error>::custom("no value"))
    }
}

struct Text(String);

impl<'de> IntoDeserializer<'de, DecodeError> for Text {
    type Deserializer = TextDeserializer;

    fn into_deserializer(self) -> TextDeserializer {
        TextDeserializer { values: vec![self.0] }
    }
}

macro_rules! parse_text {
    ($($method:ident => $visit:ident),* $(,)?) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
            let raw = self.last()?;
            match raw.trim().parse() {
                Ok(v) => visitor.$visit(v),
                Err(e) => Err(de::Error::custom(format_args!("{raw:?}: {e}"))),
            }
        }
    )*};
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" | "on" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" | "off" => Some(false),
        _ => None,
    }
}

impl<'de> de::Deserializer<'de> for TextDeserializer {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        if self.values.len() > 1 {
            self.deserialize_seq(visitor)
        } else {
            visitor.visit_string(self.last()?)
        }
    }

    parse_text! {
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_i128 => visit_i128,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_u128 => visit_u128,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
        deserialize_char => visit_char,
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let raw = self.last()?;
        match parse_bool(&raw) {
            Some(b) => visitor.visit_bool(b),
            None => Err(de::Error::custom(format_args!("{raw:?} is not a boolean"))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_string(self.last()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_string(self.last()?)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_string(self.last()?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_byte_buf(self.last()?.into_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_byte_buf(self.last()?.into_bytes())
    }

    /// An empty value counts as absent.
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let absent = self.values.last().map_or(true, |v| v.is_empty());
        if absent {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let mut seq: SeqDeserializer<_, DecodeError> = SeqDeserializer::new(self.values.into_iter().map(Text));
        let value = visitor.visit_seq(&mut seq)?;
        seq.end()?;
        Ok(value)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        let variant: de::value::StringDeserializer<DecodeError> = self.last()?.into_deserializer();
        visitor.visit_enum(variant)
    }

    fn deserialize_map<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, DecodeError> {
        Err(de::Error::custom("nested structures cannot be read from text parameters"))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }
}
