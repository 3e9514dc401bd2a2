//! JSON 编解码
//!
//! 线上格式固定为 UTF-8 JSON，字段名使用 camelCase（由负载类型的
//! `#[serde(rename_all = "camelCase")]` 声明）。解码时容忍未知字段，
//! 字段名大小写不敏感，任何格式或结构不匹配都以 `Decode` 错误返回，
//! 绝不会让消费循环崩溃。

use serde::de::value::{MapDeserializer, SeqDeserializer, StringDeserializer};
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer,
    Unexpected, VariantAccess, Visitor,
};
use serde::{Serialize, forward_to_deserialize_any};
use serde_json::{Map, Value};

use crate::error::MessagingError;

/// 可通过消息链路传递的负载类型
pub trait MessagePayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 写入 `message-type` 头的类型名，默认取类型的短名称（如 `Order`）
    fn message_type() -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// 序列化为 JSON 字节
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, MessagingError> {
    serde_json::to_vec(payload).map_err(|e| MessagingError::Encode(e.to_string()))
}

/// 反序列化 JSON 字节
///
/// 空消息体或 JSON `null` 返回 `Ok(None)`，由调用方决定如何处理空负载。
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Option<T>, MessagingError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| MessagingError::Decode(e.to_string()))?;
    if value.is_null() {
        return Ok(None);
    }

    T::deserialize(CaseInsensitive(value))
        .map(Some)
        .map_err(|e| MessagingError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// 大小写不敏感的反序列化器
// ---------------------------------------------------------------------------

/// 包装 `serde_json::Value`，在反序列化结构体时按声明的字段名
/// 忽略大小写匹配对象的键，嵌套的数组、对象以及枚举变体同样生效。
struct CaseInsensitive(Value);

impl<'de> IntoDeserializer<'de, serde_json::Error> for CaseInsensitive {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> Deserializer<'de> for CaseInsensitive {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Array(items) => {
                let mut seq = SeqDeserializer::<_, serde_json::Error>::new(
                    items.into_iter().map(CaseInsensitive),
                );
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            Value::Object(map) => {
                let mut access = MapDeserializer::<_, serde_json::Error>::new(
                    map.into_iter().map(|(k, v)| (k, CaseInsensitive(v))),
                );
                let value = visitor.visit_map(&mut access)?;
                access.end()?;
                Ok(value)
            }
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(CaseInsensitive(other)),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Object(map) => {
                CaseInsensitive(Value::Object(canonicalize(map, fields))).deserialize_any(visitor)
            }
            other => CaseInsensitive(other).deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::String(variant) => visitor.visit_enum(CaseInsensitiveEnum {
                variant: fold_name(variant, variants),
                content: None,
            }),
            Value::Object(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((variant, content)), None) => visitor.visit_enum(CaseInsensitiveEnum {
                        variant: fold_name(variant, variants),
                        content: Some(content),
                    }),
                    _ => Err(de::Error::invalid_value(
                        Unexpected::Map,
                        &"map with a single key",
                    )),
                }
            }
            other => other.deserialize_enum(name, variants, visitor),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier ignored_any
    }
}

/// 外部标记的枚举：变体名加可选的内容
struct CaseInsensitiveEnum {
    variant: String,
    content: Option<Value>,
}

impl<'de> EnumAccess<'de> for CaseInsensitiveEnum {
    type Error = serde_json::Error;
    type Variant = CaseInsensitiveVariant;

    fn variant_seed<S: DeserializeSeed<'de>>(
        self,
        seed: S,
    ) -> Result<(S::Value, Self::Variant), Self::Error> {
        let name: StringDeserializer<serde_json::Error> = self.variant.into_deserializer();
        let variant = seed.deserialize(name)?;
        Ok((variant, CaseInsensitiveVariant(self.content)))
    }
}

struct CaseInsensitiveVariant(Option<Value>);

impl CaseInsensitiveVariant {
    fn content(self, expected: &'static str) -> Result<Value, serde_json::Error> {
        self.0
            .ok_or_else(|| de::Error::invalid_type(Unexpected::UnitVariant, &expected))
    }
}

impl<'de> VariantAccess<'de> for CaseInsensitiveVariant {
    type Error = serde_json::Error;

    fn unit_variant(self) -> Result<(), Self::Error> {
        match self.0 {
            None | Some(Value::Null) => Ok(()),
            Some(_) => Err(de::Error::invalid_type(
                Unexpected::NewtypeVariant,
                &"unit variant",
            )),
        }
    }

    fn newtype_variant_seed<S: DeserializeSeed<'de>>(
        self,
        seed: S,
    ) -> Result<S::Value, Self::Error> {
        seed.deserialize(CaseInsensitive(self.content("newtype variant")?))
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        CaseInsensitive(self.content("tuple variant")?).deserialize_any(visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        CaseInsensitive(self.content("struct variant")?).deserialize_struct("", fields, visitor)
    }
}

/// 名称精确匹配优先，否则按忽略大小写折叠为声明的名称
fn fold_name(name: String, declared: &'static [&'static str]) -> String {
    if declared.contains(&name.as_str()) {
        return name;
    }
    declared
        .iter()
        .find(|d| d.eq_ignore_ascii_case(&name))
        .map_or(name, |d| d.to_string())
}

/// 将对象的键改写为结构体声明的字段名
///
/// 精确匹配的键优先；仅大小写不同的重复键只保留第一个。
fn canonicalize(map: Map<String, Value>, fields: &'static [&'static str]) -> Map<String, Value> {
    let mut canonical = Map::with_capacity(map.len());
    let mut folded = Vec::new();

    for (key, value) in map {
        if fields.contains(&key.as_str()) {
            canonical.insert(key, value);
        } else if let Some(field) = fields.iter().find(|f| f.eq_ignore_ascii_case(&key)) {
            folded.push((field.to_string(), value));
        } else {
            canonical.insert(key, value);
        }
    }

    for (field, value) in folded {
        canonical.entry(field).or_insert(value);
    }

    canonical
}

/// 让 `Value` 本身也能作为负载，便于转发未知结构的消息
impl MessagePayload for Value {}
