/*!
 * Owned property values
 * D-Bus variants converted into plain data right after a call returns
 */

use std::collections::BTreeMap;

use dbus::arg::{ArgType, RefArg};
use serde::{Deserialize, Serialize};

use super::RegistryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Byte(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    Str(String),
    Path(String),
    StrList(Vec<String>),
    Dict(BTreeMap<String, Value>),
    /// Anything the harness never reads; keeps the signature for logging.
    Unsupported(String),
}

impl Value {
    pub fn from_ref_arg(arg: &dyn RefArg) -> Value {
        match arg.arg_type() {
            ArgType::Boolean => Value::Bool(arg.as_u64().map(|v| v != 0).unwrap_or(false)),
            ArgType::Byte => Value::Byte(arg.as_u64().unwrap_or_default() as u8),
            ArgType::UInt16 => Value::U16(arg.as_u64().unwrap_or_default() as u16),
            ArgType::UInt32 => Value::U32(arg.as_u64().unwrap_or_default() as u32),
            ArgType::UInt64 => Value::U64(arg.as_u64().unwrap_or_default()),
            ArgType::Int16 => Value::I16(arg.as_i64().unwrap_or_default() as i16),
            ArgType::Int32 => Value::I32(arg.as_i64().unwrap_or_default() as i32),
            ArgType::Int64 => Value::I64(arg.as_i64().unwrap_or_default()),
            ArgType::Double => Value::Double(arg.as_f64().unwrap_or_default()),
            ArgType::String => Value::Str(arg.as_str().unwrap_or_default().to_string()),
            ArgType::ObjectPath => Value::Path(arg.as_str().unwrap_or_default().to_string()),
            ArgType::Variant => arg
                .as_iter()
                .and_then(|mut inner| inner.next().map(Value::from_ref_arg))
                .unwrap_or_else(|| Value::Unsupported("v".to_string())),
            ArgType::Array => Self::from_array(arg),
            _ => Value::Unsupported(arg.signature().to_string()),
        }
    }

    fn from_array(arg: &dyn RefArg) -> Value {
        let signature = arg.signature().to_string();
        let Some(items) = arg.as_iter() else {
            return Value::Unsupported(signature);
        };

        if signature == "as" || signature == "ao" {
            return Value::StrList(
                items.filter_map(|item| item.as_str().map(str::to_string)).collect(),
            );
        }

        if signature.starts_with("a{s") {
            // Dictionaries iterate as key, value, key, value...
            let mut dict = BTreeMap::new();
            let mut items = items;
            while let (Some(key), Some(value)) = (items.next(), items.next()) {
                if let Some(key) = key.as_str() {
                    dict.insert(key.to_string(), Value::from_ref_arg(value));
                }
            }
            return Value::Dict(dict);
        }

        Value::Unsupported(signature)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Byte(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::I16(v) if v >= 0 => Some(v as u64),
            Value::I32(v) if v >= 0 => Some(v as u64),
            Value::I64(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) | Value::Path(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Value::StrList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Path(_) => "object path",
            Value::StrList(_) => "string array",
            Value::Dict(_) => "dictionary",
            Value::Unsupported(_) => "unsupported",
        }
    }

    /// Read a boolean property, failing with the property name on a type mismatch.
    pub fn expect_bool(&self, property: &str) -> Result<bool, RegistryError> {
        self.as_bool().ok_or_else(|| RegistryError::UnexpectedType {
            property: property.to_string(),
            found: self.type_name().to_string(),
        })
    }

    pub fn expect_u64(&self, property: &str) -> Result<u64, RegistryError> {
        self.as_u64().ok_or_else(|| RegistryError::UnexpectedType {
            property: property.to_string(),
            found: self.type_name().to_string(),
        })
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
