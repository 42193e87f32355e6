use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BoxError, Error};

/// Marshals an untyped value into encoded bytes.
pub type MarshalFn = Arc<dyn Fn(&Value) -> Result<Vec<u8>, BoxError> + Send + Sync>;
/// Unmarshals encoded bytes into an untyped value.
pub type UnmarshalFn = Arc<dyn Fn(&[u8]) -> Result<Value, BoxError> + Send + Sync>;

/// A pluggable encode/decode pair over untyped values. Typed payloads pass
/// through `serde_json::Value` on their way in and out, which is what lets
/// callers swap the underlying library without touching the typed surface.
#[derive(Clone)]
pub struct ValueCodec {
    marshal: MarshalFn,
    unmarshal: UnmarshalFn,
}

impl ValueCodec {
    pub fn new(marshal: MarshalFn, unmarshal: UnmarshalFn) -> Self {
        Self { marshal, unmarshal }
    }
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("ValueCodec")
    }
}

/// The client's codec registry. JSON and YAML are value-pluggable; XML is
/// typed-direct (see [`encode_xml`] / [`decode_xml`]) and form encoding is
/// built into the body module.
#[derive(Clone, Debug)]
pub struct CodecSet {
    pub(crate) json: ValueCodec,
    pub(crate) yaml: ValueCodec,
}

impl Default for CodecSet {
    fn default() -> Self {
        Self {
            json: ValueCodec::new(
                Arc::new(|value| serde_json::to_vec(value).map_err(Into::into)),
                Arc::new(|bytes| serde_json::from_slice(bytes).map_err(Into::into)),
            ),
            yaml: ValueCodec::new(
                Arc::new(|value| {
                    serde_yaml::to_string(value)
                        .map(String::into_bytes)
                        .map_err(Into::into)
                }),
                Arc::new(|bytes| serde_yaml::from_slice(bytes).map_err(Into::into)),
            ),
        }
    }
}

impl CodecSet {
    pub(crate) fn encode_json_value(&self, value: &Value) -> Result<Bytes, Error> {
        (self.json.marshal)(value)
            .map(Bytes::from)
            .map_err(|source| Error::Encode {
                content_type: "application/json",
                source,
            })
    }

    pub(crate) fn encode_json<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(|source| Error::Encode {
            content_type: "application/json",
            source: Box::new(source),
        })?;
        self.encode_json_value(&value)
    }

    pub(crate) fn decode_json<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let value = (self.json.unmarshal)(bytes).map_err(|source| Error::Decode {
            content_type: "application/json",
            source,
        })?;
        serde_json::from_value(value).map_err(|source| Error::Decode {
            content_type: "application/json",
            source: Box::new(source),
        })
    }

    pub(crate) fn encode_yaml_value(&self, value: &Value) -> Result<Bytes, Error> {
        (self.yaml.marshal)(value)
            .map(Bytes::from)
            .map_err(|source| Error::Encode {
                content_type: "application/yaml",
                source,
            })
    }

    pub(crate) fn encode_yaml<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(|source| Error::Encode {
            content_type: "application/yaml",
            source: Box::new(source),
        })?;
        self.encode_yaml_value(&value)
    }

    pub(crate) fn decode_yaml<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let value = (self.yaml.unmarshal)(bytes).map_err(|source| Error::Decode {
            content_type: "application/yaml",
            source,
        })?;
        serde_json::from_value(value).map_err(|source| Error::Decode {
            content_type: "application/yaml",
            source: Box::new(source),
        })
    }

    pub(crate) fn with_json_marshal(&mut self, marshal: MarshalFn) {
        self.json.marshal = marshal;
    }

    pub(crate) fn with_json_unmarshal(&mut self, unmarshal: UnmarshalFn) {
        self.json.unmarshal = unmarshal;
    }

    pub(crate) fn with_yaml_marshal(&mut self, marshal: MarshalFn) {
        self.yaml.marshal = marshal;
    }

    pub(crate) fn with_yaml_unmarshal(&mut self, unmarshal: UnmarshalFn) {
        self.yaml.unmarshal = unmarshal;
    }
}

/// Serializes a typed value as an XML document; the type's name becomes the
/// root element.
pub(crate) fn encode_xml<T>(value: &T) -> Result<Bytes, Error>
where
    T: Serialize + ?Sized,
{
    quick_xml::se::to_string(value)
        .map(|text| Bytes::from(text.into_bytes()))
        .map_err(|source| Error::Encode {
            content_type: "application/xml",
            source: Box::new(source),
        })
}

pub(crate) fn decode_xml<T>(bytes: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let text = std::str::from_utf8(bytes).map_err(|source| Error::Decode {
        content_type: "application/xml",
        source: Box::new(source),
    })?;
    quick_xml::de::from_str(text).map_err(|source| Error::Decode {
        content_type: "application/xml",
        source: Box::new(source),
    })
}
