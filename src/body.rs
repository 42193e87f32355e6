use std::collections::HashMap;

use bytes::Bytes;
use futures_util::StreamExt;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::codec::CodecSet;
use crate::error::Error;
use crate::transport::{ByteStream, RequestBody};

/// A request payload whose final encoding is decided at send time: the
/// explicit `Content-Type` header wins, otherwise the payload's shape picks
/// one (form pairs -> urlencoded, structured values -> JSON, text and bytes
/// -> text/plain, streams -> octet-stream).
pub enum BodyPayload {
    Text(String),
    Binary(Bytes),
    Structured(Value),
    Form(Vec<(String, String)>),
    Stream(ByteStream),
}

impl BodyPayload {
    /// Captures a typed value as a structured payload, encoded by whichever
    /// codec the effective content type selects.
    pub fn from_struct<T>(value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(|source| Error::Encode {
            content_type: "application/json",
            source: Box::new(source),
        })?;
        Ok(Self::Structured(value))
    }

    pub fn from_stream(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }

    fn inferred_content_type(&self) -> &'static str {
        match self {
            Self::Form(_) => "application/x-www-form-urlencoded",
            Self::Structured(_) => "application/json",
            Self::Text(_) | Self::Binary(_) => "text/plain",
            Self::Stream(_) => "application/octet-stream",
        }
    }
}

impl std::fmt::Debug for BodyPayload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text(_) => "Text",
            Self::Binary(_) => "Binary",
            Self::Structured(_) => "Structured",
            Self::Form(_) => "Form",
            Self::Stream(_) => "Stream",
        };
        formatter.write_str(name)
    }
}

impl From<String> for BodyPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for BodyPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for BodyPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for BodyPayload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Value> for BodyPayload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<Vec<(String, String)>> for BodyPayload {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Form(pairs)
    }
}

impl From<HashMap<String, String>> for BodyPayload {
    fn from(map: HashMap<String, String>) -> Self {
        let mut pairs: Vec<(String, String)> = map.into_iter().collect();
        pairs.sort();
        Self::Form(pairs)
    }
}

/// One file in a multipart form.
pub struct FilePart {
    pub(crate) name: String,
    pub(crate) file_name: String,
    pub(crate) content: FileContent,
}

pub enum FileContent {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl FilePart {
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<FileContent>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    pub fn from_stream(
        name: impl Into<String>,
        file_name: impl Into<String>,
        stream: ByteStream,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            content: FileContent::Stream(stream),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<Bytes> for FileContent {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text.into_bytes()))
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}

#[derive(Debug)]
pub(crate) struct PreparedBody {
    pub(crate) body: RequestBody,
    pub(crate) content_type: Option<String>,
}

/// Materializes the request body. Files force multipart, bare fields force
/// urlencoded, otherwise the payload is encoded by the effective content
/// type.
pub(crate) async fn prepare_body(
    form_fields: &[(String, String)],
    form_files: Vec<FilePart>,
    boundary: Option<&str>,
    payload: Option<BodyPayload>,
    explicit_content_type: Option<&str>,
    codecs: &CodecSet,
) -> Result<PreparedBody, Error> {
    if !form_files.is_empty() {
        return multipart_body(form_fields, form_files, boundary).await;
    }
    if !form_fields.is_empty() {
        return Ok(PreparedBody {
            body: RequestBody::Bytes(Bytes::from(urlencode_pairs(form_fields).into_bytes())),
            content_type: Some("application/x-www-form-urlencoded".to_owned()),
        });
    }
    let Some(payload) = payload else {
        return Ok(PreparedBody {
            body: RequestBody::Empty,
            content_type: None,
        });
    };

    let content_type = explicit_content_type
        .map(str::to_owned)
        .unwrap_or_else(|| payload.inferred_content_type().to_owned());
    let body = encode_payload(payload, &content_type, codecs)?;
    Ok(PreparedBody {
        body,
        content_type: Some(content_type),
    })
}

fn encode_payload(
    payload: BodyPayload,
    content_type: &str,
    codecs: &CodecSet,
) -> Result<RequestBody, Error> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let unsupported = || Error::UnsupportedContentType {
        content_type: content_type.to_owned(),
    };

    match essence.as_str() {
        "application/json" => match payload {
            BodyPayload::Structured(value) => {
                Ok(RequestBody::Bytes(codecs.encode_json_value(&value)?))
            }
            // Text and bytes under an explicit JSON content type are taken
            // as pre-encoded JSON.
            BodyPayload::Text(text) => Ok(RequestBody::Bytes(Bytes::from(text.into_bytes()))),
            BodyPayload::Binary(bytes) => Ok(RequestBody::Bytes(bytes)),
            BodyPayload::Stream(stream) => Ok(RequestBody::Stream(stream)),
            BodyPayload::Form(_) => Err(unsupported()),
        },
        "application/yaml" => match payload {
            BodyPayload::Structured(value) => {
                Ok(RequestBody::Bytes(codecs.encode_yaml_value(&value)?))
            }
            BodyPayload::Text(text) => Ok(RequestBody::Bytes(Bytes::from(text.into_bytes()))),
            BodyPayload::Binary(bytes) => Ok(RequestBody::Bytes(bytes)),
            BodyPayload::Stream(stream) => Ok(RequestBody::Stream(stream)),
            BodyPayload::Form(_) => Err(unsupported()),
        },
        "application/xml" => match payload {
            // An XML rendition of an untyped value has no canonical root;
            // use `xml_body` for typed encoding.
            BodyPayload::Structured(_) | BodyPayload::Form(_) => Err(unsupported()),
            BodyPayload::Text(text) => Ok(RequestBody::Bytes(Bytes::from(text.into_bytes()))),
            BodyPayload::Binary(bytes) => Ok(RequestBody::Bytes(bytes)),
            BodyPayload::Stream(stream) => Ok(RequestBody::Stream(stream)),
        },
        "application/x-www-form-urlencoded" => match payload {
            BodyPayload::Form(pairs) => Ok(RequestBody::Bytes(Bytes::from(
                urlencode_pairs(&pairs).into_bytes(),
            ))),
            BodyPayload::Structured(value) => {
                let pairs = value_to_form_pairs(&value).ok_or_else(unsupported)?;
                Ok(RequestBody::Bytes(Bytes::from(
                    urlencode_pairs(&pairs).into_bytes(),
                )))
            }
            BodyPayload::Text(text) => Ok(RequestBody::Bytes(Bytes::from(text.into_bytes()))),
            BodyPayload::Binary(bytes) => Ok(RequestBody::Bytes(bytes)),
            BodyPayload::Stream(stream) => Ok(RequestBody::Stream(stream)),
        },
        "text/plain" | "application/octet-stream" => match payload {
            BodyPayload::Text(text) => Ok(RequestBody::Bytes(Bytes::from(text.into_bytes()))),
            BodyPayload::Binary(bytes) => Ok(RequestBody::Bytes(bytes)),
            BodyPayload::Stream(stream) => Ok(RequestBody::Stream(stream)),
            BodyPayload::Structured(_) | BodyPayload::Form(_) => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

/// Flattens a structured value into form pairs. Scalars stringify; arrays
/// fan out into repeated keys; anything nested is unencodable.
fn value_to_form_pairs(value: &Value) -> Option<Vec<(String, String)>> {
    let object = value.as_object()?;
    let mut pairs = Vec::with_capacity(object.len());
    for (key, entry) in object {
        match entry {
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_to_string(item)?));
                }
            }
            other => pairs.push((key.clone(), scalar_to_string(other)?)),
        }
    }
    Some(pairs)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub(crate) fn urlencode_pairs(pairs: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

async fn multipart_body(
    fields: &[(String, String)],
    files: Vec<FilePart>,
    boundary: Option<&str>,
) -> Result<PreparedBody, Error> {
    let boundary = boundary.map(str::to_owned).unwrap_or_else(generate_boundary);
    let mut buffer = crate::pool::get();

    for (name, value) in fields {
        buffer.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        buffer.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quoted(name)
            )
            .as_bytes(),
        );
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    for file in files {
        buffer.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        buffer.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(&file.name),
                escape_quoted(&file.file_name)
            )
            .as_bytes(),
        );
        buffer.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        match file.content {
            FileContent::Bytes(bytes) => buffer.extend_from_slice(&bytes),
            FileContent::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => buffer.extend_from_slice(&chunk),
                        Err(source) => {
                            crate::pool::put(buffer);
                            return Err(Error::Encode {
                                content_type: "multipart/form-data",
                                source,
                            });
                        }
                    }
                }
            }
        }
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(PreparedBody {
        body: RequestBody::Bytes(crate::pool::copy_out(buffer)),
        content_type: Some(format!("multipart/form-data; boundary={boundary}")),
    })
}

fn generate_boundary() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    let token: String = (0..30)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("------------------------{token}")
}

fn escape_quoted(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
