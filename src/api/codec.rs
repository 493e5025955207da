//! Purpose: Turn application values into queue payloads and back.
//! Exports: `ValueCodec`, `RawCodec`, `Utf8Codec`, `JsonCodec`.
//! Role: Pluggable encoding applied before append and after read.
//! Invariants: Codecs are stateless from the queue's point of view and shareable across tasks.
//! Invariants: Decode failures affect only the message being decoded.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::error::{Error, ErrorKind};

pub trait ValueCodec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn encode(&self, value: &Self::Value) -> Result<Bytes, Error>;
    fn decode(&self, payload: Bytes) -> Result<Self::Value, Error>;
}

/// Payloads pass through untouched. `String`, `&'static str` and `Vec<u8>` all
/// convert into `Bytes` on write.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl ValueCodec for RawCodec {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> Result<Bytes, Error> {
        Ok(value.clone())
    }

    fn decode(&self, payload: Bytes) -> Result<Bytes, Error> {
        Ok(payload)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl ValueCodec for Utf8Codec {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, payload: Bytes) -> Result<String, Error> {
        String::from_utf8(payload.to_vec()).map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("payload is not valid utf-8")
                .with_source(err)
        })
    }
}

pub struct JsonCodec<T> {
    _value: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> ValueCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes, Error> {
        serde_json::to_vec(value).map(Bytes::from).map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("failed to encode json payload")
                .with_source(err)
        })
    }

    fn decode(&self, payload: Bytes) -> Result<T, Error> {
        serde_json::from_slice(&payload).map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("failed to decode json payload")
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonCodec, RawCodec, Utf8Codec, ValueCodec};
    use crate::core::error::ErrorKind;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        hello: String,
        time: u64,
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let payload = Bytes::from_static(b"\x00\xffraw");
        assert_eq!(RawCodec.encode(&payload).expect("encode"), payload);
        assert_eq!(RawCodec.decode(payload.clone()).expect("decode"), payload);
    }

    #[test]
    fn utf8_codec_rejects_invalid_text() {
        let err = Utf8Codec
            .decode(Bytes::from_static(&[0xff, 0xfe]))
            .expect_err("invalid utf-8");
        assert_eq!(err.kind(), ErrorKind::Encoding);
        let text = Utf8Codec
            .decode(Utf8Codec.encode(&"héllo".to_string()).expect("encode"))
            .expect("decode");
        assert_eq!(text, "héllo");
    }

    #[test]
    fn json_codec_matches_wire_text() {
        let codec = JsonCodec::<Event>::new();
        let event = Event {
            hello: "world".to_string(),
            time: 7,
        };
        let payload = codec.encode(&event).expect("encode");
        assert_eq!(payload.as_ref(), br#"{"hello":"world","time":7}"#);
        assert_eq!(codec.decode(payload).expect("decode"), event);

        let err = codec
            .decode(Bytes::from_static(b"{not json"))
            .expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }
}
