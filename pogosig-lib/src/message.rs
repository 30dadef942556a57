//! Seams to the collaborators that live outside this crate: the RPC message
//! encoding, the serialization of the final signature, and the symmetric
//! encryption primitive.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::SigError;
use crate::signature::Signature;

/// An RPC message that knows its own wire encoding.
pub trait Message: Send + Sync {
    fn encode(&self) -> Bytes;

    fn decode(bytes: &[u8]) -> Result<Self, SigError>
    where
        Self: Sized;
}

/// Turns an assembled [`Signature`] into the bytes handed to the encryptor.
pub trait SignatureCodec: Send + Sync {
    fn encode_signature(&self, signature: &Signature) -> Result<Bytes, SigError>;
}

/// The symmetric encryption applied to the serialized signature.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, input: &[u8], ms_since_start: u64) -> Result<Bytes, SigError>;
}

/// Encodes signatures as JSON. Useful for inspection and tests; the game
/// server expects the protobuf encoding supplied by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSignatureCodec;

impl SignatureCodec for JsonSignatureCodec {
    fn encode_signature(&self, signature: &Signature) -> Result<Bytes, SigError> {
        Ok(Bytes::from(serde_json::to_vec(signature)?))
    }
}

/// One request to be covered by the signature: either already encoded bytes
/// or a message that still needs encoding.
#[derive(Clone, Copy)]
pub enum RequestPayload<'a> {
    Encoded(&'a [u8]),
    Message(&'a dyn Message),
}

impl RequestPayload<'_> {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            RequestPayload::Encoded(raw) => Bytes::copy_from_slice(raw),
            RequestPayload::Message(message) => message.encode(),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

impl<'a> From<&'a [u8]> for RequestPayload<'a> {
    fn from(raw: &'a [u8]) -> Self {
        RequestPayload::Encoded(raw)
    }
}

impl<'a> From<&'a Bytes> for RequestPayload<'a> {
    fn from(raw: &'a Bytes) -> Self {
        RequestPayload::Encoded(raw.as_ref())
    }
}

impl std::fmt::Debug for RequestPayload<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestPayload::Encoded(raw) => write!(f, "Encoded({})", hex::encode(raw)),
            RequestPayload::Message(message) => write!(f, "Message({})", hex::encode(message.encode())),
        }
    }
}
