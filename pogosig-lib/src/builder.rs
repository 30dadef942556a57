//! Assembles signatures for outgoing RPC batches.
//!
//! A [`Builder`] holds the per-session state (session hash, location, auth
//! ticket, extra fields) and turns a batch of requests into a [`Signature`]
//! by asking the hashing backend for the location and request hashes. The
//! setters do not validate anything; a builder that never got a location or
//! ticket fails when the hash request is put together.

use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;
use tracing::{debug, info};

use crate::constants::{DEFAULT_CLIENT_VERSION, SESSION_HASH_SIZE};
use crate::error::SigError;
use crate::hashing::{HashRequest, HashServerClient, HashServerConfig, Hasher, RateInfo};
use crate::message::{Encryptor, Message, RequestPayload, SignatureCodec};
use crate::now_millis;
use crate::signature::{Location, Signature, SignatureFields, VersionConstant, VersionConstantTable};

/// Construction options for a [`Builder`].
pub struct BuilderOptions {
    /// App startup time in ms since the epoch; defaults to now
    pub init_time: Option<i64>,
    /// Fixed session hash; 16 random bytes when unset
    pub session_hash: Option<Bytes>,
    /// Forces `unknown25` regardless of version
    pub uk25: Option<VersionConstant>,
    /// `unknown25` for versions missing from the table
    pub uk25_fallback: Option<i64>,
    /// Client version, e.g. `0.77.1`
    pub version: String,
    /// Pins `timestamp`
    pub time: Option<u64>,
    /// Pins `timestamp_since_start`
    pub time_since_start: Option<u64>,
    pub codec: Option<Arc<dyn SignatureCodec>>,
    pub encryptor: Option<Arc<dyn Encryptor>>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            init_time: None,
            session_hash: None,
            uk25: None,
            uk25_fallback: None,
            version: DEFAULT_CLIENT_VERSION.to_string(),
            time: None,
            time_since_start: None,
            codec: None,
            encryptor: None,
        }
    }
}

pub struct Builder {
    init_time: i64,
    time: Option<u64>,
    time_since_start: Option<u64>,
    version: String,
    forced_uk25: Option<VersionConstant>,
    constants: VersionConstantTable,
    session_hash: Bytes,
    fields: SignatureFields,
    location: Option<Location>,
    auth_ticket: Option<Bytes>,
    hasher: Option<Box<dyn Hasher>>,
    codec: Arc<dyn SignatureCodec>,
    encryptor: Option<Arc<dyn Encryptor>>,
    rate_info: Option<RateInfo>,
}

impl Builder {
    pub fn new(options: BuilderOptions) -> Result<Self, SigError> {
        let codec = options
            .codec
            .ok_or_else(|| SigError::Configuration("A signature codec is mandatory".to_string()))?;

        let session_hash = options.session_hash.unwrap_or_else(|| {
            let mut hash = [0u8; SESSION_HASH_SIZE];
            rand::thread_rng().fill_bytes(&mut hash);
            Bytes::copy_from_slice(&hash)
        });

        debug!(version = %options.version, session_hash = hex::encode(&session_hash), "Signature builder created");
        Ok(Self {
            init_time: options.init_time.unwrap_or_else(now_millis),
            time: options.time,
            time_since_start: options.time_since_start,
            version: options.version,
            forced_uk25: options.uk25,
            constants: VersionConstantTable::default().with_fallback(options.uk25_fallback),
            session_hash,
            fields: SignatureFields::default(),
            location: None,
            auth_ticket: None,
            hasher: None,
            codec,
            encryptor: options.encryptor,
            rate_info: None,
        })
    }

    pub fn session_hash(&self) -> &Bytes {
        &self.session_hash
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn fields(&self) -> &SignatureFields {
        &self.fields
    }

    /// Rate-limit data from the last hashing call, successful or not
    pub fn rate_info(&self) -> Option<&RateInfo> {
        self.rate_info.as_ref()
    }

    /// Sets the location to sign. `accuracy` defaults to 0.
    pub fn set_location(&mut self, latitude: f64, longitude: f64, accuracy: Option<f64>) {
        self.location = Some(Location::new(latitude, longitude, accuracy.unwrap_or(0.0)));
    }

    /// Sets the auth ticket from a message, encoding it now.
    pub fn set_auth_ticket(&mut self, ticket: &dyn Message) {
        self.auth_ticket = Some(ticket.encode());
    }

    /// Sets an already encoded auth ticket.
    pub fn set_auth_ticket_bytes(&mut self, ticket: impl Into<Bytes>) {
        self.auth_ticket = Some(ticket.into());
    }

    /// Merges `fields` into the stored ones, overwriting on conflict.
    pub fn set_fields(&mut self, fields: SignatureFields) {
        self.fields.merge(fields);
    }

    /// Switches hashing to the remote service at `url`.
    pub fn use_remote_hashing(&mut self, url: impl Into<String>, key: impl Into<String>) -> Result<(), SigError> {
        let client = HashServerClient::new(HashServerConfig::new(url, key))?;
        self.hasher = Some(Box::new(client));
        Ok(())
    }

    /// Switches hashing to a caller-provided backend.
    pub fn use_hasher(&mut self, hasher: Box<dyn Hasher>) {
        info!("Using caller-provided hashing backend");
        self.hasher = Some(hasher);
    }

    /// `unknown25` for the configured version, or the forced value.
    pub fn resolve_version_constant(&self) -> Result<i64, SigError> {
        self.constants.resolve(&self.version, self.forced_uk25.as_ref())
    }

    /// Registers an additional `unknown25` table entry.
    pub fn add_version_constant(&mut self, prefix: impl Into<String>, value: i64) {
        self.constants.insert(prefix, value);
    }

    /// Builds the unencrypted signature covering `requests`.
    ///
    /// Hashing failures are returned unchanged.
    pub async fn build_signature(&mut self, requests: &[RequestPayload<'_>]) -> Result<Signature, SigError> {
        // Resolved first so an unsupported version never reaches the network.
        let unknown25 = self.resolve_version_constant()?;

        let encoded: Vec<String> = requests.iter().map(RequestPayload::to_base64).collect();

        let now = now_millis();
        let ms_since_start = self
            .time_since_start
            .unwrap_or_else(|| (now - self.init_time).max(0) as u64);
        let timestamp = self.time.unwrap_or(now.max(0) as u64);

        let location = self.location.ok_or(SigError::MissingParameter("location"))?;
        let auth_ticket = self
            .auth_ticket
            .as_ref()
            .ok_or(SigError::MissingParameter("auth_ticket"))?;
        let hasher = self
            .hasher
            .as_mut()
            .ok_or_else(|| SigError::Configuration("No hashing backend configured".to_string()))?;

        let request = HashRequest::new(
            auth_ticket,
            location.latitude,
            location.longitude,
            location.accuracy,
            timestamp,
            &self.session_hash,
            encoded,
        );

        let result = hasher.hash(request).await;
        self.rate_info = hasher.rate_info().cloned();
        let response = result?;

        debug!(
            requests = requests.len(),
            request_hashes = response.request_hashes.len(),
            "Signature hashes received"
        );

        let fields = &self.fields;
        let mut signature = Signature {
            location_hash1: response.location_auth_hash,
            location_hash2: response.location_hash,
            session_hash: self.session_hash.clone(),
            timestamp: fields.timestamp.unwrap_or(timestamp),
            timestamp_since_start: fields.timestamp_since_start.unwrap_or(ms_since_start),
            unknown25,
            request_hash: response.request_hashes,
            location_fix: fields.location_fix.clone().unwrap_or_default(),
            sensor_info: fields.sensor_info.clone().unwrap_or_default(),
            device_info: fields.device_info.clone(),
            activity_status: fields.activity_status,
            unknown27: fields.unknown27,
            extra: fields.extra.clone(),
        };
        signature.apply_field_overrides()?;
        Ok(signature)
    }

    /// Builds, serializes and encrypts the signature for `requests`.
    pub async fn encrypt_signature(&mut self, requests: &[RequestPayload<'_>]) -> Result<Bytes, SigError> {
        let encryptor = self
            .encryptor
            .clone()
            .ok_or_else(|| SigError::Configuration("No encryptor configured".to_string()))?;

        let signature = self.build_signature(requests).await?;
        let serialized = self.codec.encode_signature(&signature)?;
        let encrypted = encryptor.encrypt(&serialized, signature.timestamp_since_start)?;

        debug!(
            plain_len = serialized.len(),
            cipher_len = encrypted.len(),
            "Signature encrypted"
        );
        Ok(encrypted)
    }

    /// Completion-style variant of [`Builder::encrypt_signature`]: `done` is
    /// called exactly once, with either the ciphertext or the error.
    ///
    /// Dropping the returned future before it resolves still calls `done`,
    /// with [`SigError::Cancelled`].
    pub async fn encrypt<F>(&mut self, requests: &[RequestPayload<'_>], done: F)
    where
        F: FnOnce(Result<Bytes, SigError>),
    {
        let completion = Completion { done: Some(done) };
        let result = self.encrypt_signature(requests).await;
        completion.deliver(result);
    }
}

/// Holds the completion callback of [`Builder::encrypt`] until it is used.
struct Completion<F: FnOnce(Result<Bytes, SigError>)> {
    done: Option<F>,
}

impl<F: FnOnce(Result<Bytes, SigError>)> Completion<F> {
    fn deliver(mut self, result: Result<Bytes, SigError>) {
        if let Some(done) = self.done.take() {
            done(result);
        }
    }
}

impl<F: FnOnce(Result<Bytes, SigError>)> Drop for Completion<F> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            debug!("Signature encryption dropped before completion");
            done(Err(SigError::Cancelled));
        }
    }
}
