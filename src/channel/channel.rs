//! The channel: runs messages through the binding pipeline and the transport.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

use super::binding::BindingElement;
use super::signing::{
    SigningKey, compute_signature, ensure_mandatory_parts_signed, oauth_hash, openid_fields_to_sign,
    verify_signature,
};
use crate::core::*;
use crate::crypto::{Association, AssociationType};
use crate::message::{Message, MessageKind, SignatureStyle};
use crate::store::{AssociationStore, AssociationUse, NonceStore};

/// Which side of the OpenID exchange the channel serves, with its associations.
#[derive(Clone)]
pub enum AssociationRole {
    /// Relying party: associations keyed by provider endpoint URL.
    RelyingParty(Arc<AssociationStore<String>>),
    /// Provider: shared and private associations.
    Provider(Arc<AssociationStore<AssociationUse>>),
}

impl fmt::Debug for AssociationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationRole::RelyingParty(_) => f.write_str("RelyingParty"),
            AssociationRole::Provider(_) => f.write_str("Provider"),
        }
    }
}

/// An incoming message that passed every protection its type requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    message: Message,
    protections: Protections,
}

impl VerifiedMessage {
    /// Protections applied while receiving.
    pub fn protections(&self) -> Protections {
        self.protections
    }

    /// Take the message.
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl Deref for VerifiedMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

/// Protocol message channel.
///
/// Outgoing messages are stamped, nonced, and signed in that order; incoming
/// messages are verified in reverse. A failing element aborts the message.
pub struct Channel {
    settings: SecuritySettings,
    clock: Arc<dyn Clock>,
    nonces: Arc<NonceStore>,
    role: Option<AssociationRole>,
    transport: Option<Arc<dyn DirectTransport>>,
    secrets: Option<Arc<dyn TokenSecrets>>,
}

impl Channel {
    /// Start building a channel.
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Security settings.
    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Clock shared with the stores.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Nonce store consulted by the replay-protection element.
    pub fn nonce_store(&self) -> &NonceStore {
        &self.nonces
    }

    /// OpenID role, if any.
    pub fn role(&self) -> Option<&AssociationRole> {
        self.role.as_ref()
    }

    /// Apply the outgoing pipeline.
    ///
    /// Returns the protections applied. The message is left untouched on error
    /// only as far as no element had run yet; callers discard it either way.
    pub fn prepare_outgoing(&self, message: &mut Message) -> ProtocolResult<Protections> {
        let required = message.schema().outgoing;
        let mut applied = Protections::NONE;
        for element in BindingElement::PIPELINE {
            if required.contains(element.protection()) {
                element.prepare_outgoing(self, message)?;
                applied |= element.protection();
            }
        }
        message.validate()?;
        debug!(kind = message.kind().name(), %applied, "prepared outgoing message");
        Ok(applied)
    }

    /// Apply the incoming pipeline, in reverse order.
    pub fn process_incoming(&self, message: Message) -> ProtocolResult<VerifiedMessage> {
        message.validate()?;
        let required = message.schema().incoming;
        let mut applied = Protections::NONE;
        for element in BindingElement::PIPELINE.into_iter().rev() {
            if required.contains(element.protection()) {
                element.process_incoming(self, &message)?;
                applied |= element.protection();
            }
        }
        let missing = required.difference(applied);
        if !missing.is_empty() {
            return Err(ProtocolError::Config(format!(
                "no binding element provides {missing} protection"
            )));
        }
        debug!(kind = message.kind().name(), %applied, "accepted incoming message");
        Ok(VerifiedMessage {
            message,
            protections: applied,
        })
    }

    /// Decode and verify a payload.
    pub fn receive(
        &self,
        kind: MessageKind,
        payload: &[u8],
        arrived_via: TransportKind,
    ) -> ProtocolResult<VerifiedMessage> {
        let message = Message::decode(kind, payload, arrived_via)?;
        self.process_incoming(message)
    }

    /// Decode and verify a request that arrived at `url` with `method`.
    ///
    /// The URL and method take part in OAuth signatures.
    pub fn receive_request(
        &self,
        kind: MessageKind,
        payload: &[u8],
        arrived_via: TransportKind,
        method: &str,
        url: Url,
    ) -> ProtocolResult<VerifiedMessage> {
        let mut message = Message::decode(kind, payload, arrived_via)?;
        message.set_http_method(method).set_recipient(url);
        self.process_incoming(message)
    }

    /// Send a direct message and return the verified response.
    ///
    /// The response is decoded as the first of `response_kinds` it validates as.
    pub fn request(&self, mut message: Message, response_kinds: &[MessageKind]) -> ProtocolResult<VerifiedMessage> {
        let schema = message.schema();
        if schema.transport != TransportKind::Direct {
            return Err(MessageError::WrongTransport {
                message: schema.name,
                expected: schema.transport,
                actual: TransportKind::Direct,
            }
            .into());
        }
        let transport = self.transport.as_ref().ok_or(TransportError::NotConfigured)?;
        self.prepare_outgoing(&mut message)?;
        let endpoint = message
            .recipient()
            .ok_or_else(|| MessageError::MissingPart("recipient".to_string()))?
            .to_string();
        let body = message.encode()?;

        debug!(kind = schema.name, %endpoint, "sending direct request");
        let response = transport.post(&endpoint, &body).inspect_err(|err| {
            warn!(kind = schema.name, %endpoint, %err, "direct request failed");
        })?;
        let response = Message::decode_response(response_kinds, &response)?;
        self.process_incoming(response)
    }

    /// Sign (or re-sign) a message whose type carries a signature.
    pub fn sign(&self, message: &mut Message) -> ProtocolResult<()> {
        let Some(style) = message.schema().signature else {
            return Ok(());
        };
        let kind = message.kind().name();
        match style {
            SignatureStyle::OpenId => {
                let association = self.association_for_signing(message)?;
                message.set(PART_ASSOC_HANDLE, association.handle());
                message.set(PART_SIGNED, openid_fields_to_sign(message).join(","));
                let signature = compute_signature(message, &SigningKey::Association(association))?;
                message.set(PART_SIG, signature);
            }
            SignatureStyle::OAuth => {
                let key = self.oauth_key(message).ok_or(ProtocolError::NoSigningKey(kind))?;
                let signature = compute_signature(message, &key)?;
                message.set(OAUTH_SIGNATURE, signature);
            }
        }
        debug!(kind, "signed message");
        Ok(())
    }

    /// Verify the signature of an incoming message.
    pub fn verify(&self, message: &Message) -> ProtocolResult<()> {
        let Some(style) = message.schema().signature else {
            return Ok(());
        };
        let kind = message.kind().name();
        match style {
            SignatureStyle::OpenId => {
                ensure_mandatory_parts_signed(message)?;
                let handle = message.require(PART_ASSOC_HANDLE)?;
                let signature = message.require(PART_SIG)?;
                match self.association_for_verifying(message, handle)? {
                    Some(association) => {
                        signature_outcome(kind, verify_signature(message, &SigningKey::Association(association), signature)?)
                    }
                    None => self.verify_by_unrecognized_handle(message, handle),
                }
            }
            SignatureStyle::OAuth => {
                let signature = message.require(OAUTH_SIGNATURE)?;
                let Some(key) = self.oauth_key(message) else {
                    warn!(kind, "no secret for consumer");
                    return Err(ProtocolError::InvalidSignature(kind));
                };
                signature_outcome(kind, verify_signature(message, &key, signature)?)
            }
        }
    }

    fn oauth_key(&self, message: &Message) -> Option<SigningKey> {
        let secrets = self.secrets.as_ref()?;
        let hash = oauth_hash(message.get(OAUTH_SIGNATURE_METHOD)?)?;
        let consumer_secret = secrets.consumer_secret(message.get(OAUTH_CONSUMER_KEY)?)?;
        let token_secret = match message.get(OAUTH_TOKEN) {
            Some(token) => Some(secrets.token_secret(token)?),
            None => None,
        };
        Some(SigningKey::oauth(&consumer_secret, token_secret.as_deref(), hash))
    }

    fn association_for_signing(&self, message: &mut Message) -> ProtocolResult<Association> {
        let kind = message.kind().name();
        match &self.role {
            Some(AssociationRole::Provider(store)) => {
                if let Some(handle) = message.get(PART_ASSOC_HANDLE).map(str::to_owned) {
                    if let Some(association) = store.get_association_by_handle(&AssociationUse::Smart, &handle) {
                        return Ok(association);
                    }
                    info!(%handle, "unknown association handle, signing with a private association");
                    message.set(PART_INVALIDATE_HANDLE, handle);
                    message.remove(PART_ASSOC_HANDLE);
                }
                self.create_private_association(store)
            }
            Some(AssociationRole::RelyingParty(store)) => {
                let endpoint = op_endpoint(message)?;
                let handle = message.require(PART_ASSOC_HANDLE)?;
                store
                    .get_association_by_handle(endpoint.as_str(), handle)
                    .ok_or(ProtocolError::NoSigningKey(kind))
            }
            None => Err(ProtocolError::NoSigningKey(kind)),
        }
    }

    fn create_private_association(&self, store: &AssociationStore<AssociationUse>) -> ProtocolResult<Association> {
        let association_type = if self
            .settings
            .is_hash_length_permitted(AssociationType::HmacSha256.hash_bit_length())
        {
            AssociationType::HmacSha256
        } else {
            AssociationType::strongest_permitted(&self.settings).ok_or_else(|| {
                ProtocolError::Config("no association type within the permitted hash range".into())
            })?
        };
        let association = Association::generate(association_type, self.now(), self.settings.max_authentication_time);
        store.store_association(AssociationUse::Dumb, association.clone());
        Ok(association)
    }

    fn association_for_verifying(&self, message: &Message, handle: &str) -> ProtocolResult<Option<Association>> {
        Ok(match &self.role {
            Some(AssociationRole::Provider(store)) => {
                // check_authentication only ever verifies private associations.
                let partition = if message.kind() == MessageKind::CheckAuthenticationRequest {
                    AssociationUse::Dumb
                } else {
                    AssociationUse::Smart
                };
                store.get_association_by_handle(&partition, handle)
            }
            Some(AssociationRole::RelyingParty(store)) => {
                store.get_association_by_handle(op_endpoint(message)?.as_str(), handle)
            }
            None => None,
        })
    }

    fn verify_by_unrecognized_handle(&self, message: &Message, handle: &str) -> ProtocolResult<()> {
        let kind = message.kind().name();
        let Some(AssociationRole::RelyingParty(store)) = &self.role else {
            warn!(kind, handle, "no association for handle");
            return Err(ProtocolError::InvalidSignature(kind));
        };

        let endpoint = op_endpoint(message)?;
        info!(handle, %endpoint, "verifying signature with the provider (dumb mode)");

        let check_request = message
            .converted(MessageKind::CheckAuthenticationRequest)
            .with_recipient(endpoint.clone());
        let response = self.request(check_request, &[MessageKind::CheckAuthenticationResponse])?;

        if let Some(invalidated) = response.get(KV_INVALIDATE_HANDLE) {
            if store.remove_association(endpoint.as_str(), invalidated) {
                info!(handle = invalidated, %endpoint, "provider invalidated association");
            }
        }
        signature_outcome(kind, response.get(KV_IS_VALID) == Some("true"))
    }
}

/// Provider endpoint named by an assertion, in the form relying-party
/// associations are keyed by.
fn op_endpoint(message: &Message) -> Result<Url, MessageError> {
    let endpoint = message.require(PART_OP_ENDPOINT)?;
    Url::parse(endpoint).map_err(|_| MessageError::InvalidUri {
        part: PART_OP_ENDPOINT.to_string(),
        value: endpoint.to_string(),
    })
}

fn signature_outcome(kind: &'static str, valid: bool) -> ProtocolResult<()> {
    if valid {
        Ok(())
    } else {
        warn!(kind, "signature verification failed");
        Err(ProtocolError::InvalidSignature(kind))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("settings", &self.settings)
            .field("role", &self.role)
            .field("transport", &self.transport.is_some())
            .field("secrets", &self.secrets.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Channel`].
#[derive(Default)]
pub struct ChannelBuilder {
    settings: SecuritySettings,
    clock: Option<Arc<dyn Clock>>,
    nonces: Option<Arc<NonceStore>>,
    role: Option<AssociationRole>,
    transport: Option<Arc<dyn DirectTransport>>,
    secrets: Option<Arc<dyn TokenSecrets>>,
}

impl ChannelBuilder {
    /// Create a builder with default settings and no collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the security settings.
    pub fn settings(mut self, settings: SecuritySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the clock (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a nonce store (default: a fresh store using the channel's clock).
    pub fn nonce_store(mut self, nonces: Arc<NonceStore>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    /// Serve the relying party side with `associations`.
    pub fn relying_party(mut self, associations: Arc<AssociationStore<String>>) -> Self {
        self.role = Some(AssociationRole::RelyingParty(associations));
        self
    }

    /// Serve the provider side with `associations`.
    pub fn provider(mut self, associations: Arc<AssociationStore<AssociationUse>>) -> Self {
        self.role = Some(AssociationRole::Provider(associations));
        self
    }

    /// Set the direct transport.
    pub fn transport(mut self, transport: Arc<dyn DirectTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the OAuth secret lookup.
    pub fn token_secrets(mut self, secrets: Arc<dyn TokenSecrets>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Validate the settings and build the channel.
    pub fn build(self) -> ProtocolResult<Channel> {
        self.settings.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let nonces = self
            .nonces
            .unwrap_or_else(|| Arc::new(NonceStore::new(&self.settings, clock.clone())));
        Ok(Channel {
            settings: self.settings,
            clock,
            nonces,
            role: self.role,
            transport: self.transport,
            secrets: self.secrets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::time::Duration;

    const OP: &str = "https://op.example/server";
    const SERVICE: &str = "https://photos.example/request?size=original";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    struct StaticSecrets(HashMap<&'static str, &'static str>);

    impl TokenSecrets for StaticSecrets {
        fn consumer_secret(&self, consumer_key: &str) -> Option<String> {
            self.0.get(consumer_key).map(|s| s.to_string())
        }

        fn token_secret(&self, token: &str) -> Option<String> {
            self.0.get(token).map(|s| s.to_string())
        }
    }

    struct Loopback<F>(F);

    impl<F> DirectTransport for Loopback<F>
    where
        F: Fn(&str, &[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync,
    {
        fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>, TransportError> {
            (self.0)(endpoint, body)
        }
    }

    fn secrets() -> Arc<dyn TokenSecrets> {
        Arc::new(StaticSecrets(HashMap::from([
            ("dpf43f3p2l4k3l03", "kd94hf93k423kf44"),
            ("nnch734d00sl2jdk", "pfkkdhi9sl3r4s00"),
        ])))
    }

    fn oauth_channel(clock: Arc<ManualClock>) -> Channel {
        Channel::builder()
            .clock(clock)
            .token_secrets(secrets())
            .build()
            .unwrap()
    }

    fn oauth_request() -> Message {
        let mut message = Message::new(MessageKind::OAuthSignedRequest);
        message
            .set(OAUTH_CONSUMER_KEY, "dpf43f3p2l4k3l03")
            .set(OAUTH_TOKEN, "nnch734d00sl2jdk")
            .set(OAUTH_VERSION, "1.0")
            .set("file", "vacation.jpg");
        message.set_http_method("GET");
        message.with_recipient(Url::parse(SERVICE).unwrap())
    }

    fn receive_oauth(channel: &Channel, message: &Message) -> ProtocolResult<VerifiedMessage> {
        channel.receive_request(
            MessageKind::OAuthSignedRequest,
            &message.encode().unwrap(),
            TransportKind::Direct,
            message.http_method(),
            Url::parse(SERVICE).unwrap(),
        )
    }

    #[test]
    fn test_oauth_sign_and_verify() {
        let clock = Arc::new(ManualClock::new(start()));
        let consumer = oauth_channel(clock.clone());
        let service = oauth_channel(clock);

        let mut message = oauth_request();
        let applied = consumer.prepare_outgoing(&mut message).unwrap();
        assert_eq!(applied, Protections::ALL);
        assert_eq!(message.get(OAUTH_TIMESTAMP), Some("1714564800"));
        assert_eq!(message.get(OAUTH_NONCE).map(str::len), Some(8));

        let verified = receive_oauth(&service, &message).unwrap();
        assert_eq!(verified.protections(), Protections::ALL);
        assert_eq!(verified.get("file"), Some("vacation.jpg"));
    }

    #[test]
    fn test_replayed_message_rejected() {
        let clock = Arc::new(ManualClock::new(start()));
        let consumer = oauth_channel(clock.clone());
        let service = oauth_channel(clock);

        let mut message = oauth_request();
        consumer.prepare_outgoing(&mut message).unwrap();
        message.set(OAUTH_NONCE, "abc123");
        consumer.sign(&mut message).unwrap();

        assert!(receive_oauth(&service, &message).is_ok());
        match receive_oauth(&service, &message) {
            Err(ProtocolError::ReplayedMessage { nonce }) => assert_eq!(nonce, "abc123"),
            other => panic!("expected replay rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_message_rejected() {
        let clock = Arc::new(ManualClock::new(start()));
        let consumer = oauth_channel(clock.clone());
        let service = oauth_channel(clock.clone());

        let mut message = oauth_request();
        consumer.prepare_outgoing(&mut message).unwrap();
        clock.advance(ChronoDuration::minutes(14));

        let err = receive_oauth(&service, &message).unwrap_err();
        assert!(matches!(err, ProtocolError::Expired { max_age_secs: 780, .. }), "{err:?}");
        assert!(err.is_trust_failure());
    }

    #[test]
    fn test_future_message_rejected() {
        let clock = Arc::new(ManualClock::new(start()));
        let consumer = oauth_channel(clock.clone());
        let service = oauth_channel(Arc::new(ManualClock::new(start() - ChronoDuration::minutes(11))));

        let mut message = oauth_request();
        consumer.prepare_outgoing(&mut message).unwrap();
        assert!(matches!(
            receive_oauth(&service, &message),
            Err(ProtocolError::Expired { .. })
        ));
    }

    #[test]
    fn test_oauth_unknown_consumer() {
        let clock = Arc::new(ManualClock::new(start()));
        let consumer = oauth_channel(clock.clone());
        let stranger = Channel::builder().clock(clock).build().unwrap();

        let mut message = oauth_request();
        assert!(matches!(
            stranger.prepare_outgoing(&mut message.clone()),
            Err(ProtocolError::NoSigningKey(_))
        ));

        consumer.prepare_outgoing(&mut message).unwrap();
        assert!(matches!(
            receive_oauth(&stranger, &message),
            Err(ProtocolError::InvalidSignature(_))
        ));
    }

    fn shared_association() -> Association {
        Association::new(
            "h1",
            (0u8..20).collect(),
            AssociationType::HmacSha1,
            start(),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    fn provider_channel(clock: Arc<ManualClock>, store: Arc<AssociationStore<AssociationUse>>) -> Channel {
        Channel::builder().clock(clock).provider(store).build().unwrap()
    }

    fn assertion() -> Message {
        let mut message = Message::new(MessageKind::PositiveAssertion);
        message
            .set(PART_OP_ENDPOINT, OP)
            .set(PART_RETURN_TO, "https://rp.example/return?token=1")
            .set(PART_CLAIMED_ID, "https://alice.example/")
            .set(PART_IDENTITY, "https://alice.example/")
            .set("openid.ext1.email", "alice@example.com");
        message.with_recipient(Url::parse("https://rp.example/return?token=1").unwrap())
    }

    fn deliver(channel: &Channel, message: &Message) -> ProtocolResult<VerifiedMessage> {
        let url = message.to_redirect_url().unwrap();
        channel.receive(
            MessageKind::PositiveAssertion,
            url.query().unwrap_or_default().as_bytes(),
            TransportKind::Indirect,
        )
    }

    fn smart_pair(clock: &Arc<ManualClock>) -> (Channel, Channel) {
        let op_store = Arc::new(AssociationStore::new(clock.clone()));
        op_store.store_association(AssociationUse::Smart, shared_association());
        let rp_store = Arc::new(AssociationStore::new(clock.clone()));
        rp_store.store_association(OP.to_string(), shared_association());

        let provider = provider_channel(clock.clone(), op_store);
        let rp = Channel::builder()
            .clock(clock.clone())
            .relying_party(rp_store)
            .build()
            .unwrap();
        (provider, rp)
    }

    #[test]
    fn test_openid_smart_mode() {
        let clock = Arc::new(ManualClock::new(start()));
        let (provider, rp) = smart_pair(&clock);

        let mut message = assertion();
        message.set(PART_ASSOC_HANDLE, "h1");
        provider.prepare_outgoing(&mut message).unwrap();

        assert_eq!(message.get(PART_ASSOC_HANDLE), Some("h1"));
        assert!(message.get(PART_INVALIDATE_HANDLE).is_none());
        assert!(message.get(PART_RESPONSE_NONCE).unwrap().starts_with("2024-05-01T12:00:00Z"));
        assert_eq!(
            message.get(PART_SIGNED),
            Some("op_endpoint,return_to,response_nonce,assoc_handle,claimed_id,identity,ext1.email")
        );

        let verified = deliver(&rp, &message).unwrap();
        assert_eq!(verified.protections(), Protections::ALL);
        assert!(matches!(deliver(&rp, &message), Err(ProtocolError::ReplayedMessage { .. })));
    }

    #[test]
    fn test_openid_unsigned_mandatory_part() {
        let clock = Arc::new(ManualClock::new(start()));
        let (provider, rp) = smart_pair(&clock);

        let mut message = assertion();
        message.set(PART_ASSOC_HANDLE, "h1");
        provider.prepare_outgoing(&mut message).unwrap();
        message.set(PART_SIGNED, "op_endpoint,response_nonce,assoc_handle");

        assert!(matches!(
            deliver(&rp, &message),
            Err(ProtocolError::Malformed(MessageError::UnsignedMandatoryParts(_)))
        ));
    }

    #[test]
    fn test_openid_dumb_mode_via_provider() {
        let clock = Arc::new(ManualClock::new(start()));
        let op_store = Arc::new(AssociationStore::new(clock.clone()));
        let provider = Arc::new(provider_channel(clock.clone(), op_store.clone()));

        let mut message = assertion();
        message.set(PART_ASSOC_HANDLE, "forgotten");
        provider.prepare_outgoing(&mut message).unwrap();
        assert_eq!(message.get(PART_INVALIDATE_HANDLE), Some("forgotten"));
        let private_handle = message.get(PART_ASSOC_HANDLE).unwrap().to_string();
        assert!(private_handle.starts_with("{HMAC-SHA256}"));
        assert!(op_store.get_association_by_handle(&AssociationUse::Dumb, &private_handle).is_some());

        let checker = provider.clone();
        let transport = Loopback(move |endpoint: &str, body: &[u8]| -> Result<Vec<u8>, TransportError> {
            assert_eq!(endpoint, OP);
            let valid = checker
                .receive(MessageKind::CheckAuthenticationRequest, body, TransportKind::Direct)
                .is_ok();
            Ok(format!("ns:{OPENID_NS_20}\nis_valid:{valid}\ninvalidate_handle:forgotten\n").into_bytes())
        });
        let rp_store = Arc::new(AssociationStore::new(clock.clone()));
        rp_store.store_association(
            OP.to_string(),
            Association::new("forgotten", vec![9; 20], AssociationType::HmacSha1, start(), Duration::from_secs(3600))
                .unwrap(),
        );
        let rp = Channel::builder()
            .clock(clock)
            .relying_party(rp_store.clone())
            .transport(Arc::new(transport))
            .build()
            .unwrap();

        assert!(deliver(&rp, &message).is_ok());
        assert!(rp_store.get_association_by_handle(OP, "forgotten").is_none());
    }

    #[test]
    fn test_openid_dumb_mode_rejected() {
        let clock = Arc::new(ManualClock::new(start()));
        let transport = Loopback(|_: &str, _: &[u8]| -> Result<Vec<u8>, TransportError> {
            Ok(format!("ns:{OPENID_NS_20}\nis_valid:false\n").into_bytes())
        });
        let rp = Channel::builder()
            .clock(clock.clone())
            .relying_party(Arc::new(AssociationStore::new(clock.clone())))
            .transport(Arc::new(transport))
            .build()
            .unwrap();
        let provider = provider_channel(clock.clone(), Arc::new(AssociationStore::new(clock)));

        let mut message = assertion();
        provider.prepare_outgoing(&mut message).unwrap();
        assert!(matches!(deliver(&rp, &message), Err(ProtocolError::InvalidSignature(_))));
    }

    #[test]
    fn test_private_associations_do_not_accumulate() {
        let clock = Arc::new(ManualClock::new(start()));
        let op_store = Arc::new(AssociationStore::new(clock.clone()));
        let provider = provider_channel(clock.clone(), op_store.clone());

        for _ in 0..ASSOCIATION_PURGE_INTERVAL {
            provider.prepare_outgoing(&mut assertion()).unwrap();
        }
        assert_eq!(op_store.len(), ASSOCIATION_PURGE_INTERVAL);

        clock.advance(ChronoDuration::days(1));
        provider.prepare_outgoing(&mut assertion()).unwrap();
        assert_eq!(op_store.len(), 1);
    }

    #[test]
    fn test_openid_dumb_mode_without_transport() {
        let clock = Arc::new(ManualClock::new(start()));
        let rp = Channel::builder()
            .clock(clock.clone())
            .relying_party(Arc::new(AssociationStore::new(clock.clone())))
            .build()
            .unwrap();
        let provider = provider_channel(clock.clone(), Arc::new(AssociationStore::new(clock)));

        let mut message = assertion();
        provider.prepare_outgoing(&mut message).unwrap();
        let err = deliver(&rp, &message).unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(TransportError::NotConfigured)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_request_rejects_indirect_messages() {
        let rp = Channel::builder().build().unwrap();
        let err = rp.request(assertion(), &[MessageKind::CheckAuthenticationResponse]).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(MessageError::WrongTransport { .. })));
    }

    #[test]
    fn test_builder_rejects_invalid_settings() {
        let settings = SecuritySettings {
            nonce_length: 0,
            ..SecuritySettings::default()
        };
        assert!(matches!(
            Channel::builder().settings(settings).build(),
            Err(ProtocolError::Config(_))
        ));
    }

    // Parts that do not select the verifying association.
    const TAMPERABLE_PARTS: [&str; 5] = [
        PART_RETURN_TO,
        PART_RESPONSE_NONCE,
        PART_CLAIMED_ID,
        PART_IDENTITY,
        "openid.ext1.email",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_tampering_detected(index in 0usize..TAMPERABLE_PARTS.len(), suffix in "[a-z]{1,8}") {
            let clock = Arc::new(ManualClock::new(start()));
            let (provider, verifier) = smart_pair(&clock);

            let mut message = assertion();
            message.set(PART_ASSOC_HANDLE, "h1");
            provider.prepare_outgoing(&mut message).unwrap();

            let part = TAMPERABLE_PARTS[index];
            let mut forged = message.clone();
            forged.set(part, format!("{}{suffix}", message.get(part).unwrap()));

            let result = verifier.process_incoming(forged.clone());
            let rejected = matches!(result, Err(ProtocolError::InvalidSignature(_)));
            prop_assert!(rejected, "tampering {} was not detected: {:?}", part, result);

            // Re-signing with the same association restores validity.
            provider.sign(&mut forged).unwrap();
            prop_assert!(verifier.process_incoming(forged).is_ok());
        }
    }
}
