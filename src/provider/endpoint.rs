//! Provider endpoint: direct-request handling and assertion signing.

use std::sync::Arc;

use num_bigint::BigUint;
use tracing::{debug, info};

use crate::channel::{AssociationRole, Channel, VerifiedMessage};
use crate::core::*;
use crate::crypto::{
    Association, AssociationType, DhGroup, DhKeyPair, SessionType, decode_btwoc_base64, encode_btwoc_base64,
};
use crate::message::{Message, MessageKind, decode_form};
use crate::store::{AssociationStore, AssociationUse};

/// OpenID provider endpoint.
#[derive(Debug)]
pub struct ProviderEndpoint {
    channel: Arc<Channel>,
    associations: Arc<AssociationStore<AssociationUse>>,
    dh_group: DhGroup,
}

impl ProviderEndpoint {
    /// Create an endpoint sharing the association store of a provider channel.
    pub fn new(channel: Arc<Channel>) -> ProtocolResult<Self> {
        let associations = match channel.role() {
            Some(AssociationRole::Provider(store)) => store.clone(),
            _ => {
                return Err(ProtocolError::Config(
                    "provider endpoint needs a provider channel".into(),
                ));
            }
        };
        Ok(Self {
            channel,
            associations,
            dh_group: DhGroup::default(),
        })
    }

    /// Assume `group` when an associate request names no Diffie-Hellman parameters.
    pub fn with_dh_group(mut self, group: DhGroup) -> Self {
        self.dh_group = group;
        self
    }

    /// Channel the endpoint signs and verifies with.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Association store.
    pub fn associations(&self) -> &Arc<AssociationStore<AssociationUse>> {
        &self.associations
    }

    /// Handle a direct request body and return the encoded response.
    ///
    /// Dispatches on `openid.mode` to [`handle_associate`](Self::handle_associate)
    /// or [`check_authentication`](Self::check_authentication).
    pub fn handle_direct_request(&self, body: &[u8]) -> ProtocolResult<Vec<u8>> {
        let parts = decode_form(body)?;
        let kind = match parts.get(PART_MODE).map(String::as_str) {
            Some(MODE_ASSOCIATE) => MessageKind::AssociateRequest,
            Some(MODE_CHECK_AUTHENTICATION) => MessageKind::CheckAuthenticationRequest,
            other => {
                return Err(MessageError::UnexpectedValue {
                    part: PART_MODE.to_string(),
                    expected: format!("{MODE_ASSOCIATE}|{MODE_CHECK_AUTHENTICATION}"),
                    actual: other.unwrap_or_default().to_string(),
                }
                .into());
            }
        };
        let request = Message::from_parts(kind, parts)?;
        let mut response = match kind {
            MessageKind::AssociateRequest => self.handle_associate(&request)?,
            _ => self.check_authentication(request)?,
        };
        self.channel.prepare_outgoing(&mut response)?;
        Ok(response.encode()?)
    }

    /// Answer an associate request.
    ///
    /// Permitted, compatible requests get a new shared association with its
    /// MAC key encrypted for Diffie-Hellman sessions. Anything else, including
    /// unusable Diffie-Hellman parameters, is refused with the weakest
    /// permitted type as a suggestion.
    pub fn handle_associate(&self, request: &Message) -> ProtocolResult<Message> {
        let settings = self.channel.settings();
        let association_type = request.require(PART_ASSOC_TYPE)?.parse::<AssociationType>().ok();
        let session_type = request.require(PART_SESSION_TYPE)?.parse::<SessionType>().ok();

        match association_type.zip(session_type) {
            Some((association_type, session_type))
                if settings.is_hash_length_permitted(association_type.hash_bit_length())
                    && association_type.is_session_compatible(session_type) =>
            {
                self.associate(request, association_type, session_type)
            }
            _ => {
                info!(
                    association_type = request.get(PART_ASSOC_TYPE),
                    session_type = request.get(PART_SESSION_TYPE),
                    "refusing association request"
                );
                Ok(self.refusal())
            }
        }
    }

    fn associate(
        &self,
        request: &Message,
        association_type: AssociationType,
        session_type: SessionType,
    ) -> ProtocolResult<Message> {
        let now = self.channel.now();
        let association = Association::generate(
            association_type,
            now,
            self.channel.settings().smart_association_lifetime,
        );

        let mut response = Message::new(MessageKind::AssociateSuccess);
        response
            .set(KV_ASSOC_HANDLE, association.handle())
            .set(KV_ASSOC_TYPE, association_type.name())
            .set(KV_SESSION_TYPE, session_type.name())
            .set(KV_EXPIRES_IN, association.seconds_till_expiration(now).to_string());

        if session_type.is_encrypted() {
            let (server_public, encrypted) = match self.encrypt_secret(request, session_type, association.secret()) {
                Ok(parts) => parts,
                Err(err) => {
                    info!(%err, session_type = %session_type, "refusing association with bad Diffie-Hellman parameters");
                    return Ok(self.refusal());
                }
            };
            response
                .set(KV_DH_SERVER_PUBLIC, encode_btwoc_base64(&server_public))
                .set_binary(KV_ENC_MAC_KEY, &encrypted);
        } else {
            response.set_binary(KV_MAC_KEY, association.secret());
        }

        info!(
            handle = association.handle(),
            association_type = %association_type,
            session_type = %session_type,
            "created shared association"
        );
        self.associations
            .store_association(AssociationUse::Smart, association);
        Ok(response)
    }

    /// Server public key and the MAC key masked with the shared DH value.
    fn encrypt_secret(
        &self,
        request: &Message,
        session_type: SessionType,
        secret: &[u8],
    ) -> Result<(BigUint, Vec<u8>), KeyExchangeError> {
        let group = self.requested_group(request)?;
        let consumer_public = request
            .get(PART_DH_CONSUMER_PUBLIC)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| KeyExchangeError::InvalidParameters("missing dh_consumer_public".into()))?;
        let consumer_public = decode_btwoc_base64(consumer_public)?;
        let keypair = DhKeyPair::generate(&group);
        let encrypted = keypair.xor_secret(session_type, &consumer_public, secret)?;
        Ok((keypair.public().clone(), encrypted))
    }

    fn requested_group(&self, request: &Message) -> Result<DhGroup, KeyExchangeError> {
        match (request.get(PART_DH_MODULUS), request.get(PART_DH_GEN)) {
            (None, None) => Ok(self.dh_group.clone()),
            (Some(modulus), Some(generator)) => DhGroup::from_parameters(
                decode_btwoc_base64(modulus)?,
                decode_btwoc_base64(generator)?,
                self.channel.settings().primality_rounds,
            ),
            _ => Err(KeyExchangeError::InvalidParameters(
                "dh_modulus and dh_gen must be sent together".into(),
            )),
        }
    }

    fn refusal(&self) -> Message {
        let mut response = Message::new(MessageKind::AssociateUnsuccessful);
        response.set(KV_ERROR, "requested association or session type is not supported");
        if let Some(suggested) = AssociationType::weakest_permitted(self.channel.settings()) {
            response.set(KV_ASSOC_TYPE, suggested.name());
            if let Some(session) = SessionType::for_secret_len(suggested.secret_len()) {
                response.set(KV_SESSION_TYPE, session.name());
            }
        }
        response
    }

    /// Verify a forwarded assertion on behalf of a relying party.
    ///
    /// Trust failures (bad signature, replay, expiry) are reported as
    /// `is_valid:false`; malformed requests are errors.
    pub fn check_authentication(&self, request: Message) -> ProtocolResult<Message> {
        let invalidate = request
            .get(PART_INVALIDATE_HANDLE)
            .filter(|handle| {
                self.associations
                    .get_association_by_handle(&AssociationUse::Smart, handle)
                    .is_none()
            })
            .map(str::to_owned);

        let valid = match self.channel.process_incoming(request) {
            Ok(_) => true,
            Err(err) if err.is_trust_failure() => {
                info!(%err, "check_authentication rejected assertion");
                false
            }
            Err(err) => return Err(err),
        };

        let mut response = Message::new(MessageKind::CheckAuthenticationResponse);
        response.set(KV_IS_VALID, valid.to_string());
        if let Some(handle) = invalidate {
            debug!(handle, "confirming handle invalidation");
            response.set(KV_INVALIDATE_HANDLE, handle);
        }
        Ok(response)
    }

    /// Sign a positive assertion for delivery by redirect.
    ///
    /// A known shared `openid.assoc_handle` is signed with; otherwise a private
    /// association is used and the unknown handle echoed in
    /// `openid.invalidate_handle`.
    pub fn sign_assertion(&self, assertion: &mut Message) -> ProtocolResult<Protections> {
        self.channel.prepare_outgoing(assertion)
    }

    /// Verify a signed request addressed to the provider.
    pub fn receive(&self, kind: MessageKind, payload: &[u8], arrived_via: TransportKind) -> ProtocolResult<VerifiedMessage> {
        self.channel.receive(kind, payload, arrived_via)
    }
}

#[cfg(all(test, feature = "relying-party"))]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::relying_party::AssociationManager;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    const OP: &str = "http://op.example/server";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// Delivers direct requests straight to a provider endpoint.
    struct Loopback {
        provider: Arc<ProviderEndpoint>,
        posts: AtomicUsize,
    }

    impl DirectTransport for Loopback {
        fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.provider
                .handle_direct_request(body)
                .map_err(|_| TransportError::Status {
                    endpoint: endpoint.to_string(),
                    status: 400,
                })
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        provider: Arc<ProviderEndpoint>,
        transport: Arc<Loopback>,
        rp: Arc<Channel>,
    }

    fn fixture(op_settings: SecuritySettings, rp_settings: SecuritySettings) -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let op_channel = Channel::builder()
            .settings(op_settings)
            .clock(clock.clone())
            .provider(Arc::new(AssociationStore::new(clock.clone())))
            .build()
            .unwrap();
        let provider = Arc::new(ProviderEndpoint::new(Arc::new(op_channel)).unwrap());
        let transport = Arc::new(Loopback {
            provider: provider.clone(),
            posts: AtomicUsize::new(0),
        });
        let rp = Channel::builder()
            .settings(rp_settings)
            .clock(clock.clone())
            .relying_party(Arc::new(AssociationStore::new(clock.clone())))
            .transport(transport.clone())
            .build()
            .unwrap();
        Fixture {
            clock,
            provider,
            transport,
            rp: Arc::new(rp),
        }
    }

    fn op() -> Url {
        Url::parse(OP).unwrap()
    }

    fn sha1_only() -> SecuritySettings {
        SecuritySettings::builder().hash_bit_length(160, 160).build().unwrap()
    }

    fn assertion(handle: Option<&str>) -> Message {
        let mut message = Message::new(MessageKind::PositiveAssertion);
        message
            .set(PART_OP_ENDPOINT, OP)
            .set(PART_RETURN_TO, "https://rp.example/return")
            .set(PART_CLAIMED_ID, "https://alice.example/")
            .set(PART_IDENTITY, "https://alice.example/");
        if let Some(handle) = handle {
            message.set(PART_ASSOC_HANDLE, handle);
        }
        message.with_recipient(Url::parse("https://rp.example/return").unwrap())
    }

    fn deliver(rp: &Channel, message: &Message) -> ProtocolResult<VerifiedMessage> {
        let url = message.to_redirect_url().unwrap();
        rp.receive(
            MessageKind::PositiveAssertion,
            url.query().unwrap_or_default().as_bytes(),
            TransportKind::Indirect,
        )
    }

    #[test]
    fn test_requires_provider_channel() {
        let channel = Arc::new(Channel::builder().build().unwrap());
        assert!(matches!(ProviderEndpoint::new(channel), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn test_dh_association_over_modp_2048() {
        let f = fixture(SecuritySettings::default(), sha1_only());
        let manager = AssociationManager::new(f.rp.clone())
            .unwrap()
            .with_dh_group(DhGroup::modp_2048());

        let association = manager.get_or_create(&op()).unwrap();
        assert_eq!(association.association_type(), AssociationType::HmacSha1);
        assert_eq!(association.secret().len(), 20);
        assert_eq!(association.lifetime(), f.provider.channel().settings().smart_association_lifetime);

        let shared = f
            .provider
            .associations()
            .get_association_by_handle(&AssociationUse::Smart, association.handle())
            .unwrap();
        assert_eq!(shared.secret(), association.secret());
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dh_sha256_with_default_group() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();

        let association = manager.get_or_create(&op()).unwrap();
        assert_eq!(association.association_type(), AssociationType::HmacSha256);
        let shared = f
            .provider
            .associations()
            .get_association(&AssociationUse::Smart)
            .unwrap();
        assert_eq!(shared.secret(), association.secret());
    }

    #[test]
    fn test_refusal_then_suggestion() {
        let f = fixture(sha1_only(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();

        let association = manager.get_or_create(&op()).unwrap();
        assert_eq!(association.association_type(), AssociationType::HmacSha1);
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_common_type_falls_back() {
        let only_sha256 = SecuritySettings::builder().hash_bit_length(256, 256).build().unwrap();
        let f = fixture(sha1_only(), only_sha256);
        let manager = AssociationManager::new(f.rp.clone()).unwrap();
        assert!(manager.get_or_create(&op()).is_none());
    }

    #[test]
    fn test_refusal_suggests_weakest_permitted() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let mut request = Message::new(MessageKind::AssociateRequest);
        request
            .set(PART_ASSOC_TYPE, "HMAC-MD5")
            .set(PART_SESSION_TYPE, SESSION_DH_SHA256);

        let response = f.provider.handle_associate(&request).unwrap();
        assert_eq!(response.kind(), MessageKind::AssociateUnsuccessful);
        assert_eq!(response.get(KV_ERROR_CODE), Some(ERROR_CODE_UNSUPPORTED_TYPE));
        assert_eq!(response.get(KV_ASSOC_TYPE), Some(ASSOC_HMAC_SHA1));
        assert_eq!(response.get(KV_SESSION_TYPE), Some(SESSION_DH_SHA1));
    }

    #[test]
    fn test_incompatible_session_refused() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let mut request = Message::new(MessageKind::AssociateRequest);
        request
            .set(PART_ASSOC_TYPE, ASSOC_HMAC_SHA1)
            .set(PART_SESSION_TYPE, SESSION_DH_SHA256);

        let response = f.provider.handle_associate(&request).unwrap();
        assert_eq!(response.kind(), MessageKind::AssociateUnsuccessful);
        assert!(f.provider.associations().get_association(&AssociationUse::Smart).is_none());
    }

    fn dh_request(keypair: &DhKeyPair) -> Message {
        let mut request = Message::new(MessageKind::AssociateRequest);
        request
            .set(PART_ASSOC_TYPE, ASSOC_HMAC_SHA1)
            .set(PART_SESSION_TYPE, SESSION_DH_SHA1)
            .set(PART_DH_CONSUMER_PUBLIC, encode_btwoc_base64(keypair.public()));
        request
    }

    #[test]
    fn test_partial_dh_parameters_refused() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let keypair = DhKeyPair::generate(&DhGroup::default());
        let mut request = dh_request(&keypair);
        request.set(PART_DH_GEN, encode_btwoc_base64(&BigUint::from(2u32)));

        let response = f.provider.handle_associate(&request).unwrap();
        assert_eq!(response.kind(), MessageKind::AssociateUnsuccessful);
        assert_eq!(response.get(KV_ERROR_CODE), Some(ERROR_CODE_UNSUPPORTED_TYPE));
        assert!(f.provider.associations().get_association(&AssociationUse::Smart).is_none());
    }

    #[test]
    fn test_bad_dh_parameters_answered_with_refusal() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let keypair = DhKeyPair::generate(&DhGroup::default());

        let mut composite = dh_request(&keypair);
        composite
            .set(PART_DH_MODULUS, encode_btwoc_base64(&BigUint::from(1_000_000u32)))
            .set(PART_DH_GEN, encode_btwoc_base64(&BigUint::from(2u32)));
        let mut degenerate = dh_request(&keypair);
        degenerate.set(PART_DH_CONSUMER_PUBLIC, encode_btwoc_base64(&BigUint::from(1u32)));

        for request in [composite, degenerate] {
            let body = request.encode().unwrap();
            let response = f.provider.handle_direct_request(&body).unwrap();
            let response = Message::decode_response(
                &[MessageKind::AssociateSuccess, MessageKind::AssociateUnsuccessful],
                &response,
            )
            .unwrap();
            assert_eq!(response.kind(), MessageKind::AssociateUnsuccessful);
        }
        assert!(f.provider.associations().get_association(&AssociationUse::Smart).is_none());
    }

    #[test]
    fn test_smart_mode_end_to_end() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();
        let association = manager.get_or_create(&op()).unwrap();

        let mut message = assertion(Some(association.handle()));
        let applied = f.provider.sign_assertion(&mut message).unwrap();
        assert_eq!(applied, Protections::ALL);
        assert_eq!(message.get(PART_ASSOC_HANDLE), Some(association.handle()));

        let verified = deliver(&f.rp, &message).unwrap();
        assert_eq!(verified.protections(), Protections::ALL);
        assert_eq!(verified.get(PART_CLAIMED_ID), Some("https://alice.example/"));
        // One associate request, no check_authentication.
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_smart_mode_with_endpoint_without_path() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();
        let endpoint = Url::parse("http://op.example").unwrap();
        let association = manager.get_or_create(&endpoint).unwrap();

        let mut message = assertion(Some(association.handle()));
        message.set(PART_OP_ENDPOINT, "http://op.example");
        f.provider.sign_assertion(&mut message).unwrap();
        assert_eq!(message.get(PART_ASSOC_HANDLE), Some(association.handle()));

        let verified = deliver(&f.rp, &message).unwrap();
        assert_eq!(verified.get(PART_OP_ENDPOINT), Some("http://op.example"));
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidated_handle_removed_for_endpoint_without_path() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();
        let endpoint = Url::parse("http://op.example").unwrap();
        let stale = Association::new(
            "stale-handle",
            vec![7; 20],
            AssociationType::HmacSha1,
            start(),
            std::time::Duration::from_secs(3600),
        )
        .unwrap();
        manager.associations().store_association(endpoint.as_str().to_owned(), stale);

        let mut message = assertion(Some("stale-handle"));
        message.set(PART_OP_ENDPOINT, "http://op.example");
        f.provider.sign_assertion(&mut message).unwrap();

        assert!(deliver(&f.rp, &message).is_ok());
        assert!(
            manager
                .associations()
                .get_association_by_handle(endpoint.as_str(), "stale-handle")
                .is_none()
        );
    }

    #[test]
    fn test_dumb_mode_end_to_end() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());

        let mut message = assertion(None);
        f.provider.sign_assertion(&mut message).unwrap();
        let handle = message.get(PART_ASSOC_HANDLE).unwrap().to_string();
        assert!(
            f.provider
                .associations()
                .get_association_by_handle(&AssociationUse::Dumb, &handle)
                .is_some()
        );

        assert!(deliver(&f.rp, &message).is_ok());
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 1);

        // The provider consumed the nonce while checking the first delivery.
        assert!(matches!(deliver(&f.rp, &message), Err(ProtocolError::InvalidSignature(_))));
        assert_eq!(f.transport.posts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_check_authentication_rejects_replay() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let mut message = assertion(None);
        f.provider.sign_assertion(&mut message).unwrap();

        let check = message.converted(MessageKind::CheckAuthenticationRequest);
        let first = f.provider.check_authentication(check.clone()).unwrap();
        assert_eq!(first.get(KV_IS_VALID), Some("true"));
        let second = f.provider.check_authentication(check).unwrap();
        assert_eq!(second.get(KV_IS_VALID), Some("false"));
    }

    #[test]
    fn test_check_authentication_rejects_expired() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let mut message = assertion(None);
        f.provider.sign_assertion(&mut message).unwrap();
        f.clock.advance(ChronoDuration::minutes(4));
        let fresh = f
            .provider
            .check_authentication(message.converted(MessageKind::CheckAuthenticationRequest))
            .unwrap();
        assert_eq!(fresh.get(KV_IS_VALID), Some("true"));

        let mut stale = assertion(None);
        f.provider.sign_assertion(&mut stale).unwrap();
        stale.set(PART_RESPONSE_NONCE, "2024-05-01T11:00:00ZOLDNONCE");
        f.provider.channel().sign(&mut stale).unwrap();
        let response = f
            .provider
            .check_authentication(stale.converted(MessageKind::CheckAuthenticationRequest))
            .unwrap();
        assert_eq!(response.get(KV_IS_VALID), Some("false"));
    }

    #[test]
    fn test_check_authentication_confirms_invalidation() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let mut message = assertion(Some("stale-handle"));
        f.provider.sign_assertion(&mut message).unwrap();
        assert_eq!(message.get(PART_INVALIDATE_HANDLE), Some("stale-handle"));

        let response = f
            .provider
            .check_authentication(message.converted(MessageKind::CheckAuthenticationRequest))
            .unwrap();
        assert_eq!(response.get(KV_IS_VALID), Some("true"));
        assert_eq!(response.get(KV_INVALIDATE_HANDLE), Some("stale-handle"));
    }

    #[test]
    fn test_shared_handle_not_accepted_by_check_authentication() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let manager = AssociationManager::new(f.rp.clone()).unwrap();
        let association = manager.get_or_create(&op()).unwrap();

        let mut message = assertion(Some(association.handle()));
        f.provider.sign_assertion(&mut message).unwrap();
        let response = f
            .provider
            .check_authentication(message.converted(MessageKind::CheckAuthenticationRequest))
            .unwrap();
        assert_eq!(response.get(KV_IS_VALID), Some("false"));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let f = fixture(SecuritySettings::default(), SecuritySettings::default());
        let err = f
            .provider
            .handle_direct_request(b"openid.ns=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0&openid.mode=checkid_setup")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(MessageError::UnexpectedValue { .. })));
    }
}
