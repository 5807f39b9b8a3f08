//! Relying-party association negotiation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{AssociationRole, Channel};
use crate::core::*;
use crate::crypto::{
    Association, AssociationType, DhGroup, DhKeyPair, SessionType, decode_btwoc_base64, encode_btwoc_base64,
};
use crate::message::{Message, MessageKind};
use crate::store::AssociationStore;

/// Establishes and caches associations with providers.
///
/// Associations are stored under the parsed provider endpoint URL
/// (`Url::as_str`), the same key the relying-party channel derives from
/// `openid.op_endpoint` when verifying assertions.
#[derive(Debug)]
pub struct AssociationManager {
    channel: Arc<Channel>,
    associations: Arc<AssociationStore<String>>,
    dh_group: DhGroup,
}

impl AssociationManager {
    /// Create a manager sharing the association store of a relying-party channel.
    pub fn new(channel: Arc<Channel>) -> ProtocolResult<Self> {
        let associations = match channel.role() {
            Some(AssociationRole::RelyingParty(store)) => store.clone(),
            _ => {
                return Err(ProtocolError::Config(
                    "association manager needs a relying-party channel".into(),
                ));
            }
        };
        Ok(Self {
            channel,
            associations,
            dh_group: DhGroup::default(),
        })
    }

    /// Use `group` for Diffie-Hellman sessions instead of the OpenID default.
    pub fn with_dh_group(mut self, group: DhGroup) -> Self {
        self.dh_group = group;
        self
    }

    /// Diffie-Hellman group sent with associate requests.
    pub fn dh_group(&self) -> &DhGroup {
        &self.dh_group
    }

    /// Association store.
    pub fn associations(&self) -> &Arc<AssociationStore<String>> {
        &self.associations
    }

    /// Usable association with `endpoint`, negotiating a new one when none is
    /// stored.
    ///
    /// Returns `None` when negotiation fails; assertions from the provider are
    /// then verified in dumb mode.
    pub fn get_or_create(&self, endpoint: &Url) -> Option<Association> {
        let settings = self.channel.settings();
        let now = self.channel.now();
        let minimum = settings.min_useful_association_lifetime();
        let existing = self.associations.get_association_matching(endpoint.as_str(), |a| {
            settings.is_hash_length_permitted(a.hash_bit_length()) && a.has_useful_life_remaining(now, minimum)
        });
        if let Some(association) = existing {
            debug!(handle = association.handle(), %endpoint, "reusing association");
            return Some(association);
        }

        match self.create_association(endpoint) {
            Ok(association) => Some(association),
            Err(err) => {
                warn!(%endpoint, %err, "association negotiation failed, falling back to dumb mode");
                None
            }
        }
    }

    /// Negotiate a new association with `endpoint` and store it.
    ///
    /// Asks for the strongest permitted type, over a Diffie-Hellman session
    /// unless the endpoint is HTTPS.
    pub fn create_association(&self, endpoint: &Url) -> ProtocolResult<Association> {
        let association_type = AssociationType::strongest_permitted(self.channel.settings())
            .ok_or_else(|| ProtocolError::Config("no association type within the permitted hash range".into()))?;
        let session_type = if is_secure(endpoint) {
            SessionType::NoEncryption
        } else {
            SessionType::for_secret_len(association_type.secret_len()).ok_or_else(|| {
                KeyExchangeError::IncompatibleSessionType {
                    association_type: association_type.name().to_string(),
                    session_type: "Diffie-Hellman".to_string(),
                }
            })?
        };
        self.associate(endpoint, association_type, session_type, ASSOCIATE_RENEGOTIATE_RETRIES)
    }

    fn associate(
        &self,
        endpoint: &Url,
        association_type: AssociationType,
        session_type: SessionType,
        retries: u32,
    ) -> ProtocolResult<Association> {
        let keypair = session_type
            .is_encrypted()
            .then(|| DhKeyPair::generate(&self.dh_group));

        let mut request = Message::new(MessageKind::AssociateRequest);
        request
            .set(PART_ASSOC_TYPE, association_type.name())
            .set(PART_SESSION_TYPE, session_type.name());
        if let Some(keypair) = &keypair {
            if !self.dh_group.is_openid_default() {
                request
                    .set(PART_DH_MODULUS, encode_btwoc_base64(self.dh_group.modulus()))
                    .set(PART_DH_GEN, encode_btwoc_base64(self.dh_group.generator()));
            }
            request.set(PART_DH_CONSUMER_PUBLIC, encode_btwoc_base64(keypair.public()));
        }
        request.set_recipient(endpoint.clone());

        debug!(%endpoint, association_type = %association_type, session_type = %session_type, "requesting association");
        let response = self
            .channel
            .request(
                request,
                &[MessageKind::AssociateSuccess, MessageKind::AssociateUnsuccessful],
            )?
            .into_message();

        if response.kind() == MessageKind::AssociateSuccess {
            return self.accept(endpoint, association_type, session_type, keypair.as_ref(), &response);
        }

        let refusal = response.get(KV_ERROR).unwrap_or_default().to_string();
        let suggested = response
            .get(KV_ASSOC_TYPE)
            .and_then(|t| t.parse::<AssociationType>().ok())
            .zip(response.get(KV_SESSION_TYPE).and_then(|s| s.parse::<SessionType>().ok()));
        match suggested {
            Some((suggested_type, suggested_session))
                if retries > 0 && self.is_acceptable(endpoint, suggested_type, suggested_session) =>
            {
                info!(
                    %endpoint,
                    association_type = %suggested_type,
                    session_type = %suggested_session,
                    "retrying association with provider's suggestion"
                );
                self.associate(endpoint, suggested_type, suggested_session, retries - 1)
            }
            _ => Err(MessageError::UnexpectedResponse(format!("provider refused association: {refusal}")).into()),
        }
    }

    fn is_acceptable(&self, endpoint: &Url, association_type: AssociationType, session_type: SessionType) -> bool {
        self.channel
            .settings()
            .is_hash_length_permitted(association_type.hash_bit_length())
            && association_type.is_session_compatible(session_type)
            && (session_type.is_encrypted() || is_secure(endpoint))
    }

    fn accept(
        &self,
        endpoint: &Url,
        association_type: AssociationType,
        session_type: SessionType,
        keypair: Option<&DhKeyPair>,
        response: &Message,
    ) -> ProtocolResult<Association> {
        expect_value(response, KV_ASSOC_TYPE, association_type.name())?;
        expect_value(response, KV_SESSION_TYPE, session_type.name())?;

        let handle = response.require(KV_ASSOC_HANDLE)?;
        let expires_in = response.integer(KV_EXPIRES_IN)?;
        let secret = match keypair {
            Some(keypair) => {
                let server_public = decode_btwoc_base64(response.require(KV_DH_SERVER_PUBLIC)?)?;
                let encrypted = response.binary(KV_ENC_MAC_KEY)?;
                keypair.xor_secret(session_type, &server_public, &encrypted)?
            }
            None => response.binary(KV_MAC_KEY)?,
        };

        let association = Association::new(
            handle,
            secret,
            association_type,
            self.channel.now(),
            Duration::from_secs(expires_in),
        )?;
        self.associations
            .store_association(endpoint.as_str().to_owned(), association.clone());
        info!(handle, %endpoint, association_type = %association_type, expires_in, "association established");
        Ok(association)
    }
}

fn is_secure(endpoint: &Url) -> bool {
    endpoint.scheme() == "https"
}

fn expect_value(response: &Message, part: &str, expected: &str) -> Result<(), MessageError> {
    let actual = response.require(part)?;
    if actual == expected {
        Ok(())
    } else {
        Err(MessageError::UnexpectedValue {
            part: part.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
