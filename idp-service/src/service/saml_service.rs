//! # SAML IdP
//!
//! SSO assertions and single logout for registered Service Providers.
//!
//! ## SSO Path
//!
//! ```text
//! POST /saml/sso (SAMLRequest, RelayState, [SigAlg, Signature])
//!   ├─ decode (+inflate when deflated), parse AuthnRequest
//!   ├─ verify the SimpleSign signature when the SP has a key on file
//!   ├─ replay-check the request ID
//!   ├─ authenticate the caller (the policy gate already resolved the
//!   │   user from their active session)
//!   ├─ build the assertion with the SP's attribute mappings
//!   ├─ sign with the current key (enveloped XML-DSig, RSA-SHA256)
//!   └─ return an auto-submitting form POSTing the Response to the ACS
//! ```
//!
//! Request signatures use the HTTP-POST-SimpleSign shape: the signature
//! covers `SAMLRequest=<b64>&RelayState=<rs>&SigAlg=<alg>` with the raw
//! form values.
//!
//! The XML emitted here is already in canonical form (fixed prefixes,
//! no superfluous whitespace), which is what makes the simplified
//! enveloped signature sound.
//!
//! ## Replay Protection
//!
//! Inbound request IDs and outbound assertion IDs are both recorded in
//! Redis for the assertion lifetime; a duplicate is rejected with
//! `Conflict`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use shared::crypto::keys::KeyManager;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::io::Read as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::{SamlServiceProvider, User};
use crate::repository::SsoRepository;
use crate::service::session_service::SessionService;

/// Assertions are valid this long; replay markers live just as long.
const ASSERTION_LIFETIME_SECONDS: i64 = 300;

/// A parsed inbound SAML request (AuthnRequest or LogoutRequest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSamlRequest {
    pub id: String,
    /// SP entity id from `<saml:Issuer>`
    pub issuer: String,
    /// ACS override from the request, when present
    pub acs_url: Option<String>,
}

/// What the transport renders: an auto-submitting POST form.
#[derive(Debug, Clone)]
pub struct SamlPostForm {
    /// Where the form posts (ACS for SSO, SLO endpoint for logout)
    pub action_url: String,
    /// Base64 SAMLResponse form field
    pub saml_response: String,
    pub relay_state: Option<String>,
}

/// The SAML IdP service.
pub struct SamlService {
    sso: SsoRepository,
    sessions: Arc<SessionService>,
    keys: Arc<KeyManager>,
    redis: RedisClient,
    public_url: String,
    issuer: String,
}

impl SamlService {
    pub fn new(
        sso: SsoRepository,
        sessions: Arc<SessionService>,
        keys: Arc<KeyManager>,
        redis: RedisClient,
        public_url: String,
        issuer: String,
    ) -> Self {
        Self {
            sso,
            sessions,
            keys,
            redis,
            public_url,
            issuer,
        }
    }

    // =========================================================================
    // METADATA
    // =========================================================================

    /// IdP metadata document. The signing key is published as a
    /// ds:KeyValue (modulus/exponent) from the current JWK.
    pub fn metadata(&self) -> String {
        let current = self.keys.current();
        let jwk = &current.jwk;
        let key_value = match (&jwk.n, &jwk.e) {
            (Some(n), Some(e)) => format!(
                "<ds:KeyValue><ds:RSAKeyValue><ds:Modulus>{n}</ds:Modulus><ds:Exponent>{e}</ds:Exponent></ds:RSAKeyValue></ds:KeyValue>"
            ),
            _ => String::new(),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="{issuer}">
<md:IDPSSODescriptor WantAuthnRequestsSigned="false" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
<md:KeyDescriptor use="signing"><ds:KeyInfo>{key_value}</ds:KeyInfo></md:KeyDescriptor>
<md:NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress</md:NameIDFormat>
<md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{base}/saml/sso"/>
<md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{base}/saml/slo"/>
</md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            issuer = xml_escape(&self.issuer),
            base = self.public_url,
        )
    }

    // =========================================================================
    // REQUEST PARSING
    // =========================================================================

    /// Decodes a SAMLRequest form value: base64, then raw-deflate when
    /// the payload isn't already XML.
    pub fn decode_request(saml_request: &str) -> Result<String, ApiError> {
        let bytes = BASE64
            .decode(saml_request.trim())
            .map_err(|_| bad_request("SAMLRequest is not valid base64"))?;

        if bytes.starts_with(b"<") {
            return String::from_utf8(bytes).map_err(|_| bad_request("SAMLRequest is not UTF-8"));
        }

        let mut decoder = flate2::read::DeflateDecoder::new(&bytes[..]);
        let mut xml = String::new();
        decoder
            .read_to_string(&mut xml)
            .map_err(|_| bad_request("SAMLRequest is not valid deflate"))?;
        Ok(xml)
    }

    /// Pulls ID, Issuer and ACS out of an AuthnRequest/LogoutRequest.
    pub fn parse_request(xml: &str) -> Result<ParsedSamlRequest, ApiError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut id = None;
        let mut acs_url = None;
        let mut issuer = None;
        let mut in_issuer = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = e.name();
                    let local = name.local_name();
                    match local.as_ref() {
                        b"AuthnRequest" | b"LogoutRequest" => {
                            for attr in e.attributes().flatten() {
                                let key = attr.key.local_name();
                                let value = String::from_utf8_lossy(&attr.value).into_owned();
                                match key.as_ref() {
                                    b"ID" => id = Some(value),
                                    b"AssertionConsumerServiceURL" => acs_url = Some(value),
                                    _ => {}
                                }
                            }
                        }
                        b"Issuer" => in_issuer = true,
                        _ => {}
                    }
                }
                Ok(Event::Text(t)) if in_issuer => {
                    issuer = Some(
                        t.unescape()
                            .map_err(|_| bad_request("malformed Issuer"))?
                            .into_owned(),
                    );
                    in_issuer = false;
                }
                Ok(Event::End(e)) if e.name().local_name().as_ref() == b"Issuer" => {
                    in_issuer = false;
                }
                Ok(Event::Eof) => break,
                Err(_) => return Err(bad_request("malformed SAML request XML")),
                _ => {}
            }
        }

        Ok(ParsedSamlRequest {
            id: id.ok_or_else(|| bad_request("SAML request has no ID"))?,
            issuer: issuer.ok_or_else(|| bad_request("SAML request has no Issuer"))?,
            acs_url,
        })
    }

    /// Verifies a SimpleSign request signature against the SP's key.
    ///
    /// Signature input: `SAMLRequest=<b64>&RelayState=<rs>&SigAlg=<alg>`
    /// over raw form values; RSA-SHA256 only.
    fn verify_request_signature(
        sp: &SamlServiceProvider,
        saml_request: &str,
        relay_state: Option<&str>,
        sig_alg: Option<&str>,
        signature: Option<&str>,
    ) -> Result<(), ApiError> {
        let key_pem = match &sp.public_key_pem {
            Some(pem) => pem,
            // No key on file: signatures are not required
            None => return Ok(()),
        };

        let (sig_alg, signature) = match (sig_alg, signature) {
            (Some(a), Some(s)) => (a, s),
            _ => {
                return Err(ApiError::AccessDenied);
            }
        };

        if sig_alg != "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" {
            return Err(bad_request("unsupported SigAlg"));
        }

        let mut signed = format!("SAMLRequest={saml_request}");
        if let Some(rs) = relay_state {
            signed.push_str(&format!("&RelayState={rs}"));
        }
        signed.push_str(&format!("&SigAlg={sig_alg}"));

        let signature_bytes = BASE64
            .decode(signature)
            .map_err(|_| bad_request("Signature is not valid base64"))?;

        let public_key = rsa::RsaPublicKey::from_public_key_pem(key_pem)
            .map_err(|_| ApiError::InternalError {
                message: "service provider key is not valid SPKI PEM".to_string(),
            })?;

        let digest = Sha256::digest(signed.as_bytes());
        public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature_bytes)
            .map_err(|_| ApiError::AccessDenied)
    }

    // =========================================================================
    // SSO
    // =========================================================================

    /// Handles a POSTed AuthnRequest for an already-authenticated user
    /// (the policy gate resolved the caller from their active session).
    pub async fn handle_sso(
        &self,
        user: &User,
        saml_request: &str,
        relay_state: Option<&str>,
        sig_alg: Option<&str>,
        signature: Option<&str>,
    ) -> Result<SamlPostForm, ApiError> {
        let xml = Self::decode_request(saml_request)?;
        let parsed = Self::parse_request(&xml)?;

        let sp = self
            .sso
            .find_sp_by_entity_id(&parsed.issuer)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("service provider:{}", parsed.issuer),
            })?;

        Self::verify_request_signature(&sp, saml_request, relay_state, sig_alg, signature)?;

        // Inbound replay: each request ID is honored once
        let fresh = self
            .redis
            .set_nx(
                &format!("saml:request:{}", parsed.id),
                &true,
                Duration::from_secs(ASSERTION_LIFETIME_SECONDS as u64),
            )
            .await?;
        if !fresh {
            return Err(ApiError::Conflict {
                resource: "SAML request already processed".to_string(),
            });
        }

        // The request may narrow the ACS, but only to a registered one
        let acs_url = match &parsed.acs_url {
            Some(requested) if requested == &sp.acs_url => requested.clone(),
            Some(_) => {
                return Err(bad_request("AssertionConsumerServiceURL is not registered"));
            }
            None => sp.acs_url.clone(),
        };

        let response_xml = self.build_response(&sp, user, &parsed.id, &acs_url).await?;

        info!(user_id = %user.id, sp = %sp.entity_id, "SAML assertion issued");

        Ok(SamlPostForm {
            action_url: acs_url,
            saml_response: BASE64.encode(response_xml),
            relay_state: relay_state.map(String::from),
        })
    }

    /// Builds and signs the Response. The signature is enveloped in the
    /// assertion: digest over the unsigned assertion, RSA/ECDSA over the
    /// SignedInfo block.
    async fn build_response(
        &self,
        sp: &SamlServiceProvider,
        user: &User,
        in_response_to: &str,
        acs_url: &str,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let not_after = now + ChronoDuration::seconds(ASSERTION_LIFETIME_SECONDS);
        let response_id = format!("_{}", Uuid::new_v4().simple());
        let assertion_id = format!("_{}", Uuid::new_v4().simple());

        let instant = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let expiry = not_after.to_rfc3339_opts(SecondsFormat::Secs, true);

        let name_id = user
            .email
            .clone()
            .unwrap_or_else(|| user.username.clone());

        let attributes = self.render_attributes(sp, user);

        // Assertion without its signature; the digest is taken over
        // exactly these bytes
        let assertion_unsigned = format!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{assertion_id}" Version="2.0" IssueInstant="{instant}"><saml:Issuer>{issuer}</saml:Issuer><saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">{name_id}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData InResponseTo="{in_response_to}" NotOnOrAfter="{expiry}" Recipient="{acs_url}"/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{instant}" NotOnOrAfter="{expiry}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions><saml:AuthnStatement AuthnInstant="{instant}"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement><saml:AttributeStatement>{attributes}</saml:AttributeStatement></saml:Assertion>"#,
            issuer = xml_escape(&self.issuer),
            name_id = xml_escape(&name_id),
            audience = xml_escape(&sp.entity_id),
            acs_url = xml_escape(acs_url),
        );

        let digest = BASE64.encode(Sha256::digest(assertion_unsigned.as_bytes()));

        let key = self.keys.current();
        let signature_algorithm = match key.algorithm {
            shared::crypto::keys::KeyAlgorithm::Rs256 => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            }
            shared::crypto::keys::KeyAlgorithm::Es256 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
            }
        };

        let signed_info = format!(
            r##"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="{signature_algorithm}"/><ds:Reference URI="#{assertion_id}"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
        );

        let signature_value = BASE64.encode(
            key.sign_raw(signed_info.as_bytes())
                .map_err(ApiError::from)?,
        );

        let signature_block = format!(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue></ds:Signature>"#,
        );

        // Splice the signature right after the assertion's Issuer
        let issuer_close = "</saml:Issuer>";
        let insert_at = assertion_unsigned
            .find(issuer_close)
            .map(|i| i + issuer_close.len())
            .unwrap_or(0);
        let mut assertion_signed = assertion_unsigned.clone();
        assertion_signed.insert_str(insert_at, &signature_block);

        // Outbound replay protection: remember the assertion ID for its
        // lifetime
        let _ = self
            .redis
            .set_nx(
                &format!("saml:assertion:{assertion_id}"),
                &true,
                Duration::from_secs(ASSERTION_LIFETIME_SECONDS as u64),
            )
            .await;

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{response_id}" Version="2.0" IssueInstant="{instant}" Destination="{acs_url}" InResponseTo="{in_response_to}"><saml:Issuer>{issuer}</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>{assertion_signed}</samlp:Response>"#,
            issuer = xml_escape(&self.issuer),
            acs_url = xml_escape(acs_url),
        ))
    }

    /// Renders AttributeStatement entries from the SP's configured
    /// mappings (`attribute name -> user field`).
    fn render_attributes(&self, sp: &SamlServiceProvider, user: &User) -> String {
        let mappings = sp
            .attribute_mappings
            .as_object()
            .cloned()
            .unwrap_or_default();

        let mut rendered = String::new();
        for (attr_name, field) in mappings {
            let value = match field.as_str() {
                Some("email") => user.email.clone().unwrap_or_default(),
                Some("username") => user.username.clone(),
                Some("phone") => user.phone.clone().unwrap_or_default(),
                Some("user_id") => user.id.to_string(),
                _ => continue,
            };

            rendered.push_str(&format!(
                r#"<saml:Attribute Name="{}"><saml:AttributeValue>{}</saml:AttributeValue></saml:Attribute>"#,
                xml_escape(&attr_name),
                xml_escape(&value),
            ));
        }

        rendered
    }

    // =========================================================================
    // SLO
    // =========================================================================

    /// Handles a LogoutRequest: ends every session of the authenticated
    /// user and returns the signed LogoutResponse form.
    pub async fn handle_slo(
        &self,
        user: &User,
        saml_request: &str,
        relay_state: Option<&str>,
        sig_alg: Option<&str>,
        signature: Option<&str>,
    ) -> Result<SamlPostForm, ApiError> {
        let xml = Self::decode_request(saml_request)?;
        let parsed = Self::parse_request(&xml)?;

        let sp = self
            .sso
            .find_sp_by_entity_id(&parsed.issuer)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("service provider:{}", parsed.issuer),
            })?;

        Self::verify_request_signature(&sp, saml_request, relay_state, sig_alg, signature)?;

        let revoked = self.sessions.revoke_all(user.id).await?;
        info!(user_id = %user.id, sessions = revoked, "SAML single logout");

        let destination = sp.slo_url.clone().unwrap_or_else(|| sp.acs_url.clone());
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let response_id = format!("_{}", Uuid::new_v4().simple());

        let response_xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{response_id}" Version="2.0" IssueInstant="{now}" Destination="{destination}" InResponseTo="{in_response_to}"><saml:Issuer>{issuer}</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status></samlp:LogoutResponse>"#,
            destination = xml_escape(&destination),
            in_response_to = xml_escape(&parsed.id),
            issuer = xml_escape(&self.issuer),
        );

        Ok(SamlPostForm {
            action_url: destination,
            saml_response: BASE64.encode(response_xml),
            relay_state: relay_state.map(String::from),
        })
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError::BadRequest {
        message: message.to_string(),
    }
}

/// Minimal XML text/attribute escaping.
fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl std::fmt::Debug for SamlService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlService")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const AUTHN_REQUEST: &str = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_req42" Version="2.0" IssueInstant="2024-01-15T10:30:00Z" AssertionConsumerServiceURL="https://sp.example.com/acs"><saml:Issuer>https://sp.example.com</saml:Issuer></samlp:AuthnRequest>"#;

    #[test]
    fn test_parse_authn_request() {
        let parsed = SamlService::parse_request(AUTHN_REQUEST).unwrap();

        assert_eq!(parsed.id, "_req42");
        assert_eq!(parsed.issuer, "https://sp.example.com");
        assert_eq!(parsed.acs_url.as_deref(), Some("https://sp.example.com/acs"));
    }

    #[test]
    fn test_decode_plain_base64_request() {
        let encoded = BASE64.encode(AUTHN_REQUEST);
        let xml = SamlService::decode_request(&encoded).unwrap();
        assert_eq!(xml, AUTHN_REQUEST);
    }

    #[test]
    fn test_decode_deflated_request() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(AUTHN_REQUEST.as_bytes()).unwrap();
        let deflated = encoder.finish().unwrap();

        let xml = SamlService::decode_request(&BASE64.encode(deflated)).unwrap();
        assert_eq!(xml, AUTHN_REQUEST);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SamlService::decode_request("!!not-base64!!").is_err());
    }

    #[test]
    fn test_parse_rejects_request_without_id() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" Version="2.0"/>"#;
        assert!(SamlService::parse_request(xml).is_err());
    }

    #[test]
    fn test_logout_request_parses_too() {
        let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lo1" Version="2.0"><saml:Issuer>https://sp.example.com</saml:Issuer><saml:NameID>u@x.com</saml:NameID></samlp:LogoutRequest>"#;
        let parsed = SamlService::parse_request(xml).unwrap();
        assert_eq!(parsed.id, "_lo1");
        assert_eq!(parsed.issuer, "https://sp.example.com");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"a<b&"c""#), "a&lt;b&amp;&quot;c&quot;");
    }

    #[test]
    fn test_simple_sign_verification_roundtrip() {
        use shared::crypto::keys::SigningKey;

        // Sign the SimpleSign string with a freshly generated keypair,
        // then verify it the way the service does
        let key = SigningKey::generate_rsa("sp-key".to_string()).unwrap();
        let saml_request = BASE64.encode(AUTHN_REQUEST);
        let sig_alg = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
        let signed = format!("SAMLRequest={saml_request}&RelayState=rs&SigAlg={sig_alg}");
        let signature = BASE64.encode(key.sign_raw(signed.as_bytes()).unwrap());

        // Extract the public key PEM from the private key
        use rsa::pkcs8::{DecodePrivateKey as _, EncodePublicKey as _};
        let private = rsa::RsaPrivateKey::from_pkcs8_pem(&key.private_pem).unwrap();
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();

        let sp = SamlServiceProvider {
            id: Uuid::new_v4(),
            application_id: None,
            entity_id: "https://sp.example.com".into(),
            acs_url: "https://sp.example.com/acs".into(),
            slo_url: None,
            public_key_pem: Some(public_pem),
            attribute_mappings: serde_json::json!({}),
            created_at: Utc::now(),
        };

        assert!(SamlService::verify_request_signature(
            &sp,
            &saml_request,
            Some("rs"),
            Some(sig_alg),
            Some(&signature),
        )
        .is_ok());

        // Tampering breaks it
        assert!(SamlService::verify_request_signature(
            &sp,
            &saml_request,
            Some("tampered"),
            Some(sig_alg),
            Some(&signature),
        )
        .is_err());

        // SP with a key on file rejects unsigned requests
        assert!(SamlService::verify_request_signature(&sp, &saml_request, None, None, None).is_err());
    }
}
