//! ID-token claim handling and nonce binding.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::flow::FlowError;
use crate::token::hash_token;

/// Claims read from the ID token.
#[derive(Debug, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// Subject claims after merging the ID token with optional userinfo data.
#[derive(Debug)]
pub struct SubjectClaims {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub website: Option<String>,
}

/// Decode the ID token's claims.
///
/// Signature verification is skipped: the token arrived over TLS directly
/// from the token endpoint, and the nonce binding ties it to our state
/// record. Expiry is likewise enforced on the state record, not the token.
///
/// # Errors
/// `UpstreamProvider` when the token is not a decodable JWT.
pub fn decode_id_token(id_token: &str) -> Result<IdTokenClaims, FlowError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.algorithms = vec![
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::ES256,
        Algorithm::ES384,
        Algorithm::PS256,
        Algorithm::HS256,
    ];

    decode::<IdTokenClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|err| FlowError::UpstreamProvider(format!("invalid id_token: {err}")))
}

/// Compare the token's nonce against the hash bound into the state record.
#[must_use]
pub fn nonce_matches(claims: &IdTokenClaims, nonce_hash: &[u8]) -> bool {
    claims
        .nonce
        .as_deref()
        .is_some_and(|nonce| hash_token(nonce) == nonce_hash)
}

/// Merge ID-token claims with userinfo claims; userinfo wins for profile
/// fields but must agree on the subject.
///
/// # Errors
/// `UpstreamProvider` when userinfo names a different subject.
pub fn merge(
    id_claims: IdTokenClaims,
    userinfo: Option<super::client::UserinfoClaims>,
) -> Result<SubjectClaims, FlowError> {
    let Some(userinfo) = userinfo else {
        return Ok(SubjectClaims {
            subject: id_claims.sub,
            email: id_claims.email,
            name: id_claims.name,
            website: id_claims.website,
        });
    };

    if let Some(sub) = userinfo.sub.as_deref() {
        if sub != id_claims.sub {
            return Err(FlowError::UpstreamProvider(
                "userinfo subject does not match id_token".to_string(),
            ));
        }
    }

    Ok(SubjectClaims {
        subject: id_claims.sub,
        email: userinfo.email.or(id_claims.email),
        name: userinfo.name.or(id_claims.name),
        website: userinfo.website.or(id_claims.website),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::client::UserinfoClaims;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn token_with(claims: &serde_json::Value) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"test-only"),
        )
        .expect("encoding should succeed")
    }

    #[test]
    fn decode_reads_subject_and_nonce() {
        let token = token_with(&json!({
            "iss": "https://hydra.localhost",
            "sub": "subject-1",
            "nonce": "the-nonce",
            "email": "alice@example.com"
        }));
        let claims = decode_id_token(&token).expect("token should decode");
        assert_eq!(claims.sub, "subject-1");
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert!(nonce_matches(&claims, &hash_token("the-nonce")));
        assert!(!nonce_matches(&claims, &hash_token("another-nonce")));
    }

    #[test]
    fn missing_nonce_never_matches() {
        let token = token_with(&json!({ "sub": "subject-1" }));
        let claims = decode_id_token(&token).expect("token should decode");
        assert!(!nonce_matches(&claims, &hash_token("anything")));
    }

    #[test]
    fn decode_rejects_non_jwt() {
        assert!(decode_id_token("definitely-not-a-jwt").is_err());
    }

    #[test]
    fn merge_prefers_userinfo_profile_fields() {
        let token = token_with(&json!({ "sub": "subject-1", "email": "old@example.com" }));
        let id_claims = decode_id_token(&token).expect("token should decode");
        let merged = merge(
            id_claims,
            Some(UserinfoClaims {
                sub: Some("subject-1".to_string()),
                email: Some("new@example.com".to_string()),
                name: Some("Alice".to_string()),
                website: None,
            }),
        )
        .expect("subjects agree");
        assert_eq!(merged.email.as_deref(), Some("new@example.com"));
        assert_eq!(merged.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn merge_rejects_subject_mismatch() {
        let token = token_with(&json!({ "sub": "subject-1" }));
        let id_claims = decode_id_token(&token).expect("token should decode");
        let result = merge(
            id_claims,
            Some(UserinfoClaims {
                sub: Some("subject-2".to_string()),
                ..UserinfoClaims::default()
            }),
        );
        assert!(result.is_err());
    }
}
