//! Bearer token validation against the provider's JWKS.

use std::str::FromStr;

use config::OidcConfig;
use context::{CallerToken, Claims};
use http::HeaderValue;
use jwt_compact::{Algorithm, AlgorithmExt, TimeOptions, UntrustedToken, jwk::JsonWebKey};
use secrecy::SecretString;

use super::error::AuthError;
use super::jwks::{Alg, Jwks, JwksCache};

const BEARER_PREFIX_LENGTH: usize = 6;

pub(crate) struct JwtAuth {
    config: OidcConfig,
    jwks_cache: JwksCache,
}

impl JwtAuth {
    pub fn new(config: OidcConfig) -> Self {
        let jwks_cache = JwksCache::new(config.jwks_url.clone(), config.poll_interval);

        JwtAuth { config, jwks_cache }
    }

    /// Validates an `Authorization` header value into a caller token.
    pub async fn authenticate(&self, header: &HeaderValue) -> Result<CallerToken, AuthError> {
        let header = header.to_str().map_err(|_| {
            log::debug!("authorization header is not valid UTF-8");
            AuthError::Unauthorized
        })?;

        // RFC 7235: the authentication scheme is case-insensitive.
        let token_str = if header.len() > BEARER_PREFIX_LENGTH
            && header[..BEARER_PREFIX_LENGTH].eq_ignore_ascii_case("bearer")
            && header.as_bytes()[BEARER_PREFIX_LENGTH] == b' '
        {
            &header[BEARER_PREFIX_LENGTH + 1..]
        } else {
            log::debug!("token must be prefixed with Bearer");
            return Err(AuthError::Unauthorized);
        };

        if token_str.is_empty() {
            return Err(AuthError::InvalidToken("missing token"));
        }

        let untrusted_token = UntrustedToken::new(token_str).map_err(|_| {
            log::debug!("token is not a well-formed JWT");
            AuthError::Unauthorized
        })?;

        let jwks = self.jwks_cache.get().await?;

        let decoded = self
            .validate_token(&jwks, untrusted_token)
            .ok_or(AuthError::Unauthorized)?;

        Ok(CallerToken::new(SecretString::from(token_str.to_string()), decoded))
    }

    fn validate_token(&self, jwks: &Jwks, untrusted_token: UntrustedToken<'_>) -> Option<jwt_compact::Claims<Claims>> {
        use jwt_compact::alg::*;

        let time_options = TimeOptions::default();
        let mut validation_results = Vec::new();

        // Collect every potential validation result to avoid leaking which
        // key failed through timing.
        for jwk in &jwks.keys {
            let kid_matches = match (&untrusted_token.header().key_id, &jwk.key_id) {
                (Some(expected), Some(kid)) => expected == kid,
                (Some(_), None) => false,
                (None, _) => true,
            };

            if let Ok(alg) = Alg::from_str(untrusted_token.algorithm()) {
                let decode_result = match alg {
                    Alg::HS256 => decode(Hs256, &jwk.key, &untrusted_token),
                    Alg::HS384 => decode(Hs384, &jwk.key, &untrusted_token),
                    Alg::HS512 => decode(Hs512, &jwk.key, &untrusted_token),
                    Alg::ES256 => decode(Es256, &jwk.key, &untrusted_token),
                    Alg::RS256 => decode(Rsa::rs256(), &jwk.key, &untrusted_token),
                    Alg::RS384 => decode(Rsa::rs384(), &jwk.key, &untrusted_token),
                    Alg::RS512 => decode(Rsa::rs512(), &jwk.key, &untrusted_token),
                    Alg::PS256 => decode(Rsa::ps256(), &jwk.key, &untrusted_token),
                    Alg::PS384 => decode(Rsa::ps384(), &jwk.key, &untrusted_token),
                    Alg::PS512 => decode(Rsa::ps512(), &jwk.key, &untrusted_token),
                    Alg::EdDSA => decode(Ed25519, &jwk.key, &untrusted_token),
                };

                if let Some(token) = decode_result {
                    let claims = token.claims();

                    let time_valid = claims.validate_expiration(&time_options).is_ok()
                        && (claims.not_before.is_none() || claims.validate_maturity(&time_options).is_ok());

                    let issuer_valid = self.validate_issuer(&claims.custom);
                    let audience_valid = self.validate_audience(&claims.custom);

                    validation_results.push((kid_matches, time_valid, issuer_valid, audience_valid, claims.clone()));
                }
            }
        }

        validation_results
            .into_iter()
            .find(|(kid_matches, time_valid, issuer_valid, audience_valid, _)| {
                *kid_matches && *time_valid && *issuer_valid && *audience_valid
            })
            .map(|(_, _, _, _, claims)| claims)
    }

    fn validate_issuer(&self, claims: &Claims) -> bool {
        let Some(expected_issuer) = &self.config.expected_issuer else {
            return true;
        };

        match &claims.issuer {
            Some(issuer) if issuer == expected_issuer => true,
            Some(_) => {
                log::debug!("JWT validation failed: issuer claim does not match expected value");
                false
            }
            None => {
                log::debug!("JWT validation failed: issuer claim is missing from token");
                false
            }
        }
    }

    fn validate_audience(&self, claims: &Claims) -> bool {
        let Some(expected_audience) = &self.config.expected_audience else {
            return true;
        };

        if claims
            .audience
            .as_ref()
            .is_some_and(|audiences| audiences.iter().any(|aud| aud == expected_audience))
        {
            true
        } else {
            log::debug!("JWT validation failed: audience claim does not match expected value");
            false
        }
    }
}

fn decode<A: Algorithm>(
    alg: A,
    jwk: &JsonWebKey<'_>,
    untrusted_token: &UntrustedToken<'_>,
) -> Option<jwt_compact::Token<Claims>>
where
    A::VerifyingKey: std::fmt::Debug + for<'a> TryFrom<&'a JsonWebKey<'a>>,
{
    let key = A::VerifyingKey::try_from(jwk).ok()?;
    alg.validator(&key).validate(untrusted_token).ok()
}
