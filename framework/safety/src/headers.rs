use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::SafetyError;

/// Environment variable holding the optional HMAC secret used to sign trace ids.
pub const SIMCITY_HMAC_SECRET_ENV: &str = "SIMCITY_HMAC_SECRET";

/// When `true` or `1`, a client built from the environment refuses to start without
/// [SIMCITY_HMAC_SECRET_ENV].
pub const SIMCITY_REQUIRE_SIGNATURE_ENV: &str = "SIMCITY_REQUIRE_SIGNATURE";

pub const HEADER_SYNTHETIC: &str = "X-Synthetic";
pub const HEADER_SYNTHETIC_VERSION: &str = "X-Synthetic-Version";
pub const HEADER_SYNTHETIC_TRACE: &str = "X-Synthetic-Trace";
pub const HEADER_SYNTHETIC_SIGNATURE: &str = "X-Synthetic-Signature";

/// Value of the [HEADER_SYNTHETIC] marker, also the `synthetic_source` tag on rows written by
/// synthetic traffic.
pub const SYNTHETIC_SOURCE: &str = "simcity";
pub const SYNTHETIC_VERSION: &str = "1";

const TRACE_ID_LEN: usize = 21;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the trace id, hex encoded.
pub fn sign_trace(secret: &str, trace_id: &str) -> Result<String, SafetyError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SafetyError::MissingSecret)?;
    mac.update(trace_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The marker headers attached to one synthetic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticMarkers {
    pub trace_id: String,
    pub signature: Option<String>,
}

impl SyntheticMarkers {
    /// Build markers for a request, generating a random trace id when none is supplied.
    ///
    /// The signature is only computed when a non-empty secret is given.
    pub fn new(trace_id: Option<String>, secret: Option<&str>) -> Result<Self, SafetyError> {
        let trace_id = trace_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| nanoid::nanoid!(TRACE_ID_LEN));

        let signature = match secret.filter(|s| !s.is_empty()) {
            Some(secret) => Some(sign_trace(secret, &trace_id)?),
            None => None,
        };

        Ok(Self {
            trace_id,
            signature,
        })
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (HEADER_SYNTHETIC.to_string(), SYNTHETIC_SOURCE.to_string()),
            (
                HEADER_SYNTHETIC_VERSION.to_string(),
                SYNTHETIC_VERSION.to_string(),
            ),
            (HEADER_SYNTHETIC_TRACE.to_string(), self.trace_id.clone()),
        ];
        if let Some(signature) = &self.signature {
            headers.push((HEADER_SYNTHETIC_SIGNATURE.to_string(), signature.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn signature_only_with_secret() {
        let unsigned = SyntheticMarkers::new(Some("trace-1".to_string()), None).unwrap();
        assert_eq!(unsigned.signature, None);
        assert_eq!(unsigned.headers().len(), 3);

        let empty = SyntheticMarkers::new(Some("trace-1".to_string()), Some("")).unwrap();
        assert_eq!(empty.signature, None);

        let signed = SyntheticMarkers::new(Some("trace-1".to_string()), Some("s3cret")).unwrap();
        let signature = signed.signature.clone().unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, sign_trace("s3cret", "trace-1").unwrap());
        assert_eq!(
            signed.headers().last().unwrap(),
            &(HEADER_SYNTHETIC_SIGNATURE.to_string(), signature)
        );
    }

    #[test]
    fn trace_id_is_generated_when_missing() {
        let a = SyntheticMarkers::new(None, None).unwrap();
        let b = SyntheticMarkers::new(Some("  ".to_string()), None).unwrap();
        assert_eq!(a.trace_id.len(), TRACE_ID_LEN);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn known_hmac_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            sign_trace("Jefe", "what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
