use serde::{Deserialize, Serialize};

/// Durable association between a client identity and its public subdomain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelBinding {
    /// Routing key, first label of the public host
    pub subdomain: String,

    /// Stable identity the client presents in its `auth` frame
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// Timestamp when the binding was first created (Unix epoch seconds)
    #[serde(default)]
    pub created_at: i64,
}

impl TunnelBinding {
    /// Create a new binding
    pub fn new(subdomain: String, client_id: String, created_at: i64) -> Self {
        Self {
            subdomain,
            client_id,
            created_at,
        }
    }

    /// Whether this binding belongs to the given client
    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_creation() {
        let binding = TunnelBinding::new("x7q2".to_string(), "abc".to_string(), 1234567890);
        assert_eq!(binding.subdomain, "x7q2");
        assert!(binding.is_owned_by("abc"));
        assert!(!binding.is_owned_by("other"));
    }

    #[test]
    fn test_binding_serialization() {
        let binding = TunnelBinding::new("x7q2".to_string(), "abc".to_string(), 1234567890);
        let json = serde_json::to_string(&binding).unwrap();
        assert!(json.contains(r#""clientId":"abc""#));

        let parsed: TunnelBinding = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, binding);
    }

    #[test]
    fn test_binding_default_created_at() {
        let parsed: TunnelBinding =
            serde_json::from_str(r#"{"subdomain":"x7q2","clientId":"abc"}"#).unwrap();
        assert_eq!(parsed.created_at, 0);
    }
}
