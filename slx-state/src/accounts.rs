use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::PlanTier;

/// Reserved domain suffix for synthesized contact addresses of wallet-only
/// accounts. Any address ending in this suffix is a placeholder, never a
/// deliverable mailbox.
pub const WALLET_PLACEHOLDER_DOMAIN: &str = "@wallet.solixdb";

/// Represents a user account on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque, stable identifier
    pub id: String,

    /// The identity provider's user id; exactly one principal exists per
    /// external identity
    pub external_identity_id: String,

    /// Email address, or a synthesized placeholder for wallet-only accounts
    pub contact_address: String,

    /// Human-readable name shown in the dashboard
    pub display_name: String,

    /// Avatar URL supplied by the identity provider, if any
    pub avatar_url: Option<String>,

    /// Wallet address for wallet-login accounts
    pub wallet_address: Option<String>,

    /// Plan tier; new accounts start on the free tier
    pub plan: PlanTier,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Create a new principal with a fresh id on the default plan
    pub fn new(
        external_identity_id: String,
        contact_address: String,
        display_name: String,
        avatar_url: Option<String>,
        wallet_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("user_{}", uuid::Uuid::new_v4()),
            external_identity_id,
            contact_address,
            display_name,
            avatar_url,
            wallet_address,
            plan: PlanTier::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the contact address is a synthesized wallet placeholder
    pub fn has_placeholder_address(&self) -> bool {
        is_placeholder_address(&self.contact_address)
    }
}

/// The identity payload supplied by the external auth provider on each
/// login. Every field except `id` may be absent; a payload carrying neither
/// an email nor a wallet address is rejected at bootstrap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// The provider's opaque user id
    pub id: String,

    /// Email reported by an OAuth account (Google, GitHub)
    pub oauth_email: Option<String>,

    /// Primary email for email/password logins
    pub primary_email: Option<String>,

    /// Email found on a linked account
    pub linked_email: Option<String>,

    /// Wallet address for wallet logins
    pub wallet_address: Option<String>,

    /// Display name reported by the provider
    pub name: Option<String>,

    /// Avatar URL reported by the provider
    pub avatar_url: Option<String>,
}

impl ExternalIdentity {
    /// Resolve the best available email address.
    ///
    /// Precedence: OAuth email > primary email > linked-account email.
    pub fn resolved_email(&self) -> Option<&str> {
        self.oauth_email
            .as_deref()
            .or(self.primary_email.as_deref())
            .or(self.linked_email.as_deref())
            .filter(|e| !e.is_empty())
    }

    /// Derive the display name for a new principal.
    ///
    /// Preference order: provider-supplied name, local part of the resolved
    /// email, truncated wallet address, then a generic label.
    pub fn derive_display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(email) = self.resolved_email() {
            if let Some(local) = email.split('@').next() {
                if !local.is_empty() {
                    return local.to_string();
                }
            }
        }
        if let Some(wallet) = self.wallet_address.as_deref().filter(|w| !w.is_empty()) {
            return truncate_wallet(wallet);
        }
        "User".to_string()
    }
}

/// Synthesized contact address for a wallet-only account:
/// `{first 8 of wallet}@wallet.solixdb`
pub fn placeholder_address(wallet: &str) -> String {
    let head: String = wallet.chars().take(8).collect();
    format!("{}{}", head, WALLET_PLACEHOLDER_DOMAIN)
}

/// Whether an address is a synthesized wallet placeholder rather than a
/// real mailbox
pub fn is_placeholder_address(address: &str) -> bool {
    address.ends_with(WALLET_PLACEHOLDER_DOMAIN)
}

/// Shortened wallet form for display: `abcd...wxyz`
pub fn truncate_wallet(wallet: &str) -> String {
    if wallet.chars().count() <= 8 {
        return wallet.to_string();
    }
    let head: String = wallet.chars().take(4).collect();
    let tail: String = wallet
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_identity() -> ExternalIdentity {
        ExternalIdentity {
            id: "privy:wallet".to_string(),
            wallet_address: Some("0xAbCdEf0123456789".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_email_resolution_precedence() {
        let identity = ExternalIdentity {
            id: "privy:1".to_string(),
            oauth_email: Some("oauth@example.com".to_string()),
            primary_email: Some("primary@example.com".to_string()),
            linked_email: Some("linked@example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(identity.resolved_email(), Some("oauth@example.com"));

        let identity = ExternalIdentity {
            oauth_email: None,
            ..identity
        };
        assert_eq!(identity.resolved_email(), Some("primary@example.com"));

        let identity = ExternalIdentity {
            primary_email: None,
            ..identity
        };
        assert_eq!(identity.resolved_email(), Some("linked@example.com"));

        let identity = ExternalIdentity {
            linked_email: None,
            ..identity
        };
        assert_eq!(identity.resolved_email(), None);
    }

    #[test]
    fn test_display_name_preference_order() {
        let mut identity = ExternalIdentity {
            id: "privy:1".to_string(),
            name: Some("Dana".to_string()),
            primary_email: Some("dana.dev@example.com".to_string()),
            wallet_address: Some("0xAbCdEf0123456789".to_string()),
            ..Default::default()
        };
        assert_eq!(identity.derive_display_name(), "Dana");

        identity.name = None;
        assert_eq!(identity.derive_display_name(), "dana.dev");

        identity.primary_email = None;
        assert_eq!(identity.derive_display_name(), "0xAb...6789");

        identity.wallet_address = None;
        assert_eq!(identity.derive_display_name(), "User");
    }

    #[test]
    fn test_placeholder_address_round_trip() {
        let address = placeholder_address("0xAbCdEf0123456789");
        assert_eq!(address, "0xAbCdEf@wallet.solixdb");
        assert!(is_placeholder_address(&address));
        assert!(!is_placeholder_address("dev@example.com"));
    }

    #[test]
    fn test_new_principal_defaults() {
        let identity = wallet_identity();
        let principal = Principal::new(
            identity.id.clone(),
            placeholder_address(identity.wallet_address.as_deref().unwrap()),
            identity.derive_display_name(),
            None,
            identity.wallet_address.clone(),
        );

        assert!(principal.id.starts_with("user_"));
        assert_eq!(principal.plan, crate::billing::PlanTier::Free);
        assert!(principal.has_placeholder_address());
    }
}
