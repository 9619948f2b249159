//! Domain enumerations.
//!
//! Every variant round-trips through its snake_case string form, which is
//! also the value stored in TEXT columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored string does not match a known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Kind of mailbox a subscription provisions.
    MailboxType {
        Gsuite => "gsuite",
        Prewarmed => "prewarmed",
    }
}

string_enum! {
    /// Whether a subscription row is a base plan or an add-on pack.
    SubscriptionKind {
        Plan => "plan",
        Addon => "addon",
    }
}

string_enum! {
    SubscriptionStatus {
        Active => "active",
        CancelAtPeriodEnd => "cancel_at_period_end",
        Cancelled => "cancelled",
        Inactive => "inactive",
    }
}

impl SubscriptionStatus {
    /// Statuses whose capacity still counts toward the user's quota.
    /// A subscription cancelling at period end keeps its slots until the
    /// period actually ends.
    pub fn counts_toward_quota(&self) -> bool {
        matches!(self, Self::Active | Self::CancelAtPeriodEnd)
    }
}

string_enum! {
    MailboxStatus {
        Active => "active",
        Inactive => "inactive",
        ScheduledForDeletion => "scheduled_for_deletion",
    }
}

string_enum! {
    /// Purchased domains move inactive -> active; connected domains walk the
    /// pending -> propagating -> active ladder and end at disconnected.
    DomainStatus {
        Active => "active",
        Inactive => "inactive",
        Pending => "pending",
        Propagating => "propagating",
        Disconnected => "disconnected",
    }
}

string_enum! {
    /// How a domain entered the account.
    DomainSource {
        Purchased => "purchased",
        Connected => "connected",
    }
}

string_enum! {
    /// How a purchase or subscription is paid for.
    PaymentMethod {
        Stripe => "stripe",
        Wallet => "wallet",
    }
}

string_enum! {
    OrderType {
        MailboxPurchase => "mailbox_purchase",
        PlanPurchase => "plan_purchase",
        DomainPurchase => "domain_purchase",
        WalletTopup => "wallet_topup",
        PrewarmPurchase => "prewarm_purchase",
        Renewal => "renewal",
    }
}

string_enum! {
    /// Provisioning jobs handed off to the fulfilment system.
    JobKind {
        CreateMailbox => "create_mailbox",
        DeleteMailbox => "delete_mailbox",
        DeactivateMailboxes => "deactivate_mailboxes",
        ReleasePrewarm => "release_prewarm",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::CancelAtPeriodEnd,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Inactive,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = "paused".parse::<SubscriptionStatus>().unwrap_err();
        assert!(err.to_string().contains("paused"));
    }

    #[test]
    fn quota_counting_statuses() {
        assert!(SubscriptionStatus::Active.counts_toward_quota());
        assert!(SubscriptionStatus::CancelAtPeriodEnd.counts_toward_quota());
        assert!(!SubscriptionStatus::Cancelled.counts_toward_quota());
        assert!(!SubscriptionStatus::Inactive.counts_toward_quota());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::CancelAtPeriodEnd).unwrap();
        assert_eq!(json, "\"cancel_at_period_end\"");
    }
}
