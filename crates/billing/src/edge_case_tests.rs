// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Tests critical boundary conditions in:
//! - Volume pricing (PRICE-01 to PRICE-07)
//! - Currency resolution (CUR-01 to CUR-04)
//! - Billing period arithmetic (PERIOD-01 to PERIOD-06)
//! - Checkout metadata contract (META-01 to META-04)
//! - Registrar test double (REG-01 to REG-04)
//! - Slot candidate selection (ALLOC-01 to ALLOC-04)
//! - Cancellation branching (CANCEL-01 to CANCEL-04)

#[cfg(test)]
mod pricing_tests {
    use crate::pricing::{wallet_tier_price_cents, FALLBACK_ADDON_PRICE_CENTS, MIN_TOPUP_CENTS};

    // =========================================================================
    // PRICE-01: Exactly at a tier threshold - threshold quantity gets the
    // cheaper rate, one below stays on the previous tier
    // =========================================================================
    #[test]
    fn test_tier_thresholds_are_inclusive() {
        assert_eq!(wallet_tier_price_cents(19), 300);
        assert_eq!(wallet_tier_price_cents(20), 275);
        assert_eq!(wallet_tier_price_cents(99), 275);
        assert_eq!(wallet_tier_price_cents(100), 250);
        assert_eq!(wallet_tier_price_cents(499), 250);
        assert_eq!(wallet_tier_price_cents(500), 225);
        assert_eq!(wallet_tier_price_cents(999), 225);
        assert_eq!(wallet_tier_price_cents(1000), 200);
    }

    // =========================================================================
    // PRICE-02: Degenerate quantities - zero and negative fall in the base
    // tier rather than panicking or underflowing
    // =========================================================================
    #[test]
    fn test_degenerate_quantities_use_base_tier() {
        assert_eq!(wallet_tier_price_cents(0), 300);
        assert_eq!(wallet_tier_price_cents(-5), 300);
        assert_eq!(wallet_tier_price_cents(1), 300);
    }

    // =========================================================================
    // PRICE-03: Total for a bulk order never overflows i64 at realistic sizes
    // =========================================================================
    #[test]
    fn test_bulk_order_total_fits_i64() {
        let quantity: i64 = 100_000;
        let total = wallet_tier_price_cents(quantity) * quantity;
        assert_eq!(total, 200 * 100_000);
    }

    // =========================================================================
    // PRICE-04: Fallback addon price is never cheaper than any volume tier
    // =========================================================================
    #[test]
    fn test_fallback_price_is_conservative() {
        for quantity in [1, 20, 100, 500, 1000] {
            assert!(FALLBACK_ADDON_PRICE_CENTS >= wallet_tier_price_cents(quantity));
        }
    }

    // =========================================================================
    // PRICE-05: Top-up minimum boundary - exactly the minimum is accepted
    // =========================================================================
    #[test]
    fn test_topup_minimum_boundary() {
        assert!(MIN_TOPUP_CENTS - 1 < MIN_TOPUP_CENTS);
        assert!(MIN_TOPUP_CENTS >= 500);
    }

    // =========================================================================
    // PRICE-06: A negotiated per-user rate wins over every volume tier,
    // in both directions (cheaper at low volume, dearer at high volume)
    // =========================================================================
    #[test]
    fn test_user_override_wins_over_tiers() {
        use crate::pricing::resolve_wallet_unit_price;
        // 10 mailboxes at a 250 override: 2500 total, not the 300 base tier
        assert_eq!(resolve_wallet_unit_price(Some(250), 10) * 10, 2500);
        // override holds even where the tier would be cheaper
        assert_eq!(resolve_wallet_unit_price(Some(250), 2000), 250);
        assert_eq!(resolve_wallet_unit_price(None, 2000), 200);
    }

    // =========================================================================
    // PRICE-07: Stripe addon chain resolves override > plan > catalog >
    // fallback, first match wins
    // =========================================================================
    #[test]
    fn test_addon_chain_resolution_order() {
        use crate::pricing::{resolve_addon_price, PriceSource};
        let (price, source) = resolve_addon_price(Some(199), Some(350), Some(275));
        assert_eq!((price, source), (199, PriceSource::UserOverride));
        let (price, source) = resolve_addon_price(None, Some(350), Some(275));
        assert_eq!((price, source), (350, PriceSource::PlanRate));
        let (price, source) = resolve_addon_price(None, None, Some(275));
        assert_eq!((price, source), (275, PriceSource::CheapestPlan));
        let (price, source) = resolve_addon_price(None, None, None);
        assert_eq!((price, source), (FALLBACK_ADDON_PRICE_CENTS, PriceSource::Fallback));
    }
}

#[cfg(test)]
mod currency_tests {
    use crate::currency::resolve_currency;

    // =========================================================================
    // CUR-01: Missing country falls back to usd
    // =========================================================================
    #[test]
    fn test_missing_country_is_usd() {
        assert_eq!(resolve_currency(None), "usd");
    }

    // =========================================================================
    // CUR-02: Unknown country code falls back to usd
    // =========================================================================
    #[test]
    fn test_unknown_country_is_usd() {
        assert_eq!(resolve_currency(Some("ZZ")), "usd");
        assert_eq!(resolve_currency(Some("")), "usd");
    }

    // =========================================================================
    // CUR-03: Country codes match regardless of case
    // =========================================================================
    #[test]
    fn test_country_codes_case_insensitive() {
        assert_eq!(resolve_currency(Some("gb")), "gbp");
        assert_eq!(resolve_currency(Some("GB")), "gbp");
        assert_eq!(resolve_currency(Some("In")), "inr");
    }

    // =========================================================================
    // CUR-04: Eurozone members all resolve to eur
    // =========================================================================
    #[test]
    fn test_eurozone_members_resolve_to_eur() {
        for country in ["DE", "FR", "ES", "IT", "NL"] {
            assert_eq!(resolve_currency(Some(country)), "eur");
        }
    }
}

#[cfg(test)]
mod period_tests {
    use crate::subscriptions::add_one_month;
    use time::macros::datetime;

    // =========================================================================
    // PERIOD-01: Jan 31 in a leap year clamps to Feb 29
    // =========================================================================
    #[test]
    fn test_jan_31_leap_year_clamps_to_feb_29() {
        let next = add_one_month(datetime!(2024-01-31 12:00 UTC));
        assert_eq!(next, datetime!(2024-02-29 12:00 UTC));
    }

    // =========================================================================
    // PERIOD-02: Jan 31 in a common year clamps to Feb 28
    // =========================================================================
    #[test]
    fn test_jan_31_common_year_clamps_to_feb_28() {
        let next = add_one_month(datetime!(2025-01-31 12:00 UTC));
        assert_eq!(next, datetime!(2025-02-28 12:00 UTC));
    }

    // =========================================================================
    // PERIOD-03: Feb 29 renews on Mar 29, not Mar 31
    // =========================================================================
    #[test]
    fn test_feb_29_renews_on_mar_29() {
        let next = add_one_month(datetime!(2024-02-29 00:00 UTC));
        assert_eq!(next, datetime!(2024-03-29 00:00 UTC));
    }

    // =========================================================================
    // PERIOD-04: Oct 31 clamps to Nov 30
    // =========================================================================
    #[test]
    fn test_oct_31_clamps_to_nov_30() {
        let next = add_one_month(datetime!(2026-10-31 08:30 UTC));
        assert_eq!(next, datetime!(2026-11-30 08:30 UTC));
    }

    // =========================================================================
    // PERIOD-05: December rolls the year over
    // =========================================================================
    #[test]
    fn test_december_rolls_year() {
        let next = add_one_month(datetime!(2025-12-15 00:00 UTC));
        assert_eq!(next, datetime!(2026-01-15 00:00 UTC));
    }

    // =========================================================================
    // PERIOD-06: Twelve monthly steps from a mid-month anchor land back on
    // the same day one year later (no drift for unclamped anchors)
    // =========================================================================
    #[test]
    fn test_twelve_steps_no_drift_mid_month() {
        let mut current = datetime!(2025-03-15 09:00 UTC);
        for _ in 0..12 {
            current = add_one_month(current);
        }
        assert_eq!(current, datetime!(2026-03-15 09:00 UTC));
    }
}

#[cfg(test)]
mod metadata_tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use crate::webhooks::{string_list_from_metadata, user_id_from_metadata};

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // META-01: Extra unrelated metadata keys do not interfere
    // =========================================================================
    #[test]
    fn test_extra_keys_ignored() {
        let id = Uuid::new_v4();
        let m = metadata(&[
            ("user_id", &id.to_string()),
            ("type", "wallet_topup"),
            ("utm_source", "email"),
        ]);
        assert_eq!(user_id_from_metadata(&m).unwrap(), id);
    }

    // =========================================================================
    // META-02: A UUID with surrounding whitespace is rejected, not trimmed
    // =========================================================================
    #[test]
    fn test_padded_uuid_rejected() {
        let id = Uuid::new_v4();
        let padded = format!(" {id} ");
        let m = metadata(&[("user_id", &padded)]);
        assert!(user_id_from_metadata(&m).is_err());
    }

    // =========================================================================
    // META-03: A JSON list with a single element parses
    // =========================================================================
    #[test]
    fn test_single_element_list_parses() {
        let m = metadata(&[("emails", r#"["warm1@pool.example"]"#)]);
        assert_eq!(
            string_list_from_metadata(&m, "emails").unwrap(),
            vec!["warm1@pool.example".to_string()]
        );
    }

    // =========================================================================
    // META-04: A JSON list of non-strings is rejected
    // =========================================================================
    #[test]
    fn test_non_string_list_rejected() {
        let m = metadata(&[("emails", "[1,2,3]")]);
        assert!(string_list_from_metadata(&m, "emails").is_err());
    }
}

#[cfg(test)]
mod registrar_tests {
    use crate::registrar::{DomainRegistrar, StaticRegistrar};

    // =========================================================================
    // REG-01: Taken domains report unavailable, the rest available
    // =========================================================================
    #[tokio::test]
    async fn test_taken_domains_unavailable() {
        let registrar = StaticRegistrar {
            price_cents: 1200,
            taken: vec!["taken.com".to_string()],
            failing: vec![],
        };

        let results = registrar
            .check(&["taken.com".to_string(), "free.com".to_string()])
            .await
            .unwrap();

        assert!(!results[0].available);
        assert!(results[1].available);
    }

    // =========================================================================
    // REG-02: Quotes scale linearly with years
    // =========================================================================
    #[tokio::test]
    async fn test_quote_scales_with_years() {
        let registrar = StaticRegistrar {
            price_cents: 1200,
            ..Default::default()
        };

        let quotes = registrar.quote(&["a.com".to_string()], 3).await.unwrap();
        assert_eq!(quotes[0].price_cents, 3600);
        assert_eq!(quotes[0].years, 3);
    }

    // =========================================================================
    // REG-03: Registration of a failing domain surfaces a registrar error
    // =========================================================================
    #[tokio::test]
    async fn test_failing_domain_errors() {
        let registrar = StaticRegistrar {
            price_cents: 1200,
            failing: vec!["cursed.com".to_string()],
            ..Default::default()
        };

        assert!(registrar.register("cursed.com", 1).await.is_err());
        assert!(registrar.register("fine.com", 1).await.is_ok());
    }

    // =========================================================================
    // REG-04: Successful registration carries an expiry in the future
    // =========================================================================
    #[tokio::test]
    async fn test_registration_expiry_in_future() {
        let registrar = StaticRegistrar::default();
        let registered = registrar.register("fine.com", 2).await.unwrap();
        let expires = registered.expires_on.unwrap();
        assert!(expires > time::OffsetDateTime::now_utc());
    }
}

#[cfg(test)]
mod allocator_tests {
    use crate::allocator::{pick_candidate, CandidateRow};
    use uuid::Uuid;

    fn row(total: i32, used: i32) -> CandidateRow {
        CandidateRow {
            id: Uuid::new_v4(),
            number_of_mailboxes: total,
            number_of_used_mailboxes: used,
        }
    }

    // =========================================================================
    // ALLOC-01: Oldest subscription with spare capacity wins (rows arrive
    // ordered oldest first)
    // =========================================================================
    #[test]
    fn test_oldest_with_capacity_wins() {
        let candidates = vec![row(5, 2), row(10, 0)];
        let picked = pick_candidate(&candidates).unwrap();
        assert_eq!(picked.id, candidates[0].id);
    }

    // =========================================================================
    // ALLOC-02: Full subscriptions are skipped, not overfilled
    // =========================================================================
    #[test]
    fn test_full_rows_are_skipped() {
        let candidates = vec![row(5, 5), row(3, 3), row(10, 9)];
        let picked = pick_candidate(&candidates).unwrap();
        assert_eq!(picked.id, candidates[2].id);
    }

    // =========================================================================
    // ALLOC-03: All capacity consumed - nothing is picked, so no slot is
    // ever assigned past number_of_mailboxes
    // =========================================================================
    #[test]
    fn test_exhausted_capacity_picks_nothing() {
        let candidates = vec![row(5, 5), row(1, 1)];
        assert!(pick_candidate(&candidates).is_none());
        assert!(pick_candidate(&[]).is_none());
    }

    // =========================================================================
    // ALLOC-04: A selected row always has used < total, the precondition
    // the guarded claim UPDATE re-checks under the transaction
    // =========================================================================
    #[test]
    fn test_picked_row_has_spare_capacity() {
        let candidates = vec![row(4, 4), row(6, 5), row(8, 0)];
        let picked = pick_candidate(&candidates).unwrap();
        assert!(picked.number_of_used_mailboxes < picked.number_of_mailboxes);
    }
}

#[cfg(test)]
mod cancel_tests {
    use crate::subscriptions::{plan_cancel, CancelMode};
    use mailstack_shared::{PaymentMethod, SubscriptionStatus};

    // =========================================================================
    // CANCEL-01: Wallet immediate - local teardown now, no provider call
    // =========================================================================
    #[test]
    fn test_wallet_immediate_cascades_locally() {
        let plan = plan_cancel(PaymentMethod::Wallet, CancelMode::Immediate);
        assert!(!plan.remote_call);
        assert!(plan.cascade_now);
        assert_eq!(plan.new_status, SubscriptionStatus::Cancelled);
    }

    // =========================================================================
    // CANCEL-02: Wallet at period end - flag only; the renewal sweep
    // finishes the cancellation at renews_on
    // =========================================================================
    #[test]
    fn test_wallet_period_end_defers_teardown() {
        let plan = plan_cancel(PaymentMethod::Wallet, CancelMode::AtPeriodEnd);
        assert!(!plan.remote_call);
        assert!(!plan.cascade_now);
        assert_eq!(plan.new_status, SubscriptionStatus::CancelAtPeriodEnd);
    }

    // =========================================================================
    // CANCEL-03: Stripe immediate - provider cancel plus local teardown
    // =========================================================================
    #[test]
    fn test_stripe_immediate_calls_provider_and_cascades() {
        let plan = plan_cancel(PaymentMethod::Stripe, CancelMode::Immediate);
        assert!(plan.remote_call);
        assert!(plan.cascade_now);
        assert_eq!(plan.new_status, SubscriptionStatus::Cancelled);
    }

    // =========================================================================
    // CANCEL-04: Stripe at period end - provider flag; the cascade waits
    // for customer.subscription.deleted
    // =========================================================================
    #[test]
    fn test_stripe_period_end_waits_for_webhook() {
        let plan = plan_cancel(PaymentMethod::Stripe, CancelMode::AtPeriodEnd);
        assert!(plan.remote_call);
        assert!(!plan.cascade_now);
        assert_eq!(plan.new_status, SubscriptionStatus::CancelAtPeriodEnd);
    }
}
