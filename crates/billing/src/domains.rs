//! Domain purchase orchestration.
//!
//! Registration is not transactional across domains: each provider call
//! either lands or it doesn't, and the report carries partial results. The
//! wallet path and the webhook path share [`DomainService::register_purchased`].

use mailstack_shared::{OrderType, PaymentMethod};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::orders;
use crate::registrar::{DomainAvailability, DomainQuote, DomainRegistrar};
use crate::wallet::WalletEngine;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Domain {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub source: String,
    pub status: String,
    pub mailbox_count: i32,
    pub registrar: Option<String>,
    pub purchase_price_cents: Option<i64>,
    pub redirect_url: Option<String>,
    pub expires_on: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct FailedDomain {
    pub domain: String,
    pub reason: String,
}

/// Per-domain outcome of a purchase. `purchased` and `failed` partition
/// the requested set.
#[derive(Debug, Default, Serialize)]
pub struct DomainPurchaseReport {
    pub purchased: Vec<String>,
    pub failed: Vec<FailedDomain>,
}

/// Per-domain outcome of a connect request. Skipped names already exist.
#[derive(Debug, Default, Serialize)]
pub struct DomainConnectReport {
    pub connected: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Clone)]
pub struct DomainService<R: DomainRegistrar> {
    pool: PgPool,
    registrar: R,
    wallet: WalletEngine,
}

impl<R: DomainRegistrar> DomainService<R> {
    pub fn new(pool: PgPool, registrar: R) -> Self {
        let wallet = WalletEngine::new(pool.clone());
        Self {
            pool,
            registrar,
            wallet,
        }
    }

    pub async fn check(&self, domains: &[String]) -> BillingResult<Vec<DomainAvailability>> {
        validate_domains(domains)?;
        self.registrar.check(domains).await
    }

    pub async fn quote(&self, domains: &[String], years: u32) -> BillingResult<Vec<DomainQuote>> {
        validate_domains(domains)?;
        if years == 0 || years > 10 {
            return Err(BillingError::Validation(
                "registration term must be between 1 and 10 years".to_string(),
            ));
        }
        self.registrar.quote(domains, years).await
    }

    pub async fn list(&self, user_id: Uuid) -> BillingResult<Vec<Domain>> {
        let rows: Vec<Domain> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, source, status, mailbox_count, registrar,
                   purchase_price_cents, redirect_url, expires_on, created_at
            FROM domains
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Connect user-owned domains. Gated on Gsuite mailbox quota: the
    /// account may hold at most as many domains as it has paid slots.
    pub async fn connect(
        &self,
        user_id: Uuid,
        domains: &[String],
    ) -> BillingResult<DomainConnectReport> {
        validate_domains(domains)?;

        let quota: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(number_of_mailboxes), 0)::BIGINT
            FROM subscriptions
            WHERE user_id = $1
              AND mailbox_type = 'gsuite'
              AND status IN ('active', 'cancel_at_period_end')
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if quota == 0 {
            return Err(BillingError::NoActiveSubscription("gsuite".to_string()));
        }

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM domains WHERE user_id = $1 AND status <> 'disconnected'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if connect_over_quota(quota, existing, domains.len()) {
            return Err(BillingError::Validation(format!(
                "domain limit reached: {existing} of {quota} in use"
            )));
        }

        let mut report = DomainConnectReport::default();
        for domain in domains {
            let name = domain.trim().to_lowercase();
            let inserted = sqlx::query(
                r#"
                INSERT INTO domains (id, user_id, name, source, status, mailbox_count, created_at)
                VALUES ($1, $2, $3, 'connected', 'pending', 0, NOW())
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&name)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 0 {
                report.skipped.push(name);
            } else {
                report.connected.push(name);
            }
        }

        tracing::info!(
            user_id = %user_id,
            connected = report.connected.len(),
            skipped = report.skipped.len(),
            "Domain connect batch complete"
        );

        Ok(report)
    }

    /// Mark a connected domain disconnected. Purchased domains are not
    /// disconnectable; they expire instead.
    pub async fn disconnect(&self, user_id: Uuid, domain_id: Uuid) -> BillingResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE domains
            SET status = 'disconnected'
            WHERE id = $1 AND user_id = $2 AND source = 'connected' AND status <> 'disconnected'
            "#,
        )
        .bind(domain_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "connected domain {domain_id}"
            )));
        }

        tracing::info!(user_id = %user_id, domain_id = %domain_id, "Domain disconnected");
        Ok(())
    }

    /// Set or clear the redirect target on a batch of owned domains.
    pub async fn set_redirect(
        &self,
        user_id: Uuid,
        domain_ids: &[Uuid],
        redirect_url: Option<String>,
    ) -> BillingResult<u64> {
        if domain_ids.is_empty() {
            return Err(BillingError::Validation("no domains given".to_string()));
        }
        if let Some(url) = &redirect_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(BillingError::Validation(
                    "redirect url must be http or https".to_string(),
                ));
            }
        }

        let updated = sqlx::query(
            "UPDATE domains SET redirect_url = $1 WHERE user_id = $2 AND id = ANY($3)",
        )
        .bind(&redirect_url)
        .bind(user_id)
        .bind(domain_ids)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    /// Quote, debit, then register. The debit covers the full quote; if
    /// some registrations then fail, the shortfall is credited back.
    pub async fn purchase_with_wallet(
        &self,
        user_id: Uuid,
        domains: &[String],
        years: u32,
    ) -> BillingResult<DomainPurchaseReport> {
        let quotes = self.quote(domains, years).await?;
        let total: i64 = quotes.iter().map(|q| q.price_cents).sum();
        let order_ref = Uuid::new_v4();

        self.wallet
            .debit(
                user_id,
                total,
                &format!("{} domain registrations", domains.len()),
                Some(order_ref),
            )
            .await?;

        let report = self.register_purchased(user_id, &quotes).await?;

        let failed_total: i64 = quotes
            .iter()
            .filter(|q| report.failed.iter().any(|f| f.domain == q.domain))
            .map(|q| q.price_cents)
            .sum();
        if failed_total > 0 {
            if let Err(e) = self
                .wallet
                .credit(user_id, failed_total, "refund for failed domain registrations", Some(order_ref))
                .await
            {
                tracing::error!(
                    user_id = %user_id,
                    amount_cents = failed_total,
                    error = %e,
                    "Failed to refund failed domain registrations"
                );
            }
        }

        orders::record(
            &self.pool,
            user_id,
            OrderType::DomainPurchase,
            total - failed_total,
            PaymentMethod::Wallet,
            Some(order_ref),
        )
        .await?;

        Ok(report)
    }

    /// Register a set of already-paid domains. Rows are pre-inserted
    /// inactive and flipped active per provider success, so a crash
    /// mid-batch leaves inspectable state rather than silent loss.
    pub async fn register_purchased(
        &self,
        user_id: Uuid,
        quotes: &[DomainQuote],
    ) -> BillingResult<DomainPurchaseReport> {
        let mut report = DomainPurchaseReport::default();

        for quote in quotes {
            let inserted = sqlx::query(
                r#"
                INSERT INTO domains
                    (id, user_id, name, source, status, mailbox_count, registrar, purchase_price_cents, created_at)
                VALUES ($1, $2, $3, 'purchased', 'inactive', 0, 'gateway', $4, NOW())
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&quote.domain)
            .bind(quote.price_cents)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 0 {
                report.failed.push(FailedDomain {
                    domain: quote.domain.clone(),
                    reason: "domain already exists".to_string(),
                });
                continue;
            }

            match self.registrar.register(&quote.domain, quote.years).await {
                Ok(registered) => {
                    sqlx::query(
                        "UPDATE domains SET status = 'active', expires_on = $1 WHERE name = $2",
                    )
                    .bind(registered.expires_on)
                    .bind(&quote.domain)
                    .execute(&self.pool)
                    .await?;
                    report.purchased.push(quote.domain.clone());
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        domain = %quote.domain,
                        error = %e,
                        "Domain registration failed"
                    );
                    report.failed.push(FailedDomain {
                        domain: quote.domain.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            user_id = %user_id,
            purchased = report.purchased.len(),
            failed = report.failed.len(),
            "Domain registration batch complete"
        );

        Ok(report)
    }
}

/// Connected and purchased domains share one budget: the user's paid
/// Gsuite slot count.
pub(crate) fn connect_over_quota(mailbox_quota: i64, existing_domains: i64, requested: usize) -> bool {
    existing_domains + requested as i64 > mailbox_quota
}

fn validate_domains(domains: &[String]) -> BillingResult<()> {
    if domains.is_empty() {
        return Err(BillingError::Validation("no domains given".to_string()));
    }
    for domain in domains {
        let d = domain.trim();
        if d.is_empty() || !d.contains('.') || d.contains(char::is_whitespace) {
            return Err(BillingError::Validation(format!("invalid domain: {domain}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_domains() {
        assert!(validate_domains(&[]).is_err());
        assert!(validate_domains(&["nodot".to_string()]).is_err());
        assert!(validate_domains(&["has space.com".to_string()]).is_err());
        assert!(validate_domains(&["ok.com".to_string()]).is_ok());
    }

    #[test]
    fn connect_gate_counts_existing_plus_requested() {
        // 10 paid slots, 8 domains held: two more fit, three do not.
        assert!(!connect_over_quota(10, 8, 2));
        assert!(connect_over_quota(10, 8, 3));
        // at the limit nothing more fits
        assert!(connect_over_quota(10, 10, 1));
        assert!(!connect_over_quota(10, 0, 10));
    }
}
