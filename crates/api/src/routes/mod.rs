//! Route modules and router assembly.

pub mod domains;
pub mod health;
pub mod mailboxes;
pub mod prewarm;
pub mod subscriptions;
pub mod wallet;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{auth::require_api_key, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // Webhook signature is its own authentication; everything else goes
    // through the API key middleware.
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook));

    let authed = Router::new()
        .route("/mailboxes", post(mailboxes::create_mailbox))
        .route("/mailboxes/{id}", delete(mailboxes::delete_mailbox))
        .route("/mailboxes/quota", get(mailboxes::get_quota))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/history", get(wallet::get_history))
        .route("/wallet/topup", post(wallet::create_topup_session))
        .route("/plans", get(subscriptions::list_plans))
        .route("/subscriptions", get(subscriptions::list_subscriptions))
        .route("/subscriptions/plan", post(subscriptions::purchase_plan))
        .route(
            "/subscriptions/mailboxes",
            post(subscriptions::purchase_mailboxes),
        )
        .route(
            "/subscriptions/{id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/change-plan",
            post(subscriptions::change_plan),
        )
        .route("/domains", get(domains::list_domains))
        .route("/domains/check", post(domains::check_domains))
        .route("/domains/quote", post(domains::quote_domains))
        .route("/domains/purchase", post(domains::purchase_domains))
        .route("/domains/connect", post(domains::connect_domains))
        .route(
            "/domains/{id}/disconnect",
            post(domains::disconnect_domain),
        )
        .route("/domains/redirect", post(domains::set_redirect))
        .route("/prewarm/available", get(prewarm::list_available))
        .route("/prewarm/mine", get(prewarm::list_mine))
        .route("/prewarm/purchase", post(prewarm::purchase))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(authed)
        .with_state(state)
}
