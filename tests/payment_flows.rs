mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{error_code, Harness};
use serde_json::json;
use turnstile::now_unix;

#[tokio::test]
async fn registration_payment_activates_the_account() -> Result<()> {
    let harness = Harness::new(1_000)?;
    let mut client = harness.client()?;
    let user_id = harness.verified_user(&mut client, 1).await?;
    let user = harness.user(user_id).await?;
    assert_eq!(user.paywall_address, format!("addr-{user_id}"));
    assert_eq!(user.paywall_amount, 1_000);
    assert!(!user.is_paid());

    harness.login(&mut client, 1).await?;
    let (status, body) = client.get("/api/v1/user/payments/registration").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_paid"], false);

    // Too small, then a qualifying payment.
    let now = now_unix();
    harness
        .wallet
        .pay(&user.paywall_address, "tx-small", 999, 5, now);
    let (_, body) = client.get("/api/v1/user/payments/registration").await?;
    assert_eq!(body["has_paid"], false);

    harness
        .wallet
        .pay(&user.paywall_address, "tx-good", 1_000, 5, now + 1);
    let (status, body) = client.get("/api/v1/user/payments/registration").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_paid"], true);
    assert_eq!(body["paywall_tx_id"], "tx-good");
    assert!(harness.user(user_id).await?.is_paid());
    Ok(())
}

#[tokio::test]
async fn payments_before_registration_do_not_count() -> Result<()> {
    let harness = Harness::new(1_000)?;
    let mut client = harness.client()?;
    let user_id = harness.verified_user(&mut client, 1).await?;
    let user = harness.user(user_id).await?;

    harness.wallet.pay(
        &user.paywall_address,
        "tx-old",
        5_000,
        10,
        user.paywall_tx_not_before - 1,
    );
    harness.login(&mut client, 1).await?;
    let (_, body) = client.get("/api/v1/user/payments/registration").await?;
    assert_eq!(body["has_paid"], false);
    Ok(())
}

#[tokio::test]
async fn admin_rescan_and_clear_paywall() -> Result<()> {
    let harness = Harness::new(1_000)?;
    let mut admin = harness.client()?;
    let admin_id = harness.verified_user(&mut admin, 1).await?;
    let first = harness.verified_user(&mut admin, 2).await?;
    let second = harness.verified_user(&mut admin, 3).await?;
    harness.update(admin_id, |user| user.admin = true).await?;
    harness.login(&mut admin, 1).await?;

    let (status, body) = admin
        .put("/api/v1/user/payments/rescan", json!({ "user_id": first }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "payment_not_found");

    let address = harness.user(first).await?.paywall_address;
    harness.wallet.pay(&address, "tx-1", 1_000, 1, now_unix() + 1);
    let (status, body) = admin
        .put("/api/v1/user/payments/rescan", json!({ "user_id": first }))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["has_paid"], true);

    let (_, unpaid) = admin.get("/api/v1/users?unpaid=true").await?;
    // The admin and the third user still owe the fee.
    assert_eq!(unpaid["total_matches"], 2);

    let (status, body) = admin
        .post(
            "/api/v1/user/manage",
            json!({ "user_id": second, "action": "clear_user_paywall", "reason": "comped" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["private"]["payment"]["has_paid"], true);
    assert_eq!(
        body["user"]["private"]["payment"]["paywall_tx_id"],
        "cleared_by_admin"
    );
    Ok(())
}

#[tokio::test]
async fn poller_marks_open_windows_paid() -> Result<()> {
    let harness = Harness::new(1_000)?;
    let mut client = harness.client()?;
    let user_id = harness.verified_user(&mut client, 1).await?;
    let user = harness.user(user_id).await?;

    harness
        .wallet
        .pay(&user.paywall_address, "tx-poll", 1_500, 3, user.paywall_tx_not_before);
    let paid = harness.state.paywall().poll_once(now_unix()).await?;
    assert_eq!(paid, 1);
    assert_eq!(
        harness.user(user_id).await?.paywall_tx_id.as_deref(),
        Some("tx-poll")
    );
    Ok(())
}
