use std::path::Path;

use super::fakes::{FakeBrowser, FakeSite, test_settings};
use crate::core::automation::{
    CollectOutcome, LoginStart, RewardImage, SessionLossPolicy, SessionState, StorefrontSession,
};

async fn session(browser: &FakeBrowser, policy: SessionLossPolicy, dir: &Path) -> StorefrontSession {
    StorefrontSession::open(
        browser,
        &dir.join("profiles"),
        42,
        "racer@mail.com",
        test_settings(policy, &dir.join("captures")),
    )
    .await
    .unwrap()
}

fn collected(outcome: CollectOutcome) -> crate::core::automation::CollectReport {
    match outcome {
        CollectOutcome::Collected(report) => report,
        CollectOutcome::SessionLost => panic!("expected a collected report"),
    }
}

#[tokio::test]
async fn never_claims_more_than_two_items() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        free_items: 5,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 2);
    assert_eq!(report.reward_images.len(), 2);
    assert!(!report.session_lost);
    assert_eq!(s.state(), SessionState::Done);
    assert_eq!(browser.with(|site| site.claims), 2);
}

#[tokio::test]
async fn empty_storefront_yields_zero() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        free_items: 0,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 0);
    assert!(report.reward_images.is_empty());
}

#[tokio::test]
async fn logged_out_before_first_claim_is_session_lost() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        logged_in: false,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    assert_eq!(s.collect_rewards().await, CollectOutcome::SessionLost);
    assert_eq!(s.state(), SessionState::SessionLost);
    assert_eq!(browser.with(|site| site.claims), 0);
}

#[tokio::test]
async fn loss_after_first_claim_follows_policy() {
    let dir = tempfile::tempdir().unwrap();
    let site = || FakeSite {
        lose_session_after: Some(1),
        ..FakeSite::default()
    };

    let browser = FakeBrowser::new(site());
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;
    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 1);
    assert!(report.session_lost);
    assert_eq!(report.reward_images.len(), 1);

    let browser = FakeBrowser::new(site());
    let mut s = session(&browser, SessionLossPolicy::Discard, dir.path()).await;
    assert_eq!(s.collect_rewards().await, CollectOutcome::SessionLost);
}

#[tokio::test]
async fn failure_inside_second_slot_keeps_first_claim() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        fail_claim: Some(2),
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 1);
    assert_eq!(s.state(), SessionState::Done);
}

#[tokio::test]
async fn navigation_fault_after_first_claim_keeps_it() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        fail_navigation_after: Some(1),
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 1);
    assert_eq!(report.reward_images.len(), 1);
    assert!(!report.session_lost);
    assert_eq!(s.state(), SessionState::Done);
    assert_eq!(browser.with(|site| site.claims), 1);
}

#[tokio::test]
async fn navigation_fault_reports_nothing_collected() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        fail_navigation: true,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 0);
    assert!(!report.session_lost);
}

#[tokio::test]
async fn missing_image_url_falls_back_to_card_capture() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        free_items: 1,
        image_src: None,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 1);
    match &report.reward_images[..] {
        [RewardImage::File(path)] => {
            assert!(path.starts_with(dir.path().join("captures")));
            assert!(path.exists());
        }
        other => panic!("unexpected images {:?}", other),
    }
}

#[tokio::test]
async fn already_logged_in_skips_the_code() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite::default());
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    assert_eq!(s.start_login().await, LoginStart::AlreadyLogged);
    assert_eq!(s.state(), SessionState::Authenticated);
    let opened = browser.with(|site| site.opened.clone());
    assert_eq!(opened, vec![dir.path().join("profiles/42/racer_mail_com")]);
}

#[tokio::test]
async fn correct_code_authenticates() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        logged_in: false,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    assert_eq!(s.start_login().await, LoginStart::NeedOtp);
    assert_eq!(s.state(), SessionState::OtpPending);
    assert!(s.submit_otp("12345").await);
    assert_eq!(s.state(), SessionState::Authenticated);

    let report = collected(s.collect_rewards().await);
    assert_eq!(report.count, 2);
}

#[tokio::test]
async fn code_input_still_visible_means_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        logged_in: false,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    assert_eq!(s.start_login().await, LoginStart::NeedOtp);
    assert!(!s.submit_otp("00000").await);
    assert_eq!(s.state(), SessionState::Failed);
}

#[tokio::test]
async fn login_form_never_appearing_is_ui_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite {
        logged_in: false,
        login_form: false,
        ..FakeSite::default()
    });
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;

    assert_eq!(
        s.start_login().await,
        LoginStart::Failed("UI_NOT_READY".into())
    );
    assert_eq!(s.state(), SessionState::Failed);
}

#[tokio::test]
async fn probe_reports_login_affordance() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(FakeSite::default());
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;
    assert!(s.probe_authenticated().await);

    browser.with(|site| site.logged_in = false);
    let mut s = session(&browser, SessionLossPolicy::Preserve, dir.path()).await;
    assert!(!s.probe_authenticated().await);
    assert_eq!(s.state(), SessionState::SessionLost);
}
