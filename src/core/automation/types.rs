use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// At most this many claimable items are offered per cycle.
pub const MAX_REWARD_SLOTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    AuthPending,
    OtpPending,
    Authenticated,
    Collecting,
    Done,
    SessionLost,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::SessionLost | SessionState::Failed
        )
    }

    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        if self == to {
            return true;
        }
        match self {
            Idle => matches!(to, AuthPending | Authenticated | SessionLost | Failed),
            AuthPending => matches!(to, OtpPending | Authenticated | Failed),
            OtpPending => matches!(to, Authenticated | Failed),
            Authenticated => matches!(to, Collecting | SessionLost | Done),
            Collecting => matches!(to, Done | SessionLost),
            Done | SessionLost | Failed => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStart {
    AlreadyLogged,
    NeedOtp,
    Failed(String),
}

/// Reference to a captured reward artwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RewardImage {
    Url(String),
    File(PathBuf),
}

impl RewardImage {
    pub fn reference(&self) -> String {
        match self {
            RewardImage::Url(url) => url.clone(),
            RewardImage::File(path) => path.display().to_string(),
        }
    }

    pub fn from_reference(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            RewardImage::Url(reference.to_string())
        } else {
            RewardImage::File(PathBuf::from(reference))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub count: u32,
    pub reward_images: Vec<RewardImage>,
    /// Set when the session dropped after at least one claim and the
    /// configured policy kept the partial result.
    pub session_lost: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    Collected(CollectReport),
    SessionLost,
}

/// What to do with claims already made when the session drops mid-call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLossPolicy {
    /// Report the earlier claims and flag the loss.
    #[default]
    Preserve,
    /// Drop the earlier claims and report plain session loss.
    Discard,
}

/// Waits and pacing for the storefront flow, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationTimings {
    pub settle_ms: u64,
    pub navigation_timeout_ms: u64,
    pub element_timeout_ms: u64,
    pub email_input_timeout_ms: u64,
    pub otp_input_timeout_ms: u64,
    pub post_login_timeout_ms: u64,
    pub free_item_timeout_ms: u64,
    pub claim_timeout_ms: u64,
    pub purchase_success_timeout_ms: u64,
    pub human_delay_min_ms: u64,
    pub human_delay_max_ms: u64,
    pub claim_delay_min_ms: u64,
    pub claim_delay_max_ms: u64,
    pub scroll_steps: u32,
    pub scroll_step_px: i64,
    pub scroll_step_ms: u64,
}

impl Default for AutomationTimings {
    fn default() -> Self {
        Self {
            settle_ms: 5_000,
            navigation_timeout_ms: 60_000,
            element_timeout_ms: 5_000,
            email_input_timeout_ms: 15_000,
            otp_input_timeout_ms: 10_000,
            post_login_timeout_ms: 15_000,
            free_item_timeout_ms: 5_000,
            claim_timeout_ms: 5_000,
            purchase_success_timeout_ms: 8_000,
            human_delay_min_ms: 1_000,
            human_delay_max_ms: 2_000,
            claim_delay_min_ms: 2_000,
            claim_delay_max_ms: 3_000,
            scroll_steps: 6,
            scroll_step_px: 250,
            scroll_step_ms: 60,
        }
    }
}

impl AutomationTimings {
    /// Every wait collapsed to zero; used by scripted-browser tests.
    pub fn instant() -> Self {
        Self {
            settle_ms: 0,
            navigation_timeout_ms: 0,
            element_timeout_ms: 0,
            email_input_timeout_ms: 0,
            otp_input_timeout_ms: 0,
            post_login_timeout_ms: 0,
            free_item_timeout_ms: 0,
            claim_timeout_ms: 0,
            purchase_success_timeout_ms: 0,
            human_delay_min_ms: 0,
            human_delay_max_ms: 0,
            claim_delay_min_ms: 0,
            claim_delay_max_ms: 0,
            scroll_steps: 1,
            scroll_step_px: 250,
            scroll_step_ms: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [Idle, AuthPending, OtpPending, Authenticated, Collecting, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn error_states_are_reachable_only_from_their_phase() {
        assert!(AuthPending.can_transition(Failed));
        assert!(OtpPending.can_transition(Failed));
        assert!(Authenticated.can_transition(SessionLost));
        assert!(Collecting.can_transition(SessionLost));

        assert!(!Collecting.can_transition(Failed));
        assert!(!OtpPending.can_transition(SessionLost));
        assert!(!Done.can_transition(Collecting));
        assert!(!Failed.can_transition(AuthPending));
        assert!(Failed.is_terminal());
        assert!(!Authenticated.is_terminal());
    }

    #[test]
    fn loss_policy_defaults_to_preserve() {
        assert_eq!(SessionLossPolicy::default(), SessionLossPolicy::Preserve);
    }

    #[test]
    fn image_references_round_trip_by_scheme() {
        let url = RewardImage::Url("https://cdn.example.com/webstore_a.png".into());
        assert_eq!(RewardImage::from_reference(&url.reference()), url);
        assert_eq!(
            RewardImage::from_reference("/data/captures/reward_1.png"),
            RewardImage::File(PathBuf::from("/data/captures/reward_1.png"))
        );
    }
}
