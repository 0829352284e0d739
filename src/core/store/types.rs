use serde::{Deserialize, Serialize};

/// Opaque numeric identity of a managed account (the chat id it talks through).
pub type AccountId = i64;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn from_str_opt(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    NeedAuth,
    Active,
}

string_enum!(AccountStatus {
    NeedAuth => "NEED_AUTH",
    Active => "ACTIVE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    SessionLost,
    Error,
    Empty,
}

string_enum!(AttemptOutcome {
    Success => "SUCCESS",
    SessionLost => "SESSION_LOST",
    Error => "ERROR",
    Empty => "EMPTY",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Broadcast,
    CheckSession,
    Notify,
    ClearHistory,
    TriggerCollect,
    PauseSystem,
    ResumeSystem,
}

string_enum!(CommandKind {
    Broadcast => "BROADCAST",
    CheckSession => "CHECK_SESSION",
    Notify => "NOTIFY",
    ClearHistory => "CLEAR_HISTORY",
    TriggerCollect => "TRIGGER_COLLECT",
    PauseSystem => "PAUSE_SYSTEM",
    ResumeSystem => "RESUME_SYSTEM",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

string_enum!(CommandStatus {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Whether a tracked outbound message survives a reaction cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCategory {
    Persistent,
    Reaction,
    Dashboard,
}

string_enum!(MessageCategory {
    Persistent => "PERSISTENT",
    Reaction => "REACTION",
    Dashboard => "DASHBOARD",
});

#[derive(Debug, Clone, Serialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub email: Option<String>,
    pub status: AccountStatus,
    pub is_elevated: bool,
    pub is_blocked: bool,
    pub trial_expires_at: Option<i64>,
    pub last_check_status: Option<String>,
    pub last_check_at: Option<i64>,
    pub created_at: i64,
}

impl AccountRecord {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn trial_expired(&self, now: i64) -> bool {
        match self.trial_expires_at {
            Some(expiry) => now > expiry,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountEmailRecord {
    pub account_id: AccountId,
    pub email: String,
    pub status: AccountStatus,
    pub last_collect_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionAttemptRecord {
    pub id: i64,
    pub account_id: AccountId,
    pub outcome: AttemptOutcome,
    pub rewards_collected: u32,
    pub email: Option<String>,
    pub created_at: i64,
}

/// Shape of a row the admin side inserts into the command queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommand {
    pub payload: String,
    pub target_id: Option<AccountId>,
    pub target_group: Option<String>,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedCommandRecord {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub target_id: Option<AccountId>,
    pub target_group: Option<String>,
    pub ttl_seconds: Option<i64>,
    pub status: CommandStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

impl QueuedCommandRecord {
    pub fn command_kind(&self) -> Option<CommandKind> {
        CommandKind::from_str_opt(&self.kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedMessageRecord {
    pub id: i64,
    pub account_id: AccountId,
    pub message_id: i64,
    pub text: Option<String>,
    pub category: MessageCategory,
    pub delete_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub account_id: AccountId,
    pub action: String,
    pub details: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub total_accounts: i64,
    pub active_accounts: i64,
    pub elevated_accounts: i64,
    pub blocked_accounts: i64,
    pub total_rewards: i64,
    pub is_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyHistory {
    pub date: String,
    pub success: i64,
    pub failed: i64,
}
