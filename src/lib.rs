//! PeerQuest Core - quest application lifecycle and gold ledger
//!
//! The rules behind PeerQuest's quests and gold: who may apply to a quest and
//! how often, what approving or kicking an applicant does to the quest, and
//! how gold moves between users without ever being credited twice.
//!
//! ## Architecture
//!
//! - **Repositories** (`db/*.rs`): Diesel queries over one SQLite file
//! - **Services** (`services/*.rs`): validation, transaction boundaries, events
//! - **PeerQuest**: service container holding the entry points
//!
//! ## Guarantees
//!
//! | Concern | Mechanism |
//! |---------|-----------|
//! | Check-then-write races | One `BEGIN IMMEDIATE` transaction per operation |
//! | Double payment awards | Compare-and-set on `payment_proofs.gold_awarded` |
//! | Balance drift | Append-only ledger, cache rebuilt by recompute |
//! | Attempt counting | Separate append-only attempt log |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/peerquest/
//! ├── peerquest.db        # SQLite database (WAL mode)
//! └── config.toml         # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod services;

// Re-exports
pub use config::Config;
pub use error::CoreError;
pub use db::Database;
pub use db::models::{
    Application, ApplicationAttempt, ApplicationStatus, ParticipantStatus, PaymentProof,
    PaymentStatus, Quest, QuestParticipant, QuestStatus, Transaction, TransactionType,
};
pub use db::quests::{CreateQuestInput, QuestQuery};
pub use services::{
    AttemptStatus, BalanceCheck, CoreEvent, EventBus, PeerQuest, ReconcileOutcome, RepairReport,
};
