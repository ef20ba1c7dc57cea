//! Triage pipeline.
//!
//! A push notification carries a mailbox cursor. From there:
//! 1. `CursorTracker::resolve_new_items()` turns it into candidate items
//! 2. `Classifier::classify()` runs sender policy and rule tables (no LLM)
//! 3. `ItemProcessor::process()` plans tools, drafts, sends and relabels
//! 4. `CursorTracker::commit()` advances the cursor once the batch is done
//!
//! Labels are the only processing state. An item that fails keeps its
//! eligibility label and is retried on a later notification.

pub mod classifier;
pub mod cursor;
pub mod intake;
pub mod labels;
pub mod language;
pub mod processor;
pub mod rules;
pub mod sender;
pub mod types;

pub use classifier::Classifier;
pub use cursor::{CursorTracker, Resolution};
pub use intake::{NotificationHandler, NotificationReport};
pub use labels::{LabelGate, LabelNames, LabelState};
pub use processor::ItemProcessor;
pub use types::*;
