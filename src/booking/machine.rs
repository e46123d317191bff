//! Booking sessions and the pure transition function.
//!
//! [`transition`] looks at a session and one piece of user input and decides
//! what should happen; it never mutates anything. [`Session::apply`] then
//! records the decision. Keeping the two apart lets the manager run both under
//! one lock while the decision logic stays testable in isolation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{Catalog, CatalogEntry};
use super::state::BookingState;
use crate::clock::to_chrono;
use crate::validation::{ValidatedField, validate_email, validate_name, validate_phone};

const CANCEL_WORDS: &[&str] = &["cancel", "/cancel", "cancel_booking", "отмена", "отменить"];
const CONFIRM_WORDS: &[&str] = &["confirm", "yes", "booking_confirm", "подтвердить", "да"];
const SKIP_WORDS: &[&str] = &["skip", "skip_phone", "пропустить", "-"];

/// Whether the input asks to abandon the booking.
pub fn is_cancel(input: &str) -> bool {
    matches_any(input, CANCEL_WORDS)
}

fn is_confirm(input: &str) -> bool {
    matches_any(input, CONFIRM_WORDS)
}

fn is_skip(input: &str) -> bool {
    matches_any(input, SKIP_WORDS)
}

fn matches_any(input: &str, words: &[&str]) -> bool {
    let lower = input.trim().to_lowercase();
    words.contains(&lower.as_str())
}

/// A value collected during the dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectedField {
    Course(CatalogEntry),
    Slot(CatalogEntry),
    Contact(ValidatedField),
}

/// One user's open booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub state: BookingState,
    /// Collected values in the order they were given.
    fields: Vec<CollectedField>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// A fresh session waiting for a course.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            state: BookingState::SelectCourse,
            fields: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn fields(&self) -> &[CollectedField] {
        &self.fields
    }

    /// Idle for strictly longer than `timeout` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity_at > to_chrono(timeout)
    }

    pub fn course(&self) -> Option<&CatalogEntry> {
        self.fields.iter().find_map(|f| match f {
            CollectedField::Course(c) => Some(c),
            _ => None,
        })
    }

    pub fn slot(&self) -> Option<&CatalogEntry> {
        self.fields.iter().find_map(|f| match f {
            CollectedField::Slot(s) => Some(s),
            _ => None,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.contact(|f| matches!(f, ValidatedField::Name(_)))
    }

    pub fn email(&self) -> Option<&str> {
        self.contact(|f| matches!(f, ValidatedField::Email(_)))
    }

    pub fn phone(&self) -> Option<&str> {
        self.contact(|f| matches!(f, ValidatedField::Phone(_)))
    }

    fn contact(&self, pick: impl Fn(&ValidatedField) -> bool) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            CollectedField::Contact(v) if pick(v) => Some(v.as_str()),
            _ => None,
        })
    }

    /// Record a decision. Reprompts only refresh the activity timestamp.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
        self.last_activity_at = now;
        match transition {
            Transition::Advance { to, field } => {
                debug_assert!(self.state.can_transition_to(*to));
                if let Some(field) = field {
                    self.fields.push(field.clone());
                }
                self.state = *to;
            }
            Transition::Confirmed | Transition::Cancelled => self.state = BookingState::Idle,
            Transition::Reprompt { .. } => {}
        }
    }

    /// Build the final record. `None` if a required field is missing.
    pub fn to_record(&self, confirmed_at: DateTime<Utc>) -> Option<BookingRecord> {
        Some(BookingRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            course: self.course()?.clone(),
            slot: self.slot()?.clone(),
            name: self.name()?.to_string(),
            email: self.email()?.to_string(),
            phone: self.phone().map(str::to_string),
            created_at: self.created_at,
            confirmed_at,
        })
    }
}

/// A confirmed booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Uuid,
    pub user_id: String,
    pub course: CatalogEntry,
    pub slot: CatalogEntry,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
}

/// What one input does to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move to the next step, storing `field` if one was collected.
    Advance {
        to: BookingState,
        field: Option<CollectedField>,
    },
    /// Input rejected; ask the same step again.
    Reprompt { reason: String },
    /// The user confirmed the summary.
    Confirmed,
    /// The user abandoned the booking.
    Cancelled,
}

/// Decide what `input` does to `session`. Pure.
pub fn transition(session: &Session, input: &str, catalog: &Catalog) -> Transition {
    use BookingState::*;

    if is_cancel(input) {
        return Transition::Cancelled;
    }

    match session.state {
        Idle => Transition::Reprompt {
            reason: "There is no booking in progress.".to_string(),
        },
        SelectCourse => match catalog.find_course(input) {
            Some(course) => Transition::Advance {
                to: SelectTime,
                field: Some(CollectedField::Course(course.clone())),
            },
            None => Transition::Reprompt {
                reason: "Please choose one of the listed courses.".to_string(),
            },
        },
        SelectTime => match catalog.find_slot(input) {
            Some(slot) => Transition::Advance {
                to: EnterName,
                field: Some(CollectedField::Slot(slot.clone())),
            },
            None => Transition::Reprompt {
                reason: "Please choose one of the listed time slots.".to_string(),
            },
        },
        EnterName => validated(validate_name(input), EnterEmail),
        EnterEmail => validated(validate_email(input), EnterPhone),
        EnterPhone if is_skip(input) => Transition::Advance {
            to: Confirm,
            field: None,
        },
        EnterPhone => validated(validate_phone(input), Confirm),
        Confirm if is_confirm(input) => Transition::Confirmed,
        Confirm => Transition::Reprompt {
            reason: "Please reply \"confirm\" to book or \"cancel\" to cancel.".to_string(),
        },
    }
}

fn validated(
    result: Result<ValidatedField, crate::validation::Invalid>,
    to: BookingState,
) -> Transition {
    match result {
        Ok(field) => Transition::Advance {
            to,
            field: Some(CollectedField::Contact(field)),
        },
        Err(invalid) => Transition::Reprompt {
            reason: invalid.reason,
        },
    }
}
