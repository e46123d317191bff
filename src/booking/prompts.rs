//! User-facing texts for each booking step.

use std::time::Duration;

use super::catalog::{Catalog, CatalogEntry};
use super::machine::{BookingRecord, Session};
use super::state::{BookingState, TOTAL_STEPS};
use crate::router::{ReplyOption, Response, ResponseKind};

pub const CANCEL_OPTION_ID: &str = "cancel_booking";
pub const CONFIRM_OPTION_ID: &str = "booking_confirm";
pub const SKIP_OPTION_ID: &str = "skip_phone";

fn cancel_option() -> ReplyOption {
    ReplyOption::new(CANCEL_OPTION_ID, "❌ Cancel")
}

fn entry_options(entries: &[CatalogEntry]) -> Vec<ReplyOption> {
    entries
        .iter()
        .map(|e| ReplyOption::new(&e.id, &e.title))
        .chain(std::iter::once(cancel_option()))
        .collect()
}

fn step_header(state: BookingState) -> String {
    state
        .step_number()
        .map(|n| format!("Step {n}/{TOTAL_STEPS}: "))
        .unwrap_or_default()
}

/// The question asked at `session.state`, with its options.
pub fn step_prompt(session: &Session, catalog: &Catalog) -> Response {
    let header = step_header(session.state);
    match session.state {
        BookingState::SelectCourse => Response::new(
            ResponseKind::BookingStep,
            format!("📝 Booking a free trial lesson\n\n{header}Choose a course:"),
        )
        .with_options(entry_options(catalog.courses())),
        BookingState::SelectTime => Response::new(
            ResponseKind::BookingStep,
            format!("{header}Choose a convenient time (Moscow time):"),
        )
        .with_options(entry_options(catalog.slots())),
        BookingState::EnterName => Response::new(
            ResponseKind::BookingStep,
            format!("{header}What's your name?"),
        )
        .with_options(vec![cancel_option()]),
        BookingState::EnterEmail => Response::new(
            ResponseKind::BookingStep,
            format!("{header}Your email address? We'll send the lesson details there."),
        )
        .with_options(vec![cancel_option()]),
        BookingState::EnterPhone => Response::new(
            ResponseKind::BookingStep,
            format!("{header}Your phone number (or type \"skip\" if you'd rather not say):"),
        )
        .with_options(vec![ReplyOption::new(SKIP_OPTION_ID, "⏭ Skip"), cancel_option()]),
        BookingState::Confirm => Response::new(
            ResponseKind::BookingStep,
            format!(
                "Please check your booking:\n\n{}\n\nReply \"confirm\" to book or \"cancel\" to cancel.",
                summary(session)
            ),
        )
        .with_options(vec![
            ReplyOption::new(CONFIRM_OPTION_ID, "✅ Confirm"),
            cancel_option(),
        ]),
        BookingState::Idle => no_session(),
    }
}

/// The same question again, prefixed by why the last answer was rejected.
pub fn reprompt(reason: &str, session: &Session, catalog: &Catalog) -> Response {
    let step = step_prompt(session, catalog);
    Response {
        text: format!("❌ {reason}\n\n{}", step.text),
        kind: ResponseKind::BookingRejected,
        options: step.options,
    }
}

/// Every collected field, one per line.
pub fn summary(session: &Session) -> String {
    let or_dash = |v: Option<&str>| v.unwrap_or("—").to_string();
    [
        format!("📚 Course: {}", or_dash(session.course().map(|c| c.title.as_str()))),
        format!("🕐 Time: {}", or_dash(session.slot().map(|s| s.title.as_str()))),
        format!("👤 Name: {}", or_dash(session.name())),
        format!("📧 Email: {}", or_dash(session.email())),
        format!("📱 Phone: {}", session.phone().unwrap_or("not provided")),
    ]
    .join("\n")
}

pub fn confirmed(record: &BookingRecord) -> Response {
    Response::new(
        ResponseKind::BookingConfirmed,
        format!(
            "✅ You're booked!\n\n📚 {}\n🕐 {}\n\n\
             We'll email {} within 24 hours to confirm your trial lesson.\n\
             Booking reference: {}",
            record.course.title,
            record.slot.title,
            record.email,
            short_id(record)
        ),
    )
}

pub fn cancelled() -> Response {
    Response::new(
        ResponseKind::BookingCancelled,
        "Booking cancelled. Type /book to start again, or just ask me a question.",
    )
}

pub fn expired(timeout: Duration) -> Response {
    let minutes = (timeout.as_secs() / 60).max(1);
    Response::new(
        ResponseKind::BookingExpired,
        format!(
            "⏰ Your booking was cancelled after {minutes} minutes of inactivity. \
             Type /book to start again."
        ),
    )
}

pub fn no_session() -> Response {
    Response::new(
        ResponseKind::Info,
        "You don't have a booking in progress. Type /book to start one.",
    )
}

fn short_id(record: &BookingRecord) -> String {
    record.id.simple().to_string()[..8].to_uppercase()
}
