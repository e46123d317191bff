//! Booking state machine states.

use serde::{Deserialize, Serialize};

/// Number of data-collection steps shown to the user ("Step n/5").
pub const TOTAL_STEPS: u8 = 5;

/// The steps of the booking dialogue.
///
/// Progresses linearly: Idle → SelectCourse → SelectTime → EnterName →
/// EnterEmail → EnterPhone → Confirm. `Idle` means no session exists; any
/// state may drop back to it on cancel or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    #[default]
    Idle,
    SelectCourse,
    SelectTime,
    EnterName,
    EnterEmail,
    EnterPhone,
    Confirm,
}

impl BookingState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: BookingState) -> bool {
        use BookingState::*;
        match (self, target) {
            (Idle, _) => target == SelectCourse,
            (_, Idle) => true,
            _ => self.next() == Some(target),
        }
    }

    /// Next step in the linear progression. `Confirm` ends the dialogue.
    pub fn next(&self) -> Option<BookingState> {
        use BookingState::*;
        match self {
            Idle => Some(SelectCourse),
            SelectCourse => Some(SelectTime),
            SelectTime => Some(EnterName),
            EnterName => Some(EnterEmail),
            EnterEmail => Some(EnterPhone),
            EnterPhone => Some(Confirm),
            Confirm => None,
        }
    }

    /// Whether a session is open in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// 1-based step number for data-collection states.
    pub fn step_number(&self) -> Option<u8> {
        use BookingState::*;
        match self {
            SelectCourse => Some(1),
            SelectTime => Some(2),
            EnterName => Some(3),
            EnterEmail => Some(4),
            EnterPhone => Some(5),
            Idle | Confirm => None,
        }
    }
}

impl std::fmt::Display for BookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SelectCourse => "select_course",
            Self::SelectTime => "select_time",
            Self::EnterName => "enter_name",
            Self::EnterEmail => "enter_email",
            Self::EnterPhone => "enter_phone",
            Self::Confirm => "confirm",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingState; 7] = [
        BookingState::Idle,
        BookingState::SelectCourse,
        BookingState::SelectTime,
        BookingState::EnterName,
        BookingState::EnterEmail,
        BookingState::EnterPhone,
        BookingState::Confirm,
    ];

    #[test]
    fn valid_transitions() {
        use BookingState::*;
        let transitions = [
            (Idle, SelectCourse),
            (SelectCourse, SelectTime),
            (SelectTime, EnterName),
            (EnterName, EnterEmail),
            (EnterEmail, EnterPhone),
            (EnterPhone, Confirm),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn every_active_state_can_drop_to_idle() {
        for state in ALL.into_iter().filter(BookingState::is_active) {
            assert!(state.can_transition_to(BookingState::Idle));
        }
    }

    #[test]
    fn invalid_transitions() {
        use BookingState::*;
        // Skip steps
        assert!(!SelectCourse.can_transition_to(EnterName));
        assert!(!Idle.can_transition_to(Confirm));
        // Go backward
        assert!(!EnterEmail.can_transition_to(EnterName));
        // Self-transition
        assert!(!EnterName.can_transition_to(EnterName));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn step_numbers_cover_one_to_five() {
        let steps: Vec<u8> = ALL.iter().filter_map(BookingState::step_number).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
        assert_eq!(steps.len(), TOTAL_STEPS as usize);
    }

    #[test]
    fn display_matches_serde() {
        for state in ALL {
            let display = format!("{state}");
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(format!("\"{display}\""), json, "Display and serde should match for {state:?}");
        }
    }
}
