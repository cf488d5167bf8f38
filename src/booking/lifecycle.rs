//! Booking state machine
//!
//! Every status change goes through a [`Transition`]. The table below is the
//! only place that decides which statuses a transition may start from; the
//! storage layer re-checks the same set atomically when it applies the change.

use crate::booking::BookingStatus;
use crate::error::ApiError;
use crate::store::{BookingChange, PartnerEffect};

/// Events that move a booking between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offer accepted, manual assignment or OTP verified before dispatch
    Confirm,
    StartTravel,
    MarkArrived,
    /// OTP verified at the customer's location
    StartService,
    /// Payment split reached the booking total
    Complete,
    Cancel,
    /// Offer window elapsed without an acceptance
    Expire,
    FailPayment,
}

const NON_TERMINAL: &[BookingStatus] = &[
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::Enroute,
    BookingStatus::Arrived,
    BookingStatus::InProgress,
];

/// Statuses in which the assigned partner may report a live location
pub const TRACKABLE: &[BookingStatus] = &[
    BookingStatus::Confirmed,
    BookingStatus::Enroute,
    BookingStatus::Arrived,
    BookingStatus::InProgress,
];

impl Transition {
    /// Statuses from which this transition is legal
    pub fn allowed_from(&self) -> &'static [BookingStatus] {
        match self {
            Transition::Confirm | Transition::Expire | Transition::FailPayment => {
                &[BookingStatus::Pending]
            }
            Transition::StartTravel => &[BookingStatus::Confirmed],
            Transition::MarkArrived => &[BookingStatus::Enroute],
            Transition::StartService => &[BookingStatus::Arrived],
            Transition::Complete => &[BookingStatus::InProgress],
            Transition::Cancel => NON_TERMINAL,
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Confirm => BookingStatus::Confirmed,
            Transition::StartTravel => BookingStatus::Enroute,
            Transition::MarkArrived => BookingStatus::Arrived,
            Transition::StartService => BookingStatus::InProgress,
            Transition::Complete => BookingStatus::Completed,
            Transition::Cancel => BookingStatus::Cancelled,
            Transition::Expire => BookingStatus::Expired,
            Transition::FailPayment => BookingStatus::Failed,
        }
    }

    /// Verb used in error messages
    pub fn action(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::StartTravel => "start travel",
            Transition::MarkArrived => "mark arrived",
            Transition::StartService => "start service",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
            Transition::FailPayment => "mark payment failed",
        }
    }

    pub fn is_allowed_from(&self, status: BookingStatus) -> bool {
        self.allowed_from().contains(&status)
    }

    /// Check the transition against the current status
    pub fn check(&self, current: BookingStatus) -> Result<BookingStatus, ApiError> {
        if self.is_allowed_from(current) {
            Ok(self.target())
        } else {
            Err(self.rejected(current))
        }
    }

    pub fn rejected(&self, current: BookingStatus) -> ApiError {
        ApiError::InvalidTransition {
            from: current,
            action: self.action(),
        }
    }

    /// Whether entering the target status frees the assigned partner
    pub fn releases_partner(&self) -> bool {
        matches!(self, Transition::Complete | Transition::Cancel)
    }

    /// Conditional store update for this transition
    pub fn change(&self) -> BookingChange {
        let change = BookingChange::to_status(self.allowed_from(), self.target());
        if self.releases_partner() {
            change.with_partner(PartnerEffect::Release)
        } else {
            change
        }
    }
}

/// Customer-facing text sent with `bookingStatusUpdate`
pub fn status_message(status: BookingStatus) -> String {
    match status {
        BookingStatus::Confirmed => "Your booking has been confirmed".to_string(),
        BookingStatus::Enroute => "Partner is on the way!".to_string(),
        BookingStatus::Arrived => "Partner has arrived".to_string(),
        BookingStatus::InProgress => "Service has started".to_string(),
        BookingStatus::Completed => "Service completed. Thank you!".to_string(),
        BookingStatus::Expired => "No partner accepted the booking in time".to_string(),
        other => format!("{} now", other.as_str().replace('-', " ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 9] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Enroute,
        BookingStatus::Arrived,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Expired,
        BookingStatus::Failed,
    ];

    #[test]
    fn test_happy_path_sequence() {
        let mut status = BookingStatus::Pending;
        for t in [
            Transition::Confirm,
            Transition::StartTravel,
            Transition::MarkArrived,
            Transition::StartService,
            Transition::Complete,
        ] {
            status = t.check(status).unwrap();
        }
        assert_eq!(status, BookingStatus::Completed);
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        let err = Transition::MarkArrived
            .check(BookingStatus::Pending)
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::InvalidTransition {
                from: BookingStatus::Pending,
                ..
            }
        ));
        assert!(Transition::StartService.check(BookingStatus::Enroute).is_err());
        assert!(Transition::Complete.check(BookingStatus::Arrived).is_err());
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let transitions = [
            Transition::Confirm,
            Transition::StartTravel,
            Transition::MarkArrived,
            Transition::StartService,
            Transition::Complete,
            Transition::Cancel,
            Transition::Expire,
            Transition::FailPayment,
        ];
        for status in ALL.iter().filter(|s| s.is_terminal()) {
            for t in transitions {
                assert!(t.check(*status).is_err(), "{:?} from {}", t, status);
            }
        }
    }

    #[test]
    fn test_cancel_allowed_from_every_open_status() {
        for status in ALL.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                Transition::Cancel.check(*status).unwrap(),
                BookingStatus::Cancelled
            );
        }
    }

    #[test]
    fn test_expire_only_from_pending() {
        assert!(Transition::Expire.check(BookingStatus::Pending).is_ok());
        assert!(Transition::Expire.check(BookingStatus::Confirmed).is_err());
    }

    #[test]
    fn test_only_job_ending_changes_free_the_partner() {
        let complete = Transition::Complete.change();
        assert_eq!(complete.partner, PartnerEffect::Release);
        assert_eq!(complete.expected, &[BookingStatus::InProgress]);
        assert_eq!(complete.status, Some(BookingStatus::Completed));

        assert_eq!(Transition::Cancel.change().partner, PartnerEffect::Release);
        for t in [
            Transition::Confirm,
            Transition::StartTravel,
            Transition::Expire,
            Transition::FailPayment,
        ] {
            assert_eq!(t.change().partner, PartnerEffect::None);
        }
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(BookingStatus::Enroute), "Partner is on the way!");
        assert_eq!(status_message(BookingStatus::Cancelled), "cancelled now");
    }
}
