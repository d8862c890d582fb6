//! Client-side booking core: local store, change-feed reconciliation, guarded
//! mutations and the calendar view-model that drives them.

mod calendar;
mod error;
pub mod feed;
mod form;
mod mutator;
mod store;

pub use calendar::{
    project_events, CalendarEvent, CalendarViewModel, EditingTarget, ModalState, SelectedRange,
};
pub use error::BookingError;
pub use feed::FeedSubscription;
pub use form::{BookingForm, FormMode};
pub use mutator::{BookingMutator, DeleteOutcome, MutationState, DELETE_PROMPT};
pub use store::{BookingStore, LoadTicket};
