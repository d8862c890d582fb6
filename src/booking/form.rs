use tracing::warn;

use crate::model::*;
use crate::time;

use super::{BookingError, BookingMutator, DeleteOutcome, MutationState};

type Hook = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Create { profile_ref: Option<String> },
    Edit { booking_id: BookingId },
}

/// Controller behind a create/edit dialog.
///
/// On success it fires `on_success` then `on_close`. On failure it keeps its
/// input, records a user-facing message and stays open for a retry.
pub struct BookingForm {
    mutator: BookingMutator,
    resource: String,
    span: Span,
    mode: FormMode,
    title: String,
    state: MutationState,
    on_success: Option<Hook>,
    on_close: Option<Hook>,
}

impl BookingForm {
    pub fn create(
        mutator: BookingMutator,
        resource: impl Into<String>,
        span: Span,
        profile_ref: Option<String>,
    ) -> Self {
        let mode = FormMode::Create { profile_ref };
        Self::with_mode(mutator, resource.into(), span, mode, String::new())
    }

    pub fn edit(
        mutator: BookingMutator,
        resource: impl Into<String>,
        booking_id: BookingId,
        span: Span,
        initial_title: impl Into<String>,
    ) -> Self {
        Self::with_mode(
            mutator,
            resource.into(),
            span,
            FormMode::Edit { booking_id },
            initial_title.into(),
        )
    }

    fn with_mode(
        mutator: BookingMutator,
        resource: String,
        span: Span,
        mode: FormMode,
        title: String,
    ) -> Self {
        Self {
            mutator,
            resource,
            span,
            mode,
            title,
            state: MutationState::Idle,
            on_success: None,
            on_close: None,
        }
    }

    pub fn on_success(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_close(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn state(&self) -> &MutationState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == MutationState::Submitting
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.error().map(BookingError::user_message)
    }

    pub fn formatted_range(&self) -> String {
        time::format_range(&self.span)
    }

    /// Create or save, depending on the mode. The session is read at submit
    /// time, not when the form opened.
    pub async fn submit(&mut self) -> Result<Booking, BookingError> {
        self.state = MutationState::Submitting;
        let viewer = self.mutator.current_viewer().await;
        let result = match &self.mode {
            FormMode::Create { profile_ref } => {
                self.mutator
                    .create(
                        &self.resource,
                        self.span,
                        &self.title,
                        viewer.as_ref(),
                        profile_ref.clone(),
                    )
                    .await
            }
            FormMode::Edit { booking_id } => {
                self.mutator
                    .update(
                        booking_id,
                        &self.resource,
                        self.span,
                        Some(&self.title),
                        viewer.as_ref(),
                    )
                    .await
            }
        };
        self.settle(&result);
        result
    }

    /// Delete the booking being edited. Create-mode forms have nothing to
    /// delete and report `Declined`.
    pub async fn delete(&mut self) -> Result<DeleteOutcome, BookingError> {
        let FormMode::Edit { booking_id } = &self.mode else {
            return Ok(DeleteOutcome::Declined);
        };
        let booking_id = booking_id.clone();
        let previous = std::mem::replace(&mut self.state, MutationState::Submitting);
        let viewer = self.mutator.current_viewer().await;
        let result = self.mutator.delete(&booking_id, &self.resource, viewer.as_ref()).await;
        match result {
            Ok(DeleteOutcome::Declined) => self.state = previous,
            _ => self.settle(&result),
        }
        result
    }

    fn settle<T>(&mut self, result: &Result<T, BookingError>) {
        self.state = MutationState::settle(result);
        match result {
            Ok(_) => {
                if let Some(hook) = self.on_success.as_mut() {
                    hook();
                }
                if let Some(hook) = self.on_close.as_mut() {
                    hook();
                }
            }
            Err(e) => warn!(resource = %self.resource, "booking form kept open: {e}"),
        }
    }
}

impl std::fmt::Debug for BookingForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingForm")
            .field("resource", &self.resource)
            .field("span", &self.span)
            .field("mode", &self.mode)
            .field("title", &self.title)
            .field("state", &self.state)
            .finish()
    }
}
