//! Remote calendar providers.
//!
//! Google Calendar is the only provider today; the sync engine only sees
//! the [`crate::remote::RemoteCalendar`] trait, so adding another backend
//! means adding a module here and nothing else.

pub mod gcal;
