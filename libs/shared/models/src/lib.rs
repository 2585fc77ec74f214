pub mod appointment;
pub mod error;
pub mod schedule;

pub use appointment::{Appointment, AppointmentStatus, AuditAction, AuditEntry};
pub use error::AppError;
pub use schedule::{
    Branch, DentistAssignment, DentistSlot, OperatingDays, Slot, SlotInterval, SlotKey, SLOT_DURATION_MINUTES,
};
