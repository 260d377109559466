//! Order fulfillment workers.
//!
//! The pipeline runs in three stages connected by the event bus:
//! 1. [`OrderPlacement`] stores a PENDING order and emits `OrderPlaced`
//! 2. [`ReservationWorker`] checks and debits stock, then emits `OrderResult`
//! 3. [`NotificationDispatcher`] tells the user about the outcome
//!
//! Every worker runs as a [`consumer`] loop that stops when its
//! [`Shutdown`] signal fires.

pub mod consumer;
pub mod emitter;
pub mod error;
pub mod inventory;
pub mod notification;
pub mod placement;
pub mod shutdown;

pub use consumer::{Disposition, MessageHandler, run_consumer, spawn_consumer};
pub use emitter::{EventEmitter, PublishHandle};
pub use error::{FulfillmentError, Result};
pub use inventory::{Reservation, ReservationOutcome, ReservationWorker};
pub use notification::{LogNotifier, NotificationDispatcher, Notifier};
pub use placement::{OrderPlacement, PlacedOrder};
pub use shutdown::{Shutdown, ShutdownTrigger};
