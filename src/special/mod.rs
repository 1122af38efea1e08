//! Instrument specific switchers. Each one changes a single step of the
//! generic mapping algorithm: motion ordering, read matching, status
//! interpretation, coupling to a dependent device or guarding by a lock.

pub mod attenuator;
pub mod collimation;
pub mod flipper;
pub mod locked;
pub mod selector;
pub mod voltage;
