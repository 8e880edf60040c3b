//! Wire-message byte buffers for Switchyard controller applications.
//!
//! Every message exchanged with the messenger is carried in a [`Buffer`]: a
//! single flat allocation holding the payload as an interior window, with
//! spare room on both sides. Protocol messages are typically built
//! inside-out (body first, headers pushed in front afterwards), so the
//! buffer makes prepend as cheap as append instead of forcing a copy per
//! header.
//!
//! Buffers are safe to hand between threads. Mutating operations hand back
//! guards that keep the buffer locked while the caller fills the reserved
//! window, so the window can never move underneath a writer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod buffer;

pub use buffer::{Buffer, PayloadGuard, UserData};
