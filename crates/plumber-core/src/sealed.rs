//! Sealing marker for traits that the crate exposes as extension points for
//! *its own* implementations (transport modules, servlets) but that external
//! crates must not implement directly without going through the constructors
//! this crate provides. Grounded on the teacher's `kernel::sealed::Sealed`.

pub trait Sealed {}
