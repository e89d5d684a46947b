//! Threads and scheduling, as far as turnstiles are concerned.

pub mod sched;
pub mod thread;
pub mod uniproc;
