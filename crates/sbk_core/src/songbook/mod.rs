//! Songbook descriptors (`.sb` files).
//!
//! A descriptor is the parsed content of a songbook file: a string-keyed
//! mapping (book options, content list, template settings) together with the
//! path it was loaded from. The keys are opaque to the orchestrator and are
//! only passed through to step executors.

mod descriptor;

pub use descriptor::SongbookDescriptor;
