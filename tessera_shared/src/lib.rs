mod indexing_container;

pub use indexing_container::*;

pub use ahash;
pub use bitflags;
pub use byteorder;
pub use chrono;
pub use crossbeam_channel;
pub use derive_where;
pub use log;
pub use parking_lot;
pub use spin_sleep;
pub use thiserror;
pub use walkdir;

