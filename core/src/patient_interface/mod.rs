pub mod record;
pub mod reshaper;

pub use record::{EventKind, MedicalEvent, RawRecord};
pub use reshaper::BasicReshaper;
