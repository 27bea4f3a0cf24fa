// Training module
// Data model, media classification, and the external store seams

pub mod media;
pub mod model;
pub mod store;

pub use media::{MediaKind, classify_media};
pub use model::{BeatStyle, Exercise, Training};
pub use store::{
    InMemoryStore, JsonFileStore, NullRecorder, SessionLog, SessionRecord, TrainingStore,
    UsageRecorder,
};
