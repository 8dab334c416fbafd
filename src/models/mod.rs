pub mod event;
pub mod person;
pub mod run;
pub mod session;

pub use event::{
    property_str, ExtractedTables, FirebaseEvent, FirebaseUser, Properties, RawEvent,
    RawSession, Row, SourceTable,
};
pub use person::AggregatedPerson;
pub use run::{
    ExtractionWindow, PipelineResult, PipelineStage, RunMode, RunOptions, RunStatus,
    WatermarkField,
};
pub use session::AggregatedSession;
