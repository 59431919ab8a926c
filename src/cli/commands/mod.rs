pub mod doctor;
pub mod ingest;
pub mod matching;
pub mod pipeline;
pub mod staff;
