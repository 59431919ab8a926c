pub mod audit;
pub mod cats;
pub mod colony;
pub mod doctor;
pub mod email;
pub mod ingest;
pub mod intake;
pub mod map;
pub mod matching;
pub mod merge;
pub mod patch;
pub mod people;
pub mod pipeline;
pub mod places;
pub mod requests;
pub mod staff;
