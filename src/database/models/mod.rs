pub mod audit;
pub mod cat;
pub mod colony;
pub mod email;
pub mod intake;
pub mod matching;
pub mod person;
pub mod pipeline;
pub mod place;
pub mod request;
pub mod staff;

pub use audit::EntityEdit;
pub use cat::Cat;
pub use colony::ColonyObservation;
pub use email::{BatchRecipient, EmailBatch, EmailTemplate};
pub use intake::IntakeSubmission;
pub use matching::MatchCandidateRow;
pub use person::Person;
pub use pipeline::PipelineRun;
pub use place::Place;
pub use request::{Request, RequestNote, RequestParty};
pub use staff::{Staff, StaffSession};
