use super::string_enum;

string_enum! {
    /// Lifecycle of a trapping request
    RequestStatus("request status") {
        New => "new",
        NeedsReview => "needs_review",
        Active => "active",
        Scheduled => "scheduled",
        InProgress => "in_progress",
        Paused => "paused",
        Resolved => "resolved",
        Closed => "closed",
    }
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Resolved | RequestStatus::Closed)
    }
}

string_enum! {
    ArchiveReason("archive reason") {
        Duplicate => "duplicate",
        Denied => "denied",
        ReferredElsewhere => "referred_elsewhere",
    }
}

impl ArchiveReason {
    /// Status a request lands in when archived for this reason
    pub fn closing_status(&self) -> RequestStatus {
        match self {
            ArchiveReason::Duplicate | ArchiveReason::Denied => RequestStatus::Closed,
            ArchiveReason::ReferredElsewhere => RequestStatus::Resolved,
        }
    }
}

string_enum! {
    IntakeStatus("intake status") {
        New => "new",
        InReview => "in_review",
        Contacted => "contacted",
        Converted => "converted",
        Declined => "declined",
        Spam => "spam",
    }
}

impl IntakeStatus {
    /// Statuses that still need staff attention
    pub const OPEN: &'static [IntakeStatus] = &[IntakeStatus::New, IntakeStatus::InReview, IntakeStatus::Contacted];
}

string_enum! {
    /// Entities whose edits are audited
    EntityType("entity type") {
        Person => "person",
        Cat => "cat",
        Place => "place",
        Request => "request",
        IntakeSubmission => "intake_submission",
        Staff => "staff",
    }
}

string_enum! {
    StaffRole("staff role") {
        Admin => "admin",
        Staff => "staff",
        Volunteer => "volunteer",
    }
}

impl StaffRole {
    fn rank(&self) -> u8 {
        match self {
            StaffRole::Volunteer => 0,
            StaffRole::Staff => 1,
            StaffRole::Admin => 2,
        }
    }

    pub fn at_least(&self, minimum: StaffRole) -> bool {
        self.rank() >= minimum.rank()
    }
}

string_enum! {
    AlteredStatus("altered status") {
        Altered => "altered",
        Intact => "intact",
        Unknown => "unknown",
    }
}

string_enum! {
    CatSex("cat sex") {
        Male => "male",
        Female => "female",
        Unknown => "unknown",
    }
}

string_enum! {
    /// Where a colony head-count came from
    ObservationSource("observation source") {
        VerifiedCats => "verified_cats",
        PostClinicSurvey => "post_clinic_survey",
        TrapperSiteVisit => "trapper_site_visit",
        ManualObservation => "manual_observation",
        TrappingRequest => "trapping_request",
        IntakeForm => "intake_form",
        AppointmentRequest => "appointment_request",
        AiParsed => "ai_parsed",
    }
}

impl ObservationSource {
    pub fn confidence(&self) -> f64 {
        match self {
            ObservationSource::VerifiedCats => 1.0,
            ObservationSource::PostClinicSurvey => 0.85,
            ObservationSource::TrapperSiteVisit => 0.80,
            ObservationSource::ManualObservation => 0.75,
            ObservationSource::TrappingRequest => 0.60,
            ObservationSource::IntakeForm => 0.55,
            ObservationSource::AppointmentRequest => 0.50,
            ObservationSource::AiParsed => 0.40,
        }
    }
}

string_enum! {
    EmailBatchStatus("email batch status") {
        Draft => "draft",
        Sending => "sending",
        Sent => "sent",
        Partial => "partial",
        Failed => "failed",
    }
}

impl EmailBatchStatus {
    pub fn can_send(&self) -> bool {
        matches!(self, EmailBatchStatus::Draft | EmailBatchStatus::Partial)
    }
}

string_enum! {
    RecipientStatus("recipient status") {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

string_enum! {
    MatchStatus("match status") {
        Open => "open",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

string_enum! {
    PipelineRunStatus("pipeline run status") {
        Running => "running",
        Ok => "ok",
        Skipped => "skipped",
        Error => "error",
    }
}

string_enum! {
    NoteKind("note kind") {
        CaseInfo => "case_info",
        Internal => "internal",
        Staff => "staff",
    }
}

/// Request priority on a 1..=5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestPriority(i32);

impl RequestPriority {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 5;

    pub fn new(value: i32) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn label(&self) -> &'static str {
        match self.0 {
            1 => "low",
            2 => "medium",
            3 => "high",
            4 => "urgent",
            _ => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_values() {
        assert_eq!("needs_review".parse::<RequestStatus>().unwrap(), RequestStatus::NeedsReview);
        assert_eq!(" in_progress ".parse::<RequestStatus>().unwrap(), RequestStatus::InProgress);
        assert_eq!(EntityType::IntakeSubmission.as_str(), "intake_submission");
    }

    #[test]
    fn unknown_value_lists_allowed() {
        let err = "archived".parse::<RequestStatus>().unwrap_err();
        assert_eq!(err.kind, "request status");
        let msg = err.to_string();
        assert!(msg.contains("'archived'"));
        assert!(msg.contains("needs_review"));
    }

    #[test]
    fn serde_uses_snake_case() {
        let v = serde_json::to_value(ObservationSource::PostClinicSurvey).unwrap();
        assert_eq!(v, serde_json::json!("post_clinic_survey"));
        let s: IntakeStatus = serde_json::from_value(serde_json::json!("in_review")).unwrap();
        assert_eq!(s, IntakeStatus::InReview);
    }

    #[test]
    fn role_ordering() {
        assert!(StaffRole::Admin.at_least(StaffRole::Staff));
        assert!(StaffRole::Staff.at_least(StaffRole::Staff));
        assert!(!StaffRole::Volunteer.at_least(StaffRole::Staff));
    }

    #[test]
    fn priority_bounds() {
        assert!(RequestPriority::new(0).is_none());
        assert!(RequestPriority::new(6).is_none());
        assert_eq!(RequestPriority::new(4).unwrap().label(), "urgent");
    }

    #[test]
    fn archive_reason_closing_status() {
        assert_eq!(ArchiveReason::Denied.closing_status(), RequestStatus::Closed);
        assert_eq!(ArchiveReason::ReferredElsewhere.closing_status(), RequestStatus::Resolved);
    }

    #[test]
    fn source_confidence_is_ordered() {
        assert!(ObservationSource::VerifiedCats.confidence() > ObservationSource::TrapperSiteVisit.confidence());
        assert!(ObservationSource::IntakeForm.confidence() > ObservationSource::AiParsed.confidence());
    }
}
