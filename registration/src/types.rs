//! Domain types for symposium registration.
//!
//! Value objects (plans, categories, participant codes, ID-card numbers) and the
//! three persisted entities: [`Participant`], [`AttendanceRecord`] and
//! [`KitRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Internal key of a registration, assigned at submission.
    ///
    /// Distinct from the human-facing [`ParticipantCode`], which only exists
    /// once payment is verified.
    ParticipantKey
}

uuid_id! {
    /// Identifier of a symposium event
    EventId
}

uuid_id! {
    /// Identifier of a workshop
    WorkshopId
}

uuid_id! {
    /// Identifier of an attendance record
    AttendanceId
}

uuid_id! {
    /// Identifier of a queued notification
    OutboxId
}

/// Staff member performing an action (admin verifying payments, volunteer at
/// a check-in desk).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(String);

impl StaffId {
    /// Creates a staff identity
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Registration plan
// ============================================================================

/// A plan string that is not one of `general`, `workshop`, `both`.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("invalid registration plan: {0:?}")]
pub struct InvalidPlan(pub String);

/// The paid registration plan; decides which categories and kit days a
/// participant may access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPlan {
    /// Events only
    General,
    /// Workshop only
    Workshop,
    /// General and workshop
    Both,
}

impl RegistrationPlan {
    /// Every plan
    pub const ALL: [Self; 3] = [Self::General, Self::Workshop, Self::Both];

    /// Wire name of the plan
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Workshop => "workshop",
            Self::Both => "both",
        }
    }

    /// Participant code prefix for this plan
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Both => "SHGN",
            Self::General => "SHEN",
            Self::Workshop => "SHWK",
        }
    }

    /// Plan encoded by a participant code prefix
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|plan| plan.prefix() == prefix)
    }
}

impl fmt::Display for RegistrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationPlan {
    type Err = InvalidPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|plan| plan.as_str() == s)
            .ok_or_else(|| InvalidPlan(s.to_string()))
    }
}

/// Payment state of a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Submitted, waiting for an admin
    Pending,
    /// Payment confirmed
    Verified,
    /// Payment refused
    Rejected,
}

impl PaymentStatus {
    /// Wire name of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

// ============================================================================
// Participant code and ID-card number
// ============================================================================

/// A string that is not a well-formed participant code or ID-card number.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("malformed {kind}: {value:?}")]
pub struct MalformedIdentifier {
    /// What was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

/// Human-facing participant ID: plan prefix plus a three-digit sequence,
/// e.g. `SHWK007`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantCode(String);

impl ParticipantCode {
    /// Largest sequence a code can carry
    pub const MAX_SEQUENCE: u16 = 999;

    /// Compose a code; `None` when `sequence` is outside `1..=999`.
    #[must_use]
    pub fn new(plan: RegistrationPlan, sequence: u16) -> Option<Self> {
        (1..=Self::MAX_SEQUENCE)
            .contains(&sequence)
            .then(|| Self(format!("{}{sequence:03}", plan.prefix())))
    }

    /// Plan encoded by the prefix
    #[must_use]
    pub fn plan(&self) -> RegistrationPlan {
        // Construction guarantees a known prefix.
        RegistrationPlan::from_prefix(&self.0[..4]).unwrap_or(RegistrationPlan::General)
    }

    /// Numeric suffix
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.0[4..].parse().unwrap_or_default()
    }

    /// The code as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ParticipantCode {
    type Err = MalformedIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedIdentifier {
            kind: "participant code",
            value: s.to_string(),
        };
        if s.len() != 7 || !s.is_ascii() {
            return Err(malformed());
        }
        let (prefix, digits) = s.split_at(4);
        if RegistrationPlan::from_prefix(prefix).is_none()
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ParticipantCode {
    type Error = MalformedIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParticipantCode> for String {
    fn from(code: ParticipantCode) -> Self {
        code.0
    }
}

impl fmt::Display for ParticipantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number printed on a kit's ID card, `SHACKLES-2025-0042`.
///
/// Drawn from one counter shared by both kit days and all participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdCardNumber(u16);

impl IdCardNumber {
    const PREFIX: &'static str = "SHACKLES-2025-";

    /// Largest sequence a card number can carry
    pub const MAX_SEQUENCE: u16 = 9999;

    /// Card number for a sequence; `None` outside `1..=9999`.
    #[must_use]
    pub fn new(sequence: u16) -> Option<Self> {
        (1..=Self::MAX_SEQUENCE).contains(&sequence).then_some(Self(sequence))
    }

    /// Numeric suffix
    #[must_use]
    pub const fn sequence(self) -> u16 {
        self.0
    }
}

impl fmt::Display for IdCardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04}", Self::PREFIX, self.0)
    }
}

impl FromStr for IdCardNumber {
    type Err = MalformedIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .filter(|digits| digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .and_then(Self::new)
            .ok_or_else(|| MalformedIdentifier {
                kind: "ID-card number",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for IdCardNumber {
    type Error = MalformedIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdCardNumber> for String {
    fn from(number: IdCardNumber) -> Self {
        number.to_string()
    }
}

// ============================================================================
// Targets and kit days
// ============================================================================

/// Category of an event or workshop, as seen by the access policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetCategory {
    /// Technical event
    Technical,
    /// Non-technical event
    NonTechnical,
    /// Special event
    Special,
    /// Workshop
    Workshop,
}

impl TargetCategory {
    /// Every category
    pub const ALL: [Self; 4] = [
        Self::Technical,
        Self::NonTechnical,
        Self::Special,
        Self::Workshop,
    ];

    /// Wire name of the category
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::NonTechnical => "non-technical",
            Self::Special => "special",
            Self::Workshop => "workshop",
        }
    }
}

impl fmt::Display for TargetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a (non-workshop) event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    /// Technical event
    Technical,
    /// Non-technical event
    NonTechnical,
    /// Special event
    Special,
}

impl From<EventCategory> for TargetCategory {
    fn from(category: EventCategory) -> Self {
        match category {
            EventCategory::Technical => Self::Technical,
            EventCategory::NonTechnical => Self::NonTechnical,
            EventCategory::Special => Self::Special,
        }
    }
}

/// What a participant is being checked into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckInTarget {
    /// An event
    Event {
        /// Event ID
        id: EventId,
        /// Event category
        category: EventCategory,
    },
    /// A workshop
    Workshop {
        /// Workshop ID
        id: WorkshopId,
    },
}

impl CheckInTarget {
    /// Category evaluated by the access policy
    #[must_use]
    pub fn category(&self) -> TargetCategory {
        match self {
            Self::Event { category, .. } => (*category).into(),
            Self::Workshop { .. } => TargetCategory::Workshop,
        }
    }

    /// Stable key identifying the target in storage, `event:<uuid>` or
    /// `workshop:<uuid>`.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Event { id, .. } => format!("event:{id}"),
            Self::Workshop { id } => format!("workshop:{id}"),
        }
    }
}

/// One of the two kit-issuance occasions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KitDay {
    /// Workshop day
    Workshop,
    /// Events day
    Events,
}

impl KitDay {
    /// Both kit days
    pub const ALL: [Self; 2] = [Self::Workshop, Self::Events];

    /// Wire name of the kit day
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workshop => "workshop",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for KitDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KitDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workshop" => Ok(Self::Workshop),
            "events" => Ok(Self::Events),
            other => Err(format!("unknown kit day: {other}")),
        }
    }
}

// ============================================================================
// Participant
// ============================================================================

/// Public location of a participant's QR image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrImage {
    /// Public URL
    pub url: String,
    /// Storage key the image was uploaded under
    pub key: String,
}

/// Who verified a payment and when
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// When the payment was verified
    pub verified_at: DateTime<Utc>,
    /// Admin who verified it
    pub verified_by: StaffId,
    /// Optional admin notes
    pub notes: Option<String>,
}

/// Who rejected a payment, when and why
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Reason shown to the participant
    pub reason: String,
    /// When the payment was rejected
    pub rejected_at: DateTime<Utc>,
    /// Admin who rejected it
    pub rejected_by: StaffId,
}

/// A registered person.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Internal key
    pub key: ParticipantKey,
    /// Participant ID, set once payment is verified and an ID was allocated
    pub code: Option<ParticipantCode>,
    /// Full name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Paid plan
    pub plan: RegistrationPlan,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// Externally made payment the participant reported
    pub payment_reference: String,
    /// Set when verified
    pub verification: Option<Verification>,
    /// Set when rejected
    pub rejection: Option<Rejection>,
    /// Current QR capability token
    pub qr_token: Option<String>,
    /// Current QR version; 0 until the first QR is issued
    pub qr_token_version: u32,
    /// Uploaded QR image, if the upload succeeded
    pub qr_image: Option<QrImage>,
    /// Submission time
    pub registered_at: DateTime<Utc>,
}

impl Participant {
    /// A freshly submitted, pending registration
    #[must_use]
    pub fn pending(
        name: String,
        email: String,
        plan: RegistrationPlan,
        payment_reference: String,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: ParticipantKey::new(),
            code: None,
            name,
            email,
            plan,
            payment_status: PaymentStatus::Pending,
            payment_reference,
            verification: None,
            rejection: None,
            qr_token: None,
            qr_token_version: 0,
            qr_image: None,
            registered_at,
        }
    }

    /// Payment verified
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.payment_status == PaymentStatus::Verified
    }

    /// Verified, but ID allocation never completed
    #[must_use]
    pub fn awaiting_identity(&self) -> bool {
        self.is_verified() && self.code.is_none()
    }
}

// ============================================================================
// Attendance
// ============================================================================

/// One check-in of a participant at a target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Record ID
    pub id: AttendanceId,
    /// Who checked in
    pub participant: ParticipantKey,
    /// Where
    pub target: CheckInTarget,
    /// When
    pub check_in_time: DateTime<Utc>,
    /// `None` while the participant is inside
    pub check_out_time: Option<DateTime<Utc>>,
    /// Staff member at the desk
    pub checked_in_by: StaffId,
}

impl AttendanceRecord {
    /// Still checked in
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.check_out_time.is_none()
    }
}

// ============================================================================
// Kits
// ============================================================================

/// One line of a kit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitItem {
    /// Item name
    pub item: String,
    /// How many
    pub quantity: u32,
}

/// A kit handed out on one kit day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedKit {
    /// When
    pub issued_at: DateTime<Utc>,
    /// Staff member who handed it out
    pub issued_by: StaffId,
    /// Contents
    pub contents: Vec<KitItem>,
    /// Number of the enclosed ID card
    pub id_card_number: IdCardNumber,
    /// Desk the kit was collected from
    pub collection_point: String,
}

/// Kit state of a participant, one record per participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitRecord {
    /// Owner
    pub participant: ParticipantKey,
    /// Created on the first issuance attempt
    pub created_at: DateTime<Utc>,
    /// Workshop-day kit, once issued
    pub workshop_day: Option<IssuedKit>,
    /// Events-day kit, once issued
    pub events_day: Option<IssuedKit>,
}

impl KitRecord {
    /// An empty record
    #[must_use]
    pub const fn new(participant: ParticipantKey, created_at: DateTime<Utc>) -> Self {
        Self {
            participant,
            created_at,
            workshop_day: None,
            events_day: None,
        }
    }

    /// Kit issued on `day`, if any
    #[must_use]
    pub const fn issued(&self, day: KitDay) -> Option<&IssuedKit> {
        match day {
            KitDay::Workshop => self.workshop_day.as_ref(),
            KitDay::Events => self.events_day.as_ref(),
        }
    }

    /// Whether the kit for `day` has been issued
    #[must_use]
    pub const fn is_issued(&self, day: KitDay) -> bool {
        self.issued(day).is_some()
    }

    /// Mutable slot for `day`
    pub const fn slot_mut(&mut self, day: KitDay) -> &mut Option<IssuedKit> {
        match day {
            KitDay::Workshop => &mut self.workshop_day,
            KitDay::Events => &mut self.events_day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prefixes_round_trip() {
        for plan in RegistrationPlan::ALL {
            assert_eq!(RegistrationPlan::from_prefix(plan.prefix()), Some(plan));
            assert_eq!(plan.as_str().parse::<RegistrationPlan>(), Ok(plan));
        }
        assert_eq!(
            "premium".parse::<RegistrationPlan>(),
            Err(InvalidPlan("premium".to_string()))
        );
    }

    #[test]
    fn participant_code_is_zero_padded() {
        let code = ParticipantCode::new(RegistrationPlan::Workshop, 7);
        assert_eq!(code.as_ref().map(ParticipantCode::as_str), Some("SHWK007"));
        assert_eq!(code.as_ref().map(ParticipantCode::plan), Some(RegistrationPlan::Workshop));
        assert_eq!(code.map(|c| c.sequence()), Some(7));
    }

    #[test]
    fn participant_code_rejects_out_of_range_sequences() {
        assert!(ParticipantCode::new(RegistrationPlan::Both, 0).is_none());
        assert!(ParticipantCode::new(RegistrationPlan::Both, 1000).is_none());
    }

    #[test]
    fn participant_code_parsing() {
        assert!("SHGN001".parse::<ParticipantCode>().is_ok());
        assert!("SHEN999".parse::<ParticipantCode>().is_ok());
        for bad in ["SHXX001", "SHGN01", "SHGN0001", "shgn001", "SHGN00a", ""] {
            assert!(bad.parse::<ParticipantCode>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn id_card_number_format() {
        let number = IdCardNumber::new(42);
        assert_eq!(number.map(|n| n.to_string()), Some("SHACKLES-2025-0042".to_string()));
        assert_eq!("SHACKLES-2025-0042".parse::<IdCardNumber>().ok(), number);
        assert!("SHACKLES-2025-042".parse::<IdCardNumber>().is_err());
        assert!("SHACKLES-2024-0042".parse::<IdCardNumber>().is_err());
        assert!(IdCardNumber::new(10_000).is_none());
    }

    #[test]
    fn target_keys_are_tagged_by_kind() {
        let id = EventId::new();
        let target = CheckInTarget::Event {
            id,
            category: EventCategory::NonTechnical,
        };
        assert_eq!(target.key(), format!("event:{id}"));
        assert_eq!(target.category(), TargetCategory::NonTechnical);

        let workshop = CheckInTarget::Workshop { id: WorkshopId::new() };
        assert_eq!(workshop.category(), TargetCategory::Workshop);
        assert!(workshop.key().starts_with("workshop:"));
    }

    #[test]
    fn target_serializes_as_tagged_variant() {
        let target = CheckInTarget::Workshop {
            id: WorkshopId::from_uuid(Uuid::nil()),
        };
        let json = serde_json::to_value(target).unwrap_or_default();
        assert_eq!(json["type"], "workshop");
    }
}
