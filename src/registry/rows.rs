// Row layout of the registry table.
// Column order is fixed; the remote sheet is shared with humans who read it.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{AccessLevel, RegistrationStatus, RegistryError, UserRecord};

pub const COLUMN_COUNT: usize = 10;

/// One column of the registry table, in sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    UserId,
    DisplayName,
    Handle,
    AccessLevel,
    Status,
    SelectedPlan,
    PaymentMethod,
    ProofRef,
    JoinedAt,
    ExpiresAt,
}

impl RecordField {
    pub const ALL: [RecordField; COLUMN_COUNT] = [
        RecordField::UserId,
        RecordField::DisplayName,
        RecordField::Handle,
        RecordField::AccessLevel,
        RecordField::Status,
        RecordField::SelectedPlan,
        RecordField::PaymentMethod,
        RecordField::ProofRef,
        RecordField::JoinedAt,
        RecordField::ExpiresAt,
    ];

    /// Zero-based column index.
    pub fn column(self) -> usize {
        self as usize
    }

    pub fn header(self) -> &'static str {
        match self {
            RecordField::UserId => "user_id",
            RecordField::DisplayName => "display_name",
            RecordField::Handle => "handle",
            RecordField::AccessLevel => "access_level",
            RecordField::Status => "status",
            RecordField::SelectedPlan => "selected_plan",
            RecordField::PaymentMethod => "payment_method",
            RecordField::ProofRef => "proof_ref",
            RecordField::JoinedAt => "joined_at",
            RecordField::ExpiresAt => "expires_at",
        }
    }

    pub fn headers() -> Vec<String> {
        Self::ALL.iter().map(|field| field.header().to_string()).collect()
    }
}

pub fn encode(record: &UserRecord) -> Vec<String> {
    vec![
        record.user_id.to_string(),
        record.display_name.clone(),
        record.handle.clone(),
        record.access_level.as_str().to_string(),
        record.status.as_str().to_string(),
        record.selected_plan.clone().unwrap_or_default(),
        record.payment_method.clone().unwrap_or_default(),
        record.proof_ref.clone().unwrap_or_default(),
        record.joined_at.map(format_timestamp).unwrap_or_default(),
        record.expires_at.map(format_timestamp).unwrap_or_default(),
    ]
}

/// Decode a row. Sheets drop trailing empty cells, so short rows are padded.
pub fn decode(row: &[String]) -> Result<UserRecord, RegistryError> {
    let cell = |field: RecordField| -> &str {
        row.get(field.column()).map(|s| s.trim()).unwrap_or("")
    };
    let raw_id = cell(RecordField::UserId);
    let malformed = |reason: String| RegistryError::MalformedRow {
        user_id: raw_id.to_string(),
        reason,
    };

    let user_id = raw_id
        .parse()
        .map_err(|_| malformed("user id is not numeric".to_string()))?;
    let access_level = cell(RecordField::AccessLevel)
        .parse::<AccessLevel>()
        .map_err(|e| malformed(e.to_string()))?;
    let status = cell(RecordField::Status)
        .parse::<RegistrationStatus>()
        .map_err(|e| malformed(e.to_string()))?;
    let joined_at = parse_timestamp(cell(RecordField::JoinedAt)).map_err(malformed)?;
    let expires_at = parse_timestamp(cell(RecordField::ExpiresAt)).map_err(malformed)?;

    Ok(UserRecord {
        user_id,
        display_name: cell(RecordField::DisplayName).to_string(),
        handle: cell(RecordField::Handle).to_string(),
        access_level,
        status,
        selected_plan: optional(cell(RecordField::SelectedPlan)),
        payment_method: optional(cell(RecordField::PaymentMethod)),
        proof_ref: optional(cell(RecordField::ProofRef)),
        joined_at,
        expires_at,
    })
}

/// Reject values that would make the row undecodable.
pub fn validate_value(field: RecordField, value: &str) -> Result<(), RegistryError> {
    let invalid = || RegistryError::InvalidValue {
        field: field.header(),
        value: value.to_string(),
    };
    match field {
        RecordField::UserId => Err(invalid()),
        RecordField::AccessLevel => value.parse::<AccessLevel>().map(|_| ()).map_err(|_| invalid()),
        RecordField::Status => value
            .parse::<RegistrationStatus>()
            .map(|_| ())
            .map_err(|_| invalid()),
        RecordField::JoinedAt | RecordField::ExpiresAt => {
            parse_timestamp(value).map(|_| ()).map_err(|_| invalid())
        }
        _ => Ok(()),
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

fn optional(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}
