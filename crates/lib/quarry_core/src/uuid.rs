// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Session and audit identifiers benefit from time-ordering; credential
// `jti` values use v4 so issuance time is not recoverable from the id.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a new random UUIDv4.
pub fn uuidv4() -> Uuid {
    Uuid::new_v4()
}
