/// Windows a single landlord may configure in one `set_availability` call.
pub const MAX_WINDOWS_PER_LANDLORD: usize = 64;

/// Byte length of tenant or landlord notes.
pub const MAX_NOTES_LEN: usize = 2_000;

/// Slot-holding appointments per apartment. Cancelled and Rejected history is not counted.
pub const MAX_ACTIVE_APPOINTMENTS_PER_APARTMENT: usize = 10_000;

/// Longest accepted line on the wire, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
