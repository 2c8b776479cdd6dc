//! Guest status codes.
//!
//! These values are part of the guest ABI and are written verbatim into
//! request-status cells; they must never be renumbered.

/// The operation completed successfully.
pub const NONE: i32 = 0;
/// The target object could not be found.
pub const NOT_FOUND: i32 = -1;
/// Unspecified failure; host I/O errors map here at the server boundary.
pub const GENERAL: i32 = -2;
/// The operation was cancelled before completion.
pub const CANCEL: i32 = -3;
/// A resource (handle slot, chunk) could not be allocated.
pub const NO_MEMORY: i32 = -4;
/// The operation is not supported by this server or media.
pub const NOT_SUPPORTED: i32 = -5;
/// An argument was malformed or out of range.
pub const ARGUMENT: i32 = -6;
/// The supplied handle does not name a live object.
pub const BAD_HANDLE: i32 = -8;
/// Descriptor-out payload exceeded the caller-supplied maximum length.
pub const OVERFLOW: i32 = -9;
/// The target already exists.
pub const ALREADY_EXISTS: i32 = -11;
/// A path component does not exist.
pub const PATH_NOT_FOUND: i32 = -12;
/// The object is not ready to answer (e.g. an unnamed window group).
pub const NOT_READY: i32 = -18;
/// The operation conflicts with the object's access or share mode.
pub const ACCESS_DENIED: i32 = -21;
/// End of file or directory stream.
pub const EOF: i32 = -25;
/// A scheduled timeout fired before the awaited condition.
pub const TIMED_OUT: i32 = -33;
/// The requested size exceeds the permitted maximum.
pub const TOO_BIG: i32 = -40;
/// The caller lacks the capability for this operation.
pub const PERMISSION_DENIED: i32 = -46;

/// Returns a short human-readable name for a guest status code.
///
/// Unknown codes format as `status(<n>)` equivalents via the raw value;
/// only used for logging.
pub fn name(code: i32) -> &'static str {
    match code {
        NONE => "None",
        NOT_FOUND => "NotFound",
        GENERAL => "General",
        CANCEL => "Cancel",
        NO_MEMORY => "NoMemory",
        NOT_SUPPORTED => "NotSupported",
        ARGUMENT => "Argument",
        BAD_HANDLE => "BadHandle",
        OVERFLOW => "Overflow",
        ALREADY_EXISTS => "AlreadyExists",
        PATH_NOT_FOUND => "PathNotFound",
        NOT_READY => "NotReady",
        ACCESS_DENIED => "AccessDenied",
        EOF => "Eof",
        TIMED_OUT => "TimedOut",
        TOO_BIG => "TooBig",
        PERMISSION_DENIED => "PermissionDenied",
        _ => "Unknown",
    }
}
