//! Design-time resource caps (spec §5/§9). These are not configuration --
//! tests assert boundedness, never the literal values.

/// Ceiling on any single in-memory payload copy (TLS template, resource leaf,
/// signature blob, ...).
pub const MAX_DATA_SIZE: usize = 100 * 1024 * 1024;

/// Ceiling on the number of TLS callback RVAs walked when no zero terminator
/// is found.
pub const MAX_TLS_CALLBACKS: usize = 4096;

/// Ceiling on resource-directory recursion depth. A legitimate PE resource
/// tree is type/name/language, i.e. depth 3; 8 leaves ample headroom while
/// rejecting cyclic or adversarially deep trees.
pub const MAX_RESOURCE_DEPTH: usize = 8;

/// Canonical PE data-directory slot count.
pub const NUM_DATA_DIRECTORIES: usize = 16;
