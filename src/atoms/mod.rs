// ── Gateway Atoms (constants, error types, data model) ──────────────────────

pub mod error;
pub mod types;
