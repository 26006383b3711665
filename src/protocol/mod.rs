// ── Protocol Adapter (C2) ────────────────────────────────────────────────
// Thin abstraction over the embedded WhatsApp protocol library. The wire
// format and pairing cryptography live in that external library (out of
// scope, §1) — this module specifies and implements only the contract §4.2
// names: lifecycle operations plus a typed per-session event stream.

pub mod adapter;
pub mod events;
pub mod fake;
pub mod http_bridge;
pub mod qr;

pub use adapter::{AdapterStatus, ProtocolAdapter};
pub use events::ProtocolEvent;
pub use fake::FakeProtocolAdapter;
pub use http_bridge::{HttpBridgeAdapter, HttpBridgeConfig};
pub use qr::render_qr_base64;
