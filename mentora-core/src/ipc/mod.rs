//! Types published to the UI shell.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever event bus it uses (terminal, webview, socket).

pub mod events;
