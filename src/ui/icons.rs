//! Shared UI icons and emojis.
//!
//! This module provides common emoji constants used across the UI components
//! for consistent visual styling.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Step lifecycle indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[~]");
pub static REPEAT: Emoji<'_, '_> = Emoji("🔁 ", "[retry]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
