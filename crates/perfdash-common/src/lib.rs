//! Shared domain types for the perfdash alert service.
//!
//! [`types::AlertRecord`] is the stored shape of a detected regression or
//! improvement, [`types::AlertFilter`] the typed conjunction of filters a
//! query applies to it, and [`cursor::Cursor`] the versioned continuation
//! token handed out between pages.

pub mod cursor;
pub mod types;
