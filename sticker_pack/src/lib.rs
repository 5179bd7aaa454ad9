//! sticker-pack - bulk sticker download and conversion
//!
//! Parses marketplace preview records, fetches each sticker into a per-pack
//! directory, converts animations through `sticker_core` and optionally
//! renders a spritesheet with a JSON descriptor.
//!
//! ```rust,ignore
//! use sticker_pack::{download_pack, parse_records, PackConfig};
//!
//! let records = parse_records(&std::fs::read_to_string("records.json")?)?;
//! let result = download_pack(records, "Moving Cats", &PackConfig::default())?;
//! println!("{}/{} saved", result.succeeded, result.total);
//! ```

pub mod errors;
pub mod layout;
pub mod pack;
pub mod records;
pub mod spritesheet;

pub use errors::{PackError, Result};
pub use layout::{sanitize_component, PackLayout, SaveLocation};
pub use pack::{collect_sources, download_pack, BatchResult, PackConfig, DEFAULT_JOBS};
pub use records::{clean_url, dedupe_by_id, parse_records, StickerKind, StickerRecord};
pub use spritesheet::{build_spritesheet, write_spritesheet, SheetDescriptor, SpriteSheet};
