//! Key layout.
//!
//! | Key                     | Type   | Contents                    |
//! |-------------------------|--------|-----------------------------|
//! | `av`                    | string | active generation           |
//! | `dm:{gen}`              | hash   | download id → source path   |
//! | `pc:{gen}`              | hash   | download id → page HTML     |
//! | `fm:{gen}`              | hash   | file id → url               |
//! | `dfm:{gen}:{download}`  | hash   | file id → url               |
//! | `fs`                    | hash   | file id → download counter  |

use crate::Generation;

pub const SEPARATOR: char = ':';
/// Page size for every cursor-based enumeration.
pub const SCAN_COUNT: usize = 1000;

pub const ACTIVE: &str = "av";
pub const COUNTERS: &str = "fs";

pub const DOWNLOADS: &str = "dm";
pub const PAGES: &str = "pc";
pub const FILES: &str = "fm";
pub const DOWNLOAD_FILES: &str = "dfm";

/// Namespaces cleared before a generation is rewritten.
pub const GENERATION_SCOPED: [&str; 4] = [DOWNLOADS, FILES, DOWNLOAD_FILES, PAGES];

pub fn scoped(namespace: &str, generation: Generation) -> String {
    format!("{namespace}{SEPARATOR}{generation}")
}

/// Pattern matching every sub-key of a generation-scoped namespace.
pub fn scoped_children(namespace: &str, generation: Generation) -> String {
    format!("{namespace}{SEPARATOR}{generation}{SEPARATOR}*")
}

pub fn downloads(generation: Generation) -> String {
    scoped(DOWNLOADS, generation)
}

pub fn pages(generation: Generation) -> String {
    scoped(PAGES, generation)
}

pub fn files(generation: Generation) -> String {
    scoped(FILES, generation)
}

pub fn download_files(generation: Generation, download: &str) -> String {
    format!("{DOWNLOAD_FILES}{SEPARATOR}{generation}{SEPARATOR}{download}")
}
