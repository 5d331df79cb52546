pub mod dedup;
pub mod hasher;
pub mod scanner;

pub use dedup::{canonical_path, refresh_duplicate_groups, DedupStats};
pub use hasher::{aggregate_hash, empty_digest, hash_file, verify_hash};
pub use scanner::{path_depth, scan_root, ScanStats};
