/// Template matching module for locating reference images in screenshots
///
/// This module provides:
/// - Zero-mean, plain and squared-difference normalized correlation
/// - Grayscale or per-channel scoring
/// - Multi-scale retry when the 1:1 match misses
/// - Overlap suppression for multi-match queries
pub mod correlation;
pub mod matcher;
pub mod types;


pub use matcher::TemplateMatcher;
pub use types::MatchResult;
