//! Lore injection: decorator parsing and entry matching.

pub mod decorator;
pub mod matcher;

pub use decorator::{
    Decorator, DecoratorContext, DecoratorValue, InsertionPosition, ParsedContent,
    conditions_pass, insertion_position, parse_content, scan_depth,
};
pub use matcher::{LoreMatch, LoreMatcher, MatchContext, ScanOptions};
