//
// position.rs
//
// Conversion between protocol positions (0-based) and AST locations (1-based)
//

use jsonnet_core::ast::{Location, LocationRange};
use tower_lsp::lsp_types::{Position, Range};

pub fn protocol_to_ast(position: Position) -> Location {
    Location {
        line: position.line + 1,
        column: position.character + 1,
    }
}

pub fn ast_to_protocol(location: Location) -> Position {
    Position {
        line: location.line.saturating_sub(1),
        character: location.column.saturating_sub(1),
    }
}

pub fn range_ast_to_protocol(range: &LocationRange) -> Range {
    Range {
        start: ast_to_protocol(range.begin),
        end: ast_to_protocol(range.end),
    }
}

pub fn range_protocol_to_ast(file: &str, range: Range) -> LocationRange {
    LocationRange::new(
        file.into(),
        protocol_to_ast(range.start),
        protocol_to_ast(range.end),
    )
}

/// Whether `position` lies within `range`, both ends inclusive.
pub fn range_contains(range: &Range, position: Position) -> bool {
    (range.start.line, range.start.character) <= (position.line, position.character)
        && (position.line, position.character) <= (range.end.line, range.end.character)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strict_offsets() {
        let loc = protocol_to_ast(Position::new(0, 0));
        assert_eq!((loc.line, loc.column), (1, 1));
        assert_eq!(ast_to_protocol(Location { line: 3, column: 7 }), Position::new(2, 6));
    }

    #[test]
    fn test_range_conversion() {
        let range = LocationRange::new(
            "f.jsonnet".into(),
            Location { line: 1, column: 9 },
            Location { line: 1, column: 16 },
        );
        assert_eq!(
            range_ast_to_protocol(&range),
            Range::new(Position::new(0, 8), Position::new(0, 15))
        );
    }

    #[test]
    fn test_range_contains_inclusive() {
        let range = Range::new(Position::new(1, 2), Position::new(1, 5));
        assert!(range_contains(&range, Position::new(1, 2)));
        assert!(range_contains(&range, Position::new(1, 5)));
        assert!(!range_contains(&range, Position::new(1, 6)));
        assert!(!range_contains(&range, Position::new(0, 3)));
    }

    proptest! {
        #[test]
        fn prop_protocol_ast_round_trip(line in 0u32..100_000, character in 0u32..10_000) {
            let position = Position::new(line, character);
            prop_assert_eq!(ast_to_protocol(protocol_to_ast(position)), position);
        }
    }
}
