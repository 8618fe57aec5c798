// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    RightSemi,
    LeftAnti,
    RightAnti,
}

impl JoinType {
    pub const ALL: [JoinType; 8] = [
        JoinType::Inner,
        JoinType::LeftOuter,
        JoinType::RightOuter,
        JoinType::FullOuter,
        JoinType::LeftSemi,
        JoinType::RightSemi,
        JoinType::LeftAnti,
        JoinType::RightAnti,
    ];

    /// True when unmatched rows of `side` are emitted padded with nulls.
    pub fn preserves(self, side: JoinSide) -> bool {
        match self {
            JoinType::LeftOuter => side == JoinSide::Left,
            JoinType::RightOuter => side == JoinSide::Right,
            JoinType::FullOuter => true,
            _ => false,
        }
    }

    /// Side whose rows are filtered by existence of a match, if any.
    pub fn semi_side(self) -> Option<JoinSide> {
        match self {
            JoinType::LeftSemi => Some(JoinSide::Left),
            JoinType::RightSemi => Some(JoinSide::Right),
            _ => None,
        }
    }

    /// Side whose rows are filtered by absence of a match, if any.
    pub fn anti_side(self) -> Option<JoinSide> {
        match self {
            JoinType::LeftAnti => Some(JoinSide::Left),
            JoinType::RightAnti => Some(JoinSide::Right),
            _ => None,
        }
    }

    pub fn is_semi_or_anti(self) -> bool {
        self.semi_side().is_some() || self.anti_side().is_some()
    }

    /// Whether output rows may carry columns from `side`.
    pub fn outputs(self, side: JoinSide) -> bool {
        match self.semi_side().or(self.anti_side()) {
            Some(only) => only == side,
            None => true,
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "INNER",
            JoinType::LeftOuter => "LEFT_OUTER",
            JoinType::RightOuter => "RIGHT_OUTER",
            JoinType::FullOuter => "FULL_OUTER",
            JoinType::LeftSemi => "LEFT_SEMI",
            JoinType::RightSemi => "RIGHT_SEMI",
            JoinType::LeftAnti => "LEFT_ANTI",
            JoinType::RightAnti => "RIGHT_ANTI",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn other(self) -> JoinSide {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }

    /// Position of this side in two-element per-side arrays.
    pub fn index(self) -> usize {
        match self {
            JoinSide::Left => 0,
            JoinSide::Right => 1,
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Left => f.write_str("left"),
            JoinSide::Right => f.write_str("right"),
        }
    }
}

/// Equality semantics of one key column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum JoinKeyCmp {
    /// SQL `=`: a null never matches, not even another null.
    #[default]
    Eq,
    /// `IS NOT DISTINCT FROM`: null matches null.
    Is,
}

impl JoinKeyCmp {
    pub fn null_safe(self) -> bool {
        matches!(self, JoinKeyCmp::Is)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_types_preserve_expected_sides() {
        assert!(JoinType::LeftOuter.preserves(JoinSide::Left));
        assert!(!JoinType::LeftOuter.preserves(JoinSide::Right));
        assert!(JoinType::FullOuter.preserves(JoinSide::Left));
        assert!(JoinType::FullOuter.preserves(JoinSide::Right));
        assert!(!JoinType::Inner.preserves(JoinSide::Left));
        assert!(!JoinType::LeftSemi.preserves(JoinSide::Left));
    }

    #[test]
    fn semi_and_anti_output_one_side() {
        assert!(JoinType::LeftSemi.outputs(JoinSide::Left));
        assert!(!JoinType::LeftSemi.outputs(JoinSide::Right));
        assert!(JoinType::RightAnti.outputs(JoinSide::Right));
        assert!(!JoinType::RightAnti.outputs(JoinSide::Left));
        assert!(JoinType::FullOuter.outputs(JoinSide::Left));
    }

    #[test]
    fn key_cmp_null_safety() {
        assert!(!JoinKeyCmp::Eq.null_safe());
        assert!(JoinKeyCmp::Is.null_safe());
        assert_eq!(JoinKeyCmp::default(), JoinKeyCmp::Eq);
    }
}
