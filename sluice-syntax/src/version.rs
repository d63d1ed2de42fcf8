//! Definition of supported WDL grammar versions.

use std::fmt;
use std::str::FromStr;

/// Represents a supported version of the WDL grammar.
///
/// The version is selected by the `version` statement on the first
/// non-comment line of a document; its absence selects [`WdlVersion::DraftTwo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum WdlVersion {
    /// The pre-1.0 `draft-2` grammar.
    DraftTwo,
    /// The WDL 1.0 grammar.
    #[default]
    One,
    /// The WDL 1.1 grammar.
    OneOne,
    /// The `development` (1.2) grammar.
    Development,
}

impl WdlVersion {
    /// Determines if `~{...}` placeholders are recognized in strings and
    /// curly command blocks.
    pub fn has_tilde_placeholders(&self) -> bool {
        *self >= Self::One
    }

    /// Determines if the `None` literal is recognized.
    pub fn has_none_literal(&self) -> bool {
        *self >= Self::OneOne
    }

    /// Determines if `after` clauses on call statements are recognized.
    pub fn has_after_clauses(&self) -> bool {
        *self >= Self::OneOne
    }

    /// Determines if tasks require an explicit `input` section for their
    /// callable inputs.
    ///
    /// In draft-2 documents, any top-level declaration of a task or workflow
    /// is a potential input.
    pub fn requires_input_section(&self) -> bool {
        *self >= Self::One
    }
}

impl fmt::Display for WdlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DraftTwo => write!(f, "draft-2"),
            Self::One => write!(f, "1.0"),
            Self::OneOne => write!(f, "1.1"),
            Self::Development => write!(f, "development"),
        }
    }
}

impl FromStr for WdlVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft-2" => Ok(Self::DraftTwo),
            "1.0" => Ok(Self::One),
            "1.1" => Ok(Self::OneOne),
            "1.2" | "development" => Ok(Self::Development),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ordering() {
        assert!(WdlVersion::DraftTwo < WdlVersion::One);
        assert!(WdlVersion::One < WdlVersion::OneOne);
        assert!(WdlVersion::OneOne < WdlVersion::Development);
    }

    #[test]
    fn parsing() {
        assert_eq!("draft-2".parse(), Ok(WdlVersion::DraftTwo));
        assert_eq!("1.0".parse(), Ok(WdlVersion::One));
        assert_eq!("1.1".parse(), Ok(WdlVersion::OneOne));
        assert_eq!("development".parse(), Ok(WdlVersion::Development));
        assert_eq!("1.2".parse(), Ok(WdlVersion::Development));
        assert_eq!(WdlVersion::from_str("2.0"), Err(()));
    }

    #[test]
    fn gating() {
        assert!(!WdlVersion::DraftTwo.has_tilde_placeholders());
        assert!(WdlVersion::One.has_tilde_placeholders());
        assert!(!WdlVersion::One.has_none_literal());
        assert!(WdlVersion::OneOne.has_none_literal());
        assert!(WdlVersion::Development.has_after_clauses());
    }
}
