//! Error types for parsing and layout.
//!
//! Layout errors come in two classes: structural errors that make layout of
//! the enclosing region impossible, and recoverable resolution failures that
//! only cost a single annotation (see [`LayoutError::is_recoverable`]).

use thiserror::Error;

/// Top-level error returned by the convenience entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error("MEI parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("layout failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("report serialization failed: {0}")]
    Report(#[from] serde_json::Error),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal MEI parsing errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// XML is not well-formed
    #[error("invalid XML: {0}")]
    InvalidXml(String),

    /// Root element is not `<mei>`
    #[error("unsupported root element '{0}', expected 'mei'")]
    UnsupportedRoot(String),

    /// Required structural element is missing
    #[error("missing required element: {0}")]
    MissingElement(String),
}

/// Errors raised while laying out a score.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("no staff found in measure {measure}")]
    NoStaffFound { measure: u32 },

    #[error("cannot find layer @n=\"{layer}\" in staff {staff} of measure {measure}")]
    MissingLayer { measure: u32, staff: u32, layer: u32 },

    #[error("cannot determine staff definition for staff {staff}")]
    MissingStaffDefinition { staff: u32 },

    #[error("cannot determine meter of staff {staff}; missing or incorrect @meter.count or @meter.unit")]
    InvalidMeter { staff: u32 },

    #[error("cannot compare two undefined staff definitions")]
    InvalidComparison,

    #[error("minimum width of measure {measure} must be calculated before its final width")]
    MinWidthNotCalculated { measure: u32 },

    #[error("voices must be pre-formatted before they are formatted or drawn")]
    VoicesNotPreformatted,

    #[error("invalid timestamp \"{0}\"")]
    InvalidTimestamp(String),

    #[error("no event at timestamp {tstamp} in staff {staff} of measure {measure}")]
    NoEventAtTimestamp { measure: u32, staff: u32, tstamp: f64 },
}

impl LayoutError {
    /// Whether the failure only affects a single annotation. Callers drop
    /// the annotation with a warning instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LayoutError::InvalidTimestamp(_) | LayoutError::NoEventAtTimestamp { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_fatal() {
        assert!(!LayoutError::NoStaffFound { measure: 1 }.is_recoverable());
        assert!(!LayoutError::InvalidMeter { staff: 1 }.is_recoverable());
        assert!(!LayoutError::InvalidComparison.is_recoverable());
        assert!(LayoutError::InvalidTimestamp("x".into()).is_recoverable());
    }

    #[test]
    fn messages_name_the_location() {
        let err = LayoutError::MissingLayer { measure: 3, staff: 2, layer: 1 };
        assert_eq!(
            err.to_string(),
            "cannot find layer @n=\"1\" in staff 2 of measure 3"
        );
    }
}
