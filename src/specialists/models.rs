//! Closed vocabularies used by the specialist capabilities.
//!
//! Each enum knows its wire names so the same list feeds the input schema
//! (`one_of`) and argument parsing.

use serde::{Deserialize, Serialize};

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $wire:tt),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Wire names, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum! {
    /// Operations of the data specialist.
    pub enum DataAction {
        ListTriangles => "list_triangles",
        Load => "load",
        Summary => "summary",
        Validate => "validate",
        Convert => "convert",
        Grain => "grain",
        LatestDiagonal => "latest_diagonal",
    }
}

named_enum! {
    /// Operations of the analysis specialist.
    pub enum AnalysisAction {
        Development => "development",
        Tail => "tail",
        Ibnr => "ibnr",
        Bootstrap => "bootstrap",
        Compare => "compare",
    }
}

named_enum! {
    pub enum TailMethod {
        Constant => "constant",
        Curve => "curve",
        Bondy => "bondy",
        Clark => "clark",
    }
}

named_enum! {
    /// Reserving methods for IBNR estimation.
    pub enum IbnrMethod {
        Chainladder => "chainladder",
        MackChainladder => "mack_chainladder",
        BornhuetterFerguson => "bornhuetterferguson",
        Benktander => "benktander",
        CapeCod => "capecod",
    }
}

named_enum! {
    pub enum PlotType {
        Heatmap => "heatmap",
        Development => "development",
        Ultimates => "ultimates",
        Residuals => "residuals",
        Comparison => "comparison",
        ActualVsExpected => "actual_vs_expected",
        DevelopmentFactors => "development_factors",
        BootstrapDistribution => "bootstrap_distribution",
        Diagnostics => "diagnostics",
    }
}

named_enum! {
    /// Age-to-age factor averaging methods.
    pub enum Average {
        Volume => "volume",
        Simple => "simple",
        Regression => "regression",
    }
}

named_enum! {
    /// Operations of the explanation specialist.
    pub enum ExplanationAction {
        Concept => "concept",
        Interpret => "interpret",
        Report => "report",
    }
}

named_enum! {
    pub enum ReportType {
        Summary => "summary",
        Detailed => "detailed",
        Executive => "executive",
    }
}

impl IbnrMethod {
    /// Known weakness of the method, quoted when interpreting results.
    pub fn limitation(&self) -> Option<&'static str> {
        match self {
            Self::Chainladder => Some(
                "The Chain Ladder method assumes that historical development patterns will continue \
                 into the future, which may not hold if there have been changes in claim handling, \
                 case reserving, or other factors.",
            ),
            Self::BornhuetterFerguson => Some(
                "The Bornhuetter-Ferguson method relies on a priori expected losses, which introduces \
                 subjectivity into the reserve estimate. The quality of the estimate depends on the \
                 accuracy of these expectations.",
            ),
            Self::MackChainladder => Some(
                "The Mack Chainladder method provides uncertainty estimates but assumes that development \
                 factors in different years are uncorrelated, which may not be realistic.",
            ),
            Self::Benktander | Self::CapeCod => None,
        }
    }
}
