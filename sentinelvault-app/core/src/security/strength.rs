//! Deterministic secret-strength scoring.
//!
//! Six independent checks, one point each. The same function feeds the
//! per-credential badge and the fleet-wide health histogram, so the tier
//! thresholds live here and nowhere else.

use serde::{Deserialize, Serialize};

/// Strength tier. Ordered so that `None < Weak < Medium < Strong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StrengthTier {
    /// Empty secret, nothing to score
    None,
    Weak,
    Medium,
    Strong,
}

impl StrengthTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Weak => "Weak",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
        }
    }

    /// Badge color used by the dashboard.
    pub fn color(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Weak => "#ff8c00",
            Self::Medium => "#00aaff",
            Self::Strong => "#39ff14",
        }
    }
}

impl std::fmt::Display for StrengthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthScore {
    pub tier: StrengthTier,
    pub numeric_score: u8,
}

/// Score a secret.
///
/// Points: length >= 8, length >= 12, an uppercase ASCII letter, a lowercase
/// ASCII letter, an ASCII digit, and any character outside `[A-Za-z0-9]`.
/// Fewer than 3 points is `Weak`, fewer than 5 is `Medium`, otherwise
/// `Strong`. The empty string scores `None`.
pub fn score(secret: &str) -> StrengthScore {
    if secret.is_empty() {
        return StrengthScore {
            tier: StrengthTier::None,
            numeric_score: 0,
        };
    }

    let length = secret.chars().count();
    let checks = [
        length >= 8,
        length >= 12,
        secret.chars().any(|c| c.is_ascii_uppercase()),
        secret.chars().any(|c| c.is_ascii_lowercase()),
        secret.chars().any(|c| c.is_ascii_digit()),
        secret.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    let numeric_score = checks.iter().filter(|passed| **passed).count() as u8;

    let tier = if numeric_score < 3 {
        StrengthTier::Weak
    } else if numeric_score < 5 {
        StrengthTier::Medium
    } else {
        StrengthTier::Strong
    };

    StrengthScore {
        tier,
        numeric_score,
    }
}
